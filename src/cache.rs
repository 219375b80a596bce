//! Tiered Cache
//!
//! Optional local and distributed tiers in front of the resolver. A lookup checks the local
//! tier, then the distributed tier, then runs the factory. Each tier stores an entry only
//! while the result's cache instruction leaves it lifetime at its current age, so a result
//! served from the distributed tier is copied into the local tier for what remains of it.

pub mod clock;
pub mod entry;
pub mod memory;
pub mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::CachedContextResult;
pub use memory::MemoryCache;
pub use tier::{DistributedCacheTier, DistributedEntryOptions, LocalCacheTier, LocalEntryOptions};

use crate::config::CacheOptions;
use crate::error::ResolutionError;
use crate::key::ContextKey;
use crate::result::ContextResult;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Local and distributed tiers with instruction-driven expiry.
pub struct TieredCache {
    options: CacheOptions,
    local: Option<Arc<dyn LocalCacheTier>>,
    distributed: Option<Arc<dyn DistributedCacheTier>>,
    clock: Arc<dyn Clock>,
}

impl TieredCache {
    /// Tiers are used only when enabled in `options`.
    pub fn new(
        options: CacheOptions,
        local: Option<Arc<dyn LocalCacheTier>>,
        distributed: Option<Arc<dyn DistributedCacheTier>>,
    ) -> Self {
        let local = local.filter(|_| options.use_local_cache);
        let distributed = distributed.filter(|_| options.use_distributed_cache);
        if options.use_distributed_cache && distributed.is_none() {
            warn!("Distributed cache enabled without a distributed tier");
        }
        Self {
            options,
            local,
            distributed,
            clock: Arc::new(SystemClock),
        }
    }

    /// Cache whose local tier is a [`MemoryCache`] sharing `clock`.
    pub fn in_memory(options: CacheOptions, clock: Arc<dyn Clock>) -> Self {
        let local: Arc<dyn LocalCacheTier> =
            Arc::new(MemoryCache::from_options(&options, clock.clone()));
        Self::new(options, Some(local), None).with_clock(clock)
    }

    /// Cache built from options: an in-process local tier, and `distributed` if given.
    pub fn from_options(
        options: CacheOptions,
        distributed: Option<Arc<dyn DistributedCacheTier>>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let local: Arc<dyn LocalCacheTier> =
            Arc::new(MemoryCache::from_options(&options, clock.clone()));
        Self::new(options, Some(local), distributed).with_clock(clock)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Return the cached result for `key`, or create, store and return it.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &ContextKey,
        factory: F,
    ) -> Result<ContextResult, ResolutionError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<ContextResult, ResolutionError>> + Send,
    {
        if let Some(local) = &self.local {
            if let Some(hit) = local.try_get(key) {
                debug!(context_key = %key, "Found result in local cache");
                return Ok(hit.into_result());
            }
        }

        let entry = self.distributed_get_or_create(key, factory).await?;

        if let Some(local) = &self.local {
            self.store_local(local.as_ref(), key, &entry)?;
        }

        Ok(entry.into_result())
    }

    async fn distributed_get_or_create<F, Fut>(
        &self,
        key: &ContextKey,
        factory: F,
    ) -> Result<CachedContextResult, ResolutionError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<ContextResult, ResolutionError>> + Send,
    {
        let Some(distributed) = &self.distributed else {
            return self.create(factory).await;
        };

        if let Some(raw) = distributed.get_string(key.key()).await? {
            match CachedContextResult::from_json(&raw) {
                Ok(entry) if !entry.distributed_expiration_at(self.clock.now()).is_zero() => {
                    info!(context_key = %key, "Found result in distributed cache");
                    return Ok(entry);
                }
                Ok(_) => debug!(context_key = %key, "Distributed entry outlived its instruction"),
                Err(e) => warn!(context_key = %key, error = %e, "Ignoring unreadable distributed entry"),
            }
        }

        let entry = self.create(factory).await?;
        let expiration = entry.distributed_expiration_at(self.clock.now());
        if !expiration.is_zero() && is_storable(key, &entry) {
            let options = DistributedEntryOptions {
                absolute_expiration: expiration,
                sliding_expiration: self.options.distributed_sliding_expiration(),
            };
            distributed
                .set_string(key.key(), entry.to_json()?, options)
                .await?;
            info!(
                context_key = %key,
                expiration_secs = expiration.as_secs_f64(),
                "Added result to distributed cache"
            );
        }

        Ok(entry)
    }

    async fn create<F, Fut>(&self, factory: F) -> Result<CachedContextResult, ResolutionError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<ContextResult, ResolutionError>> + Send,
    {
        let result = factory().await?;
        Ok(CachedContextResult::new(result, self.clock.now()))
    }

    fn store_local(
        &self,
        local: &dyn LocalCacheTier,
        key: &ContextKey,
        entry: &CachedContextResult,
    ) -> Result<(), ResolutionError> {
        let expiration = entry.local_expiration_at(self.clock.now());
        if expiration.is_zero() || !is_storable(key, entry) {
            return Ok(());
        }

        let size = match self.options.local_size_limit {
            Some(_) => Some(entry.to_json()?.len() as u64),
            None => None,
        };
        local.set(
            key,
            entry.clone(),
            LocalEntryOptions {
                absolute_expiration: expiration,
                sliding_expiration: self.options.local_sliding_expiration(),
                size,
            },
        );
        info!(
            context_key = %key,
            expiration_secs = expiration.as_secs_f64(),
            "Added result to local cache"
        );
        Ok(())
    }
}

/// Only results whose value coerces are stored; the caller still sees the coercion error
/// when it asks for the value.
fn is_storable(key: &ContextKey, entry: &CachedContextResult) -> bool {
    match entry.result().get_result() {
        Ok(_) => true,
        Err(e) => {
            debug!(context_key = %key, error = %e, "Not caching result that cannot be coerced");
            false
        }
    }
}
