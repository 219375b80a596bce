//! Cache tier interfaces.
//!
//! The local tier stores entries in-process, keyed by [`ContextKey`]. The distributed tier
//! stores serialized entries under the key's canonical string and is reached asynchronously.

use crate::cache::entry::CachedContextResult;
use crate::error::CacheError;
use crate::key::ContextKey;
use async_trait::async_trait;
use std::time::Duration;

/// Expiration settings for a local entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEntryOptions {
    /// Lifetime from now.
    pub absolute_expiration: Duration,
    /// Evict when not read for this long.
    pub sliding_expiration: Option<Duration>,
    /// Size charged against the tier's limit.
    pub size: Option<u64>,
}

/// Expiration settings for a distributed entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DistributedEntryOptions {
    /// Lifetime from now.
    pub absolute_expiration: Duration,
    /// Evict when not read for this long.
    pub sliding_expiration: Option<Duration>,
}

/// In-process cache tier.
pub trait LocalCacheTier: Send + Sync {
    fn try_get(&self, key: &ContextKey) -> Option<CachedContextResult>;

    fn set(&self, key: &ContextKey, entry: CachedContextResult, options: LocalEntryOptions);
}

/// Network-backed cache tier.
#[async_trait]
pub trait DistributedCacheTier: Send + Sync {
    async fn get_string(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_string(
        &self,
        key: &str,
        value: String,
        options: DistributedEntryOptions,
    ) -> Result<(), CacheError>;
}
