//! Resolution engine
//!
//! [`ContextResolver`] is the entry point; it owns a session shared by everything one engine
//! instance resolves. Each key being resolved gets a child [`Resolver`] that remembers the
//! chain of keys above it, and that child is what sources receive to request further
//! context.
//!
//! Within a session every key is computed at most once at a time: concurrent requests join
//! the in-flight computation. Completed computations stay in the session, so a long-lived
//! engine answers repeated requests without asking its sources again; use
//! [`ContextResolver::fresh_session`] for fresh results.
//!
//! Cycles are caught two ways. A key already in the requester's own chain fails at once. A
//! key being computed by a sibling branch fails if joining it would wait on the requester,
//! which is tracked in a wait-for graph between in-flight keys.

use crate::cache::{DistributedCacheTier, TieredCache};
use crate::config::ResolutionConfig;
use crate::error::ResolutionError;
use crate::instruction::CacheInstruction;
use crate::key::ContextKey;
use crate::name::ContextType;
use crate::result::ContextResult;
use crate::source::SourceRegistry;
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type SharedResolution = Shared<BoxFuture<'static, Result<ContextResult, ResolutionError>>>;

#[derive(Clone)]
struct InFlight {
    future: SharedResolution,
    cancel: CancellationToken,
    /// Callers currently awaiting `future`.
    waiters: Arc<AtomicUsize>,
}

impl InFlight {
    fn is_same(&self, other: &InFlight) -> bool {
        Arc::ptr_eq(&self.waiters, &other.waiters)
    }
}

#[derive(Default)]
struct SessionState {
    in_flight: HashMap<ContextKey, InFlight>,
    /// Requesting key -> keys it is waiting on, with the number of waits.
    waits: HashMap<ContextKey, HashMap<ContextKey, usize>>,
}

impl SessionState {
    /// Whether `from` waits, directly or transitively, on `to`.
    fn waits_on(&self, from: &ContextKey, to: &ContextKey) -> bool {
        let mut seen = HashSet::new();
        let mut pending = vec![from];
        while let Some(current) = pending.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(targets) = self.waits.get(current) {
                pending.extend(targets.keys());
            }
        }
        false
    }

    fn add_wait(&mut self, from: &ContextKey, to: &ContextKey) {
        *self
            .waits
            .entry(from.clone())
            .or_default()
            .entry(to.clone())
            .or_default() += 1;
    }

    fn remove_wait(&mut self, from: &ContextKey, to: &ContextKey) {
        let Some(targets) = self.waits.get_mut(from) else {
            return;
        };
        if let Some(count) = targets.get_mut(to) {
            *count -= 1;
            if *count == 0 {
                targets.remove(to);
            }
        }
        if targets.is_empty() {
            self.waits.remove(from);
        }
    }
}

struct Session {
    sources: Arc<SourceRegistry>,
    cache: Option<Arc<TieredCache>>,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(sources: Arc<SourceRegistry>, cache: Option<Arc<TieredCache>>) -> Arc<Self> {
        Arc::new(Self {
            sources,
            cache,
            state: Mutex::new(SessionState::default()),
        })
    }
}

/// Removes a wait-for edge when the waiting request finishes.
struct WaitGuard {
    session: Arc<Session>,
    from: ContextKey,
    to: ContextKey,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.session.state.lock().remove_wait(&self.from, &self.to);
    }
}

/// A caller awaiting an in-flight computation.
///
/// When the last caller leaves a computation that has not finished, the computation is
/// removed from the session and dropped; it holds the session through its child resolver.
struct JoinGuard {
    session: Arc<Session>,
    key: ContextKey,
    entry: InFlight,
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        let abandoned = {
            let mut state = self.session.state.lock();
            let remaining = self.entry.waiters.fetch_sub(1, Ordering::SeqCst) - 1;
            let is_current = state
                .in_flight
                .get(&self.key)
                .is_some_and(|current| current.is_same(&self.entry));
            if remaining == 0 && is_current && self.entry.future.peek().is_none() {
                state.in_flight.remove(&self.key)
            } else {
                None
            }
        };
        // Dropped outside the lock: the computation may own guards of nested requests.
        if abandoned.is_some() {
            debug!(context_key = %self.key, "Dropping abandoned resolution");
        }
        drop(abandoned);
    }
}

/// Handle for resolving context within a session.
///
/// The root handle has an empty chain; sources receive a child whose chain ends with the key
/// they are filling.
#[derive(Clone)]
pub struct Resolver {
    session: Arc<Session>,
    chain: Arc<[ContextKey]>,
}

impl Resolver {
    fn root(session: Arc<Session>) -> Self {
        Self {
            session,
            chain: Arc::from(Vec::new()),
        }
    }

    fn child(&self, key: &ContextKey) -> Self {
        let mut chain = self.chain.to_vec();
        chain.push(key.clone());
        Self {
            session: self.session.clone(),
            chain: chain.into(),
        }
    }

    /// Keys being resolved above this handle, outermost first.
    pub fn chain(&self) -> &[ContextKey] {
        &self.chain
    }

    /// Resolve a typed context identified by `request`.
    pub async fn resolve_typed<T: ContextType>(
        &self,
        request: &T,
        require_source: bool,
        cancel: CancellationToken,
    ) -> Result<T, ResolutionError> {
        let key = ContextKey::from_typed(request)?;
        self.resolve_key(&key, require_source, cancel)
            .await?
            .get_typed()
    }

    /// Resolve a context by name, with an optional identifying value.
    pub async fn resolve_named(
        &self,
        name: &str,
        id: Option<Value>,
        require_source: bool,
        cancel: CancellationToken,
    ) -> Result<Value, ResolutionError> {
        let key = ContextKey::from_named(name, id)?;
        self.resolve_key(&key, require_source, cancel)
            .await?
            .get_result()
    }

    /// Resolve a key to its combined result.
    pub async fn resolve_key(
        &self,
        key: &ContextKey,
        require_source: bool,
        cancel: CancellationToken,
    ) -> Result<ContextResult, ResolutionError> {
        debug!(context_key = %key, require_source, "Getting or creating context");

        if self.chain.contains(key) {
            return Err(ResolutionError::CircularDependency {
                path: self.chain.to_vec(),
                requested: key.clone(),
            });
        }
        if cancel.is_cancelled() {
            return Err(ResolutionError::Cancelled);
        }
        if require_source && !key.name().is_bound() && !self.session.sources.has_named_sources() {
            return Err(ResolutionError::NameNotFound(key.name().to_string()));
        }

        let lookup = async {
            match &self.session.cache {
                Some(cache) => {
                    let token = cancel.clone();
                    cache
                        .get_or_create(key, move || self.invoke_deduplicated(key, token))
                        .await
                }
                None => self.invoke_deduplicated(key, cancel.clone()).await,
            }
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolutionError::Cancelled),
            result = lookup => result,
        }?;

        if require_source && !result.is_found() {
            return Err(ResolutionError::SourceNotFound(result.name().clone()));
        }
        Ok(result)
    }

    /// Join the in-flight computation for `key`, or start one.
    async fn invoke_deduplicated(
        &self,
        key: &ContextKey,
        cancel: CancellationToken,
    ) -> Result<ContextResult, ResolutionError> {
        loop {
            let (join, _wait) = self.join_or_start(key, &cancel)?;
            match join.entry.future.clone().await {
                Err(ResolutionError::Cancelled)
                    if join.entry.cancel.is_cancelled() && !cancel.is_cancelled() =>
                {
                    debug!(context_key = %key, "Joined resolution was cancelled; restarting");
                }
                outcome => return outcome,
            }
        }
    }

    fn join_or_start(
        &self,
        key: &ContextKey,
        cancel: &CancellationToken,
    ) -> Result<(JoinGuard, Option<WaitGuard>), ResolutionError> {
        let mut state = self.session.state.lock();
        let requester = self.chain.last();

        let entry = match state.in_flight.get(key) {
            Some(existing) if !existing.cancel.is_cancelled() => {
                if let Some(requester) = requester {
                    if state.waits_on(key, requester) {
                        return Err(ResolutionError::CircularDependency {
                            path: self.chain.to_vec(),
                            requested: key.clone(),
                        });
                    }
                }
                debug!(context_key = %key, "Reusing result from prior invocation");
                existing.clone()
            }
            _ => {
                let entry = InFlight {
                    future: compute(self.child(key), key.clone(), cancel.clone())
                        .boxed()
                        .shared(),
                    cancel: cancel.clone(),
                    waiters: Arc::new(AtomicUsize::new(0)),
                };
                state.in_flight.insert(key.clone(), entry.clone());
                entry
            }
        };
        entry.waiters.fetch_add(1, Ordering::SeqCst);
        let join = JoinGuard {
            session: self.session.clone(),
            key: key.clone(),
            entry,
        };

        let wait = requester.map(|requester| {
            state.add_wait(requester, key);
            WaitGuard {
                session: self.session.clone(),
                from: requester.clone(),
                to: key.clone(),
            }
        });
        Ok((join, wait))
    }
}

/// Invoke every source for `key` and combine what they return.
async fn compute(
    resolver: Resolver,
    key: ContextKey,
    cancel: CancellationToken,
) -> Result<ContextResult, ResolutionError> {
    let work = async {
        info!(context_key = %key, "Invoking context sources");
        let (typed, named) = tokio::try_join!(
            invoke_typed(&resolver, &key, &cancel),
            invoke_named(&resolver, &key, &cancel),
        )?;

        let mut results = Vec::with_capacity(named.len() + 1);
        results.extend(typed);
        results.extend(named);
        info!(
            context_key = %key,
            result_count = results.len(),
            "Invocation resulted in context results to combine"
        );
        ContextResult::combine(key.name(), results)
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ResolutionError::Cancelled),
        result = work => result,
    }
}

/// Typed sources all fill the same request; the request and their patches form one result.
async fn invoke_typed(
    resolver: &Resolver,
    key: &ContextKey,
    cancel: &CancellationToken,
) -> Result<Option<ContextResult>, ResolutionError> {
    let Some(bound) = key.name().bound_type() else {
        return Ok(None);
    };
    let sources = resolver.session.sources.typed_sources(bound);
    if sources.is_empty() {
        return Ok(None);
    }

    debug!(context_key = %key, source_count = sources.len(), "Invoking typed sources");
    let fills = try_join_all(
        sources
            .iter()
            .map(|source| source.fill(key.id(), resolver, cancel.clone())),
    )
    .await?;

    let cache_instruction = CacheInstruction::combine(fills.iter().map(|f| f.cache_instruction));
    let partials = std::iter::once(key.id().clone())
        .chain(fills.into_iter().map(|f| f.patch).filter(|p| !p.is_null()))
        .collect();
    Ok(Some(ContextResult::from_partials(
        key.name().clone(),
        partials,
        cache_instruction,
    )))
}

/// Named sources each answer independently; every answer must match the requested name.
async fn invoke_named(
    resolver: &Resolver,
    key: &ContextKey,
    cancel: &CancellationToken,
) -> Result<Vec<ContextResult>, ResolutionError> {
    let sources = resolver.session.sources.named_sources();
    if sources.is_empty() {
        return Ok(Vec::new());
    }

    debug!(context_key = %key, source_count = sources.len(), "Invoking named sources");
    let answers = try_join_all(sources.iter().map(|source| async move {
        let results = source
            .resolve(key, resolver, cancel.clone())
            .await
            .map_err(|e| ResolutionError::from_source(source.name(), e))?;

        if let Some(foreign) = results.iter().find(|r| !key.name().matches(r.name())) {
            return Err(ResolutionError::InvalidArgument(format!(
                "Context source '{}' returned a result for '{}' when asked for '{}'",
                source.name(),
                foreign.name(),
                key.name()
            )));
        }
        Ok::<_, ResolutionError>(results)
    }))
    .await?;

    Ok(answers.into_iter().flatten().collect())
}

/// Entry point of the resolution engine.
#[derive(Clone)]
pub struct ContextResolver {
    sources: Arc<SourceRegistry>,
    cache: Option<Arc<TieredCache>>,
    root: Resolver,
}

impl ContextResolver {
    /// Resolver without a cache.
    pub fn new(sources: Arc<SourceRegistry>) -> Self {
        Self::build(sources, None)
    }

    /// Resolver with a cache in front of its sources.
    pub fn with_cache(sources: Arc<SourceRegistry>, cache: Arc<TieredCache>) -> Self {
        Self::build(sources, Some(cache))
    }

    /// Resolver with the cache described by `config`.
    ///
    /// The local tier is in-process; `distributed` is required if the configuration enables it.
    pub fn from_config(
        sources: Arc<SourceRegistry>,
        config: &ResolutionConfig,
        distributed: Option<Arc<dyn DistributedCacheTier>>,
    ) -> Result<Self, ResolutionError> {
        config
            .cache
            .validate()
            .map_err(|e| ResolutionError::Config(format!("Invalid cache options: {}", e)))?;

        let options = &config.cache;
        if options.use_distributed_cache && distributed.is_none() {
            return Err(ResolutionError::Config(
                "Distributed cache is enabled but no distributed tier was supplied".to_string(),
            ));
        }
        if !options.use_local_cache && !options.use_distributed_cache {
            return Ok(Self::new(sources));
        }
        let cache = TieredCache::from_options(options.clone(), distributed);
        Ok(Self::with_cache(sources, Arc::new(cache)))
    }

    fn build(sources: Arc<SourceRegistry>, cache: Option<Arc<TieredCache>>) -> Self {
        let root = Resolver::root(Session::new(sources.clone(), cache.clone()));
        Self {
            sources,
            cache,
            root,
        }
    }

    /// Same sources and cache, empty session.
    pub fn fresh_session(&self) -> Self {
        Self::build(self.sources.clone(), self.cache.clone())
    }

    /// Root handle of the current session.
    pub fn resolver(&self) -> &Resolver {
        &self.root
    }

    pub async fn resolve_typed<T: ContextType>(
        &self,
        request: &T,
        require_source: bool,
        cancel: CancellationToken,
    ) -> Result<T, ResolutionError> {
        self.root.resolve_typed(request, require_source, cancel).await
    }

    pub async fn resolve_named(
        &self,
        name: &str,
        id: Option<Value>,
        require_source: bool,
        cancel: CancellationToken,
    ) -> Result<Value, ResolutionError> {
        self.root.resolve_named(name, id, require_source, cancel).await
    }

    pub async fn resolve_key(
        &self,
        key: &ContextKey,
        require_source: bool,
        cancel: CancellationToken,
    ) -> Result<ContextResult, ResolutionError> {
        self.root.resolve_key(key, require_source, cancel).await
    }
}
