//! In-process local cache tier.

use crate::cache::clock::{elapsed, Clock, SystemClock};
use crate::cache::entry::CachedContextResult;
use crate::cache::tier::{LocalCacheTier, LocalEntryOptions};
use crate::config::CacheOptions;
use crate::key::ContextKey;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

struct MemoryEntry {
    value: CachedContextResult,
    expires_at: DateTime<Utc>,
    sliding: Option<Duration>,
    last_access: DateTime<Utc>,
    size: u64,
}

impl MemoryEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if now >= self.expires_at {
            return true;
        }
        self.sliding
            .is_some_and(|sliding| elapsed(self.last_access, now) >= sliding)
    }
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<ContextKey, MemoryEntry>,
    size: u64,
}

impl MemoryState {
    fn remove(&mut self, key: &ContextKey) {
        if let Some(entry) = self.entries.remove(key) {
            self.size = self.size.saturating_sub(entry.size);
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<ContextKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }
}

/// Local tier backed by a hash map, with absolute and sliding expiry and an optional size
/// limit. Expired entries are dropped when they are next touched.
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    size_limit: Option<u64>,
    state: Mutex<MemoryState>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            size_limit: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn with_size_limit(mut self, size_limit: Option<u64>) -> Self {
        self.size_limit = size_limit;
        self
    }

    pub fn from_options(options: &CacheOptions, clock: Arc<dyn Clock>) -> Self {
        Self::new(clock).with_size_limit(options.local_size_limit)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.purge_expired(now);
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size charged by live entries.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.size = 0;
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl LocalCacheTier for MemoryCache {
    fn try_get(&self, key: &ContextKey) -> Option<CachedContextResult> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let expired = state.entries.get(key)?.is_expired(now);
        if expired {
            debug!(context_key = %key, "Evicting expired local entry");
            state.remove(key);
            return None;
        }

        let entry = state.entries.get_mut(key)?;
        entry.last_access = now;
        Some(entry.value.clone())
    }

    fn set(&self, key: &ContextKey, entry: CachedContextResult, options: LocalEntryOptions) {
        let now = self.clock.now();
        let Some(expires_at) = chrono::Duration::from_std(options.absolute_expiration)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
        else {
            warn!(context_key = %key, "Local expiration out of range; entry not stored");
            return;
        };

        let size = options.size.unwrap_or(0);
        let mut state = self.state.lock();
        state.remove(key);
        state.purge_expired(now);

        if let Some(limit) = self.size_limit {
            if state.size.saturating_add(size) > limit {
                warn!(
                    context_key = %key,
                    entry_size = size,
                    cache_size = state.size,
                    size_limit = limit,
                    "Local cache is full; entry not stored"
                );
                return;
            }
        }

        state.size += size;
        state.entries.insert(
            key.clone(),
            MemoryEntry {
                value: entry,
                expires_at,
                sliding: options.sliding_expiration,
                last_access: now,
                size,
            },
        );
    }
}
