//! Integration tests for the tiered cache in front of the resolver

use super::test_utils::*;
use context_resolution::cache::{
    DistributedCacheTier, LocalCacheTier, ManualClock, MemoryCache,
};
use context_resolution::{
    CacheInstruction, CacheOptions, CancellationToken, ContextKey, ContextResolver, ErrorKind,
    SourceRegistry, TieredCache,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn local_only() -> CacheOptions {
    CacheOptions::default()
}

fn distributed_only() -> CacheOptions {
    CacheOptions {
        use_local_cache: false,
        use_distributed_cache: true,
        ..CacheOptions::default()
    }
}

fn both_tiers() -> CacheOptions {
    CacheOptions {
        use_distributed_cache: true,
        local_sliding_expiration_secs: None,
        ..CacheOptions::default()
    }
}

fn pets_source(name: &str, instruction: CacheInstruction, calls: &Calls) -> Arc<SourceRegistry> {
    Arc::new(SourceRegistry::new().with_named(StubNamedSource::new(
        name,
        NamedBehavior::Answer(json!({ "pets": ["rex"] }), instruction),
        calls,
    )))
}

fn tiered(
    options: CacheOptions,
    clock: &Arc<ManualClock>,
    distributed: Option<Arc<InMemoryDistributedCache>>,
) -> Arc<TieredCache> {
    let local: Arc<dyn LocalCacheTier> = Arc::new(
        MemoryCache::new(clock.clone()).with_size_limit(options.local_size_limit),
    );
    let distributed = distributed.map(|d| d as Arc<dyn DistributedCacheTier>);
    Arc::new(TieredCache::new(options, Some(local), distributed).with_clock(clock.clone()))
}

async fn resolve(resolver: &ContextResolver, name: &str) -> Value {
    resolver
        .fresh_session()
        .resolve_named(name, Some(json!({ "owner": "o-1" })), true, CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_local_entry_lives_as_long_as_instruction() {
    let calls = Calls::default();
    let clock = Arc::new(ManualClock::default());
    let resolver = ContextResolver::with_cache(
        pets_source("tiered-local", minutes(1), &calls),
        tiered(local_only(), &clock, None),
    );

    resolve(&resolver, "tiered-local").await;
    clock.advance(Duration::from_secs(30));
    resolve(&resolver, "tiered-local").await;
    clock.advance(Duration::from_secs(29));
    resolve(&resolver, "tiered-local").await;
    assert_eq!(calls.count(), 1);

    clock.advance(Duration::from_secs(1));
    let value = resolve(&resolver, "tiered-local").await;
    assert_eq!(value, json!({ "pets": ["rex"] }));
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn test_transient_results_are_never_cached() {
    let calls = Calls::default();
    let clock = Arc::new(ManualClock::default());
    let distributed = Arc::new(InMemoryDistributedCache::default());
    let resolver = ContextResolver::with_cache(
        pets_source("tiered-transient", CacheInstruction::Transient, &calls),
        tiered(both_tiers(), &clock, Some(distributed.clone())),
    );

    for _ in 0..3 {
        resolve(&resolver, "tiered-transient").await;
    }
    assert_eq!(calls.count(), 3);
    assert_eq!(distributed.sets.count(), 0);
    assert_eq!(distributed.len(), 0);
}

#[tokio::test]
async fn test_distributed_entry_format_and_hit() {
    let calls = Calls::default();
    let clock = Arc::new(ManualClock::default());
    let distributed = Arc::new(InMemoryDistributedCache::default());
    let resolver = ContextResolver::with_cache(
        pets_source("tiered-shared", minutes(5), &calls),
        tiered(distributed_only(), &clock, Some(distributed.clone())),
    );

    resolve(&resolver, "tiered-shared").await;

    let key = ContextKey::from_named("tiered-shared", Some(json!({ "owner": "o-1" }))).unwrap();
    let raw = distributed.raw(key.key()).expect("stored under the canonical key");
    let stored: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored["n"], json!("tiered-shared"));
    assert_eq!(stored["i"], json!("300 seconds"));
    assert_eq!(stored["r"], json!({ "pets": ["rex"] }));
    assert!(stored["t"].is_string());

    let options = (*distributed.last_options.lock()).expect("options recorded");
    assert_eq!(options.absolute_expiration, Duration::from_secs(300));
    assert_eq!(options.sliding_expiration, Some(Duration::from_secs(900)));

    clock.advance(Duration::from_secs(120));
    let value = resolve(&resolver, "tiered-shared").await;
    assert_eq!(value, json!({ "pets": ["rex"] }));
    assert_eq!(calls.count(), 1);
    assert_eq!(distributed.sets.count(), 1);
}

#[tokio::test]
async fn test_distributed_hit_backfills_local_tier() {
    let calls = Calls::default();
    let clock = Arc::new(ManualClock::default());
    let distributed = Arc::new(InMemoryDistributedCache::default());
    let sources = pets_source("tiered-backfill", minutes(5), &calls);

    let first = ContextResolver::with_cache(
        sources.clone(),
        tiered(both_tiers(), &clock, Some(distributed.clone())),
    );
    let second = ContextResolver::with_cache(
        sources,
        tiered(both_tiers(), &clock, Some(distributed.clone())),
    );

    resolve(&first, "tiered-backfill").await;
    assert_eq!(distributed.gets.count(), 1);

    clock.advance(Duration::from_secs(20));
    resolve(&second, "tiered-backfill").await;
    assert_eq!(calls.count(), 1);
    assert_eq!(distributed.gets.count(), 2);

    // Served from the second instance's local tier from now on
    resolve(&second, "tiered-backfill").await;
    assert_eq!(distributed.gets.count(), 2);

    // The backfilled copy expires with the original entry, not 5 minutes after the backfill
    clock.advance(Duration::from_secs(279));
    resolve(&second, "tiered-backfill").await;
    assert_eq!(distributed.gets.count(), 2);

    clock.advance(Duration::from_secs(1));
    resolve(&second, "tiered-backfill").await;
    assert_eq!(distributed.gets.count(), 3);
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn test_distributed_entry_expires_by_age() {
    let calls = Calls::default();
    let clock = Arc::new(ManualClock::default());
    let distributed = Arc::new(InMemoryDistributedCache::default());
    let resolver = ContextResolver::with_cache(
        pets_source("tiered-aging", minutes(1), &calls),
        tiered(distributed_only(), &clock, Some(distributed.clone())),
    );

    resolve(&resolver, "tiered-aging").await;
    clock.advance(Duration::from_secs(61));
    resolve(&resolver, "tiered-aging").await;

    assert_eq!(calls.count(), 2);
    assert_eq!(distributed.sets.count(), 2);
}

#[tokio::test]
async fn test_unreadable_distributed_entry_is_a_miss() {
    let calls = Calls::default();
    let clock = Arc::new(ManualClock::default());
    let distributed = Arc::new(InMemoryDistributedCache::default());
    let key = ContextKey::from_named("tiered-garbled", Some(json!({ "owner": "o-1" }))).unwrap();
    distributed
        .set_string(key.key(), "not a cache entry".to_string(), Default::default())
        .await
        .unwrap();

    let resolver = ContextResolver::with_cache(
        pets_source("tiered-garbled", minutes(5), &calls),
        tiered(distributed_only(), &clock, Some(distributed.clone())),
    );
    let value = resolve(&resolver, "tiered-garbled").await;

    assert_eq!(value, json!({ "pets": ["rex"] }));
    assert_eq!(calls.count(), 1);
    let raw = distributed.raw(key.key()).unwrap();
    assert!(raw.starts_with('{'));
}

#[tokio::test]
async fn test_size_limit_keeps_large_entries_out() {
    let calls = Calls::default();
    let clock = Arc::new(ManualClock::default());
    let options = CacheOptions {
        local_size_limit: Some(16),
        ..CacheOptions::default()
    };
    let resolver = ContextResolver::with_cache(
        pets_source("tiered-oversized", minutes(5), &calls),
        tiered(options, &clock, None),
    );

    resolve(&resolver, "tiered-oversized").await;
    resolve(&resolver, "tiered-oversized").await;
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn test_disabled_cache_always_invokes_sources() {
    let calls = Calls::default();
    let clock = Arc::new(ManualClock::default());
    let distributed = Arc::new(InMemoryDistributedCache::default());
    let resolver = ContextResolver::with_cache(
        pets_source("tiered-disabled", minutes(5), &calls),
        tiered(CacheOptions::disabled(), &clock, Some(distributed.clone())),
    );

    resolve(&resolver, "tiered-disabled").await;
    resolve(&resolver, "tiered-disabled").await;
    assert_eq!(calls.count(), 2);
    assert_eq!(distributed.gets.count(), 0);
}

#[tokio::test]
async fn test_uncoercible_value_fails_the_same_with_or_without_cache() {
    let calls = Calls::default();
    let clock = Arc::new(ManualClock::default());
    let distributed = Arc::new(InMemoryDistributedCache::default());
    let sources = Arc::new(SourceRegistry::new().with_named(StubNamedSource::new(
        "tiered-scalar",
        NamedBehavior::Answer(json!("scalar"), minutes(1)),
        &calls,
    )));
    let uncached = ContextResolver::new(sources.clone());
    let cached = ContextResolver::with_cache(
        sources,
        tiered(both_tiers(), &clock, Some(distributed.clone())),
    );

    for resolver in [&uncached, &cached] {
        let err = resolver
            .fresh_session()
            .resolve_named("tiered-scalar", None, true, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let key = ContextKey::from_named("tiered-scalar", None).unwrap();
        let result = resolver
            .fresh_session()
            .resolve_key(&key, true, CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_found());
    }
    assert_eq!(distributed.len(), 0);
}
