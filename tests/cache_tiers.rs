//! Integration tests for the two-tier cache: TTL, LRU eviction and
//! persistence across gateway restarts

mod common;

use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use common::harness;
use common::mock_provider::{MockProvider, result_for};
use vision_gateway::core::{Clock, ManualClock};
use vision_gateway::store::{DurableStore, LedgerStore, MemoryStore, SqliteStore};
use vision_gateway::{Gateway, ResultSource, Severity, TieredCache};

fn sqlite_gateway(path: &Path, clock: Arc<ManualClock>, provider: Arc<MockProvider>) -> Gateway {
    Gateway::builder()
        .config(harness::config(5.0, 100.0))
        .store(Arc::new(SqliteStore::open(path).unwrap()))
        .clock(clock)
        .provider(provider)
        .build()
        .unwrap()
}

#[tokio::test]
async fn entries_expire_after_the_ttl() {
    let p = Arc::new(MockProvider::judging("p", 0.01, Severity::Minor));
    let h = harness::build(harness::config(5.0, 100.0), &[p.clone()]);

    h.gateway.analyze(&harness::request(1)).await.unwrap();

    // exactly at the TTL the entry is still fresh
    h.clock.advance(Duration::days(30));
    let hit = h.gateway.analyze(&harness::request(1)).await.unwrap();
    assert!(hit.source.is_cache());
    assert_eq!(p.calls(), 1);

    h.clock.advance(Duration::days(1));
    let miss = h.gateway.analyze(&harness::request(1)).await.unwrap();
    assert_eq!(miss.source, ResultSource::Provider { provider: "p".into() });
    assert_eq!(p.calls(), 2);

    // the refreshed entry replaced the stale one
    let entry = h.store.load(&miss.fingerprint).await.unwrap().unwrap();
    assert_eq!(entry.created_at, h.clock.now());
}

#[tokio::test]
async fn evicted_entries_are_served_from_the_durable_tier() {
    let durable = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at(2024, 6, 10, 12));
    let cache = TieredCache::new(2, durable.clone(), Duration::days(30), clock);

    for key in ["a", "b", "c"] {
        cache
            .put(key, result_for("p", Severity::Minor), "p")
            .await
            .unwrap();
    }
    assert_eq!(cache.memory_len(), 2);
    assert_eq!(cache.durable_len().await.unwrap(), 3);

    let entry = cache.get("a").await.unwrap();
    assert_eq!(entry.provider, "p");
    let stats = cache.stats();
    assert_eq!(stats.memory_misses, 1);
    assert_eq!(stats.disk_hits, 1);

    // promoted back into memory
    cache.get("a").await.unwrap();
    assert_eq!(cache.stats().memory_hits, 1);
    assert_eq!(cache.memory_len(), 2);
}

#[tokio::test]
async fn results_and_spend_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("gateway.db");
    let clock = Arc::new(ManualClock::at(2024, 6, 10, 12));

    let first_provider = Arc::new(MockProvider::judging("p", 0.25, Severity::Moderate));
    let first = sqlite_gateway(&path, clock.clone(), first_provider.clone());
    let original = first.analyze(&harness::request(9)).await.unwrap();
    assert_eq!(first_provider.calls(), 1);
    drop(first);

    let second_provider = Arc::new(MockProvider::judging("p", 0.25, Severity::Breaking));
    let second = sqlite_gateway(&path, clock, second_provider.clone());
    let replay = second.analyze(&harness::request(9)).await.unwrap();

    assert_eq!(replay.source, ResultSource::Cache { provider: "p".into() });
    assert_eq!(replay.result, original.result);
    assert_eq!(second_provider.calls(), 0);
    assert_eq!(second.cache_stats().disk_hits, 1);

    let status = second.budget_status().await.unwrap();
    assert!((status.daily.used - 0.25).abs() < 1e-9);
    let stats = second.cost_stats().await.unwrap();
    assert!((stats.total_cost - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn corrupt_rows_are_misses_and_get_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateway.db");
    let clock = Arc::new(ManualClock::at(2024, 6, 10, 12));

    let p = Arc::new(MockProvider::judging("p", 0.01, Severity::Minor));
    let first = sqlite_gateway(&path, clock.clone(), p.clone());
    let outcome = first.analyze(&harness::request(2)).await.unwrap();
    drop(first);

    let conn = rusqlite::Connection::open(&path).unwrap();
    let updated = conn
        .execute(
            "UPDATE analysis_cache SET result_json = '{not json' WHERE fingerprint = ?1",
            [&outcome.fingerprint],
        )
        .unwrap();
    assert_eq!(updated, 1);
    drop(conn);

    let second = sqlite_gateway(&path, clock, p.clone());
    let again = second.analyze(&harness::request(2)).await.unwrap();
    assert!(!again.source.is_cache());
    assert_eq!(p.calls(), 2);

    let store = SqliteStore::open(&path).unwrap();
    let repaired = store.load(&outcome.fingerprint).await.unwrap().unwrap();
    assert_eq!(repaired.result, outcome.result);
    assert_eq!(store.entry_count().await.unwrap(), 2);
}

#[tokio::test]
async fn purge_and_clear() {
    let p = Arc::new(MockProvider::judging("p", 0.0, Severity::None));
    let h = harness::build(harness::config(5.0, 100.0), &[p.clone()]);

    h.gateway.analyze(&harness::request(1)).await.unwrap();
    h.gateway.analyze(&harness::request(2)).await.unwrap();
    h.clock.advance(Duration::days(20));
    h.gateway.analyze(&harness::request(3)).await.unwrap();
    h.clock.advance(Duration::days(15));

    assert_eq!(h.gateway.purge_expired().await.unwrap(), 2);
    assert_eq!(h.store.len().await.unwrap(), 1);
    assert_eq!(h.gateway.cache().memory_len(), 1);
    assert_eq!(h.gateway.purge_expired().await.unwrap(), 0);

    h.gateway.clear_cache().await.unwrap();
    assert_eq!(h.store.len().await.unwrap(), 0);
    assert_eq!(h.gateway.cache().memory_len(), 0);

    let after = h.gateway.analyze(&harness::request(3)).await.unwrap();
    assert!(!after.source.is_cache());
    assert_eq!(p.calls(), 4);
}
