//! # Two-tier Result Cache
//!
//! A bounded in-process LRU ([`MemoryTier`]) in front of a persistent
//! [`DurableStore`]. Reads fall through memory to disk and promote disk hits;
//! writes go to both. Entries older than the TTL are treated as absent and
//! dropped lazily from whichever tier they were found in.
//!
//! The durable tier is best effort. Read failures and corrupt rows count as
//! misses; only rows that fail to decode are deleted, so a busy database
//! keeps its entries. Write failures are reported to the caller, which logs
//! them.

pub mod fingerprint;
pub mod memory;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::core::Clock;
use crate::error::{GatewayError, classify};
use crate::model::AnalysisResult;
use crate::store::DurableStore;

pub use fingerprint::{chain_identity, fingerprint};
pub use memory::MemoryTier;

/// A cached judgment plus the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub result: AnalysisResult,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub total_requests: u64,
    /// (memory_hits + disk_hits) / total_requests; 0.0 before any lookup
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    total_requests: AtomicU64,
}

pub struct TieredCache {
    memory: MemoryTier,
    durable: Arc<dyn DurableStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl TieredCache {
    pub fn new(
        memory_capacity: usize,
        durable: Arc<dyn DurableStore>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            memory: MemoryTier::new(memory_capacity),
            durable,
            ttl,
            clock,
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.created_at > self.ttl
    }

    pub async fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();

        if let Some(entry) = self.memory.get(fingerprint) {
            if !self.is_expired(&entry, now) {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("cache memory hit {}", short(fingerprint));
                return Some(entry);
            }
            self.memory.remove(fingerprint);
        }
        self.counters.memory_misses.fetch_add(1, Ordering::Relaxed);

        match self.durable.load(fingerprint).await {
            Ok(Some(entry)) if !self.is_expired(&entry, now) => {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                log::debug!("cache disk hit {}, promoting", short(fingerprint));
                self.memory.insert(fingerprint, entry.clone());
                return Some(entry);
            }
            Ok(Some(_)) => {
                log::debug!("cache entry {} expired", short(fingerprint));
                self.discard_durable(fingerprint).await;
            }
            Ok(None) => {}
            Err(e) if classify::is_corrupt_data(&e) => {
                log::warn!("dropping corrupt cache entry {}: {}", short(fingerprint), e);
                self.discard_durable(fingerprint).await;
            }
            Err(e) => {
                log::warn!(
                    "durable cache read for {} failed, treating as miss: {}",
                    short(fingerprint),
                    e
                );
            }
        }

        self.counters.disk_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn discard_durable(&self, fingerprint: &str) {
        if let Err(e) = self.durable.remove(fingerprint).await {
            log::warn!("could not purge cache entry {}: {}", short(fingerprint), e);
        }
    }

    /// Store `result` in both tiers. The memory tier is always written; an
    /// error means only the durable write failed.
    pub async fn put(
        &self,
        fingerprint: &str,
        result: AnalysisResult,
        provider: &str,
    ) -> Result<(), GatewayError> {
        let entry = CacheEntry {
            result,
            provider: provider.to_string(),
            created_at: self.clock.now(),
        };
        if let Some(evicted) = self.memory.insert(fingerprint, entry.clone()) {
            log::debug!("memory tier full, evicted {}", short(&evicted));
        }
        self.durable.save(fingerprint, &entry).await
    }

    pub fn stats(&self) -> CacheStats {
        let memory_hits = self.counters.memory_hits.load(Ordering::Relaxed);
        let disk_hits = self.counters.disk_hits.load(Ordering::Relaxed);
        let total_requests = self.counters.total_requests.load(Ordering::Relaxed);
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            (memory_hits + disk_hits) as f64 / total_requests as f64
        };
        CacheStats {
            memory_hits,
            memory_misses: self.counters.memory_misses.load(Ordering::Relaxed),
            disk_hits,
            disk_misses: self.counters.disk_misses.load(Ordering::Relaxed),
            total_requests,
            hit_rate,
        }
    }

    /// Remove expired entries from both tiers; returns the larger of the two
    /// tier counts (a promoted entry lives in both).
    pub async fn purge_expired(&self) -> Result<usize, GatewayError> {
        let cutoff = self.clock.now() - self.ttl;
        let from_memory = self.memory.remove_created_before(cutoff);
        let from_disk = self.durable.remove_created_before(cutoff).await?;
        log::info!(
            "purged {} expired cache entries ({} memory, {} durable)",
            from_memory.max(from_disk),
            from_memory,
            from_disk
        );
        Ok(from_memory.max(from_disk))
    }

    pub async fn clear(&self) -> Result<(), GatewayError> {
        self.memory.clear();
        self.durable.clear().await
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub async fn durable_len(&self) -> Result<usize, GatewayError> {
        self.durable.len().await
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
