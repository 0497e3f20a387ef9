//! # Durable Storage
//!
//! Seams behind which the durable cache tier and the cost ledger persist.
//! [`SqliteStore`] is the production implementation; [`MemoryStore`] keeps
//! everything in-process and is what tests and ephemeral gateways use.

pub mod migrations;
pub mod sqlite;

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::CacheEntry;
use crate::core::Micros;
use crate::error::GatewayError;

pub use sqlite::SqliteStore;

/// Persistent key/value tier for cached analysis results.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load(&self, fingerprint: &str) -> Result<Option<CacheEntry>, GatewayError>;

    /// Insert or replace; the last write for a fingerprint wins.
    async fn save(&self, fingerprint: &str, entry: &CacheEntry) -> Result<(), GatewayError>;

    async fn remove(&self, fingerprint: &str) -> Result<(), GatewayError>;

    /// Delete entries created strictly before `cutoff`, returning how many went.
    async fn remove_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize, GatewayError>;

    async fn clear(&self) -> Result<(), GatewayError>;

    async fn len(&self) -> Result<usize, GatewayError>;
}

/// One charged provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub provider: String,
    pub cost: Micros,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only spend log.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), GatewayError>;

    /// Sum of costs recorded at or after `since`; everything when `None`.
    async fn total_since(&self, since: Option<DateTime<Utc>>) -> Result<Micros, GatewayError>;

    /// All-time spend per provider, sorted by provider id.
    async fn totals_by_provider(&self) -> Result<Vec<(String, Micros)>, GatewayError>;

    async fn entry_count(&self) -> Result<usize, GatewayError>;
}

/// In-process store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ledger: Mutex<Vec<LedgerEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned(operation: &str) -> GatewayError {
        GatewayError::storage(
            operation.to_string(),
            std::io::Error::other("memory store lock poisoned"),
        )
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load(&self, fingerprint: &str) -> Result<Option<CacheEntry>, GatewayError> {
        let entries = self.entries.lock().map_err(|_| Self::poisoned("load"))?;
        Ok(entries.get(fingerprint).cloned())
    }

    async fn save(&self, fingerprint: &str, entry: &CacheEntry) -> Result<(), GatewayError> {
        let mut entries = self.entries.lock().map_err(|_| Self::poisoned("save"))?;
        entries.insert(fingerprint.to_string(), entry.clone());
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<(), GatewayError> {
        let mut entries = self.entries.lock().map_err(|_| Self::poisoned("remove"))?;
        entries.remove(fingerprint);
        Ok(())
    }

    async fn remove_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize, GatewayError> {
        let mut entries = self.entries.lock().map_err(|_| Self::poisoned("purge"))?;
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at >= cutoff);
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<(), GatewayError> {
        self.entries
            .lock()
            .map_err(|_| Self::poisoned("clear"))?
            .clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, GatewayError> {
        Ok(self.entries.lock().map_err(|_| Self::poisoned("len"))?.len())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), GatewayError> {
        self.ledger
            .lock()
            .map_err(|_| Self::poisoned("append"))?
            .push(entry.clone());
        Ok(())
    }

    async fn total_since(&self, since: Option<DateTime<Utc>>) -> Result<Micros, GatewayError> {
        let ledger = self.ledger.lock().map_err(|_| Self::poisoned("total"))?;
        Ok(ledger
            .iter()
            .filter(|e| since.is_none_or(|s| e.recorded_at >= s))
            .map(|e| e.cost)
            .sum())
    }

    async fn totals_by_provider(&self) -> Result<Vec<(String, Micros)>, GatewayError> {
        let ledger = self.ledger.lock().map_err(|_| Self::poisoned("totals"))?;
        let mut totals: BTreeMap<String, Micros> = BTreeMap::new();
        for entry in ledger.iter() {
            *totals.entry(entry.provider.clone()).or_default() += entry.cost;
        }
        Ok(totals.into_iter().collect())
    }

    async fn entry_count(&self) -> Result<usize, GatewayError> {
        Ok(self.ledger.lock().map_err(|_| Self::poisoned("count"))?.len())
    }
}
