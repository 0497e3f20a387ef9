//! SQLite-backed [`DurableStore`] and [`LedgerStore`].
//!
//! One connection behind a mutex, opened in WAL mode. Every call hops onto
//! the blocking pool so the async runtime never waits on disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::migrations::run_migrations;
use super::{DurableStore, LedgerEntry, LedgerStore};
use crate::cache::CacheEntry;
use crate::core::Micros;
use crate::error::GatewayError;
use crate::model::AnalysisResult;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self, GatewayError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::storage(format!("create {}", parent.display()), e)
            })?;
        }

        let mut conn = Connection::open(path)
            .map_err(|e| GatewayError::storage(format!("open {}", path.display()), e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| GatewayError::storage("enable WAL", e))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| GatewayError::storage("set busy timeout", e))?;
        run_migrations(&mut conn)?;

        log::debug!("opened gateway database at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, GatewayError> {
        let mut conn = Connection::open_in_memory()
            .map_err(|e| GatewayError::storage("open in-memory database", e))?;
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            f(&mut *guard)
        })
        .await
        .map_err(|e| GatewayError::storage(operation, e))?
        .map_err(|e| GatewayError::storage(operation, e))
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, GatewayError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        GatewayError::storage(
            "decode timestamp",
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp {} out of range", ms),
            ),
        )
    })
}

fn micros_to_sql(cost: Micros) -> i64 {
    i64::try_from(cost.0).unwrap_or(i64::MAX)
}

fn micros_from_sql(value: i64) -> Micros {
    Micros(u64::try_from(value).unwrap_or(0))
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn load(&self, fingerprint: &str) -> Result<Option<CacheEntry>, GatewayError> {
        let key = fingerprint.to_string();
        let row = self
            .run("load cache entry", move |conn| {
                conn.query_row(
                    "SELECT result_json, provider, created_at FROM analysis_cache WHERE fingerprint = ?1",
                    params![key],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()
            })
            .await?;

        let Some((result_json, provider, created_at)) = row else {
            return Ok(None);
        };
        let result: AnalysisResult = serde_json::from_str(&result_json)
            .map_err(|e| GatewayError::storage("decode cache entry", e))?;
        Ok(Some(CacheEntry {
            result,
            provider,
            created_at: from_millis(created_at)?,
        }))
    }

    async fn save(&self, fingerprint: &str, entry: &CacheEntry) -> Result<(), GatewayError> {
        let key = fingerprint.to_string();
        let result_json = serde_json::to_string(&entry.result)
            .map_err(|e| GatewayError::storage("encode cache entry", e))?;
        let provider = entry.provider.clone();
        let created_at = to_millis(entry.created_at);
        self.run("save cache entry", move |conn| {
            conn.execute(
                "INSERT INTO analysis_cache (fingerprint, result_json, provider, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                    result_json = excluded.result_json,
                    provider = excluded.provider,
                    created_at = excluded.created_at",
                params![key, result_json, provider, created_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove(&self, fingerprint: &str) -> Result<(), GatewayError> {
        let key = fingerprint.to_string();
        self.run("remove cache entry", move |conn| {
            conn.execute(
                "DELETE FROM analysis_cache WHERE fingerprint = ?1",
                params![key],
            )
            .map(|_| ())
        })
        .await
    }

    async fn remove_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize, GatewayError> {
        let cutoff = to_millis(cutoff);
        self.run("purge cache entries", move |conn| {
            conn.execute(
                "DELETE FROM analysis_cache WHERE created_at < ?1",
                params![cutoff],
            )
        })
        .await
    }

    async fn clear(&self) -> Result<(), GatewayError> {
        self.run("clear cache", |conn| {
            conn.execute("DELETE FROM analysis_cache", []).map(|_| ())
        })
        .await
    }

    async fn len(&self) -> Result<usize, GatewayError> {
        let count: i64 = self
            .run("count cache entries", |conn| {
                conn.query_row("SELECT COUNT(*) FROM analysis_cache", [], |row| row.get(0))
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), GatewayError> {
        let provider = entry.provider.clone();
        let cost = micros_to_sql(entry.cost);
        let recorded_at = to_millis(entry.recorded_at);
        self.run("append ledger entry", move |conn| {
            conn.execute(
                "INSERT INTO cost_ledger (provider, cost_micros, recorded_at) VALUES (?1, ?2, ?3)",
                params![provider, cost, recorded_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn total_since(&self, since: Option<DateTime<Utc>>) -> Result<Micros, GatewayError> {
        let since = since.map(to_millis).unwrap_or(i64::MIN);
        let total: i64 = self
            .run("sum ledger", move |conn| {
                conn.query_row(
                    "SELECT COALESCE(SUM(cost_micros), 0) FROM cost_ledger WHERE recorded_at >= ?1",
                    params![since],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(micros_from_sql(total))
    }

    async fn totals_by_provider(&self) -> Result<Vec<(String, Micros)>, GatewayError> {
        let rows = self
            .run("sum ledger by provider", |conn| {
                let mut stmt = conn.prepare(
                    "SELECT provider, SUM(cost_micros) FROM cost_ledger
                     GROUP BY provider ORDER BY provider",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows
            .into_iter()
            .map(|(provider, total)| (provider, micros_from_sql(total)))
            .collect())
    }

    async fn entry_count(&self) -> Result<usize, GatewayError> {
        let count: i64 = self
            .run("count ledger entries", |conn| {
                conn.query_row("SELECT COUNT(*) FROM cost_ledger", [], |row| row.get(0))
            })
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
