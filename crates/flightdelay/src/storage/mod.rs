//! Storage layer for flightdelay.
//!
//! This module provides `SQLite`-based persistent storage for caller
//! identities and cached delay statistics. [`Storage`] implements both
//! [`IdentityStore`] and [`ResultCache`], so a single database file backs the
//! whole service.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, ResultCache};
use crate::error::{Error, Result};
use crate::identity::{Identity, IdentityStore, Tier};
use crate::stats::StatResult;

/// Format used for every stored timestamp.
///
/// A fixed width UTC form keeps lexical and chronological order identical,
/// which the pruning and freshness queries rely on.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map_or_else(
        |_| {
            warn!("Unparseable timestamp in database: {}", value);
            DateTime::<Utc>::default()
        },
        |dt| dt.with_timezone(&Utc),
    )
}

/// Storage engine for identities and cached statistics.
///
/// Every statement runs under one connection mutex, which makes each
/// single-statement read-modify-write atomic. Clones share the connection.
///
/// The synchronous methods block on that mutex and on disk I/O. The
/// [`IdentityStore`] and [`ResultCache`] implementations move each call onto
/// tokio's blocking pool so async callers never stall a worker thread.
#[derive(Debug, Clone)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("database connection mutex poisoned"))
    }

    /// Run `op` against this storage on the blocking thread pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
    {
        let storage = self.clone();
        tokio::task::spawn_blocking(move || op(&storage))
            .await
            .map_err(|e| Error::internal(format!("storage task failed: {e}")))?
    }

    // === Identities ===

    /// Insert a new identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the id already exists or the write fails.
    pub fn insert_identity(&self, identity: &Identity) -> Result<()> {
        self.conn()?.execute(
            r"
            INSERT INTO identities
                (id, created_at, last_used_at, usage_today, usage_day, total_usage, tier)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                identity.id,
                timestamp(identity.created_at),
                timestamp(identity.last_used_at),
                i64::from(identity.usage_today),
                identity.usage_day.to_string(),
                i64::try_from(identity.total_usage).unwrap_or(i64::MAX),
                identity.tier.to_string(),
            ],
        )?;
        debug!("Inserted identity {}", identity.id);
        Ok(())
    }

    /// Load an identity by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn load_identity(&self, id: &str) -> Result<Option<Identity>> {
        let identity = self
            .conn()?
            .query_row(
                r"
                SELECT id, created_at, last_used_at, usage_today, usage_day, total_usage, tier
                FROM identities WHERE id = ?1
                ",
                [id],
                Self::row_to_identity,
            )
            .optional()?;
        Ok(identity)
    }

    /// Count one lookup for `id` on `day`, returning the new daily usage.
    ///
    /// The day is reconciled inside the statement: a counter from another day
    /// restarts at one instead of being incremented. With a `limit`, the
    /// count is only taken while the reconciled usage is below it, and
    /// `Ok(None)` reports that the limit was already reached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentityNotFound`] if `id` is unknown, or a database error.
    pub fn increment_usage(
        &self,
        id: &str,
        day: NaiveDate,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Option<u32>> {
        let conn = self.conn()?;
        let usage: Option<i64> = conn
            .query_row(
                r"
                UPDATE identities SET
                    usage_today = CASE WHEN usage_day = ?2 THEN usage_today + 1 ELSE 1 END,
                    usage_day = ?2,
                    total_usage = total_usage + 1,
                    last_used_at = ?3
                WHERE id = ?1
                  AND (?4 IS NULL OR usage_day != ?2 OR usage_today < ?4)
                RETURNING usage_today
                ",
                params![id, day.to_string(), timestamp(now), limit.map(i64::from)],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(usage) = usage {
            return Ok(Some(u32::try_from(usage).unwrap_or(u32::MAX)));
        }

        let exists = conn
            .query_row("SELECT 1 FROM identities WHERE id = ?1", [id], |_| Ok(()))
            .optional()?
            .is_some();
        if exists {
            debug!("Usage for {} already at its limit", id);
            Ok(None)
        } else {
            Err(Error::IdentityNotFound { id: id.to_string() })
        }
    }

    /// Change the quota tier of an identity.
    ///
    /// Returns `true` if the identity exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_tier(&self, id: &str, tier: Tier) -> Result<bool> {
        let affected = self.conn()?.execute(
            "UPDATE identities SET tier = ?2 WHERE id = ?1",
            params![id, tier.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Count registered identities.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_identities(&self) -> Result<i64> {
        let count = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(count)
    }

    // === Cache ===

    /// Load the cache entry for `key`, regardless of age.
    ///
    /// An entry whose stats can no longer be decoded is reported as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn load_cache_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let row: Option<(String, String)> = self
            .conn()?
            .query_row(
                "SELECT fetched_at, stats FROM flight_cache WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((fetched_at, stats)) = row else {
            return Ok(None);
        };

        match serde_json::from_str::<StatResult>(&stats) {
            Ok(stats) => Ok(Some(CacheEntry {
                key: key.to_string(),
                fetched_at: parse_timestamp(&fetched_at),
                stats,
            })),
            Err(e) => {
                warn!("Ignoring undecodable cache entry for {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Store `stats` for `key`, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the database operation fails.
    pub fn store_cache_entry(&self, key: &str, stats: &StatResult, now: DateTime<Utc>) -> Result<()> {
        let stats = serde_json::to_string(stats)?;
        self.conn()?.execute(
            r"
            INSERT INTO flight_cache (key, fetched_at, stats) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                fetched_at = excluded.fetched_at,
                stats = excluded.stats
            ",
            params![key, timestamp(now), stats],
        )?;
        debug!("Cached statistics for {}", key);
        Ok(())
    }

    /// Delete cache entries that are no longer fresh at `now`.
    ///
    /// Returns the number of entries deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_cache(&self, now: DateTime<Utc>, ttl: Duration) -> Result<usize> {
        let cutoff = timestamp(now - ttl);
        let affected = self
            .conn()?
            .execute("DELETE FROM flight_cache WHERE fetched_at <= ?1", [cutoff])?;

        if affected > 0 {
            info!("Pruned {} stale cache entries", affected);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self, now: DateTime<Utc>, ttl: Duration) -> Result<StorageStats> {
        let total_identities = self.count_identities()?;

        let (cache_entries, fresh_cache_entries) = {
            let conn = self.conn()?;
            let total: i64 =
                conn.query_row("SELECT COUNT(*) FROM flight_cache", [], |row| row.get(0))?;
            let fresh: i64 = conn.query_row(
                "SELECT COUNT(*) FROM flight_cache WHERE fetched_at > ?1",
                [timestamp(now - ttl)],
                |row| row.get(0),
            )?;
            (total, fresh)
        };

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_identities,
            cache_entries,
            fresh_cache_entries,
            db_size_bytes,
        })
    }

    /// Convert a database row to an Identity.
    fn row_to_identity(row: &rusqlite::Row) -> rusqlite::Result<Identity> {
        let id: String = row.get(0)?;
        let created_at: String = row.get(1)?;
        let last_used_at: String = row.get(2)?;
        let usage_today: i64 = row.get(3)?;
        let usage_day: String = row.get(4)?;
        let total_usage: i64 = row.get(5)?;
        let tier: String = row.get(6)?;

        // An unreadable day can only make the counter stale, never inflate it.
        let usage_day = usage_day.parse::<NaiveDate>().unwrap_or_else(|_| {
            warn!("Unparseable usage day for {}: {}", id, usage_day);
            NaiveDate::MIN
        });

        let tier = tier.parse::<Tier>().unwrap_or_else(|e| {
            warn!("{} for {}, defaulting to free", e, id);
            Tier::Free
        });

        Ok(Identity {
            created_at: parse_timestamp(&created_at),
            last_used_at: parse_timestamp(&last_used_at),
            usage_today: u32::try_from(usage_today).unwrap_or(0),
            usage_day,
            total_usage: u64::try_from(total_usage).unwrap_or(0),
            tier,
            id,
        })
    }
}

#[async_trait]
impl IdentityStore for Storage {
    async fn create_identity(&self, now: DateTime<Utc>) -> Result<Identity> {
        self.blocking(move |storage| {
            let identity = Identity::new(now);
            storage.insert_identity(&identity)?;
            Ok(identity)
        })
        .await
    }

    async fn get_identity(&self, id: &str) -> Result<Option<Identity>> {
        let id = id.to_string();
        self.blocking(move |storage| storage.load_identity(&id)).await
    }

    async fn record_usage(
        &self,
        id: &str,
        day: NaiveDate,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Option<u32>> {
        let id = id.to_string();
        self.blocking(move |storage| storage.increment_usage(&id, day, now, limit)).await
    }
}

#[async_trait]
impl ResultCache for Storage {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        let key = key.to_string();
        self.blocking(move |storage| storage.load_cache_entry(&key)).await
    }

    async fn put_entry(&self, key: &str, stats: &StatResult, now: DateTime<Utc>) -> Result<()> {
        let key = key.to_string();
        let stats = stats.clone();
        self.blocking(move |storage| storage.store_cache_entry(&key, &stats, now)).await
    }
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of registered identities.
    pub total_identities: i64,
    /// Total number of cache entries, fresh or stale.
    pub cache_entries: i64,
    /// Cache entries that would still be served.
    pub fresh_cache_entries: i64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
