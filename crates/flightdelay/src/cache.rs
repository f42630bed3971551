//! Shared cache of computed delay statistics.
//!
//! Entries are keyed by normalized flight identifier. Freshness is decided at
//! read time; stale entries stay in the store until overwritten or pruned.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::stats::StatResult;

/// Default time-to-live of a cache entry in days.
pub const DEFAULT_TTL_DAYS: u32 = 3;

/// A cached statistics result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Normalized flight identifier.
    pub key: String,
    /// When the statistics were computed.
    pub fetched_at: DateTime<Utc>,
    /// The statistics, stored verbatim.
    pub stats: StatResult,
}

impl CacheEntry {
    /// Age of the entry at `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.fetched_at
    }

    /// Whether the entry may still be served at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) < ttl
    }
}

/// Durable storage of computed statistics.
///
/// Writes overwrite whatever is stored under the key; the last writer wins.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Read the entry for `key`, fresh or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store `stats` under `key`, computed at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    async fn put_entry(&self, key: &str, stats: &StatResult, now: DateTime<Utc>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::compute;
    use chrono::TimeZone;

    fn entry_at(fetched_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: "DL1234".to_string(),
            fetched_at,
            stats: compute(&[]),
        }
    }

    #[test]
    fn test_fresh_within_ttl() {
        let fetched = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry = entry_at(fetched);
        let ttl = Duration::days(3);

        assert!(entry.is_fresh(fetched, ttl));
        assert!(entry.is_fresh(fetched + Duration::days(2), ttl));
        assert!(entry.is_fresh(fetched + ttl - Duration::seconds(1), ttl));
    }

    #[test]
    fn test_stale_at_and_after_ttl() {
        let fetched = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry = entry_at(fetched);
        let ttl = Duration::days(3);

        assert!(!entry.is_fresh(fetched + ttl, ttl));
        assert!(!entry.is_fresh(fetched + Duration::days(4), ttl));
    }

    #[test]
    fn test_age() {
        let fetched = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry = entry_at(fetched);
        assert_eq!(entry.age(fetched + Duration::hours(5)), Duration::hours(5));
    }
}
