//! Caller identities and daily quota accounting.
//!
//! Every caller registers once and presents its identity on each lookup.
//! Usage is counted per UTC calendar day. The stored counter is never reset
//! by a background job: [`Identity::usage_on`] reconciles it against the
//! current day on every read, and the reset is persisted the next time usage
//! is recorded.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Prefix of every generated identity.
pub const ID_PREFIX: &str = "ext_";

/// Number of random characters after the prefix.
///
/// 16 characters over a 36-symbol alphabet give about 82 bits of entropy.
pub const ID_RANDOM_LEN: usize = 16;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Quota class of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Subject to the daily lookup limit.
    #[default]
    Free,
    /// No daily limit.
    Unlimited,
}

impl Tier {
    /// Whether the daily limit applies to this tier.
    #[must_use]
    pub fn is_quota_enforced(self) -> bool {
        matches!(self, Self::Free)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "unlimited" => Ok(Self::Unlimited),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// A registered caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque identifier presented on every request.
    pub id: String,
    /// When the identity was registered.
    pub created_at: DateTime<Utc>,
    /// When the identity last consumed quota.
    pub last_used_at: DateTime<Utc>,
    /// Lookups counted against `usage_day`.
    pub usage_today: u32,
    /// The UTC day `usage_today` belongs to.
    pub usage_day: NaiveDate,
    /// Lifetime lookups.
    pub total_usage: u64,
    /// Quota class.
    pub tier: Tier,
}

impl Identity {
    /// A fresh free-tier identity with a random id and no usage.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_id(generate_id(), now)
    }

    /// A fresh free-tier identity with the given id.
    #[must_use]
    pub fn with_id(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            last_used_at: now,
            usage_today: 0,
            usage_day: now.date_naive(),
            total_usage: 0,
            tier: Tier::Free,
        }
    }

    /// Usage attributable to `day`.
    ///
    /// A counter recorded on any other day is stale and counts as zero.
    #[must_use]
    pub fn usage_on(&self, day: NaiveDate) -> u32 {
        if self.usage_day == day {
            self.usage_today
        } else {
            0
        }
    }

    /// Whether another lookup on `day` would exceed `daily_limit`.
    #[must_use]
    pub fn is_over_quota(&self, day: NaiveDate, daily_limit: u32) -> bool {
        self.tier.is_quota_enforced() && self.usage_on(day) >= daily_limit
    }
}

/// Generate a new identity id from the thread-local CSPRNG.
#[must_use]
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_RANDOM_LEN)
        .map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())]))
        .collect();
    format!("{ID_PREFIX}{suffix}")
}

/// Durable storage of identities.
///
/// Implementations must make [`IdentityStore::record_usage`] an atomic
/// read-modify-write for a single identity, including its limit check.
/// Concurrent lookups for one identity can all pass an earlier quota check
/// on a loaded [`Identity`]; the limit passed to `record_usage` is what keeps
/// the daily count from going over.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Register and persist a fresh identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity cannot be written.
    async fn create_identity(&self, now: DateTime<Utc>) -> Result<Identity>;

    /// Look up an identity; `None` means the caller is not registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn get_identity(&self, id: &str) -> Result<Option<Identity>>;

    /// Count one lookup on `day` and return the new daily usage.
    ///
    /// A counter left over from another day is replaced, not added to. With
    /// a `limit`, nothing is counted once the day's usage has reached it and
    /// `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::IdentityNotFound`] for an unknown id, or a
    /// storage error.
    async fn record_usage(
        &self,
        id: &str,
        day: NaiveDate,
        now: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Option<u32>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_generate_id_format() {
        let id = generate_id();
        assert!(id.starts_with(ID_PREFIX));
        assert_eq!(id.len(), ID_PREFIX.len() + ID_RANDOM_LEN);
        assert!(id[ID_PREFIX.len()..]
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn test_generate_id_unique() {
        let ids: std::collections::HashSet<String> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_new_identity_defaults() {
        let identity = Identity::new(noon());
        assert_eq!(identity.usage_today, 0);
        assert_eq!(identity.total_usage, 0);
        assert_eq!(identity.tier, Tier::Free);
        assert_eq!(identity.usage_day, noon().date_naive());
        assert_eq!(identity.created_at, identity.last_used_at);
    }

    #[test]
    fn test_usage_on_same_day() {
        let mut identity = Identity::with_id("ext_a", noon());
        identity.usage_today = 7;
        assert_eq!(identity.usage_on(noon().date_naive()), 7);
    }

    #[test]
    fn test_usage_on_new_day_is_zero() {
        let mut identity = Identity::with_id("ext_a", noon());
        identity.usage_today = 20;
        let tomorrow = (noon() + Duration::days(1)).date_naive();
        assert_eq!(identity.usage_on(tomorrow), 0);
        // The stored counter is untouched.
        assert_eq!(identity.usage_today, 20);
    }

    #[test]
    fn test_is_over_quota() {
        let today = noon().date_naive();
        let mut identity = Identity::with_id("ext_a", noon());

        identity.usage_today = 19;
        assert!(!identity.is_over_quota(today, 20));

        identity.usage_today = 20;
        assert!(identity.is_over_quota(today, 20));

        let tomorrow = today.succ_opt().unwrap();
        assert!(!identity.is_over_quota(tomorrow, 20));
    }

    #[test]
    fn test_unlimited_tier_never_over_quota() {
        let today = noon().date_naive();
        let mut identity = Identity::with_id("ext_a", noon());
        identity.tier = Tier::Unlimited;
        identity.usage_today = 10_000;
        assert!(!identity.is_over_quota(today, 20));
    }

    #[test]
    fn test_tier_round_trip_text() {
        for tier in [Tier::Free, Tier::Unlimited] {
            assert_eq!(tier.to_string().parse::<Tier>().unwrap(), tier);
        }
        assert!("gold".parse::<Tier>().is_err());
    }

    #[test]
    fn test_tier_quota_enforced() {
        assert!(Tier::Free.is_quota_enforced());
        assert!(!Tier::Unlimited.is_quota_enforced());
    }
}
