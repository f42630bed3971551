//! The lookup pipeline.
//!
//! [`Lookup`] sequences one request through identity, quota, cache and
//! upstream. Each step is terminal on failure:
//!
//! 1. both the identity and the flight identifier must be present
//! 2. the identity must be registered
//! 3. a free identity at its daily limit is refused before any cache access
//! 4. a fresh cache entry is served without counting usage
//! 5. otherwise the history is fetched; an upstream failure writes nothing
//! 6. the statistics are computed, cached and counted, even when the sample
//!    was too small to summarize
//!
//! The wire types shared by the HTTP server and the HTTP client live here
//! too.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{ResultCache, DEFAULT_TTL_DAYS};
use crate::config::{Config, DEFAULT_DAILY_LIMIT};
use crate::error::Error;
use crate::flight::normalize;
use crate::identity::IdentityStore;
use crate::stats::{compute, StatResult};
use crate::upstream::{FetchError, HistorySource};

/// When a refused quota becomes available again.
const QUOTA_RESETS_AT: &str = "midnight UTC";

/// A lookup request.
///
/// Both required fields are optional here so that an absent field is
/// reported as [`LookupError::MissingFields`] rather than a decoding error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    /// The caller's identity.
    #[serde(alias = "installId", default)]
    pub identity_id: Option<String>,
    /// Flight identifier as typed or scraped, e.g. `"dl 1234"`.
    #[serde(default)]
    pub flight_number: Option<String>,
    /// Departure airport; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Arrival airport; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl LookupRequest {
    /// A request for `flight_number` on behalf of `identity_id`.
    #[must_use]
    pub fn new(identity_id: impl Into<String>, flight_number: impl Into<String>) -> Self {
        Self {
            identity_id: Some(identity_id.into()),
            flight_number: Some(flight_number.into()),
            origin: None,
            destination: None,
        }
    }

    /// Attach an informational route.
    #[must_use]
    pub fn with_route(mut self, origin: Option<String>, destination: Option<String>) -> Self {
        self.origin = origin;
        self.destination = destination;
        self
    }

    /// The identity and the normalized flight identifier.
    fn required_fields(&self) -> Result<(&str, String), LookupError> {
        let identity = self
            .identity_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let flight = self
            .flight_number
            .as_deref()
            .map(normalize)
            .filter(|f| !f.is_empty());

        match (identity, flight) {
            (Some(identity), Some(flight)) => Ok((identity, flight)),
            _ => Err(LookupError::MissingFields),
        }
    }
}

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Served from the result cache.
    Cache,
    /// Freshly computed from upstream history.
    Api,
}

/// Daily usage after a counted lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Lookups counted today, including this one.
    pub today: u32,
    /// The daily limit.
    pub limit: u32,
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    /// Where the statistics came from.
    pub source: Source,
    /// The statistics, or the reason there are none.
    pub stats: StatResult,
    /// Present only for counted lookups by quota-enforced identities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// The new identity.
    pub identity_id: String,
    /// Uncached lookups allowed per UTC day.
    pub daily_limit: u32,
}

/// Body of every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub error: String,
    /// The daily limit, on quota refusals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// When the quota resets, on quota refusals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<String>,
}

/// Reasons a lookup fails.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The identity or the flight identifier is absent or blank.
    #[error("Missing required fields")]
    MissingFields,

    /// The identity is not registered.
    #[error("Invalid identity")]
    InvalidIdentity,

    /// The identity has used its daily allowance.
    #[error("Daily limit reached")]
    QuotaExceeded {
        /// The limit that was reached.
        limit: u32,
    },

    /// The flight identifier is not a carrier code followed by digits.
    #[error("Invalid flight number format: {0}")]
    InvalidFormat(String),

    /// The upstream rejected our API key.
    #[error("Upstream rejected the API key")]
    UpstreamInvalidCredentials,

    /// The upstream is throttling us.
    #[error("Upstream rate limit exceeded")]
    UpstreamRateLimited,

    /// The upstream could not be reached or answered garbage.
    #[error("Failed to fetch flight data: {0}")]
    UpstreamUnavailable(String),

    /// The service lacks configuration it needs, such as the API key.
    #[error("Server configuration error")]
    ServerMisconfigured,

    /// A store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] Error),
}

impl LookupError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingFields => "missing_fields",
            Self::InvalidIdentity => "invalid_identity",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::InvalidFormat(_) => "invalid_format",
            Self::UpstreamInvalidCredentials => "upstream_invalid_credentials",
            Self::UpstreamRateLimited => "upstream_rate_limited",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::ServerMisconfigured => "server_misconfigured",
            Self::Storage(_) => "storage_error",
        }
    }

    /// HTTP status this failure is reported with.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingFields | Self::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            Self::InvalidIdentity => StatusCode::UNAUTHORIZED,
            Self::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamInvalidCredentials
            | Self::UpstreamRateLimited
            | Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::ServerMisconfigured | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the upstream caused the failure.
    #[must_use]
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamInvalidCredentials
                | Self::UpstreamRateLimited
                | Self::UpstreamUnavailable(_)
        )
    }

    /// The body reported to the caller.
    ///
    /// Storage failures are not described beyond their code.
    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        let (limit, resets_at) = match self {
            Self::QuotaExceeded { limit } => (Some(*limit), Some(QUOTA_RESETS_AT.to_string())),
            _ => (None, None),
        };
        let error = match self {
            Self::Storage(_) => "Internal storage error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            code: self.code().to_string(),
            error,
            limit,
            resets_at,
        }
    }
}

impl From<FetchError> for LookupError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidFormat(flight) => Self::InvalidFormat(flight),
            FetchError::MissingCredentials => Self::ServerMisconfigured,
            FetchError::InvalidCredentials => Self::UpstreamInvalidCredentials,
            FetchError::RateLimited => Self::UpstreamRateLimited,
            FetchError::Unavailable(message) => Self::UpstreamUnavailable(message),
        }
    }
}

/// The lookup orchestrator.
///
/// Cloning is cheap; clones share the same stores.
#[derive(Clone)]
pub struct Lookup {
    identities: Arc<dyn IdentityStore>,
    cache: Arc<dyn ResultCache>,
    history: Arc<dyn HistorySource>,
    daily_limit: u32,
    ttl: Duration,
}

impl std::fmt::Debug for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lookup")
            .field("daily_limit", &self.daily_limit)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Lookup {
    /// An orchestrator over the given stores with default limits.
    #[must_use]
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        cache: Arc<dyn ResultCache>,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        Self {
            identities,
            cache,
            history,
            daily_limit: DEFAULT_DAILY_LIMIT,
            ttl: Duration::days(i64::from(DEFAULT_TTL_DAYS)),
        }
    }

    /// Apply the quota and cache settings from `config`.
    #[must_use]
    pub fn with_config(self, config: &Config) -> Self {
        self.with_daily_limit(config.quota.daily_limit)
            .with_ttl(config.cache_ttl())
    }

    /// Set the daily limit for free identities.
    #[must_use]
    pub fn with_daily_limit(mut self, daily_limit: u32) -> Self {
        self.daily_limit = daily_limit;
        self
    }

    /// Set how long cached results are served.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The daily limit for free identities.
    #[must_use]
    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Register a new identity.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Storage`] if the identity cannot be written.
    pub async fn register(&self, now: DateTime<Utc>) -> Result<RegisterResponse, LookupError> {
        let identity = self.identities.create_identity(now).await?;
        info!("Registered identity {}", identity.id);
        Ok(RegisterResponse {
            identity_id: identity.id,
            daily_limit: self.daily_limit,
        })
    }

    /// Handle a lookup at the current time.
    ///
    /// # Errors
    ///
    /// See [`Lookup::handle_at`].
    pub async fn handle(&self, request: &LookupRequest) -> Result<LookupResponse, LookupError> {
        self.handle_at(request, Utc::now()).await
    }

    /// Handle a lookup as if it arrived at `now`.
    ///
    /// The quota is checked before the cache probe and enforced again when
    /// the usage unit is recorded, so concurrent uncached lookups for one
    /// free identity never count past the daily limit. A lookup that loses
    /// that race still leaves its result in the cache.
    ///
    /// # Errors
    ///
    /// Returns the [`LookupError`] of the first step that fails.
    pub async fn handle_at(
        &self,
        request: &LookupRequest,
        now: DateTime<Utc>,
    ) -> Result<LookupResponse, LookupError> {
        let (identity_id, flight) = request.required_fields()?;

        let identity = self
            .identities
            .get_identity(identity_id)
            .await?
            .ok_or(LookupError::InvalidIdentity)?;

        let today = now.date_naive();
        if identity.is_over_quota(today, self.daily_limit) {
            info!("Identity {} reached its daily limit", identity.id);
            return Err(LookupError::QuotaExceeded {
                limit: self.daily_limit,
            });
        }

        match self.cache.get_entry(&flight).await? {
            Some(entry) if entry.is_fresh(now, self.ttl) => {
                debug!("Cache hit for {}", flight);
                return Ok(LookupResponse {
                    source: Source::Cache,
                    stats: entry.stats,
                    usage: None,
                });
            }
            Some(_) => debug!("Stale cache entry for {}", flight),
            None => debug!("Cache miss for {}", flight),
        }

        let records = self.history.fetch_history(&flight).await.map_err(|e| {
            warn!("History fetch for {} failed: {}", flight, e);
            LookupError::from(e)
        })?;

        let stats = compute(&records);
        self.cache.put_entry(&flight, &stats, now).await?;

        // Another lookup for this identity may have taken the last unit since
        // the quota check; the fetched stats stay cached for everyone.
        let limit = identity.tier.is_quota_enforced().then_some(self.daily_limit);
        let Some(usage_today) = self
            .identities
            .record_usage(&identity.id, today, now, limit)
            .await?
        else {
            info!("Identity {} reached its daily limit mid-lookup", identity.id);
            return Err(LookupError::QuotaExceeded {
                limit: self.daily_limit,
            });
        };
        debug!(
            "Identity {} used {} of {} lookups today",
            identity.id, usage_today, self.daily_limit
        );

        let usage = identity.tier.is_quota_enforced().then_some(Usage {
            today: usage_today,
            limit: self.daily_limit,
        });

        Ok(LookupResponse {
            source: Source::Api,
            stats,
            usage,
        })
    }
}
