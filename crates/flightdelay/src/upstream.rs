//! Client for the upstream flight history API.
//!
//! The history API indexes flights under either the ICAO or the IATA
//! spelling of the carrier, so each lookup walks the candidate spellings of
//! [`FlightIdent::candidates`] in order and stops at the first one that
//! returns flights. Credential and rate-limit failures end the walk at once;
//! they are service-wide and no other spelling would fare better.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::flight::{FlightIdent, FlightRecord};

/// Header carrying the upstream API key.
const API_KEY_HEADER: &str = "x-apikey";

/// Errors from the history API client.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The identifier is not `{2 letters}{digits}`.
    #[error("invalid flight number format: {0}")]
    InvalidFormat(String),

    /// No API key is configured.
    #[error("upstream API key is not configured")]
    MissingCredentials,

    /// The upstream rejected the API key.
    #[error("invalid upstream API key")]
    InvalidCredentials,

    /// The upstream is throttling us.
    #[error("upstream rate limit exceeded")]
    RateLimited,

    /// The upstream could not be reached or sent an unreadable answer.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

/// A source of recent flight history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch recent flights for a normalized identifier, most recent first.
    ///
    /// An empty list means no history was found; it is not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] if the identifier is malformed or the
    /// upstream fails in a way that affects every spelling.
    async fn fetch_history(&self, flight: &str) -> Result<Vec<FlightRecord>, FetchError>;
}

/// Body of a history API response.
#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    flights: Vec<FlightRecord>,
}

/// Date range `[end - days, end]` queried for history.
#[must_use]
pub fn history_window(end: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let start = end - chrono::Duration::days(i64::from(days));
    (start, end)
}

/// HTTP client for the flight history API.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    history_days: u32,
}

impl HistoryClient {
    /// Build a client from configuration.
    ///
    /// A missing API key is not an error here; lookups that reach the
    /// upstream will fail with [`FetchError::MissingCredentials`].
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &UpstreamConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("flightdelay/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("No upstream API key configured; cache misses will fail");
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            history_days: config.history_days,
        })
    }

    /// Whether an API key is configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// Query one spelling; `None` means "try the next one".
    async fn fetch_candidate(
        &self,
        ident: &str,
        api_key: &str,
        (start, end): (NaiveDate, NaiveDate),
    ) -> Result<Option<Vec<FlightRecord>>, FetchError> {
        let url = format!(
            "{}/history/flights/{ident}?start={start}&end={end}",
            self.base_url
        );
        debug!("Fetching upstream history: {}", url);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(e.to_string()))?;

        let status = response.status();
        debug!("Upstream answered {} for {}", status, ident);

        match status {
            StatusCode::UNAUTHORIZED => Err(FetchError::InvalidCredentials),
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
            s if !s.is_success() => Ok(None),
            _ => {
                let body: HistoryResponse = response
                    .json()
                    .await
                    .map_err(|e| FetchError::Unavailable(format!("unreadable response: {e}")))?;
                if body.flights.is_empty() {
                    Ok(None)
                } else {
                    info!("Found {} flights for {}", body.flights.len(), ident);
                    Ok(Some(body.flights))
                }
            }
        }
    }
}

#[async_trait]
impl HistorySource for HistoryClient {
    async fn fetch_history(&self, flight: &str) -> Result<Vec<FlightRecord>, FetchError> {
        let ident =
            FlightIdent::parse(flight).ok_or_else(|| FetchError::InvalidFormat(flight.to_string()))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::MissingCredentials)?;
        let window = history_window(Utc::now().date_naive(), self.history_days);

        for candidate in ident.candidates() {
            if let Some(flights) = self.fetch_candidate(&candidate, api_key, window).await? {
                return Ok(flights);
            }
        }

        debug!("No history found for {}", ident);
        Ok(Vec::new())
    }
}
