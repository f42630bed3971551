//! Concurrent lookups for every flight found on a page.
//!
//! A page usually shows several candidate flights. [`check_flights`] looks
//! them all up at once, waits for every lookup to settle, and summarizes the
//! batch. One failed lookup never cancels or hides the others.

use std::str::FromStr;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::LookupClient;
use crate::error::Error;
use crate::flight::{normalize, FlightIdent};
use crate::lookup::{Lookup, LookupError, LookupRequest, LookupResponse};

/// Average delay in minutes at or above which a flight counts as delayed.
pub const DELAY_THRESHOLD_MINUTES: i64 = 30;

/// Anything that can answer a lookup request.
#[async_trait]
pub trait LookupApi: Send + Sync {
    /// Failure type of a single lookup.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Run one lookup.
    ///
    /// # Errors
    ///
    /// Returns the implementation's error when the lookup fails.
    async fn submit(&self, request: &LookupRequest) -> Result<LookupResponse, Self::Error>;
}

#[async_trait]
impl LookupApi for Lookup {
    type Error = LookupError;

    async fn submit(&self, request: &LookupRequest) -> Result<LookupResponse, LookupError> {
        self.handle(request).await
    }
}

#[async_trait]
impl LookupApi for LookupClient {
    type Error = Error;

    async fn submit(&self, request: &LookupRequest) -> Result<LookupResponse, Error> {
        self.lookup(request).await
    }
}

/// A flight spotted on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedFlight {
    /// Two-letter carrier code.
    pub carrier: String,
    /// Flight number digits.
    pub number: String,
    /// Departure airport, if the page showed one next to the flight.
    #[serde(default)]
    pub origin: Option<String>,
    /// Arrival airport, if the page showed one next to the flight.
    #[serde(default)]
    pub destination: Option<String>,
}

impl DetectedFlight {
    /// A flight without route information.
    #[must_use]
    pub fn new(carrier: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            carrier: carrier.into(),
            number: number.into(),
            origin: None,
            destination: None,
        }
    }

    /// Carrier and number joined, e.g. `"DL1234"`.
    #[must_use]
    pub fn flight_number(&self) -> String {
        format!("{}{}", self.carrier, self.number)
    }
}

impl FromStr for DetectedFlight {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        FlightIdent::parse(&normalized)
            .map(|ident| Self::new(ident.carrier(), ident.number()))
            .ok_or_else(|| format!("not a flight number: {s}"))
    }
}

/// Route shown for the whole page; overrides per-flight routes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Departure airport.
    #[serde(default)]
    pub origin: Option<String>,
    /// Arrival airport.
    #[serde(default)]
    pub destination: Option<String>,
}

/// Outcome of one flight's lookup.
#[derive(Debug)]
pub struct FlightCheck<E> {
    /// The flight number that was looked up.
    pub flight_number: String,
    /// Departure airport sent with the lookup.
    pub origin: Option<String>,
    /// Arrival airport sent with the lookup.
    pub destination: Option<String>,
    /// The lookup's result.
    pub outcome: Result<LookupResponse, E>,
}

impl<E> FlightCheck<E> {
    /// Average delay, when the lookup produced a summary.
    #[must_use]
    pub fn avg_delay(&self) -> Option<i64> {
        self.outcome
            .as_ref()
            .ok()
            .and_then(|response| response.stats.summary())
            .map(|summary| summary.avg_delay)
    }

    /// Whether the lookup produced a summary.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.avg_delay().is_some()
    }

    /// Whether the flight is usually late.
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        self.avg_delay()
            .is_some_and(|avg| avg >= DELAY_THRESHOLD_MINUTES)
    }
}

/// Summary of a batch of lookups.
#[derive(Debug)]
pub struct FanoutReport<E> {
    /// One entry per requested flight, in request order.
    pub checks: Vec<FlightCheck<E>>,
    /// Whether any flight with data is usually late.
    pub any_delayed: bool,
    /// Whether any flight produced a summary.
    pub has_data: bool,
}

impl<E> FanoutReport<E> {
    fn from_checks(checks: Vec<FlightCheck<E>>) -> Self {
        let any_delayed = checks.iter().any(FlightCheck::is_delayed);
        let has_data = checks.iter().any(FlightCheck::has_data);
        Self {
            checks,
            any_delayed,
            has_data,
        }
    }

    /// Number of lookups that failed.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.checks.iter().filter(|c| c.outcome.is_err()).count()
    }
}

/// Look up every flight concurrently and summarize the results.
///
/// The page route, where known, replaces each flight's own route. Flights are
/// not de-duplicated here.
pub async fn check_flights<A>(
    api: &A,
    identity_id: &str,
    flights: &[DetectedFlight],
    route: &Route,
) -> FanoutReport<A::Error>
where
    A: LookupApi + ?Sized,
{
    debug!("Checking {} flights", flights.len());

    let lookups = flights.iter().map(|flight| {
        let request = LookupRequest::new(identity_id, flight.flight_number()).with_route(
            route.origin.clone().or_else(|| flight.origin.clone()),
            route.destination.clone().or_else(|| flight.destination.clone()),
        );
        async move {
            let outcome = api.submit(&request).await;
            if let Err(e) = &outcome {
                warn!("Lookup for {} failed: {}", flight.flight_number(), e);
            }
            FlightCheck {
                flight_number: flight.flight_number(),
                origin: request.origin,
                destination: request.destination,
                outcome,
            }
        }
    });

    let report = FanoutReport::from_checks(join_all(lookups).await);
    debug!(
        "Checked {} flights: delayed={}, data={}",
        report.checks.len(),
        report.any_delayed,
        report.has_data
    );
    report
}
