//! Flight identifiers and historical flight records.
//!
//! A flight identifier is a carrier designator followed by a flight number,
//! e.g. `DL1234`. Identifiers are normalized once at the edge and the
//! normalized form is used both as the cache key and as the identifier passed
//! to the upstream history API.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// IATA carrier designators with a known ICAO designator.
///
/// The history API indexes most flights under the ICAO form, so that spelling
/// is tried first.
const ICAO_ALIASES: &[(&str, &str)] = &[
    ("AA", "AAL"),
    ("AS", "ASA"),
    ("B6", "JBU"),
    ("DL", "DAL"),
    ("F9", "FFT"),
    ("G4", "AAY"),
    ("HA", "HAL"),
    ("NK", "NKS"),
    ("UA", "UAL"),
    ("WN", "SWA"),
    ("SY", "SCX"),
];

/// Normalize a raw flight identifier: strip all whitespace and uppercase.
///
/// Normalization is idempotent.
#[must_use]
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Look up the ICAO designator for an IATA carrier code.
#[must_use]
pub fn icao_alias(carrier: &str) -> Option<&'static str> {
    ICAO_ALIASES
        .iter()
        .find(|(iata, _)| *iata == carrier)
        .map(|(_, icao)| *icao)
}

fn ident_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Z]{2})(\d+)$").expect("static pattern is valid"))
}

/// A validated flight identifier split into carrier and number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlightIdent {
    carrier: String,
    number: String,
}

impl FlightIdent {
    /// Parse a normalized identifier of the form `{2 letters}{1+ digits}`.
    ///
    /// Returns `None` for anything else; the input is not normalized here.
    #[must_use]
    pub fn parse(normalized: &str) -> Option<Self> {
        let caps = ident_pattern().captures(normalized)?;
        Some(Self {
            carrier: caps[1].to_string(),
            number: caps[2].to_string(),
        })
    }

    /// The two-letter carrier designator.
    #[must_use]
    pub fn carrier(&self) -> &str {
        &self.carrier
    }

    /// The flight number digits.
    #[must_use]
    pub fn number(&self) -> &str {
        &self.number
    }

    /// Spellings to query upstream, most likely first.
    ///
    /// The ICAO form comes first when the carrier has one, followed by the
    /// identifier as given. The sequence is lazy so callers can stop at the
    /// first spelling that yields data.
    pub fn candidates(&self) -> impl Iterator<Item = String> + '_ {
        icao_alias(&self.carrier)
            .map(|icao| format!("{icao}{}", self.number))
            .into_iter()
            .chain(std::iter::once(self.to_string()))
    }
}

impl std::fmt::Display for FlightIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.carrier, self.number)
    }
}

/// One historical flight as reported by the history API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlightRecord {
    /// Whether the flight was cancelled.
    #[serde(default)]
    pub cancelled: bool,

    /// Arrival delay in seconds; negative when early, absent when unknown.
    #[serde(default, rename = "arrival_delay")]
    pub arrival_delay_secs: Option<i64>,
}

impl FlightRecord {
    /// A flight that operated with the given arrival delay.
    #[must_use]
    pub fn operated(arrival_delay_secs: i64) -> Self {
        Self {
            cancelled: false,
            arrival_delay_secs: Some(arrival_delay_secs),
        }
    }

    /// A cancelled flight.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            arrival_delay_secs: None,
        }
    }

    /// Arrival delay in minutes; an unknown delay counts as on time.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn arrival_delay_minutes(&self) -> f64 {
        self.arrival_delay_secs.unwrap_or(0) as f64 / 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_whitespace_and_uppercases() {
        assert_eq!(normalize("dl 1234"), "DL1234");
        assert_eq!(normalize("  ua\t 55 \n"), "UA55");
        assert_eq!(normalize("WN100"), "WN100");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["dl 1234", " Aa 1 ", "x y z", "", "ÄB 12", "b6 7"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_parse_valid() {
        let ident = FlightIdent::parse("DL1234").unwrap();
        assert_eq!(ident.carrier(), "DL");
        assert_eq!(ident.number(), "1234");
        assert_eq!(ident.to_string(), "DL1234");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(FlightIdent::parse("").is_none());
        assert!(FlightIdent::parse("DL").is_none());
        assert!(FlightIdent::parse("1234").is_none());
        assert!(FlightIdent::parse("DAL1234").is_none());
        assert!(FlightIdent::parse("DL12A").is_none());
        assert!(FlightIdent::parse("dl1234").is_none());
        assert!(FlightIdent::parse("DL 1234").is_none());
    }

    #[test]
    fn test_candidates_with_alias() {
        let ident = FlightIdent::parse("DL1234").unwrap();
        let candidates: Vec<String> = ident.candidates().collect();
        assert_eq!(candidates, vec!["DAL1234", "DL1234"]);
    }

    #[test]
    fn test_candidates_without_alias() {
        let ident = FlightIdent::parse("LH400").unwrap();
        let candidates: Vec<String> = ident.candidates().collect();
        assert_eq!(candidates, vec!["LH400"]);
    }

    #[test]
    fn test_icao_alias() {
        assert_eq!(icao_alias("UA"), Some("UAL"));
        assert_eq!(icao_alias("WN"), Some("SWA"));
        assert_eq!(icao_alias("ZZ"), None);
    }

    #[test]
    fn test_flight_record_deserialize() {
        let json = r#"{"ident": "DAL1234", "cancelled": false, "arrival_delay": -300}"#;
        let record: FlightRecord = serde_json::from_str(json).unwrap();
        assert!(!record.cancelled);
        assert_eq!(record.arrival_delay_secs, Some(-300));
        assert!((record.arrival_delay_minutes() + 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_flight_record_missing_fields() {
        let record: FlightRecord = serde_json::from_str(r#"{"arrival_delay": null}"#).unwrap();
        assert!(!record.cancelled);
        assert_eq!(record.arrival_delay_secs, None);
        assert!(record.arrival_delay_minutes().abs() < f64::EPSILON);
    }
}
