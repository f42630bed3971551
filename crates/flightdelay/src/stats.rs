//! Delay statistics over recent flight history.
//!
//! [`compute`] is a pure function: the same records always produce the same
//! [`StatResult`]. Too little history is a valid outcome, represented by
//! [`StatResult::Insufficient`], and is cached and counted like a summary.

use serde::{Deserialize, Serialize};

use crate::flight::FlightRecord;

/// Fewest operated flights that still produce a summary.
pub const MIN_SAMPLE_SIZE: usize = 3;

/// Most operated flights that contribute to a summary.
pub const MAX_SAMPLE_SIZE: usize = 10;

/// Outcome of a statistics computation.
///
/// Serialized untagged: a summary carries `avg_delay` and friends, an
/// insufficient-data result carries `error` and `insufficient_data: true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatResult {
    /// Enough operated flights were found.
    Summary(DelaySummary),
    /// Too few operated flights to say anything.
    Insufficient(InsufficientData),
}

/// Summary of arrival delays, all values in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelaySummary {
    /// Number of flights the figures are computed over.
    pub sample_size: usize,
    /// Mean arrival delay.
    pub avg_delay: i64,
    /// Largest arrival delay.
    pub max_delay: i64,
    /// Smallest arrival delay (negative when early).
    pub min_delay: i64,
    /// 25th percentile arrival delay.
    pub p25: i64,
    /// 75th percentile arrival delay.
    pub p75: i64,
    /// Cancelled flights in the fetched history.
    pub cancelled_count: usize,
}

/// Result returned when history is too sparse for a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientData {
    /// Human-readable reason.
    #[serde(rename = "error")]
    pub reason: String,
    /// Always `true`; lets clients tell the variants apart.
    pub insufficient_data: bool,
    /// Operated flights that were available.
    #[serde(default)]
    pub sample_size: usize,
}

impl InsufficientData {
    fn new(reason: impl Into<String>, sample_size: usize) -> Self {
        Self {
            reason: reason.into(),
            insufficient_data: true,
            sample_size,
        }
    }
}

impl StatResult {
    /// The summary, if there was enough data.
    #[must_use]
    pub fn summary(&self) -> Option<&DelaySummary> {
        match self {
            Self::Summary(summary) => Some(summary),
            Self::Insufficient(_) => None,
        }
    }

    /// Whether this is an insufficient-data result.
    #[must_use]
    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::Insufficient(_))
    }

    /// Number of flights behind this result.
    #[must_use]
    pub fn sample_size(&self) -> usize {
        match self {
            Self::Summary(summary) => summary.sample_size,
            Self::Insufficient(data) => data.sample_size,
        }
    }
}

/// Compute delay statistics from flight history.
///
/// Records are expected most-recent-first; only the first
/// [`MAX_SAMPLE_SIZE`] operated flights are used and their order is not
/// changed before selection.
#[must_use]
pub fn compute(records: &[FlightRecord]) -> StatResult {
    if records.is_empty() {
        return StatResult::Insufficient(InsufficientData::new("No flight data available", 0));
    }

    let (cancelled, operated): (Vec<&FlightRecord>, Vec<&FlightRecord>) =
        records.iter().partition(|r| r.cancelled);

    if operated.len() < MIN_SAMPLE_SIZE {
        return StatResult::Insufficient(InsufficientData::new(
            format!("Insufficient data (only {} flights)", operated.len()),
            operated.len(),
        ));
    }

    let delays: Vec<f64> = operated
        .iter()
        .take(MAX_SAMPLE_SIZE)
        .map(|r| r.arrival_delay_minutes())
        .collect();

    let mut sorted = delays.clone();
    sorted.sort_by(f64::total_cmp);

    #[allow(clippy::cast_precision_loss)]
    let mean = delays.iter().sum::<f64>() / delays.len() as f64;

    StatResult::Summary(DelaySummary {
        sample_size: delays.len(),
        avg_delay: round_minutes(mean),
        max_delay: round_minutes(sorted[sorted.len() - 1]),
        min_delay: round_minutes(sorted[0]),
        p25: round_minutes(percentile(&sorted, 25.0)),
        p75: round_minutes(percentile(&sorted, 75.0)),
        cancelled_count: cancelled.len(),
    })
}

/// Linearly interpolated percentile of an ascending slice.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p / 100.0 * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            if lower == upper {
                sorted[lower]
            } else {
                sorted[lower] * (upper as f64 - rank) + sorted[upper] * (rank - lower as f64)
            }
        }
    }
}

/// Round half away from zero to whole minutes.
#[allow(clippy::cast_possible_truncation)]
fn round_minutes(minutes: f64) -> i64 {
    minutes.round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minutes(values: &[i64]) -> Vec<FlightRecord> {
        values
            .iter()
            .map(|m| FlightRecord::operated(m * 60))
            .collect()
    }

    #[test]
    fn test_empty_is_insufficient() {
        let result = compute(&[]);
        assert!(result.is_insufficient());
        assert_eq!(result.sample_size(), 0);
        match result {
            StatResult::Insufficient(data) => {
                assert_eq!(data.reason, "No flight data available");
                assert!(data.insufficient_data);
            }
            StatResult::Summary(_) => panic!("expected insufficient data"),
        }
    }

    #[test]
    fn test_too_few_operated_flights() {
        let mut records = minutes(&[5, 10]);
        records.push(FlightRecord::cancelled());
        records.push(FlightRecord::cancelled());

        let result = compute(&records);
        assert!(result.is_insufficient());
        assert_eq!(result.sample_size(), 2);
        if let StatResult::Insufficient(data) = result {
            assert!(data.reason.contains('2'));
        }
    }

    #[test]
    fn test_only_cancelled_flights() {
        let records = vec![FlightRecord::cancelled(); 5];
        let result = compute(&records);
        assert!(result.is_insufficient());
        assert_eq!(result.sample_size(), 0);
    }

    #[test]
    fn test_three_identical_flights() {
        let result = compute(&minutes(&[12, 12, 12]));
        let summary = result.summary().copied().unwrap();
        assert_eq!(
            summary,
            DelaySummary {
                sample_size: 3,
                avg_delay: 12,
                max_delay: 12,
                min_delay: 12,
                p25: 12,
                p75: 12,
                cancelled_count: 0,
            }
        );
    }

    #[test]
    fn test_interpolated_percentiles() {
        let result = compute(&minutes(&[0, 10, 20, 30, 40, 50, 60, 70, 80, 90]));
        let summary = result.summary().unwrap();
        // rank 2.25 between 20 and 30 gives 22.5, rounded away from zero
        assert_eq!(summary.p25, 23);
        // rank 6.75 between 60 and 70 gives 67.5
        assert_eq!(summary.p75, 68);
        assert_eq!(summary.avg_delay, 45);
        assert_eq!(summary.min_delay, 0);
        assert_eq!(summary.max_delay, 90);
        assert_eq!(summary.sample_size, 10);
    }

    #[test]
    fn test_percentiles_ignore_input_order() {
        let result = compute(&minutes(&[90, 0, 70, 10, 50, 30, 20, 80, 40, 60]));
        let summary = result.summary().unwrap();
        assert_eq!(summary.p25, 23);
        assert_eq!(summary.p75, 68);
    }

    #[test]
    fn test_only_first_ten_operated_flights_used() {
        let mut values = vec![10; 10];
        values.extend([1000, 1000, 1000]);
        let result = compute(&minutes(&values));
        let summary = result.summary().unwrap();
        assert_eq!(summary.sample_size, 10);
        assert_eq!(summary.max_delay, 10);
        assert_eq!(summary.avg_delay, 10);
    }

    #[test]
    fn test_cancelled_flights_skipped_and_counted() {
        let records = vec![
            FlightRecord::cancelled(),
            FlightRecord::operated(600),
            FlightRecord::cancelled(),
            FlightRecord::operated(1200),
            FlightRecord::operated(1800),
        ];
        let summary = *compute(&records).summary().unwrap();
        assert_eq!(summary.sample_size, 3);
        assert_eq!(summary.cancelled_count, 2);
        assert_eq!(summary.avg_delay, 20);
    }

    #[test]
    fn test_cancelled_count_includes_flights_beyond_sample() {
        let mut records = minutes(&[1; 12]);
        records.push(FlightRecord::cancelled());
        let summary = *compute(&records).summary().unwrap();
        assert_eq!(summary.sample_size, 10);
        assert_eq!(summary.cancelled_count, 1);
    }

    #[test]
    fn test_early_arrivals_not_clamped() {
        let summary = *compute(&minutes(&[-20, -10, 0])).summary().unwrap();
        assert_eq!(summary.avg_delay, -10);
        assert_eq!(summary.min_delay, -20);
        assert_eq!(summary.max_delay, 0);
        assert_eq!(summary.p25, -15);
    }

    #[test]
    fn test_negative_half_rounds_away_from_zero() {
        // -150s = -2.5 minutes
        let records = vec![FlightRecord::operated(-150); 3];
        let summary = *compute(&records).summary().unwrap();
        assert_eq!(summary.avg_delay, -3);
    }

    #[test]
    fn test_missing_delay_counts_as_zero() {
        let records = vec![
            FlightRecord::default(),
            FlightRecord::operated(600),
            FlightRecord::operated(1200),
        ];
        let summary = *compute(&records).summary().unwrap();
        assert_eq!(summary.min_delay, 0);
        assert_eq!(summary.avg_delay, 10);
    }

    #[test]
    fn test_percentile_single_element() {
        assert!((percentile(&[7.0], 25.0) - 7.0).abs() < f64::EPSILON);
        assert!((percentile(&[7.0], 75.0) - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_json_shape() {
        let result = compute(&minutes(&[5, 10, 15]));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["avg_delay"], 10);
        assert_eq!(json["sample_size"], 3);
        assert!(json.get("insufficient_data").is_none());

        let back: StatResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_insufficient_json_shape() {
        let result = compute(&minutes(&[5]));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["insufficient_data"], true);
        assert_eq!(json["sample_size"], 1);
        assert!(json["error"].as_str().unwrap().contains("Insufficient"));

        let back: StatResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
