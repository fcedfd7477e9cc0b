//! Estimators and their shared output types.
//!
//! Every estimator produces an [`EstimateTable`]: one [`StratumEstimate`]
//! row per stratum, in first-seen stratum order, carrying the point
//! estimate, Wald interval, sample size, a method label, and a diagnostics
//! payload describing what was dropped, truncated, or corrected on the way.

mod cpue;
mod effort;
mod harvest;
mod variance;

pub use cpue::{CpueEstimator, CpueMethod};
pub use effort::{EffortEstimator, EffortMethod, PeriodSource};
pub use harvest::{HarvestEstimator, HarvestMode};
pub use variance::VarianceCenter;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{CreelError, Result};
use crate::frame::StratumKey;

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// Per-stratum accounting of rows the estimator could not use as-is.
///
/// Counts serialize only when non-zero, so a clean stratum renders as an
/// empty object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Rows skipped for missing values or zero weight.
    #[serde(skip_serializing_if = "is_zero")]
    pub dropped_rows: usize,
    /// Trips excluded by the minimum-duration truncation rule.
    #[serde(skip_serializing_if = "is_zero")]
    pub truncated_rows: usize,
    /// Rows whose per-trip ratio was not finite.
    #[serde(skip_serializing_if = "is_zero")]
    pub nonfinite_rows: usize,
    /// Planned-duration cells raised to the observed duration.
    #[serde(skip_serializing_if = "is_zero")]
    pub corrected_rows: usize,
    /// Column used for length-of-stay bias correction, when active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias_correction: Option<String>,
    /// Why this stratum has no estimate, when it has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap: Option<String>,
    /// Free-form notes, e.g. heavy truncation or a missing variance part.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn with_gap(mut self, reason: impl Into<String>) -> Self {
        self.gap = Some(reason.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_bias_correction(mut self, column: impl Into<String>) -> Self {
        self.bias_correction = Some(column.into());
        self
    }
}

/// One output row: the estimate for a single stratum.
#[derive(Debug, Clone, Serialize)]
pub struct StratumEstimate {
    /// Stratification column names mapped to this stratum's values.
    pub stratum: IndexMap<String, String>,
    pub estimate: Option<f64>,
    pub standard_error: Option<f64>,
    pub ci_low: Option<f64>,
    pub ci_high: Option<f64>,
    /// Rows (or passes, for progressive effort) the estimate rests on.
    pub sample_size: usize,
    /// Which estimator produced the row, e.g. `cpue_ratio_of_means`.
    pub method: String,
    pub diagnostics: Diagnostics,
    /// Replicate estimates carried internally so a downstream harvest
    /// estimator can form covariances; not part of the serialized output.
    #[serde(skip)]
    pub(crate) replicate_estimates: Option<Vec<f64>>,
}

impl StratumEstimate {
    /// True when the stratum produced no estimate (a computation gap).
    pub fn is_gap(&self) -> bool {
        self.estimate.is_none()
    }
}

/// All stratum estimates of one estimator run.
#[derive(Debug, Clone, Serialize)]
pub struct EstimateTable {
    /// Stratification column names, in grouping order.
    pub keys: Vec<String>,
    /// Confidence level of the Wald intervals.
    pub confidence: f64,
    pub rows: Vec<StratumEstimate>,
    /// Replicate variance coefficients shared by every row, kept so a
    /// harvest join can verify both inputs used the same replicate design.
    #[serde(skip)]
    pub(crate) replicate_coefficients: Option<Vec<f64>>,
}

impl EstimateTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StratumEstimate> {
        self.rows.iter()
    }

    /// Finds the row whose stratum values match `values` in key order.
    pub fn get<S: AsRef<str>>(&self, values: &[S]) -> Option<&StratumEstimate> {
        self.rows.iter().find(|row| {
            row.stratum.len() == values.len()
                && row
                    .stratum
                    .values()
                    .zip(values)
                    .all(|(have, want)| have == want.as_ref())
        })
    }

    /// Serializes the table as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Intermediate result of one stratum before interval construction.
#[derive(Debug)]
pub(crate) struct RowOutcome {
    pub point: Option<f64>,
    pub variance: Option<f64>,
    pub sample_size: usize,
    pub diagnostics: Diagnostics,
    pub replicate_estimates: Option<Vec<f64>>,
}

impl RowOutcome {
    /// A stratum that produced nothing usable.
    pub fn gap(reason: impl Into<String>, diagnostics: Diagnostics) -> Self {
        RowOutcome {
            point: None,
            variance: None,
            sample_size: 0,
            diagnostics: diagnostics.with_gap(reason),
            replicate_estimates: None,
        }
    }
}

/// Symmetric Wald interval around a point estimate.
pub(crate) fn wald_interval(point: f64, se: f64, confidence: f64) -> (f64, f64) {
    let z = variance::normal_quantile(0.5 + confidence / 2.0);
    (point - z * se, point + z * se)
}

/// Assembles the final output row for one stratum.
pub(crate) fn finish_row(
    key: &StratumKey,
    key_columns: &[String],
    outcome: RowOutcome,
    method: &str,
    confidence: f64,
) -> StratumEstimate {
    let standard_error = outcome.variance.map(|v| v.max(0.0).sqrt());
    let (ci_low, ci_high) = match (outcome.point, standard_error) {
        (Some(point), Some(se)) => {
            let (low, high) = wald_interval(point, se, confidence);
            (Some(low), Some(high))
        }
        _ => (None, None),
    };
    StratumEstimate {
        stratum: key.labeled(key_columns),
        estimate: outcome.point,
        standard_error,
        ci_low,
        ci_high,
        sample_size: outcome.sample_size,
        method: method.to_string(),
        diagnostics: outcome.diagnostics,
        replicate_estimates: outcome.replicate_estimates,
    }
}

pub(crate) fn validate_confidence(confidence: f64) -> Result<()> {
    if confidence > 0.0 && confidence < 1.0 {
        Ok(())
    } else {
        Err(CreelError::invalid(
            "confidence",
            format!("confidence level {confidence} must be strictly between 0 and 1"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> StratumKey {
        StratumKey::new(vec!["ramp_a".into()])
    }

    fn columns() -> Vec<String> {
        vec!["site".to_string()]
    }

    #[test]
    fn test_finish_row_interval_is_symmetric() {
        let outcome = RowOutcome {
            point: Some(10.0),
            variance: Some(4.0),
            sample_size: 12,
            diagnostics: Diagnostics::new(),
            replicate_estimates: None,
        };
        let row = finish_row(&key(), &columns(), outcome, "effort_instantaneous", 0.95);
        assert_eq!(row.standard_error, Some(2.0));
        let low = row.ci_low.unwrap();
        let high = row.ci_high.unwrap();
        assert!(((high - 10.0) - (10.0 - low)).abs() < 1e-9);
        assert!((high - 10.0 - 2.0 * 1.959963984540054).abs() < 1e-6);
    }

    #[test]
    fn test_finish_row_gap_propagates_na() {
        let outcome = RowOutcome::gap("no usable rows", Diagnostics::new());
        let row = finish_row(&key(), &columns(), outcome, "cpue_ratio_of_means", 0.95);
        assert!(row.is_gap());
        assert_eq!(row.standard_error, None);
        assert_eq!(row.ci_low, None);
        assert_eq!(row.diagnostics.gap.as_deref(), Some("no usable rows"));
    }

    #[test]
    fn test_point_without_variance_keeps_estimate() {
        let outcome = RowOutcome {
            point: Some(3.0),
            variance: None,
            sample_size: 1,
            diagnostics: Diagnostics::new(),
            replicate_estimates: None,
        };
        let row = finish_row(&key(), &columns(), outcome, "cpue_mean_of_ratios", 0.95);
        assert_eq!(row.estimate, Some(3.0));
        assert_eq!(row.standard_error, None);
        assert_eq!(row.ci_high, None);
    }

    #[test]
    fn test_diagnostics_serialize_compactly() {
        let clean = serde_json::to_value(Diagnostics::new()).unwrap();
        assert_eq!(clean, serde_json::json!({}));

        let mut busy = Diagnostics::new().with_note("heavy truncation");
        busy.truncated_rows = 3;
        let value = serde_json::to_value(&busy).unwrap();
        assert_eq!(value["truncated_rows"], 3);
        assert!(value.get("dropped_rows").is_none());
    }

    #[test]
    fn test_table_lookup_by_stratum_values() {
        let row = finish_row(
            &key(),
            &columns(),
            RowOutcome {
                point: Some(1.0),
                variance: Some(0.0),
                sample_size: 2,
                diagnostics: Diagnostics::new(),
                replicate_estimates: None,
            },
            "effort_instantaneous",
            0.95,
        );
        let table = EstimateTable {
            keys: columns(),
            confidence: 0.95,
            rows: vec![row],
            replicate_coefficients: None,
        };
        assert!(table.get(&["ramp_a"]).is_some());
        assert!(table.get(&["ramp_b"]).is_none());
    }

    #[test]
    fn test_validate_confidence_bounds() {
        assert!(validate_confidence(0.95).is_ok());
        assert!(validate_confidence(0.0).is_err());
        assert!(validate_confidence(1.0).is_err());
        assert!(validate_confidence(-0.5).is_err());
    }
}
