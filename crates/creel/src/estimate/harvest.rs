//! Total harvest estimation: effort times CPUE, stratum by stratum.
//!
//! Effort and CPUE tables are joined exactly on their shared stratification
//! keys. The harvest variance uses the delta method,
//!
//! ```text
//! Var(H) ≈ C²·Var(E) + E²·Var(C) + 2·E·C·Cov(E, C)
//! ```
//!
//! with the covariance either declared zero (effort and CPUE from
//! independent surveys, the usual creel setup) or measured from replicate
//! estimates when both tables were produced under the same replicate
//! design.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CreelError, Result};
use crate::estimate::variance::{covariance_from_replicates, VarianceCenter};
use crate::estimate::{
    finish_row, validate_confidence, Diagnostics, EstimateTable, RowOutcome, StratumEstimate,
};
use crate::frame::StratumKey;

const METHOD_INDEPENDENT: &str = "harvest_independent";
const METHOD_REPLICATE_COV: &str = "harvest_replicate_cov";

/// How the effort/CPUE covariance term is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestMode {
    /// Covariance declared zero. Correct when effort comes from counts and
    /// CPUE from interviews collected independently.
    #[default]
    Independent,
    /// Covariance measured from replicate estimates. Both inputs must have
    /// been estimated under the same replicate design.
    ReplicateCovariance,
}

/// Combines an effort table and a CPUE table into total harvest.
#[derive(Debug, Clone)]
pub struct HarvestEstimator {
    mode: HarvestMode,
    confidence: f64,
    center: VarianceCenter,
}

impl HarvestEstimator {
    pub fn new(mode: HarvestMode) -> Self {
        HarvestEstimator {
            mode,
            confidence: 0.95,
            center: VarianceCenter::default(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_variance_center(mut self, center: VarianceCenter) -> Self {
        self.center = center;
        self
    }

    /// Joins the two tables on their shared stratum keys and multiplies.
    ///
    /// Strata present on only one side yield NA rows that name the missing
    /// side, so totals are never silently built from partial joins.
    pub fn estimate(&self, effort: &EstimateTable, cpue: &EstimateTable) -> Result<EstimateTable> {
        validate_confidence(self.confidence)?;

        let shared: Vec<String> = effort
            .keys
            .iter()
            .filter(|key| cpue.keys.contains(key))
            .cloned()
            .collect();
        if shared.is_empty() {
            return Err(CreelError::invalid(
                "strata",
                "the effort and cpue tables share no stratification columns",
            ));
        }

        let coefficients = match self.mode {
            HarvestMode::ReplicateCovariance => {
                match (&effort.replicate_coefficients, &cpue.replicate_coefficients) {
                    (Some(a), Some(b)) if a == b => Some(a.clone()),
                    (Some(_), Some(_)) => {
                        return Err(CreelError::ReplicateMismatch(
                            "the effort and cpue tables were estimated under different \
                             replicate designs"
                                .to_string(),
                        ));
                    }
                    _ => {
                        return Err(CreelError::ReplicateMismatch(
                            "replicate covariance needs replicate weights on both the \
                             effort and cpue designs"
                                .to_string(),
                        ));
                    }
                }
            }
            HarvestMode::Independent => None,
        };

        let label = match self.mode {
            HarvestMode::Independent => METHOD_INDEPENDENT,
            HarvestMode::ReplicateCovariance => METHOD_REPLICATE_COV,
        };

        let mut cpue_lookup: IndexMap<StratumKey, &StratumEstimate> = IndexMap::new();
        for row in &cpue.rows {
            let key = project(row, &shared)?;
            if cpue_lookup.insert(key.clone(), row).is_some() {
                return Err(CreelError::invalid(
                    "strata",
                    format!(
                        "cpue stratum '{key}' is not unique under the shared keys \
                         [{}]",
                        shared.join(", ")
                    ),
                ));
            }
        }

        let mut rows = Vec::with_capacity(effort.len().max(cpue.len()));
        let mut seen_effort: HashSet<StratumKey> = HashSet::new();
        let mut matched: HashSet<StratumKey> = HashSet::new();
        for effort_row in &effort.rows {
            let key = project(effort_row, &shared)?;
            if !seen_effort.insert(key.clone()) {
                return Err(CreelError::invalid(
                    "strata",
                    format!(
                        "effort stratum '{key}' is not unique under the shared keys \
                         [{}]",
                        shared.join(", ")
                    ),
                ));
            }
            let outcome = match cpue_lookup.get(&key) {
                Some(cpue_row) => {
                    matched.insert(key.clone());
                    self.combine(&key, effort_row, cpue_row, coefficients.as_deref())?
                }
                None => RowOutcome::gap("no matching cpue stratum", Diagnostics::new()),
            };
            rows.push(finish_row(&key, &shared, outcome, label, self.confidence));
        }
        for (key, _) in cpue_lookup.iter().filter(|(key, _)| !matched.contains(*key)) {
            let outcome = RowOutcome::gap("no matching effort stratum", Diagnostics::new());
            rows.push(finish_row(key, &shared, outcome, label, self.confidence));
        }

        Ok(EstimateTable {
            keys: shared,
            confidence: self.confidence,
            rows,
            replicate_coefficients: coefficients,
        })
    }

    fn combine(
        &self,
        key: &StratumKey,
        effort: &StratumEstimate,
        cpue: &StratumEstimate,
        coefficients: Option<&[f64]>,
    ) -> Result<RowOutcome> {
        let mut diagnostics = Diagnostics::new();
        let (effort_est, cpue_est) = match (effort.estimate, cpue.estimate) {
            (Some(e), Some(c)) => (e, c),
            (None, _) => {
                return Ok(RowOutcome::gap("effort estimate unavailable", diagnostics));
            }
            (_, None) => {
                return Ok(RowOutcome::gap("cpue estimate unavailable", diagnostics));
            }
        };

        let point = effort_est * cpue_est;
        let mut variance = None;
        let mut harvest_reps = None;

        if let (Some(se_e), Some(se_c)) = (effort.standard_error, cpue.standard_error) {
            let var_e = se_e * se_e;
            let var_c = se_c * se_c;
            match (
                self.mode,
                &effort.replicate_estimates,
                &cpue.replicate_estimates,
            ) {
                (HarvestMode::Independent, _, _) => {
                    variance =
                        Some(cpue_est.powi(2) * var_e + effort_est.powi(2) * var_c);
                }
                (HarvestMode::ReplicateCovariance, Some(e_reps), Some(c_reps)) => {
                    if e_reps.len() != c_reps.len() {
                        return Err(CreelError::ReplicateMismatch(format!(
                            "stratum '{key}' has {} effort replicates but {} cpue \
                             replicates",
                            e_reps.len(),
                            c_reps.len()
                        )));
                    }
                    if let Some(coefs) = coefficients {
                        let cov = covariance_from_replicates(
                            effort_est,
                            cpue_est,
                            e_reps,
                            c_reps,
                            coefs,
                            self.center,
                        );
                        let var = cpue_est.powi(2) * var_e
                            + effort_est.powi(2) * var_c
                            + 2.0 * effort_est * cpue_est * cov;
                        if var < 0.0 {
                            diagnostics =
                                diagnostics.with_note("delta variance clamped at zero");
                        }
                        variance = Some(var);
                        harvest_reps = Some(
                            e_reps.iter().zip(c_reps).map(|(a, b)| a * b).collect(),
                        );
                    }
                }
                (HarvestMode::ReplicateCovariance, _, _) => {
                    diagnostics = diagnostics.with_note(
                        "replicate estimates unavailable for this stratum; no variance",
                    );
                }
            }
        } else {
            diagnostics =
                diagnostics.with_note("variance unavailable for one input estimate");
        }

        Ok(RowOutcome {
            point: Some(point),
            variance,
            sample_size: effort.sample_size.min(cpue.sample_size),
            diagnostics,
            replicate_estimates: harvest_reps,
        })
    }
}

/// Projects a stratum estimate onto the shared key columns.
fn project(row: &StratumEstimate, shared: &[String]) -> Result<StratumKey> {
    let mut values = Vec::with_capacity(shared.len());
    for key in shared {
        match row.stratum.get(key) {
            Some(value) => values.push(value.clone()),
            None => {
                return Err(CreelError::StratumMismatch {
                    strata: shared.join(", "),
                    detail: format!("an estimate row is missing the '{key}' key"),
                });
            }
        }
    }
    Ok(StratumKey::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(
        rows: Vec<StratumEstimate>,
        coefficients: Option<Vec<f64>>,
    ) -> EstimateTable {
        EstimateTable {
            keys: vec!["site".to_string()],
            confidence: 0.95,
            rows,
            replicate_coefficients: coefficients,
        }
    }

    fn row(
        site: &str,
        estimate: Option<f64>,
        standard_error: Option<f64>,
        replicates: Option<Vec<f64>>,
    ) -> StratumEstimate {
        let mut stratum = IndexMap::new();
        stratum.insert("site".to_string(), site.to_string());
        StratumEstimate {
            stratum,
            estimate,
            standard_error,
            ci_low: None,
            ci_high: None,
            sample_size: 10,
            method: "test".to_string(),
            diagnostics: Diagnostics::new(),
            replicate_estimates: replicates,
        }
    }

    #[test]
    fn test_independent_delta_variance() {
        let effort = table(vec![row("ramp_a", Some(100.0), Some(10.0), None)], None);
        let cpue = table(vec![row("ramp_a", Some(2.0), Some(0.5), None)], None);
        let harvest = HarvestEstimator::new(HarvestMode::Independent)
            .estimate(&effort, &cpue)
            .unwrap();

        let out = &harvest.rows[0];
        assert_eq!(out.estimate, Some(200.0));
        // Var = 2²·10² + 100²·0.5² = 400 + 2500.
        assert!((out.standard_error.unwrap() - 2900.0_f64.sqrt()).abs() < 1e-9);
        assert_eq!(out.method, "harvest_independent");
        assert_eq!(out.sample_size, 10);
    }

    #[test]
    fn test_unmatched_strata_produce_na_rows() {
        let effort = table(
            vec![
                row("ramp_a", Some(100.0), Some(10.0), None),
                row("ramp_b", Some(50.0), Some(5.0), None),
            ],
            None,
        );
        let cpue = table(
            vec![
                row("ramp_a", Some(2.0), Some(0.5), None),
                row("ramp_c", Some(1.0), Some(0.1), None),
            ],
            None,
        );
        let harvest = HarvestEstimator::new(HarvestMode::Independent)
            .estimate(&effort, &cpue)
            .unwrap();

        assert_eq!(harvest.len(), 3);
        assert_eq!(harvest.rows[0].estimate, Some(200.0));
        assert!(harvest.rows[1].is_gap());
        assert_eq!(
            harvest.rows[1].diagnostics.gap.as_deref(),
            Some("no matching cpue stratum")
        );
        assert_eq!(harvest.rows[2].stratum["site"], "ramp_c");
        assert_eq!(
            harvest.rows[2].diagnostics.gap.as_deref(),
            Some("no matching effort stratum")
        );
    }

    #[test]
    fn test_gap_inputs_propagate() {
        let effort = table(vec![row("ramp_a", None, None, None)], None);
        let cpue = table(vec![row("ramp_a", Some(2.0), Some(0.5), None)], None);
        let harvest = HarvestEstimator::new(HarvestMode::Independent)
            .estimate(&effort, &cpue)
            .unwrap();
        assert!(harvest.rows[0].is_gap());
        assert_eq!(
            harvest.rows[0].diagnostics.gap.as_deref(),
            Some("effort estimate unavailable")
        );
    }

    #[test]
    fn test_missing_input_variance_keeps_point() {
        let effort = table(vec![row("ramp_a", Some(100.0), Some(10.0), None)], None);
        let cpue = table(vec![row("ramp_a", Some(2.0), None, None)], None);
        let harvest = HarvestEstimator::new(HarvestMode::Independent)
            .estimate(&effort, &cpue)
            .unwrap();
        let out = &harvest.rows[0];
        assert_eq!(out.estimate, Some(200.0));
        assert_eq!(out.standard_error, None);
        assert!(!out.diagnostics.notes.is_empty());
    }

    #[test]
    fn test_no_shared_keys_is_fatal() {
        let mut effort = table(vec![row("ramp_a", Some(1.0), Some(0.1), None)], None);
        effort.keys = vec!["month".to_string()];
        let cpue = table(vec![row("ramp_a", Some(2.0), Some(0.5), None)], None);
        let result = HarvestEstimator::new(HarvestMode::Independent).estimate(&effort, &cpue);
        assert!(matches!(
            result,
            Err(CreelError::InvalidParameter { name: "strata", .. })
        ));
    }

    #[test]
    fn test_duplicate_projected_stratum_is_fatal() {
        let effort = table(
            vec![
                row("ramp_a", Some(1.0), Some(0.1), None),
                row("ramp_a", Some(2.0), Some(0.1), None),
            ],
            None,
        );
        let cpue = table(vec![row("ramp_a", Some(2.0), Some(0.5), None)], None);
        let result = HarvestEstimator::new(HarvestMode::Independent).estimate(&effort, &cpue);
        assert!(result.is_err());
    }

    #[test]
    fn test_replicate_covariance() {
        let coefs = vec![0.5, 0.5];
        let effort = table(
            vec![row(
                "ramp_a",
                Some(100.0),
                Some(10.0),
                Some(vec![90.0, 110.0]),
            )],
            Some(coefs.clone()),
        );
        let cpue = table(
            vec![row("ramp_a", Some(2.0), Some(0.1), Some(vec![1.9, 2.1]))],
            Some(coefs),
        );
        let harvest = HarvestEstimator::new(HarvestMode::ReplicateCovariance)
            .estimate(&effort, &cpue)
            .unwrap();

        let out = &harvest.rows[0];
        assert_eq!(out.estimate, Some(200.0));
        // Cov = 0.5(-10)(-0.1) + 0.5(10)(0.1) = 1.
        // Var = 4·100 + 10000·0.01 + 2·100·2·1 = 900.
        assert!((out.standard_error.unwrap() - 30.0).abs() < 1e-9);
        assert_eq!(out.method, "harvest_replicate_cov");
        // Harvest replicates are the elementwise products.
        assert_eq!(
            out.replicate_estimates,
            Some(vec![90.0 * 1.9, 110.0 * 2.1])
        );
    }

    #[test]
    fn test_replicate_covariance_needs_matching_designs() {
        let effort = table(
            vec![row("ramp_a", Some(100.0), Some(10.0), Some(vec![90.0, 110.0]))],
            Some(vec![0.5, 0.5]),
        );
        let cpue_other = table(
            vec![row("ramp_a", Some(2.0), Some(0.1), Some(vec![1.9, 2.1]))],
            Some(vec![0.25, 0.25, 0.25, 0.25]),
        );
        let result = HarvestEstimator::new(HarvestMode::ReplicateCovariance)
            .estimate(&effort, &cpue_other);
        assert!(matches!(result, Err(CreelError::ReplicateMismatch(_))));

        let cpue_none = table(vec![row("ramp_a", Some(2.0), Some(0.1), None)], None);
        let result = HarvestEstimator::new(HarvestMode::ReplicateCovariance)
            .estimate(&effort, &cpue_none);
        assert!(matches!(result, Err(CreelError::ReplicateMismatch(_))));
    }

    #[test]
    fn test_zero_estimates_have_zero_harvest() {
        let effort = table(vec![row("ramp_a", Some(100.0), Some(10.0), None)], None);
        let cpue = table(vec![row("ramp_a", Some(0.0), Some(0.0), None)], None);
        let harvest = HarvestEstimator::new(HarvestMode::Independent)
            .estimate(&effort, &cpue)
            .unwrap();
        let out = &harvest.rows[0];
        assert_eq!(out.estimate, Some(0.0));
        assert_eq!(out.standard_error, Some(0.0));
    }
}
