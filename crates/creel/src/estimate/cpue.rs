//! Catch-per-unit-effort estimation from angler interviews.
//!
//! Completed trips support the ratio-of-means estimator (total catch over
//! total effort). Incomplete trips bias that ratio, so they use the
//! mean-of-ratios estimator over per-trip catch rates, after truncating
//! trips shorter than a minimum duration. `Auto` picks per stratum from a
//! trip-completion flag and combines mixed strata by their weight shares.
//!
//! The optional length-of-stay correction reweights per-trip ratios by the
//! inverse of the planned trip duration, compensating for roving clerks
//! meeting long trips more often.

use crate::design::SurveyDesign;
use crate::error::{CreelError, Result};
use crate::estimate::variance::{
    linearized_variance, replicate_estimates, scores_mean, scores_ratio,
    variance_from_replicates, weighted_mean, weighted_ratio, VarianceCenter,
};
use crate::estimate::{
    finish_row, validate_confidence, Diagnostics, EstimateTable, RowOutcome,
};
use serde::{Deserialize, Serialize};

const METHOD_RATIO_OF_MEANS: &str = "cpue_ratio_of_means";
const METHOD_MEAN_OF_RATIOS: &str = "cpue_mean_of_ratios";
const METHOD_MIXED: &str = "cpue_mixed";

/// Share of truncated trips above which a stratum gets a warning note.
const TRUNCATION_WARN_SHARE: f64 = 0.10;

/// CPUE estimator family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpueMethod {
    /// Total weighted catch over total weighted effort. Appropriate for
    /// completed trips.
    #[default]
    RatioOfMeans,
    /// Weighted mean of per-trip catch rates. Appropriate for incomplete
    /// trips; short trips are truncated first.
    MeanOfRatios,
    /// Per stratum: ratio-of-means for completed trips, mean-of-ratios for
    /// incomplete ones, combined by weight share when a stratum has both.
    /// Requires a completion flag column.
    Auto,
}

/// Estimates catch per angler-hour per stratum.
#[derive(Debug, Clone)]
pub struct CpueEstimator {
    catch_col: String,
    effort_col: String,
    method: CpueMethod,
    min_effort_hours: f64,
    completion_col: Option<String>,
    planned_col: Option<String>,
    confidence: f64,
    center: VarianceCenter,
}

impl CpueEstimator {
    /// New estimator over a catch column and an observed-effort column
    /// (hours fished at the time of the interview).
    pub fn new(catch_col: &str, effort_col: &str) -> Self {
        CpueEstimator {
            catch_col: catch_col.to_string(),
            effort_col: effort_col.to_string(),
            method: CpueMethod::default(),
            min_effort_hours: 0.5,
            completion_col: None,
            planned_col: None,
            confidence: 0.95,
            center: VarianceCenter::default(),
        }
    }

    pub fn with_method(mut self, method: CpueMethod) -> Self {
        self.method = method;
        self
    }

    /// Minimum trip duration (hours) for mean-of-ratios; shorter trips are
    /// excluded before their rates are formed. Default 0.5.
    pub fn with_truncation(mut self, hours: f64) -> Self {
        self.min_effort_hours = hours;
        self
    }

    /// Flag column marking completed trips, needed by [`CpueMethod::Auto`].
    pub fn with_completion_column(mut self, column: &str) -> Self {
        self.completion_col = Some(column.to_string());
        self
    }

    /// Enables the length-of-stay correction using a planned-trip-duration
    /// column. Fails at estimation time if the column is absent.
    pub fn with_bias_correction(mut self, planned_col: &str) -> Self {
        self.planned_col = Some(planned_col.to_string());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_variance_center(mut self, center: VarianceCenter) -> Self {
        self.center = center;
        self
    }

    /// Runs the estimator over every stratum of the design.
    pub fn estimate(&self, design: &SurveyDesign) -> Result<EstimateTable> {
        validate_confidence(self.confidence)?;
        if !(self.min_effort_hours.is_finite() && self.min_effort_hours >= 0.0) {
            return Err(CreelError::invalid(
                "min_effort_hours",
                format!(
                    "truncation threshold {} must be a non-negative number",
                    self.min_effort_hours
                ),
            ));
        }

        let frame = design.frame();
        let catches = frame.numeric(&self.catch_col)?;
        let efforts = frame.numeric(&self.effort_col)?;
        let planned = match &self.planned_col {
            Some(column) => Some(frame.numeric(column).map_err(|_| {
                CreelError::missing_column(
                    column,
                    "the length-of-stay correction needs each trip's planned \
                     duration; drop with_bias_correction() if it was never recorded",
                )
            })?),
            None => None,
        };
        if planned.is_some() && self.method == CpueMethod::RatioOfMeans {
            return Err(CreelError::invalid(
                "bias_correction",
                "the length-of-stay correction reweights per-trip ratios; use \
                 mean_of_ratios or auto",
            ));
        }
        let completion = match (&self.method, &self.completion_col) {
            (CpueMethod::Auto, Some(column)) => Some(frame.flag(column)?),
            (CpueMethod::Auto, None) => {
                return Err(CreelError::invalid(
                    "completion",
                    "auto method selection needs a trip-completion flag column",
                ));
            }
            _ => None,
        };

        let groups = design.group_rows()?;
        let mut rows = Vec::with_capacity(groups.len());
        for (key, group) in &groups {
            // Rows with a weight and both values are usable; everything
            // else is dropped and counted.
            let mut usable = Vec::with_capacity(group.len());
            let mut diagnostics = Diagnostics::new();
            for &row in group {
                let ok = design.weights()[row] > 0.0
                    && catches[row].is_some()
                    && efforts[row].is_some();
                if ok {
                    usable.push(row);
                } else {
                    diagnostics.dropped_rows += 1;
                }
            }

            let (outcome, label) = match self.method {
                CpueMethod::RatioOfMeans => (
                    self.ratio_outcome(design, &usable, catches, efforts, diagnostics),
                    METHOD_RATIO_OF_MEANS,
                ),
                CpueMethod::MeanOfRatios => (
                    self.rates_outcome(design, &usable, catches, efforts, planned, diagnostics),
                    METHOD_MEAN_OF_RATIOS,
                ),
                CpueMethod::Auto => {
                    let flags = completion.unwrap_or(&[]);
                    let mut complete = Vec::new();
                    let mut incomplete = Vec::new();
                    for &row in &usable {
                        // A missing flag is treated as an incomplete trip;
                        // the mean-of-ratios estimator is safe either way.
                        if flags[row] == Some(true) {
                            complete.push(row);
                        } else {
                            incomplete.push(row);
                        }
                    }
                    if incomplete.is_empty() {
                        (
                            self.ratio_outcome(design, &complete, catches, efforts, diagnostics),
                            METHOD_RATIO_OF_MEANS,
                        )
                    } else if complete.is_empty() {
                        (
                            self.rates_outcome(
                                design,
                                &incomplete,
                                catches,
                                efforts,
                                planned,
                                diagnostics,
                            ),
                            METHOD_MEAN_OF_RATIOS,
                        )
                    } else {
                        self.mixed_outcome(
                            design,
                            &complete,
                            &incomplete,
                            catches,
                            efforts,
                            planned,
                            diagnostics,
                        )
                    }
                }
            };
            rows.push(finish_row(
                key,
                design.strata(),
                outcome,
                label,
                self.confidence,
            ));
        }

        Ok(EstimateTable {
            keys: design.strata().to_vec(),
            confidence: self.confidence,
            rows,
            replicate_coefficients: design.replicates().map(|r| r.coefficients.clone()),
        })
    }

    /// Ratio-of-means over completed trips: `Σ w·catch / Σ w·effort`.
    fn ratio_outcome(
        &self,
        design: &SurveyDesign,
        rows: &[usize],
        catches: &[Option<f64>],
        efforts: &[Option<f64>],
        mut diagnostics: Diagnostics,
    ) -> RowOutcome {
        if rows.is_empty() {
            return RowOutcome::gap("no usable interview rows", diagnostics);
        }
        let y: Vec<f64> = rows.iter().map(|&r| catches[r].unwrap_or(0.0)).collect();
        let x: Vec<f64> = rows.iter().map(|&r| efforts[r].unwrap_or(0.0)).collect();
        let w: Vec<f64> = rows.iter().map(|&r| design.weights()[r]).collect();

        let Some(point) = weighted_ratio(&y, &x, &w) else {
            return RowOutcome::gap("zero total effort in stratum", diagnostics);
        };

        let (variance, reps) = match design.replicates() {
            Some(replicates) => {
                let theta = |rep: &[f64]| {
                    let rep_w: Vec<f64> = rows.iter().map(|&r| rep[r]).collect();
                    weighted_ratio(&y, &x, &rep_w)
                };
                match replicate_estimates(replicates, theta) {
                    Some(estimates) => {
                        let variance = variance_from_replicates(
                            point,
                            &estimates,
                            &replicates.coefficients,
                            self.center,
                        );
                        (Some(variance), Some(estimates))
                    }
                    None => {
                        diagnostics = diagnostics
                            .with_note("replicate variance unavailable for this stratum");
                        (None, None)
                    }
                }
            }
            None => {
                let scores = scores_ratio(&y, &x, &w, point);
                let psu: Vec<&str> =
                    rows.iter().map(|&r| design.psu()[r].as_str()).collect();
                (
                    Some(linearized_variance(&scores, &psu, design.fpc_for(rows))),
                    None,
                )
            }
        };

        RowOutcome {
            point: Some(point),
            variance,
            sample_size: rows.len(),
            diagnostics,
            replicate_estimates: reps,
        }
    }

    /// Mean-of-ratios over incomplete trips, truncating short trips and
    /// optionally reweighting by inverse planned duration.
    fn rates_outcome(
        &self,
        design: &SurveyDesign,
        rows: &[usize],
        catches: &[Option<f64>],
        efforts: &[Option<f64>],
        planned: Option<&[Option<f64>]>,
        mut diagnostics: Diagnostics,
    ) -> RowOutcome {
        let mut rates = Vec::with_capacity(rows.len());
        let mut weights = Vec::with_capacity(rows.len());
        let mut used_rows = Vec::with_capacity(rows.len());
        // Per-trip weight divisor: 1, or the planned duration under the
        // length-of-stay correction.
        let mut divisors = Vec::with_capacity(rows.len());

        for &row in rows {
            let (Some(catch), Some(effort)) = (catches[row], efforts[row]) else {
                diagnostics.dropped_rows += 1;
                continue;
            };
            if effort < self.min_effort_hours {
                diagnostics.truncated_rows += 1;
                continue;
            }
            let rate = catch / effort;
            if !rate.is_finite() {
                diagnostics.nonfinite_rows += 1;
                continue;
            }
            let divisor = match planned {
                Some(values) => match values[row] {
                    Some(planned_hours) => {
                        // A plan shorter than the time already fished is a
                        // recording slip; the observed duration wins.
                        if planned_hours < effort {
                            diagnostics.corrected_rows += 1;
                            effort
                        } else {
                            planned_hours
                        }
                    }
                    None => {
                        diagnostics.dropped_rows += 1;
                        continue;
                    }
                },
                None => 1.0,
            };
            rates.push(rate);
            weights.push(design.weights()[row] / divisor);
            divisors.push(divisor);
            used_rows.push(row);
        }

        if planned.is_some() {
            diagnostics = diagnostics.with_bias_correction(
                self.planned_col.clone().unwrap_or_default(),
            );
        }
        let retained = used_rows.len();
        let share = if retained + diagnostics.truncated_rows > 0 {
            diagnostics.truncated_rows as f64 / (retained + diagnostics.truncated_rows) as f64
        } else {
            0.0
        };
        if diagnostics.truncated_rows > 0 && share > TRUNCATION_WARN_SHARE {
            log::warn!(
                "{} of {} trips fell under the {}h truncation threshold",
                diagnostics.truncated_rows,
                retained + diagnostics.truncated_rows,
                self.min_effort_hours
            );
            diagnostics = diagnostics.with_note(format!(
                "{:.0}% of trips truncated below {}h",
                share * 100.0,
                self.min_effort_hours
            ));
        }

        if retained == 0 {
            return RowOutcome::gap(
                "no trips at or above the duration threshold",
                diagnostics,
            );
        }

        let Some(point) = weighted_mean(&rates, &weights) else {
            return RowOutcome::gap("zero total weight among retained trips", diagnostics);
        };

        let reps = design.replicates().and_then(|replicates| {
            let theta = |rep: &[f64]| {
                let rep_w: Vec<f64> = used_rows
                    .iter()
                    .zip(&divisors)
                    .map(|(&row, divisor)| rep[row] / divisor)
                    .collect();
                weighted_mean(&rates, &rep_w)
            };
            replicate_estimates(replicates, theta)
        });

        // A lone retained trip gives a point estimate but nothing to
        // measure spread with.
        let variance = if retained == 1 {
            diagnostics = diagnostics.with_note("single retained trip; no variance");
            None
        } else {
            match design.replicates() {
                Some(replicates) => reps.as_ref().map(|estimates| {
                    variance_from_replicates(
                        point,
                        estimates,
                        &replicates.coefficients,
                        self.center,
                    )
                }),
                None => {
                    let scores = scores_mean(&rates, &weights, point);
                    let psu: Vec<&str> = used_rows
                        .iter()
                        .map(|&r| design.psu()[r].as_str())
                        .collect();
                    Some(linearized_variance(&scores, &psu, design.fpc_for(rows)))
                }
            }
        };

        RowOutcome {
            point: Some(point),
            variance,
            sample_size: retained,
            diagnostics,
            replicate_estimates: reps,
        }
    }

    /// Weight-share combination of the two estimators for strata holding
    /// both completed and incomplete trips. When one component is
    /// degenerate the other carries the stratum under its own label; only
    /// two degenerate components make a gap.
    fn mixed_outcome(
        &self,
        design: &SurveyDesign,
        complete: &[usize],
        incomplete: &[usize],
        catches: &[Option<f64>],
        efforts: &[Option<f64>],
        planned: Option<&[Option<f64>]>,
        diagnostics: Diagnostics,
    ) -> (RowOutcome, &'static str) {
        let weight_of = |rows: &[usize]| -> f64 {
            rows.iter().map(|&r| design.weights()[r]).sum()
        };
        let w_complete = weight_of(complete);
        let w_incomplete = weight_of(incomplete);
        let share_c = w_complete / (w_complete + w_incomplete);
        let share_m = 1.0 - share_c;

        let ratio = self.ratio_outcome(design, complete, catches, efforts, Diagnostics::new());
        let rates = self.rates_outcome(
            design,
            incomplete,
            catches,
            efforts,
            planned,
            Diagnostics::new(),
        );

        let mut merged = merge_diagnostics(diagnostics, ratio.diagnostics.clone());
        merged = merge_diagnostics(merged, rates.diagnostics.clone());

        let (pc, pm) = match (ratio.point, rates.point) {
            (Some(pc), Some(pm)) => (pc, pm),
            (Some(_), None) => {
                merged = merged.with_note(
                    "no usable incomplete trips; completed trips carry the stratum",
                );
                return (
                    RowOutcome {
                        diagnostics: merged,
                        ..ratio
                    },
                    METHOD_RATIO_OF_MEANS,
                );
            }
            (None, Some(_)) => {
                merged = merged.with_note(
                    "no usable completed trips; incomplete trips carry the stratum",
                );
                return (
                    RowOutcome {
                        diagnostics: merged,
                        ..rates
                    },
                    METHOD_MEAN_OF_RATIOS,
                );
            }
            (None, None) => {
                return (
                    RowOutcome::gap("neither trip component has an estimate", merged),
                    METHOD_MIXED,
                );
            }
        };
        let point = share_c * pc + share_m * pm;

        // With replicates on both components the combined series is
        // re-aggregated directly, which picks up any covariance between
        // the components under resampling.
        let (variance, reps) = match (design.replicates(), &ratio.replicate_estimates, &rates.replicate_estimates)
        {
            (Some(replicates), Some(rc), Some(rm)) => {
                let combined: Vec<f64> = rc
                    .iter()
                    .zip(rm)
                    .map(|(c, m)| share_c * c + share_m * m)
                    .collect();
                let variance = variance_from_replicates(
                    point,
                    &combined,
                    &replicates.coefficients,
                    self.center,
                );
                (Some(variance), Some(combined))
            }
            _ => match (ratio.variance, rates.variance) {
                (Some(vc), Some(vm)) => {
                    (Some(share_c * share_c * vc + share_m * share_m * vm), None)
                }
                _ => {
                    merged = merged
                        .with_note("variance unavailable for one mixture component");
                    (None, None)
                }
            },
        };

        (
            RowOutcome {
                point: Some(point),
                variance,
                sample_size: ratio.sample_size + rates.sample_size,
                diagnostics: merged,
                replicate_estimates: reps,
            },
            METHOD_MIXED,
        )
    }
}

fn merge_diagnostics(mut a: Diagnostics, b: Diagnostics) -> Diagnostics {
    a.dropped_rows += b.dropped_rows;
    a.truncated_rows += b.truncated_rows;
    a.nonfinite_rows += b.nonfinite_rows;
    a.corrected_rows += b.corrected_rows;
    if a.bias_correction.is_none() {
        a.bias_correction = b.bias_correction;
    }
    a.notes.extend(b.notes);
    a
}
