//! Fishing effort estimation from on-site counts.
//!
//! Two count protocols are supported. Instantaneous counts expand each
//! snapshot to angler-hours for the whole fishing period, then average the
//! expansions within a stratum. Progressive (roving) counts integrate the
//! count-versus-time curve of each pass with the trapezoidal rule and sum
//! the pass totals, weighted by the design.

use chrono::Timelike;
use indexmap::IndexMap;

use crate::design::SurveyDesign;
use crate::error::Result;
use crate::estimate::variance::{
    linearized_variance, replicate_estimates, scores_mean, scores_total, variance_from_replicates,
    weighted_mean, weighted_total, VarianceCenter,
};
use crate::estimate::{
    finish_row, validate_confidence, Diagnostics, EstimateTable, RowOutcome,
};
use crate::frame::NULL_KEY;

const METHOD_INSTANTANEOUS: &str = "effort_instantaneous";
const METHOD_PROGRESSIVE: &str = "effort_progressive";

/// Where the fishing-period length for instantaneous expansion comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodSource {
    /// A fixed period length in minutes, shared by every count.
    Minutes(f64),
    /// A numeric column holding each count's period length in minutes.
    Column(String),
}

/// Count protocol and the columns that describe it.
#[derive(Debug, Clone, PartialEq)]
pub enum EffortMethod {
    /// Instantaneous counts: each snapshot expands to
    /// `count * period / interval` angler-hours, and the stratum estimate
    /// is the weighted mean of the expansions.
    Instantaneous {
        /// Column with the number of anglers counted.
        count: String,
        /// Column with the count's coverage interval in minutes.
        interval: String,
        /// Length of the fishable period the count represents.
        period: PeriodSource,
    },
    /// Progressive counts: each roving pass is integrated over its clock
    /// times with the trapezoidal rule, and the stratum estimate is the
    /// weighted total of the pass integrals.
    Progressive {
        /// Column with the number of anglers counted.
        count: String,
        /// Time column with the clock time of each count.
        time: String,
        /// Column identifying the roving pass; `None` treats all rows of a
        /// stratum as one pass.
        pass: Option<String>,
    },
}

/// Estimates total fishing effort per stratum.
#[derive(Debug, Clone)]
pub struct EffortEstimator {
    method: EffortMethod,
    confidence: f64,
    center: VarianceCenter,
}

impl EffortEstimator {
    pub fn new(method: EffortMethod) -> Self {
        EffortEstimator {
            method,
            confidence: 0.95,
            center: VarianceCenter::default(),
        }
    }

    /// Confidence level for the Wald intervals (default 0.95).
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Center used for replicate variances (default: replicate mean).
    pub fn with_variance_center(mut self, center: VarianceCenter) -> Self {
        self.center = center;
        self
    }

    /// Runs the estimator over every stratum of the design.
    pub fn estimate(&self, design: &SurveyDesign) -> Result<EstimateTable> {
        validate_confidence(self.confidence)?;
        self.validate_columns(design)?;

        let groups = design.group_rows()?;
        let mut rows = Vec::with_capacity(groups.len());
        let label = match self.method {
            EffortMethod::Instantaneous { .. } => METHOD_INSTANTANEOUS,
            EffortMethod::Progressive { .. } => METHOD_PROGRESSIVE,
        };
        for (key, group) in &groups {
            let outcome = match &self.method {
                EffortMethod::Instantaneous {
                    count,
                    interval,
                    period,
                } => self.instantaneous(design, group, count, interval, period)?,
                EffortMethod::Progressive { count, time, pass } => {
                    self.progressive(design, group, count, time, pass.as_deref())?
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

    fn validate_columns(&self, design: &SurveyDesign) -> Result<()> {
        let frame = design.frame();
        match &self.method {
            EffortMethod::Instantaneous {
                count,
                interval,
                period,
            } => {
                frame.numeric(count)?;
                frame.numeric(interval)?;
                if let PeriodSource::Column(column) = period {
                    frame.numeric(column)?;
                }
            }
            EffortMethod::Progressive { count, time, pass } => {
                frame.numeric(count)?;
                frame.time(time)?;
                if let Some(column) = pass {
                    frame.column(column)?;
                }
            }
        }
        Ok(())
    }

    fn instantaneous(
        &self,
        design: &SurveyDesign,
        group: &[usize],
        count_col: &str,
        interval_col: &str,
        period: &PeriodSource,
    ) -> Result<RowOutcome> {
        let frame = design.frame();
        let counts = frame.numeric(count_col)?;
        let intervals = frame.numeric(interval_col)?;
        let period_column = match period {
            PeriodSource::Column(column) => Some(frame.numeric(column)?),
            PeriodSource::Minutes(_) => None,
        };

        let mut expansions = Vec::with_capacity(group.len());
        let mut weights = Vec::with_capacity(group.len());
        let mut used_rows = Vec::with_capacity(group.len());
        let mut diagnostics = Diagnostics::new();

        for &row in group {
            let weight = design.weights()[row];
            let count = counts[row];
            let interval = intervals[row];
            let minutes = match (period, period_column) {
                (PeriodSource::Minutes(m), _) => Some(*m),
                (PeriodSource::Column(_), Some(values)) => values[row],
                (PeriodSource::Column(_), None) => None,
            };
            match (count, interval, minutes) {
                (Some(c), Some(i), Some(m)) if weight > 0.0 && i > 0.0 && m > 0.0 => {
                    expansions.push(c * m / i);
                    weights.push(weight);
                    used_rows.push(row);
                }
                _ => diagnostics.dropped_rows += 1,
            }
        }

        let Some(point) = weighted_mean(&expansions, &weights) else {
            return Ok(RowOutcome::gap("no usable count rows", diagnostics));
        };

        let variance = match design.replicates() {
            Some(replicates) => {
                let theta = |rep: &[f64]| {
                    let rep_weights: Vec<f64> =
                        used_rows.iter().map(|&row| rep[row]).collect();
                    weighted_mean(&expansions, &rep_weights)
                };
                match replicate_estimates(replicates, theta) {
                    Some(estimates) => {
                        let variance = variance_from_replicates(
                            point,
                            &estimates,
                            &replicates.coefficients,
                            self.center,
                        );
                        return Ok(RowOutcome {
                            point: Some(point),
                            variance: Some(variance),
                            sample_size: expansions.len(),
                            diagnostics,
                            replicate_estimates: Some(estimates),
                        });
                    }
                    None => {
                        diagnostics = diagnostics
                            .with_note("replicate variance unavailable for this stratum");
                        None
                    }
                }
            }
            None => {
                let scores = scores_mean(&expansions, &weights, point);
                let psu: Vec<&str> = used_rows
                    .iter()
                    .map(|&row| design.psu()[row].as_str())
                    .collect();
                Some(linearized_variance(&scores, &psu, design.fpc_for(group)))
            }
        };

        Ok(RowOutcome {
            point: Some(point),
            variance,
            sample_size: expansions.len(),
            diagnostics,
            replicate_estimates: None,
        })
    }

    fn progressive(
        &self,
        design: &SurveyDesign,
        group: &[usize],
        count_col: &str,
        time_col: &str,
        pass_col: Option<&str>,
    ) -> Result<RowOutcome> {
        let frame = design.frame();
        let counts = frame.numeric(count_col)?;
        let times = frame.time(time_col)?;

        // Rows of one pass, keyed by the rendered pass label.
        let mut passes: IndexMap<String, Vec<usize>> = IndexMap::new();
        for &row in group {
            let label = match pass_col {
                Some(column) => frame
                    .render_cell(column, row)?
                    .unwrap_or_else(|| NULL_KEY.to_string()),
                None => "pass".to_string(),
            };
            passes.entry(label).or_default().push(row);
        }

        let mut totals = Vec::with_capacity(passes.len());
        let mut weights = Vec::with_capacity(passes.len());
        let mut anchor_rows = Vec::with_capacity(passes.len());
        let mut pass_labels: Vec<String> = Vec::with_capacity(passes.len());
        let mut diagnostics = Diagnostics::new();
        let mut degenerate = 0usize;
        let mut uneven_weight_passes = 0usize;

        for (label, pass_rows) in &passes {
            let mut curve: Vec<(f64, f64)> = Vec::with_capacity(pass_rows.len());
            let mut anchor = None;
            // The pass weight must be constant; a mismatch is flagged and
            // the first usable row's weight is used.
            let mut pass_weight: Option<f64> = None;
            let mut uneven = false;
            for &row in pass_rows {
                let weight = design.weights()[row];
                match (counts[row], times[row]) {
                    (Some(count), Some(time)) if weight > 0.0 => {
                        let minutes = f64::from(time.num_seconds_from_midnight()) / 60.0;
                        curve.push((minutes, count));
                        anchor.get_or_insert(row);
                        match pass_weight {
                            Some(first) if (first - weight).abs() > 1e-12 => uneven = true,
                            _ => pass_weight = Some(weight),
                        }
                    }
                    _ => diagnostics.dropped_rows += 1,
                }
            }
            curve.sort_by(|a, b| a.0.total_cmp(&b.0));
            if curve.len() < 2 {
                degenerate += 1;
                diagnostics.dropped_rows += curve.len();
                continue;
            }
            let Some(anchor) = anchor else { continue };
            if uneven {
                uneven_weight_passes += 1;
                log::warn!("pass {label} mixes unequal design weights");
            }
            totals.push(trapezoid(&curve));
            weights.push(design.weights()[anchor]);
            anchor_rows.push(anchor);
            pass_labels.push(label.clone());
        }

        if degenerate > 0 {
            diagnostics = diagnostics.with_note(format!(
                "{degenerate} passes had fewer than 2 timed counts and were skipped"
            ));
        }
        if uneven_weight_passes > 0 {
            diagnostics = diagnostics.with_note(format!(
                "{uneven_weight_passes} passes mix unequal design weights; each \
                 used its first row's weight"
            ));
        }
        if totals.is_empty() {
            return Ok(RowOutcome::gap(
                "no pass with two or more timed counts",
                diagnostics,
            ));
        }

        let point = weighted_total(&totals, &weights);

        let variance = match design.replicates() {
            Some(replicates) => {
                let theta = |rep: &[f64]| {
                    let rep_weights: Vec<f64> =
                        anchor_rows.iter().map(|&row| rep[row]).collect();
                    Some(weighted_total(&totals, &rep_weights))
                };
                match replicate_estimates(replicates, theta) {
                    Some(estimates) => {
                        let variance = variance_from_replicates(
                            point,
                            &estimates,
                            &replicates.coefficients,
                            self.center,
                        );
                        return Ok(RowOutcome {
                            point: Some(point),
                            variance: Some(variance),
                            sample_size: totals.len(),
                            diagnostics,
                            replicate_estimates: Some(estimates),
                        });
                    }
                    None => {
                        diagnostics = diagnostics
                            .with_note("replicate variance unavailable for this stratum");
                        None
                    }
                }
            }
            None => {
                // Each pass is one sampling unit of the count survey.
                let scores = scores_total(&totals, &weights);
                let psu: Vec<&str> = pass_labels.iter().map(String::as_str).collect();
                Some(linearized_variance(&scores, &psu, design.fpc_for(group)))
            }
        };

        Ok(RowOutcome {
            point: Some(point),
            variance,
            sample_size: totals.len(),
            diagnostics,
            replicate_estimates: None,
        })
    }
}

/// Trapezoidal integral of a count-versus-time curve, in angler-hours.
/// Points must be sorted by time; times are minutes from midnight.
fn trapezoid(curve: &[(f64, f64)]) -> f64 {
    curve
        .windows(2)
        .map(|pair| {
            let (t0, c0) = pair[0];
            let (t1, c1) = pair[1];
            ((t1 - t0) / 60.0) * (c0 + c1) / 2.0
        })
        .sum()
}
