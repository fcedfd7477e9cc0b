//! Survey design construction.
//!
//! A [`SurveyDesign`] binds a data frame to its sampling structure: the
//! stratification columns, a per-row inclusion weight, primary sampling
//! unit labels, an optional finite population correction, and optional
//! replicate weights. Designs are immutable once built; estimators only
//! read from them.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::design::replicate::{self, ReplicateSpec, ReplicateWeights};
use crate::error::{CreelError, Result};
use crate::frame::{StratumKey, SurveyFrame};

/// Row-accounting summary recorded while a design is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DesignDiagnostics {
    /// Total rows in the frame.
    pub rows: usize,
    /// Rows whose stratum had no calendar entry or whose weight cell was
    /// missing; they carry weight zero and drop out of every estimate.
    pub unweighted_rows: usize,
    /// Distinct strata observed in the frame.
    pub strata: usize,
}

/// An immutable survey design: one frame plus its sampling structure.
#[derive(Debug, Clone)]
pub struct SurveyDesign {
    frame: SurveyFrame,
    strata: Vec<String>,
    weights: Vec<f64>,
    psu: Vec<String>,
    fpc: Vec<f64>,
    replicates: Option<ReplicateWeights>,
    diagnostics: DesignDiagnostics,
}

impl SurveyDesign {
    pub fn frame(&self) -> &SurveyFrame {
        &self.frame
    }

    /// Stratification column names, in grouping order.
    pub fn strata(&self) -> &[String] {
        &self.strata
    }

    /// Per-row inclusion weights; unmatched rows carry zero.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Per-row primary sampling unit labels.
    pub fn psu(&self) -> &[String] {
        &self.psu
    }

    /// Per-row finite population correction multipliers (1.0 when absent).
    pub fn fpc(&self) -> &[f64] {
        &self.fpc
    }

    pub fn replicates(&self) -> Option<&ReplicateWeights> {
        self.replicates.as_ref()
    }

    pub fn diagnostics(&self) -> &DesignDiagnostics {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Groups frame rows by the design's stratification columns.
    pub fn group_rows(&self) -> Result<IndexMap<StratumKey, Vec<usize>>> {
        self.frame.group_rows(&self.strata)
    }

    /// FPC multiplier shared by a group of rows (rows of one stratum share
    /// the same calendar entry, so the first row is representative).
    pub(crate) fn fpc_for(&self, rows: &[usize]) -> f64 {
        rows.first().map(|&r| self.fpc[r]).unwrap_or(1.0)
    }
}

/// Where the per-row weights come from.
enum WeightSource<'a> {
    Equal,
    Column(String),
    CalendarProbability {
        calendar: &'a SurveyFrame,
        probability: String,
    },
    CalendarCounts {
        calendar: &'a SurveyFrame,
        frame_units: String,
        sampled_units: String,
    },
}

/// Builder for [`SurveyDesign`].
///
/// ```no_run
/// # use creel::{DesignBuilder, SurveyFrame};
/// # fn demo(interviews: SurveyFrame, calendar: SurveyFrame) -> creel::Result<()> {
/// let design = DesignBuilder::new(interviews, &["survey_date", "site"])
///     .weights_from_calendar(&calendar, "inclusion_prob")
///     .psu("survey_date")
///     .build()?;
/// # Ok(()) }
/// ```
pub struct DesignBuilder<'a> {
    frame: SurveyFrame,
    strata: Vec<String>,
    weight_source: WeightSource<'a>,
    fpc_source: Option<(&'a SurveyFrame, String)>,
    psu_column: Option<String>,
    replicate_spec: Option<ReplicateSpec>,
}

impl<'a> DesignBuilder<'a> {
    /// Starts a design over `frame` stratified by the given columns.
    pub fn new<S: AsRef<str>>(frame: SurveyFrame, strata: &[S]) -> Self {
        DesignBuilder {
            frame,
            strata: strata.iter().map(|s| s.as_ref().to_string()).collect(),
            weight_source: WeightSource::Equal,
            fpc_source: None,
            psu_column: None,
            replicate_spec: None,
        }
    }

    /// Every row gets weight 1.0 (self-weighting sample). This is the
    /// default when no other weight source is set.
    pub fn equal_weights(mut self) -> Self {
        self.weight_source = WeightSource::Equal;
        self
    }

    /// Weights come from a numeric column of the frame itself.
    pub fn weights_from_column(mut self, column: &str) -> Self {
        self.weight_source = WeightSource::Column(column.to_string());
        self
    }

    /// Weights are `1 / probability`, joined from a sampling calendar that
    /// carries one row per stratum with its inclusion probability.
    pub fn weights_from_calendar(mut self, calendar: &'a SurveyFrame, probability: &str) -> Self {
        self.weight_source = WeightSource::CalendarProbability {
            calendar,
            probability: probability.to_string(),
        };
        self
    }

    /// Weights are `frame_units / sampled_units`, joined from a calendar
    /// that lists how many units each stratum holds and how many were
    /// actually sampled.
    pub fn weights_from_calendar_counts(
        mut self,
        calendar: &'a SurveyFrame,
        frame_units: &str,
        sampled_units: &str,
    ) -> Self {
        self.weight_source = WeightSource::CalendarCounts {
            calendar,
            frame_units: frame_units.to_string(),
            sampled_units: sampled_units.to_string(),
        };
        self
    }

    /// Applies a finite population correction from a calendar column that
    /// holds each stratum's sampling fraction. Variances are multiplied by
    /// `1 - fraction`.
    pub fn fpc_from_calendar(mut self, calendar: &'a SurveyFrame, fraction: &str) -> Self {
        self.fpc_source = Some((calendar, fraction.to_string()));
        self
    }

    /// Names the column whose values label primary sampling units. Without
    /// this, every row is treated as its own unit.
    pub fn psu(mut self, column: &str) -> Self {
        self.psu_column = Some(column.to_string());
        self
    }

    /// Attaches stratified bootstrap replicate weights.
    pub fn bootstrap(mut self, replicates: usize, seed: u64) -> Self {
        self.replicate_spec = Some(ReplicateSpec::Bootstrap { replicates, seed });
        self
    }

    /// Attaches delete-one-PSU jackknife replicate weights.
    pub fn jackknife(mut self) -> Self {
        self.replicate_spec = Some(ReplicateSpec::Jackknife);
        self
    }

    /// Attaches replicate weights from a config-supplied spec.
    pub fn replication(mut self, spec: ReplicateSpec) -> Self {
        self.replicate_spec = Some(spec);
        self
    }

    /// Validates the inputs and assembles the design.
    pub fn build(self) -> Result<SurveyDesign> {
        if self.strata.is_empty() {
            return Err(CreelError::invalid(
                "strata",
                "at least one stratification column is required",
            ));
        }
        for column in &self.strata {
            self.frame.column(column)?;
        }
        if self.frame.is_empty() {
            return Err(CreelError::EmptyFrame(
                "cannot build a design over an empty frame".to_string(),
            ));
        }

        let (weights, unweighted_rows) = self.resolve_weights()?;
        if weights.iter().all(|w| *w == 0.0) {
            return Err(CreelError::StratumMismatch {
                strata: self.strata.join(", "),
                detail: "no frame row matched a calendar stratum; check that survey \
                         dates and sites agree between the two tables"
                    .to_string(),
            });
        }
        if unweighted_rows > 0 {
            log::warn!(
                "{unweighted_rows} of {} rows have no usable weight and are \
                 excluded from estimation",
                self.frame.len()
            );
        }

        let psu = self.resolve_psu()?;
        let fpc = self.resolve_fpc()?;
        let stratum_labels: Vec<String> = (0..self.frame.len())
            .map(|row| self.frame.row_key(&self.strata, row).map(|k| k.to_string()))
            .collect::<Result<_>>()?;

        let replicates = match self.replicate_spec {
            Some(spec) => Some(replicate::generate(spec, &weights, &stratum_labels, &psu)?),
            None => None,
        };

        let diagnostics = DesignDiagnostics {
            rows: self.frame.len(),
            unweighted_rows,
            strata: self.frame.group_rows(&self.strata)?.len(),
        };

        Ok(SurveyDesign {
            frame: self.frame,
            strata: self.strata,
            weights,
            psu,
            fpc,
            replicates,
            diagnostics,
        })
    }

    fn resolve_weights(&self) -> Result<(Vec<f64>, usize)> {
        let n = self.frame.len();
        match &self.weight_source {
            WeightSource::Equal => Ok((vec![1.0; n], 0)),
            WeightSource::Column(column) => {
                let values = self.frame.numeric(column)?;
                let mut weights = Vec::with_capacity(n);
                let mut missing = 0usize;
                for value in values {
                    match value {
                        Some(w) if w.is_finite() && *w >= 0.0 => weights.push(*w),
                        Some(w) => {
                            return Err(CreelError::invalid(
                                "weights",
                                format!("column '{column}' holds invalid weight {w}"),
                            ));
                        }
                        None => {
                            weights.push(0.0);
                            missing += 1;
                        }
                    }
                }
                Ok((weights, missing))
            }
            WeightSource::CalendarProbability {
                calendar,
                probability,
            } => {
                let lookup = calendar_lookup(calendar, &self.strata, probability)?;
                self.join_weights(&lookup, |p| {
                    if p > 0.0 && p <= 1.0 {
                        Ok(1.0 / p)
                    } else {
                        Err(CreelError::invalid(
                            "probability",
                            format!("inclusion probability {p} is outside (0, 1]"),
                        ))
                    }
                })
            }
            WeightSource::CalendarCounts {
                calendar,
                frame_units,
                sampled_units,
            } => {
                let frame_lookup = calendar_lookup(calendar, &self.strata, frame_units)?;
                let sampled_lookup = calendar_lookup(calendar, &self.strata, sampled_units)?;
                let mut weights = Vec::with_capacity(n);
                let mut missing = 0usize;
                for row in 0..n {
                    let key = self.frame.row_key(&self.strata, row)?;
                    match (frame_lookup.get(&key), sampled_lookup.get(&key)) {
                        (Some(total), Some(sampled)) => {
                            if *sampled <= 0.0 || total < sampled {
                                return Err(CreelError::invalid(
                                    "calendar",
                                    format!(
                                        "stratum '{key}' has {total} frame units but \
                                         {sampled} sampled units"
                                    ),
                                ));
                            }
                            weights.push(total / sampled);
                        }
                        _ => {
                            weights.push(0.0);
                            missing += 1;
                        }
                    }
                }
                Ok((weights, missing))
            }
        }
    }

    fn join_weights<F>(
        &self,
        lookup: &HashMap<StratumKey, f64>,
        to_weight: F,
    ) -> Result<(Vec<f64>, usize)>
    where
        F: Fn(f64) -> Result<f64>,
    {
        let mut weights = Vec::with_capacity(self.frame.len());
        let mut missing = 0usize;
        for row in 0..self.frame.len() {
            let key = self.frame.row_key(&self.strata, row)?;
            match lookup.get(&key) {
                Some(value) => weights.push(to_weight(*value)?),
                None => {
                    weights.push(0.0);
                    missing += 1;
                }
            }
        }
        Ok((weights, missing))
    }

    fn resolve_psu(&self) -> Result<Vec<String>> {
        match &self.psu_column {
            Some(column) => {
                self.frame.column(column)?;
                (0..self.frame.len())
                    .map(|row| {
                        Ok(self
                            .frame
                            .render_cell(column, row)?
                            // A missing PSU label leaves the row as its own unit.
                            .unwrap_or_else(|| format!("row{row}")))
                    })
                    .collect()
            }
            None => Ok((0..self.frame.len()).map(|row| format!("row{row}")).collect()),
        }
    }

    fn resolve_fpc(&self) -> Result<Vec<f64>> {
        let n = self.frame.len();
        match &self.fpc_source {
            None => Ok(vec![1.0; n]),
            Some((calendar, fraction)) => {
                let lookup = calendar_lookup(calendar, &self.strata, fraction)?;
                let mut fpc = Vec::with_capacity(n);
                for row in 0..n {
                    let key = self.frame.row_key(&self.strata, row)?;
                    match lookup.get(&key) {
                        Some(f) if (0.0..=1.0).contains(f) => fpc.push(1.0 - f),
                        Some(f) => {
                            return Err(CreelError::invalid(
                                "fpc",
                                format!("sampling fraction {f} is outside [0, 1]"),
                            ));
                        }
                        None => fpc.push(1.0),
                    }
                }
                Ok(fpc)
            }
        }
    }
}

/// Builds a stratum-to-value map from a calendar frame. The calendar must
/// hold exactly one row per stratum and no missing cells in `value_col`.
fn calendar_lookup(
    calendar: &SurveyFrame,
    strata: &[String],
    value_col: &str,
) -> Result<HashMap<StratumKey, f64>> {
    let values = calendar.numeric(value_col).map_err(|_| {
        CreelError::missing_column(
            value_col,
            "the sampling calendar needs this numeric column",
        )
    })?;
    let groups = calendar.group_rows(strata).map_err(|_| {
        CreelError::missing_column(
            &strata.join(", "),
            "the sampling calendar must carry every stratification column",
        )
    })?;

    let mut lookup = HashMap::with_capacity(groups.len());
    for (key, rows) in groups {
        if rows.len() > 1 {
            return Err(CreelError::invalid(
                "calendar",
                format!("stratum '{key}' appears in {} calendar rows", rows.len()),
            ));
        }
        match values[rows[0]] {
            Some(value) => {
                lookup.insert(key, value);
            }
            None => {
                return Err(CreelError::invalid(
                    "calendar",
                    format!("stratum '{key}' has a missing '{value_col}' value"),
                ));
            }
        }
    }
    Ok(lookup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::replicate::ReplicateMethod;

    fn interviews() -> SurveyFrame {
        SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_a", "ramp_b", "ramp_b"])
            .numeric("catch_total", vec![2.0, 4.0, 6.0, 0.0])
            .numeric("hours_fished", vec![1.0, 2.0, 3.0, 1.5])
            .build()
            .unwrap()
    }

    fn calendar() -> SurveyFrame {
        SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_b"])
            .numeric("inclusion_prob", vec![0.5, 0.25])
            .numeric("frame_days", vec![30.0, 30.0])
            .numeric("sampled_days", vec![15.0, 10.0])
            .numeric("fraction", vec![0.5, 0.1])
            .build()
            .unwrap()
    }

    #[test]
    fn test_equal_weights_default() {
        let design = DesignBuilder::new(interviews(), &["site"]).build().unwrap();
        assert_eq!(design.weights(), &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(design.diagnostics().strata, 2);
        assert_eq!(design.diagnostics().unweighted_rows, 0);
    }

    #[test]
    fn test_weights_from_calendar_probability() {
        let cal = calendar();
        let design = DesignBuilder::new(interviews(), &["site"])
            .weights_from_calendar(&cal, "inclusion_prob")
            .build()
            .unwrap();
        assert_eq!(design.weights(), &[2.0, 2.0, 4.0, 4.0]);
    }

    #[test]
    fn test_weights_from_calendar_counts() {
        let cal = calendar();
        let design = DesignBuilder::new(interviews(), &["site"])
            .weights_from_calendar_counts(&cal, "frame_days", "sampled_days")
            .build()
            .unwrap();
        assert_eq!(design.weights(), &[2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_unmatched_stratum_gets_zero_weight() {
        let frame = SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_c"])
            .numeric("catch_total", vec![2.0, 4.0])
            .build()
            .unwrap();
        let cal = calendar();
        let design = DesignBuilder::new(frame, &["site"])
            .weights_from_calendar(&cal, "inclusion_prob")
            .build()
            .unwrap();
        assert_eq!(design.weights(), &[2.0, 0.0]);
        assert_eq!(design.diagnostics().unweighted_rows, 1);
    }

    #[test]
    fn test_no_matching_stratum_is_fatal() {
        let frame = SurveyFrame::builder()
            .text("site", vec!["ramp_x", "ramp_y"])
            .numeric("catch_total", vec![2.0, 4.0])
            .build()
            .unwrap();
        let cal = calendar();
        let result = DesignBuilder::new(frame, &["site"])
            .weights_from_calendar(&cal, "inclusion_prob")
            .build();
        assert!(matches!(result, Err(CreelError::StratumMismatch { .. })));
    }

    #[test]
    fn test_weight_column_with_missing_values() {
        let frame = SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_a", "ramp_b"])
            .numeric_opt("expansion", vec![Some(2.0), None, Some(4.0)])
            .build()
            .unwrap();
        let design = DesignBuilder::new(frame, &["site"])
            .weights_from_column("expansion")
            .build()
            .unwrap();
        assert_eq!(design.weights(), &[2.0, 0.0, 4.0]);
        assert_eq!(design.diagnostics().unweighted_rows, 1);
    }

    #[test]
    fn test_negative_weight_is_fatal() {
        let frame = SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_b"])
            .numeric("expansion", vec![2.0, -1.0])
            .build()
            .unwrap();
        let result = DesignBuilder::new(frame, &["site"])
            .weights_from_column("expansion")
            .build();
        assert!(matches!(
            result,
            Err(CreelError::InvalidParameter { name: "weights", .. })
        ));
    }

    #[test]
    fn test_probability_outside_unit_interval_is_fatal() {
        let cal = SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_b"])
            .numeric("inclusion_prob", vec![0.5, 1.5])
            .build()
            .unwrap();
        let result = DesignBuilder::new(interviews(), &["site"])
            .weights_from_calendar(&cal, "inclusion_prob")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_calendar_stratum_is_fatal() {
        let cal = SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_a", "ramp_b"])
            .numeric("inclusion_prob", vec![0.5, 0.5, 0.25])
            .build()
            .unwrap();
        let result = DesignBuilder::new(interviews(), &["site"])
            .weights_from_calendar(&cal, "inclusion_prob")
            .build();
        assert!(matches!(
            result,
            Err(CreelError::InvalidParameter { name: "calendar", .. })
        ));
    }

    #[test]
    fn test_fpc_multiplier_from_calendar() {
        let cal = calendar();
        let design = DesignBuilder::new(interviews(), &["site"])
            .fpc_from_calendar(&cal, "fraction")
            .build()
            .unwrap();
        assert_eq!(design.fpc(), &[0.5, 0.5, 0.9, 0.9]);
        assert_eq!(design.fpc_for(&[2, 3]), 0.9);
    }

    #[test]
    fn test_default_psu_is_per_row() {
        let design = DesignBuilder::new(interviews(), &["site"]).build().unwrap();
        assert_eq!(design.psu()[0], "row0");
        assert_eq!(design.psu()[3], "row3");
    }

    #[test]
    fn test_psu_from_column() {
        let frame = SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_a"])
            .text("survey_date", vec!["2024-05-01", "2024-05-01"])
            .numeric("catch_total", vec![1.0, 2.0])
            .build()
            .unwrap();
        let design = DesignBuilder::new(frame, &["site"])
            .psu("survey_date")
            .build()
            .unwrap();
        assert_eq!(design.psu(), &["2024-05-01", "2024-05-01"]);
    }

    #[test]
    fn test_bootstrap_attachment_is_deterministic() {
        let first = DesignBuilder::new(interviews(), &["site"])
            .bootstrap(30, 99)
            .build()
            .unwrap();
        let second = DesignBuilder::new(interviews(), &["site"])
            .bootstrap(30, 99)
            .build()
            .unwrap();
        let a = first.replicates().unwrap();
        let b = second.replicates().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.method, ReplicateMethod::Bootstrap);
        assert_eq!(a.count(), 30);
    }

    #[test]
    fn test_empty_strata_rejected() {
        let strata: [&str; 0] = [];
        let result = DesignBuilder::new(interviews(), &strata).build();
        assert!(matches!(
            result,
            Err(CreelError::InvalidParameter { name: "strata", .. })
        ));
    }

    #[test]
    fn test_missing_stratum_column_rejected() {
        let result = DesignBuilder::new(interviews(), &["county"]).build();
        assert!(matches!(result, Err(CreelError::MissingColumn { .. })));
    }
}
