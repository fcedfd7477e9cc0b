//! Survey orchestration: one object bundling the input frames, the shared
//! configuration, and the estimation pipeline.
//!
//! [`CreelSurvey`] is a thin composition layer over the components: it
//! builds the interview and count designs from a [`CreelConfig`], runs the
//! QA/QC checks, and wires effort × CPUE into harvest. Nothing here adds
//! statistical behavior of its own.

use serde::{Deserialize, Serialize};

use crate::design::{DesignBuilder, ReplicateSpec, SurveyDesign};
use crate::error::{CreelError, Result};
use crate::estimate::{
    CpueEstimator, CpueMethod, EffortEstimator, EffortMethod, EstimateTable, HarvestEstimator,
    HarvestMode,
};
use crate::frame::SurveyFrame;
use crate::qaqc::{
    CalendarCoverageCheck, CheckEngine, Finding, KeptExceedsTotalCheck, MissingValueCheck,
    NegativeValueCheck, PlannedEffortCheck, ShortTripCheck,
};

fn default_confidence() -> f64 {
    0.95
}

fn default_truncation() -> f64 {
    0.5
}

fn default_catch_column() -> String {
    "catch_total".to_string()
}

fn default_effort_column() -> String {
    "hours_fished".to_string()
}

/// Configuration shared by every estimator a survey runs.
///
/// Plain data, `Deserialize` so deployments can load it from JSON. Only the
/// stratification columns are required; everything else has the
/// conventional default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreelConfig {
    /// Stratification column names shared by every input table.
    pub strata: Vec<String>,
    /// Confidence level for the Wald intervals.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Minimum trip duration (hours) for mean-of-ratios truncation.
    #[serde(default = "default_truncation")]
    pub min_effort_hours: f64,
    /// Interview column holding total catch.
    #[serde(default = "default_catch_column")]
    pub catch_column: String,
    /// Interview column holding hours fished at the interview.
    #[serde(default = "default_effort_column")]
    pub effort_column: String,
    /// Interview column holding fish kept, when recorded.
    #[serde(default)]
    pub kept_column: Option<String>,
    /// Planned trip duration column; setting it turns on the length-of-stay
    /// correction for mean-of-ratios CPUE.
    #[serde(default)]
    pub planned_column: Option<String>,
    /// Trip-completion flag column, needed by [`CpueMethod::Auto`].
    #[serde(default)]
    pub completion_column: Option<String>,
    /// Primary sampling unit column (e.g. survey date).
    #[serde(default)]
    pub psu_column: Option<String>,
    /// Calendar column holding each stratum's inclusion probability; needs
    /// a calendar frame.
    #[serde(default)]
    pub probability_column: Option<String>,
    /// Calendar column holding each stratum's sampling fraction, applied as
    /// a finite population correction.
    #[serde(default)]
    pub fraction_column: Option<String>,
    /// Replicate-weight scheme attached to both designs.
    #[serde(default)]
    pub replication: Option<ReplicateSpec>,
}

impl CreelConfig {
    /// Configuration with the given stratification columns and defaults for
    /// everything else.
    pub fn new<S: AsRef<str>>(strata: &[S]) -> Self {
        CreelConfig {
            strata: strata.iter().map(|s| s.as_ref().to_string()).collect(),
            confidence: default_confidence(),
            min_effort_hours: default_truncation(),
            catch_column: default_catch_column(),
            effort_column: default_effort_column(),
            kept_column: None,
            planned_column: None,
            completion_column: None,
            psu_column: None,
            probability_column: None,
            fraction_column: None,
            replication: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_truncation(mut self, hours: f64) -> Self {
        self.min_effort_hours = hours;
        self
    }

    /// Names the catch and observed-effort interview columns.
    pub fn with_columns(mut self, catch: &str, effort: &str) -> Self {
        self.catch_column = catch.to_string();
        self.effort_column = effort.to_string();
        self
    }

    pub fn with_kept_column(mut self, column: &str) -> Self {
        self.kept_column = Some(column.to_string());
        self
    }

    /// Enables the length-of-stay correction using a planned-duration
    /// column.
    pub fn with_bias_correction(mut self, column: &str) -> Self {
        self.planned_column = Some(column.to_string());
        self
    }

    pub fn with_completion_column(mut self, column: &str) -> Self {
        self.completion_column = Some(column.to_string());
        self
    }

    pub fn with_psu(mut self, column: &str) -> Self {
        self.psu_column = Some(column.to_string());
        self
    }

    /// Weights both designs by inverse inclusion probability from this
    /// calendar column.
    pub fn with_calendar_probability(mut self, column: &str) -> Self {
        self.probability_column = Some(column.to_string());
        self
    }

    /// Applies a finite population correction from this calendar column.
    pub fn with_fpc(mut self, column: &str) -> Self {
        self.fraction_column = Some(column.to_string());
        self
    }

    pub fn with_replication(mut self, spec: ReplicateSpec) -> Self {
        self.replication = Some(spec);
        self
    }
}

/// A creel survey: interview, count, and calendar frames bound to one
/// configuration.
pub struct CreelSurvey {
    interviews: SurveyFrame,
    counts: Option<SurveyFrame>,
    calendar: Option<SurveyFrame>,
    config: CreelConfig,
}

impl CreelSurvey {
    /// New survey over an interview frame.
    pub fn new(interviews: SurveyFrame, config: CreelConfig) -> Self {
        CreelSurvey {
            interviews,
            counts: None,
            calendar: None,
            config,
        }
    }

    /// Attaches the on-site count frame, enabling effort estimation.
    pub fn with_counts(mut self, counts: SurveyFrame) -> Self {
        self.counts = Some(counts);
        self
    }

    /// Attaches the sampling calendar, enabling calendar weights, the FPC,
    /// and the coverage check.
    pub fn with_calendar(mut self, calendar: SurveyFrame) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn config(&self) -> &CreelConfig {
        &self.config
    }

    pub fn interviews(&self) -> &SurveyFrame {
        &self.interviews
    }

    /// Builds the weighted design over the interview frame.
    pub fn interview_design(&self) -> Result<SurveyDesign> {
        self.design_over(&self.interviews)
    }

    /// Builds the weighted design over the count frame.
    pub fn count_design(&self) -> Result<SurveyDesign> {
        let counts = self.counts.as_ref().ok_or_else(|| {
            CreelError::invalid(
                "counts",
                "effort estimation needs a count frame; attach one with with_counts()",
            )
        })?;
        self.design_over(counts)
    }

    fn design_over(&self, frame: &SurveyFrame) -> Result<SurveyDesign> {
        let mut builder = DesignBuilder::new(frame.clone(), &self.config.strata);
        if let Some(probability) = &self.config.probability_column {
            let calendar = self.calendar.as_ref().ok_or_else(|| {
                CreelError::invalid(
                    "probability_column",
                    "calendar weights need a calendar frame; attach one with with_calendar()",
                )
            })?;
            builder = builder.weights_from_calendar(calendar, probability);
        }
        if let Some(fraction) = &self.config.fraction_column {
            let calendar = self.calendar.as_ref().ok_or_else(|| {
                CreelError::invalid(
                    "fraction_column",
                    "a finite population correction needs a calendar frame; attach \
                     one with with_calendar()",
                )
            })?;
            builder = builder.fpc_from_calendar(calendar, fraction);
        }
        if let Some(psu) = &self.config.psu_column {
            builder = builder.psu(psu);
        }
        if let Some(spec) = self.config.replication {
            builder = builder.replication(spec);
        }
        builder.build()
    }

    /// Runs the standard QA/QC checks over the interview frame.
    ///
    /// The engine is assembled from the configured columns: negative-value,
    /// short-trip, and missing-value checks always run; kept-vs-total,
    /// planned-effort, and calendar-coverage checks run when their columns
    /// or frames are configured.
    pub fn check(&self) -> Result<Vec<Finding>> {
        let value_columns = [
            self.config.catch_column.as_str(),
            self.config.effort_column.as_str(),
        ];
        let mut engine = CheckEngine::new()
            .with_check(NegativeValueCheck::new(&value_columns))
            .with_check(ShortTripCheck::new(
                &self.config.effort_column,
                self.config.min_effort_hours,
            ))
            .with_check(MissingValueCheck::new(&value_columns));
        if let Some(kept) = &self.config.kept_column {
            engine = engine.with_check(KeptExceedsTotalCheck::new(
                kept,
                &self.config.catch_column,
            ));
        }
        if let Some(planned) = &self.config.planned_column {
            engine = engine.with_check(PlannedEffortCheck::new(
                planned,
                &self.config.effort_column,
            ));
        }
        if let Some(calendar) = &self.calendar {
            engine =
                engine.with_check(CalendarCoverageCheck::new(calendar, &self.config.strata)?);
        }
        Ok(engine.run(&self.interviews))
    }

    /// Estimates total fishing effort from the count frame.
    pub fn effort(&self, method: EffortMethod) -> Result<EstimateTable> {
        let design = self.count_design()?;
        EffortEstimator::new(method)
            .with_confidence(self.config.confidence)
            .estimate(&design)
    }

    /// Estimates CPUE from the interview frame.
    pub fn cpue(&self, method: CpueMethod) -> Result<EstimateTable> {
        let design = self.interview_design()?;
        let mut estimator =
            CpueEstimator::new(&self.config.catch_column, &self.config.effort_column)
                .with_method(method)
                .with_truncation(self.config.min_effort_hours)
                .with_confidence(self.config.confidence);
        if let Some(column) = &self.config.completion_column {
            estimator = estimator.with_completion_column(column);
        }
        if let Some(column) = &self.config.planned_column {
            estimator = estimator.with_bias_correction(column);
        }
        estimator.estimate(&design)
    }

    /// Runs the full pipeline: effort × CPUE joined per stratum with
    /// delta-method variance.
    pub fn harvest(
        &self,
        effort_method: EffortMethod,
        cpue_method: CpueMethod,
        mode: HarvestMode,
    ) -> Result<EstimateTable> {
        let effort = self.effort(effort_method)?;
        let cpue = self.cpue(cpue_method)?;
        HarvestEstimator::new(mode)
            .with_confidence(self.config.confidence)
            .estimate(&effort, &cpue)
    }
}
