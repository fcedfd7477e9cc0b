//! Rule-based checks over survey frames.
//!
//! Each check scans one frame and reports [`Finding`]s; none of them stop
//! or alter an analysis. The [`CheckEngine`] runs a configured set of
//! checks and returns the findings sorted by severity.

use std::collections::HashSet;

use serde_json::json;

use crate::error::Result;
use crate::frame::{StratumKey, SurveyFrame};
use crate::qaqc::finding::{Context, Finding, FindingKind, Severity};

/// Truncated-trip share above which a short-trip finding escalates from
/// info to warning.
const SHORT_TRIP_WARN_SHARE: f64 = 0.10;

/// A single QA/QC rule.
pub trait Check {
    fn run(&self, frame: &SurveyFrame) -> Vec<Finding>;
}

/// Runs a configured set of checks over a frame.
pub struct CheckEngine {
    checks: Vec<Box<dyn Check>>,
}

impl CheckEngine {
    pub fn new() -> Self {
        CheckEngine { checks: Vec::new() }
    }

    pub fn with_check(mut self, check: impl Check + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Runs every check and sorts the findings by severity, errors first,
    /// then by the first affected row. Findings without row context sort
    /// after those with one at the same severity.
    pub fn run(&self, frame: &SurveyFrame) -> Vec<Finding> {
        let mut findings = Vec::new();
        for check in &self.checks {
            findings.extend(check.run(frame));
        }
        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| first_row(a).cmp(&first_row(b)))
        });
        findings
    }
}

fn first_row(finding: &Finding) -> usize {
    finding
        .context
        .as_ref()
        .and_then(|context| context.rows.as_ref())
        .and_then(|rows| rows.first().copied())
        .unwrap_or(usize::MAX)
}

impl Default for CheckEngine {
    fn default() -> Self {
        CheckEngine::new()
    }
}

fn missing_column_finding(check: &str, kind: FindingKind, column: &str) -> Finding {
    Finding::new(
        kind,
        Severity::Error,
        &format!("column '{column}' is missing or not numeric"),
    )
    .with_column(column)
    .with_check(check)
}

/// Flags rows whose stratum never appears in the sampling calendar; such
/// rows get no weight and silently vanish from every estimate.
pub struct CalendarCoverageCheck {
    strata: Vec<String>,
    covered: HashSet<StratumKey>,
}

impl CalendarCoverageCheck {
    pub fn new<S: AsRef<str>>(calendar: &SurveyFrame, strata: &[S]) -> Result<Self> {
        let strata: Vec<String> = strata.iter().map(|s| s.as_ref().to_string()).collect();
        let covered = calendar.key_set(&strata)?;
        Ok(CalendarCoverageCheck { strata, covered })
    }
}

impl Check for CalendarCoverageCheck {
    fn run(&self, frame: &SurveyFrame) -> Vec<Finding> {
        let groups = match frame.group_rows(&self.strata) {
            Ok(groups) => groups,
            Err(_) => {
                return vec![Finding::new(
                    FindingKind::CalendarCoverage,
                    Severity::Error,
                    &format!(
                        "stratification columns [{}] are not all present",
                        self.strata.join(", ")
                    ),
                )
                .with_check("calendar_coverage")];
            }
        };

        let mut uncovered_keys = Vec::new();
        let mut uncovered_rows = Vec::new();
        for (key, rows) in &groups {
            if !self.covered.contains(key) {
                uncovered_keys.push(key.to_string());
                uncovered_rows.extend(rows.iter().copied());
            }
        }
        if uncovered_keys.is_empty() {
            return Vec::new();
        }

        vec![Finding::new(
            FindingKind::CalendarCoverage,
            Severity::Error,
            &format!(
                "{} rows fall in {} strata absent from the sampling calendar",
                uncovered_rows.len(),
                uncovered_keys.len()
            ),
        )
        .with_check("calendar_coverage")
        .with_context(
            Context::new()
                .with_rows(&uncovered_rows)
                .with_observed(json!(uncovered_keys)),
        )]
    }
}

/// Flags negative values in columns that can only hold magnitudes.
pub struct NegativeValueCheck {
    columns: Vec<String>,
}

impl NegativeValueCheck {
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        NegativeValueCheck {
            columns: columns.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }
}

impl Check for NegativeValueCheck {
    fn run(&self, frame: &SurveyFrame) -> Vec<Finding> {
        let mut findings = Vec::new();
        for column in &self.columns {
            let values = match frame.numeric(column) {
                Ok(values) => values,
                Err(_) => {
                    findings.push(missing_column_finding(
                        "negative_value",
                        FindingKind::NegativeValue,
                        column,
                    ));
                    continue;
                }
            };
            let rows: Vec<usize> = values
                .iter()
                .enumerate()
                .filter(|(_, v)| matches!(v, Some(x) if *x < 0.0))
                .map(|(row, _)| row)
                .collect();
            if rows.is_empty() {
                continue;
            }
            findings.push(
                Finding::new(
                    FindingKind::NegativeValue,
                    Severity::Error,
                    &format!("{} negative values in '{column}'", rows.len()),
                )
                .with_column(column)
                .with_check("negative_value")
                .with_context(Context::new().with_rows(&rows)),
            );
        }
        findings
    }
}

/// Flags interviews reporting more fish kept than caught.
pub struct KeptExceedsTotalCheck {
    kept: String,
    total: String,
}

impl KeptExceedsTotalCheck {
    pub fn new(kept: &str, total: &str) -> Self {
        KeptExceedsTotalCheck {
            kept: kept.to_string(),
            total: total.to_string(),
        }
    }
}

impl Check for KeptExceedsTotalCheck {
    fn run(&self, frame: &SurveyFrame) -> Vec<Finding> {
        let (kept, total) = match (frame.numeric(&self.kept), frame.numeric(&self.total)) {
            (Ok(kept), Ok(total)) => (kept, total),
            (Err(_), _) => {
                return vec![missing_column_finding(
                    "kept_exceeds_total",
                    FindingKind::KeptExceedsTotal,
                    &self.kept,
                )];
            }
            (_, Err(_)) => {
                return vec![missing_column_finding(
                    "kept_exceeds_total",
                    FindingKind::KeptExceedsTotal,
                    &self.total,
                )];
            }
        };
        let rows: Vec<usize> = kept
            .iter()
            .zip(total)
            .enumerate()
            .filter(|(_, (k, t))| matches!((k, t), (Some(k), Some(t)) if k > t))
            .map(|(row, _)| row)
            .collect();
        if rows.is_empty() {
            return Vec::new();
        }
        vec![Finding::new(
            FindingKind::KeptExceedsTotal,
            Severity::Error,
            &format!(
                "'{}' exceeds '{}' in {} rows",
                self.kept,
                self.total,
                rows.len()
            ),
        )
        .with_column(&self.kept)
        .with_check("kept_exceeds_total")
        .with_context(
            Context::new()
                .with_rows(&rows)
                .with_expected(json!(format!("{} <= {}", self.kept, self.total))),
        )]
    }
}

/// Flags planned trip durations shorter than the hours already fished.
/// Estimators correct these to the observed duration, so this is a
/// warning, not an error.
pub struct PlannedEffortCheck {
    planned: String,
    observed: String,
}

impl PlannedEffortCheck {
    pub fn new(planned: &str, observed: &str) -> Self {
        PlannedEffortCheck {
            planned: planned.to_string(),
            observed: observed.to_string(),
        }
    }
}

impl Check for PlannedEffortCheck {
    fn run(&self, frame: &SurveyFrame) -> Vec<Finding> {
        let (planned, observed) =
            match (frame.numeric(&self.planned), frame.numeric(&self.observed)) {
                (Ok(planned), Ok(observed)) => (planned, observed),
                (Err(_), _) => {
                    return vec![missing_column_finding(
                        "planned_effort",
                        FindingKind::PlannedEffort,
                        &self.planned,
                    )];
                }
                (_, Err(_)) => {
                    return vec![missing_column_finding(
                        "planned_effort",
                        FindingKind::PlannedEffort,
                        &self.observed,
                    )];
                }
            };
        let rows: Vec<usize> = planned
            .iter()
            .zip(observed)
            .enumerate()
            .filter(|(_, (p, o))| matches!((p, o), (Some(p), Some(o)) if p < o))
            .map(|(row, _)| row)
            .collect();
        if rows.is_empty() {
            return Vec::new();
        }
        vec![Finding::new(
            FindingKind::PlannedEffort,
            Severity::Warning,
            &format!(
                "'{}' is shorter than '{}' in {} rows; the observed duration \
                 will be used",
                self.planned,
                self.observed,
                rows.len()
            ),
        )
        .with_column(&self.planned)
        .with_check("planned_effort")
        .with_context(Context::new().with_rows(&rows)),
        ]
    }
}

/// Reports how many trips fall under the truncation threshold, escalating
/// to a warning when more than a tenth of them do.
pub struct ShortTripCheck {
    effort: String,
    threshold: f64,
}

impl ShortTripCheck {
    pub fn new(effort: &str, threshold: f64) -> Self {
        ShortTripCheck {
            effort: effort.to_string(),
            threshold,
        }
    }
}

impl Check for ShortTripCheck {
    fn run(&self, frame: &SurveyFrame) -> Vec<Finding> {
        let values = match frame.numeric(&self.effort) {
            Ok(values) => values,
            Err(_) => {
                return vec![missing_column_finding(
                    "short_trip",
                    FindingKind::ShortTrip,
                    &self.effort,
                )];
            }
        };
        let mut rows = Vec::new();
        let mut reported = 0usize;
        for (row, value) in values.iter().enumerate() {
            if let Some(hours) = value {
                reported += 1;
                if *hours < self.threshold {
                    rows.push(row);
                }
            }
        }
        if rows.is_empty() || reported == 0 {
            return Vec::new();
        }
        let share = rows.len() as f64 / reported as f64;
        let severity = if share > SHORT_TRIP_WARN_SHARE {
            Severity::Warning
        } else {
            Severity::Info
        };
        vec![Finding::new(
            FindingKind::ShortTrip,
            severity,
            &format!(
                "{} of {} trips are shorter than {}h and will be truncated by \
                 mean-of-ratios",
                rows.len(),
                reported,
                self.threshold
            ),
        )
        .with_column(&self.effort)
        .with_check("short_trip")
        .with_context(
            Context::new()
                .with_rows(&rows)
                .with_percentage(share * 100.0),
        )]
    }
}

/// Flags columns whose missing-value share crosses the tolerated levels.
pub struct MissingValueCheck {
    columns: Vec<String>,
    warning_threshold: f64,
    error_threshold: f64,
}

impl MissingValueCheck {
    /// Default thresholds: warn at 5% missing, error at 20%.
    pub fn new<S: AsRef<str>>(columns: &[S]) -> Self {
        MissingValueCheck {
            columns: columns.iter().map(|s| s.as_ref().to_string()).collect(),
            warning_threshold: 5.0,
            error_threshold: 20.0,
        }
    }

    pub fn with_thresholds(mut self, warning: f64, error: f64) -> Self {
        self.warning_threshold = warning;
        self.error_threshold = error;
        self
    }
}

impl Check for MissingValueCheck {
    fn run(&self, frame: &SurveyFrame) -> Vec<Finding> {
        let mut findings = Vec::new();
        for column in &self.columns {
            let Ok(col) = frame.column(column) else {
                findings.push(missing_column_finding(
                    "missing_value",
                    FindingKind::MissingValue,
                    column,
                ));
                continue;
            };
            let percentage = 100.0 * col.null_count() as f64 / frame.len() as f64;
            let severity = if percentage >= self.error_threshold {
                Severity::Error
            } else if percentage >= self.warning_threshold {
                Severity::Warning
            } else {
                continue;
            };
            findings.push(
                Finding::new(
                    FindingKind::MissingValue,
                    severity,
                    &format!("column '{column}' is {percentage:.1}% missing"),
                )
                .with_column(column)
                .with_check("missing_value")
                .with_context(Context::new().with_percentage(percentage)),
            );
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interviews() -> SurveyFrame {
        SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_b", "ramp_c", "ramp_a"])
            .numeric("catch_total", vec![2.0, -1.0, 4.0, 0.0])
            .numeric("catch_kept", vec![1.0, 0.0, 6.0, 0.0])
            .numeric("hours_fished", vec![0.2, 2.0, 3.0, 1.5])
            .numeric_opt(
                "planned_hours",
                vec![Some(4.0), Some(1.0), None, Some(2.0)],
            )
            .build()
            .unwrap()
    }

    fn calendar() -> SurveyFrame {
        SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_b"])
            .numeric("inclusion_prob", vec![0.5, 0.5])
            .build()
            .unwrap()
    }

    #[test]
    fn test_calendar_coverage_flags_unknown_strata() {
        let check = CalendarCoverageCheck::new(&calendar(), &["site"]).unwrap();
        let findings = check.run(&interviews());
        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.kind, FindingKind::CalendarCoverage);
        assert_eq!(finding.severity, Severity::Error);
        let context = finding.context.as_ref().unwrap();
        assert_eq!(context.occurrences, Some(1));
        assert_eq!(context.rows.as_deref(), Some(&[2][..]));
    }

    #[test]
    fn test_calendar_coverage_clean_frame() {
        let frame = SurveyFrame::builder()
            .text("site", vec!["ramp_a", "ramp_b"])
            .numeric("catch_total", vec![1.0, 2.0])
            .build()
            .unwrap();
        let check = CalendarCoverageCheck::new(&calendar(), &["site"]).unwrap();
        assert!(check.run(&frame).is_empty());
    }

    #[test]
    fn test_negative_value_check() {
        let check = NegativeValueCheck::new(&["catch_total", "hours_fished"]);
        let findings = check.run(&interviews());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].column.as_deref(), Some("catch_total"));
        assert_eq!(
            findings[0].context.as_ref().unwrap().rows.as_deref(),
            Some(&[1][..])
        );
    }

    #[test]
    fn test_negative_value_missing_column() {
        let check = NegativeValueCheck::new(&["weight_kg"]);
        let findings = check.run(&interviews());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn test_kept_exceeds_total_check() {
        let check = KeptExceedsTotalCheck::new("catch_kept", "catch_total");
        let findings = check.run(&interviews());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].kind, FindingKind::KeptExceedsTotal);
        assert_eq!(
            findings[0].context.as_ref().unwrap().rows.as_deref(),
            Some(&[2][..])
        );
    }

    #[test]
    fn test_planned_effort_check_is_warning() {
        let check = PlannedEffortCheck::new("planned_hours", "hours_fished");
        let findings = check.run(&interviews());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(
            findings[0].context.as_ref().unwrap().rows.as_deref(),
            Some(&[1][..])
        );
    }

    #[test]
    fn test_short_trip_check_escalates_on_share() {
        // 1 of 4 trips short: 25% is above the 10% warning share.
        let check = ShortTripCheck::new("hours_fished", 0.5);
        let findings = check.run(&interviews());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);

        // 1 of 20 trips short stays informational.
        let mut hours = vec![1.0; 20];
        hours[0] = 0.1;
        let frame = SurveyFrame::builder()
            .numeric("hours_fished", hours)
            .build()
            .unwrap();
        let findings = ShortTripCheck::new("hours_fished", 0.5).run(&frame);
        assert_eq!(findings[0].severity, Severity::Info);
    }

    #[test]
    fn test_missing_value_thresholds() {
        // planned_hours is 25% missing: error level.
        let check = MissingValueCheck::new(&["planned_hours", "catch_total"]);
        let findings = check.run(&interviews());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
        assert_eq!(findings[0].column.as_deref(), Some("planned_hours"));
    }

    #[test]
    fn test_missing_value_warning_band() {
        let mut values: Vec<Option<f64>> = vec![Some(1.0); 10];
        values[0] = None;
        let frame = SurveyFrame::builder()
            .numeric_opt("hours_fished", values)
            .build()
            .unwrap();
        // 10% missing sits between the 5% warning and 20% error levels.
        let findings = MissingValueCheck::new(&["hours_fished"]).run(&frame);
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_engine_sorts_by_severity() {
        let engine = CheckEngine::new()
            .with_check(ShortTripCheck::new("hours_fished", 0.5))
            .with_check(NegativeValueCheck::new(&["catch_total"]))
            .with_check(PlannedEffortCheck::new("planned_hours", "hours_fished"));
        let findings = engine.run(&interviews());
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].severity, Severity::Error);
        assert_eq!(findings[1].severity, Severity::Warning);
        assert_eq!(findings[2].severity, Severity::Warning);
    }

    #[test]
    fn test_engine_breaks_severity_ties_by_first_row() {
        let frame = SurveyFrame::builder()
            .text("site", vec!["ramp_a"; 4])
            .numeric("catch_total", vec![1.0, 1.0, 1.0, -2.0])
            .numeric("catch_kept", vec![0.0, 5.0, 0.0, 0.0])
            .build()
            .unwrap();
        let engine = CheckEngine::new()
            .with_check(NegativeValueCheck::new(&["catch_total"]))
            .with_check(KeptExceedsTotalCheck::new("catch_kept", "catch_total"));
        let findings = engine.run(&frame);
        assert_eq!(findings.len(), 2);
        // Both are errors; the kept-exceeds finding hits row 1, the
        // negative value row 3, so it comes first despite registration
        // order.
        assert_eq!(findings[0].check, "kept_exceeds_total");
        assert_eq!(findings[1].check, "negative_value");
    }

    #[test]
    fn test_empty_engine_is_quiet() {
        let engine = CheckEngine::new();
        assert!(engine.is_empty());
        assert!(engine.run(&interviews()).is_empty());
    }
}
