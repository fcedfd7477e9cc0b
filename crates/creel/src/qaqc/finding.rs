//! QA/QC findings raised by rule-based checks.
//!
//! Findings never stop an analysis; they describe suspicious rows so a
//! biologist can judge them before trusting the estimates.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of data problem a finding describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// Rows whose stratum never appears in the sampling calendar.
    CalendarCoverage,
    /// Negative counts, hours, or weights.
    NegativeValue,
    /// More fish kept than caught.
    KeptExceedsTotal,
    /// Planned trip duration shorter than hours already fished.
    PlannedEffort,
    /// Trips below the minimum-duration truncation threshold.
    ShortTrip,
    /// Missing values above the tolerated share.
    MissingValue,
}

impl FindingKind {
    pub fn label(&self) -> &'static str {
        match self {
            FindingKind::CalendarCoverage => "Calendar Coverage",
            FindingKind::NegativeValue => "Negative Value",
            FindingKind::KeptExceedsTotal => "Kept Exceeds Total",
            FindingKind::PlannedEffort => "Planned Effort",
            FindingKind::ShortTrip => "Short Trip",
            FindingKind::MissingValue => "Missing Value",
        }
    }
}

/// How serious a finding is. `Error` findings usually mean the affected
/// rows will be dropped or corrected during estimation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// How many offending row indices a context keeps as a sample.
const MAX_SAMPLE_ROWS: usize = 10;

/// Supporting detail attached to a finding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Sample of offending row indices (zero-based, capped).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<usize>>,
    /// Total number of offending rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<usize>,
    /// Offending share of the column, as a percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    /// What the check expected to see.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
    /// What it saw instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<Value>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    /// Stores a sample of the offending rows and their total count.
    pub fn with_rows(mut self, rows: &[usize]) -> Self {
        self.occurrences = Some(rows.len());
        self.rows = Some(rows.iter().take(MAX_SAMPLE_ROWS).copied().collect());
        self
    }

    pub fn with_percentage(mut self, percentage: f64) -> Self {
        self.percentage = Some(percentage);
        self
    }

    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_observed(mut self, observed: Value) -> Self {
        self.observed = Some(observed);
        self
    }
}

/// A single QA/QC finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Unique identifier, e.g. `qc_001`.
    pub id: String,
    pub kind: FindingKind,
    pub severity: Severity,
    /// Column the finding is about, when it concerns a single column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Human-readable description of the problem.
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    pub detected_at: DateTime<Utc>,
    /// Name of the check that raised the finding.
    pub check: String,
}

impl Finding {
    pub fn new(kind: FindingKind, severity: Severity, description: &str) -> Self {
        Finding {
            id: generate_finding_id(),
            kind,
            severity,
            column: None,
            description: description.to_string(),
            context: None,
            detected_at: Utc::now(),
            check: String::new(),
        }
    }

    pub fn with_column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_check(mut self, check: &str) -> Self {
        self.check = check.to_string();
        self
    }
}

/// Generates sequential finding identifiers.
fn generate_finding_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("qc_{id:03}")
}
