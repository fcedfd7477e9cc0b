//! QA/QC: rule-based checks over raw survey tables.

mod checks;
mod finding;

pub use checks::{
    CalendarCoverageCheck, Check, CheckEngine, KeptExceedsTotalCheck, MissingValueCheck,
    NegativeValueCheck, PlannedEffortCheck, ShortTripCheck,
};
pub use finding::{Context, Finding, FindingKind, Severity};
