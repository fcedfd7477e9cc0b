//! Creel: design-based catch and effort estimation for recreational
//! fishing surveys.
//!
//! A creel survey pairs on-site angler counts with dockside interviews.
//! This crate turns those tables into total-effort, catch-per-unit-effort
//! (CPUE), and total-harvest estimates with design-consistent variances:
//! stratified inclusion weights, Taylor linearization or bootstrap /
//! jackknife replicate weights, and delta-method propagation for the
//! effort × CPUE product.
//!
//! # Core Principles
//!
//! - **Design-based**: variances follow the sampling scheme (strata, PSUs,
//!   weights), not a parametric model
//! - **Non-destructive**: input frames are never modified; every estimator
//!   returns a fresh table
//! - **Diagnosable**: every dropped, truncated, or corrected row is counted
//!   in the output, and a stratum that cannot be estimated is an NA row
//!   with a reason, never a crash
//!
//! # Example
//!
//! ```
//! use creel::{CpueEstimator, DesignBuilder, SurveyFrame};
//!
//! # fn main() -> creel::Result<()> {
//! let interviews = SurveyFrame::builder()
//!     .text("site", vec!["ramp_a", "ramp_a", "ramp_b"])
//!     .numeric("catch_total", vec![2.0, 4.0, 3.0])
//!     .numeric("hours_fished", vec![1.0, 2.0, 1.5])
//!     .build()?;
//!
//! let design = DesignBuilder::new(interviews, &["site"]).build()?;
//! let cpue = CpueEstimator::new("catch_total", "hours_fished").estimate(&design)?;
//!
//! assert_eq!(cpue.rows[0].estimate, Some(2.0));
//! # Ok(())
//! # }
//! ```

pub mod design;
pub mod error;
pub mod estimate;
pub mod frame;
pub mod qaqc;

mod survey;

pub use crate::survey::{CreelConfig, CreelSurvey};
pub use design::{
    DesignBuilder, DesignDiagnostics, ReplicateMethod, ReplicateSpec, ReplicateWeights,
    SurveyDesign,
};
pub use error::{CreelError, Result};
pub use estimate::{
    CpueEstimator, CpueMethod, Diagnostics, EffortEstimator, EffortMethod, EstimateTable,
    HarvestEstimator, HarvestMode, PeriodSource, StratumEstimate, VarianceCenter,
};
pub use frame::{Column, FrameBuilder, StratumKey, SurveyFrame};
pub use qaqc::{Check, CheckEngine, Context, Finding, FindingKind, Severity};
