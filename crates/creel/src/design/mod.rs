//! Survey designs: stratification, weights, and replicate weights.

mod builder;
mod replicate;

pub use builder::{DesignBuilder, DesignDiagnostics, SurveyDesign};
pub use replicate::{ReplicateMethod, ReplicateSpec, ReplicateWeights};
