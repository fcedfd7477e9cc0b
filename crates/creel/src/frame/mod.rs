//! Survey data frames: typed columns, grouping, and CSV ingestion.

mod csv;
mod table;

pub use table::{Column, FrameBuilder, StratumKey, SurveyFrame};

pub(crate) use table::NULL_KEY;
