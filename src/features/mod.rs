//! Per-contig feature tables: composition, coverage and their join

pub mod composition;
pub mod coverage;
pub mod join;
pub mod table;

pub use composition::{load_composition, CompositionData};
pub use coverage::CoverageRange;
pub use join::{JoinedFeatures, ReductionMode, Reducer};
pub use table::{Column, FeatureTable, Modality};
