//! Input readers and result writers

pub mod coverage;
pub mod fasta;
pub mod output;

pub use output::{ClusterReporter, CsvReporter, NullReporter};
