//! Metagenomic contig binning
//!
//! Contigs are described by their canonical k-mer composition and their
//! per-sample coverage. Both signals are log-transformed, joined, reduced
//! with PCA and clustered with full-covariance Gaussian mixtures; the number
//! of clusters is chosen by BIC over a range of candidates.

pub mod dist;
pub mod error;
pub mod features;
pub mod io;
pub mod kmer;
pub mod mixture;
pub mod pipeline;
pub mod reduce;

pub use error::{BinningError, Result, Stage};
