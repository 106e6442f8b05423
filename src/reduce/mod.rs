//! Dimensionality reduction

pub mod pca;

pub use pca::Pca;
