//! Gaussian mixture models

pub mod gmm;

pub use gmm::{hard_labels, GaussianMixture, GmmParams};
