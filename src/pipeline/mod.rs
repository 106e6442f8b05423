//! Model search and the end-to-end binning run

pub mod cluster;
pub mod search;

pub use cluster::{run_cluster, run_features, ClusterAssignment, ClusterConfig, ClusterOutcome};
pub use search::{CandidateFitter, CandidateResult, GmmFitter};
