//! Error types for the binning pipeline
//!
//! Every fatal error carries the pipeline stage it was raised in, so a failed
//! run states where it stopped (feature loading, join, PCA fit, model search
//! or final report).

use std::fmt;
use thiserror::Error;

/// Result type alias for binning operations
pub type Result<T> = std::result::Result<T, BinningError>;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FeatureLoading,
    Join,
    PcaFit,
    ModelSearch,
    FinalReport,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::FeatureLoading => "feature loading",
            Stage::Join => "join",
            Stage::PcaFit => "PCA fit",
            Stage::ModelSearch => "model search",
            Stage::FinalReport => "final report",
        };
        f.write_str(name)
    }
}

/// Error types that can occur while binning contigs
#[derive(Debug, Error)]
pub enum BinningError {
    /// I/O error on an input or output file
    #[error("[{stage}] I/O error on {path}: {source}")]
    Io {
        stage: Stage,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed FASTA or coverage table
    #[error("[{stage}] invalid input format in {path}: {msg}")]
    InputFormat {
        stage: Stage,
        path: String,
        msg: String,
    },

    /// Sequence contains a character outside {A,C,G,T}
    #[error("[feature loading] invalid sequence alphabet in contig '{contig}': '{found}' at position {position}")]
    InvalidAlphabet {
        contig: String,
        found: char,
        position: usize,
    },

    /// Composition and coverage tables share no contig identifiers
    #[error("[join] composition ({composition} contigs) and coverage ({coverage} contigs) have no contig identifiers in common")]
    JoinEmpty { composition: usize, coverage: usize },

    /// Requested dimensionality does not fit the data
    #[error("[{stage}] dimensionality error: {msg}")]
    Dimensionality { stage: Stage, msg: String },

    /// Numerical failure, e.g. a covariance that stays singular after regularisation
    #[error("[{stage}] numerical error: {msg}")]
    Numerical { stage: Stage, msg: String },

    /// Rank-count mismatch or failed broadcast/gather
    #[error("[model search] distributed protocol error: {0}")]
    DistributedProtocol(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BinningError {
    /// Stage the error was raised in, if it belongs to one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BinningError::Io { stage, .. }
            | BinningError::InputFormat { stage, .. }
            | BinningError::Dimensionality { stage, .. }
            | BinningError::Numerical { stage, .. } => Some(*stage),
            BinningError::InvalidAlphabet { .. } => Some(Stage::FeatureLoading),
            BinningError::JoinEmpty { .. } => Some(Stage::Join),
            BinningError::DistributedProtocol(_) => Some(Stage::ModelSearch),
            BinningError::Config(_) => None,
        }
    }

    pub(crate) fn io(stage: Stage, path: impl Into<String>, source: std::io::Error) -> Self {
        BinningError::Io {
            stage,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(stage: Stage, path: impl Into<String>, msg: impl Into<String>) -> Self {
        BinningError::InputFormat {
            stage,
            path: path.into(),
            msg: msg.into(),
        }
    }

    pub(crate) fn dimensionality(stage: Stage, msg: impl Into<String>) -> Self {
        BinningError::Dimensionality {
            stage,
            msg: msg.into(),
        }
    }

    pub(crate) fn numerical(stage: Stage, msg: impl Into<String>) -> Self {
        BinningError::Numerical {
            stage,
            msg: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_stage() {
        let err = BinningError::JoinEmpty {
            composition: 3,
            coverage: 2,
        };
        assert!(err.to_string().starts_with("[join]"));
        assert_eq!(err.stage(), Some(Stage::Join));

        let err = BinningError::dimensionality(Stage::PcaFit, "too many components");
        assert!(err.to_string().starts_with("[PCA fit]"));
    }
}
