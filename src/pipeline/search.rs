//! Model selection over candidate component counts
//!
//! Each candidate is fitted independently, so the search can be spread over a
//! local pool or a set of ranks. Results may come back in any order; the
//! selection sorts them by candidate count before picking the lowest BIC.

use std::ops::RangeInclusive;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BinningError, Result, Stage};
use crate::mixture::{GaussianMixture, GmmParams};

/// Covariance structure of the fitted mixtures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovarianceType {
    Full,
}

/// Everything needed to fit one candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub n_components: usize,
    pub covariance: CovarianceType,
    pub n_init: usize,
    pub max_iter: usize,
    pub seed: Option<u64>,
}

impl CandidateSpec {
    pub fn params(&self) -> GmmParams {
        GmmParams::new(self.n_components, self.n_init, self.max_iter)
    }

    /// Per-candidate generator; seeded runs are reproducible on any worker
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(self.n_components as u64)),
            None => StdRng::from_entropy(),
        }
    }
}

/// Outcome of one candidate fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    #[serde(with = "f64_bits")]
    pub bic: f64,
    pub n_components: usize,
    pub converged: bool,
}

/// A float as its bit pattern, so NaN and every digit survive the wire
mod f64_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

/// Read-only work shared with every worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTask {
    pub candidates: Vec<CandidateSpec>,
    pub features: Array2<f64>,
}

/// The winning candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selection {
    pub n_components: usize,
    pub bic: f64,
}

/// Fits a single candidate
pub trait CandidateFitter: Sync {
    fn fit_candidate(&self, spec: &CandidateSpec, features: &Array2<f64>) -> Result<CandidateResult>;
}

/// Fits a full-covariance Gaussian mixture and scores it by BIC
#[derive(Debug, Clone, Copy, Default)]
pub struct GmmFitter;

impl CandidateFitter for GmmFitter {
    fn fit_candidate(&self, spec: &CandidateSpec, features: &Array2<f64>) -> Result<CandidateResult> {
        let gmm = GaussianMixture::fit(features, &spec.params(), spec.rng())?;
        let bic = gmm.bic(features)?;
        if gmm.converged() {
            info!("Cluster {} converged", spec.n_components);
        } else {
            warn!("Cluster {} did not converge", spec.n_components);
        }
        Ok(CandidateResult {
            bic,
            n_components: spec.n_components,
            converged: gmm.converged(),
        })
    }
}

/// One spec per candidate count, in ascending order
pub fn candidate_specs(
    counts: RangeInclusive<usize>,
    n_init: usize,
    max_iter: usize,
    seed: Option<u64>,
) -> Vec<CandidateSpec> {
    counts
        .map(|n_components| CandidateSpec {
            n_components,
            covariance: CovarianceType::Full,
            n_init,
            max_iter,
            seed,
        })
        .collect()
}

/// Checks that every candidate can be fitted to `rows` filtered contigs
pub fn validate_candidates(candidates: &[CandidateSpec], rows: usize) -> Result<()> {
    if candidates.is_empty() {
        return Err(BinningError::Config("no candidate cluster counts to evaluate".into()));
    }
    if let Some(bad) = candidates.iter().find(|c| c.n_components == 0) {
        return Err(BinningError::Config(format!(
            "candidate cluster count must be positive, got {}",
            bad.n_components
        )));
    }
    let largest = candidates.iter().map(|c| c.n_components).max().unwrap_or(0);
    if largest > rows || rows < 2 {
        return Err(BinningError::dimensionality(
            Stage::ModelSearch,
            format!(
                "cannot fit up to {} clusters to {} contigs passing the threshold",
                largest, rows
            ),
        ));
    }
    Ok(())
}

/// Results ordered by candidate count
pub fn sort_results(mut results: Vec<CandidateResult>) -> Vec<CandidateResult> {
    results.sort_by_key(|r| r.n_components);
    results
}

/// Candidate with the strictly smallest BIC; ties go to the smaller count.
/// A NaN BIC never wins.
pub fn select_best(results: &[CandidateResult]) -> Option<Selection> {
    let ordered = sort_results(results.to_vec());
    let mut best: Option<Selection> = None;
    for r in ordered.iter().filter(|r| !r.bic.is_nan()) {
        if best.map_or(true, |b| r.bic < b.bic) {
            best = Some(Selection {
                n_components: r.n_components,
                bic: r.bic,
            });
        }
    }
    best
}

/// Refit the winning count on the search features
pub fn fit_final(spec: &CandidateSpec, features: &Array2<f64>) -> Result<GaussianMixture> {
    let gmm = GaussianMixture::fit(features, &spec.params(), spec.rng())?;
    if !gmm.converged() {
        warn!("Final model with {} clusters did not converge", spec.n_components);
    }
    Ok(gmm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(n: usize, bic: f64) -> CandidateResult {
        CandidateResult {
            bic,
            n_components: n,
            converged: true,
        }
    }

    #[test]
    fn test_select_is_order_independent() {
        let results = vec![result(4, 10.0), result(2, 3.0), result(1, 7.0), result(3, 5.0)];
        let best = select_best(&results).unwrap();
        assert_eq!(best.n_components, 2);
        assert_eq!(best.bic, 3.0);

        let mut reversed = results.clone();
        reversed.reverse();
        assert_eq!(select_best(&reversed), Some(best));
    }

    #[test]
    fn test_ties_go_to_smallest_count() {
        let results = vec![result(5, 1.0), result(3, 1.0), result(4, 2.0)];
        assert_eq!(select_best(&results).unwrap().n_components, 3);
    }

    #[test]
    fn test_nan_never_wins() {
        let results = vec![result(1, f64::NAN), result(2, 100.0)];
        assert_eq!(select_best(&results).unwrap().n_components, 2);
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn test_result_encoding_keeps_nan_and_bits() {
        let results = vec![result(1, f64::NAN), result(2, 0.1 + 0.2), result(3, -1.0e-300)];
        let bytes = serde_json::to_vec(&results).unwrap();
        let back: Vec<CandidateResult> = serde_json::from_slice(&bytes).unwrap();
        assert!(back[0].bic.is_nan());
        for (a, b) in results[1..].iter().zip(&back[1..]) {
            assert_eq!(a.bic.to_bits(), b.bic.to_bits());
        }
        assert_eq!(select_best(&back).unwrap().n_components, 3);
    }

    #[test]
    fn test_candidate_specs() {
        let specs = candidate_specs(2..=4, 3, 50, Some(9));
        assert_eq!(specs.iter().map(|s| s.n_components).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(specs.iter().all(|s| s.covariance == CovarianceType::Full && s.n_init == 3));
        assert!(validate_candidates(&specs, 4).is_ok());
        assert!(validate_candidates(&specs, 3).is_err());
        assert!(validate_candidates(&[], 10).is_err());
    }
}
