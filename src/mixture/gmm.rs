//! Gaussian mixture model with full covariance matrices.
//!
//! EM runs through `linfa_clustering::GaussianMixtureModel`, started from
//! k-means centres. `min_covar` is added to each covariance diagonal after
//! every M-step and a run has converged once the mean per-sample
//! log-likelihood changes by less than `tol`. When no run converges within
//! `max_iter` iterations the mixture is built from the k-means partition the
//! EM started from and flagged as unconverged, so it can still be scored.

use std::f64::consts::PI;

use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_clustering::{GaussianMixtureModel, GmmCovarType, GmmError, GmmInitMethod, KMeans};
use linfa_linalg::cholesky::Cholesky;
use linfa_linalg::triangular::{SolveTriangular, UPLO};
use ndarray::{Array1, Array2, Axis};
use ndarray_stats::QuantileExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BinningError, Result, Stage};

const KMEANS_ITER: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GmmParams {
    pub n_components: usize,
    pub n_init: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub min_covar: f64,
}

impl GmmParams {
    pub fn new(n_components: usize, n_init: usize, max_iter: usize) -> Self {
        Self {
            n_components,
            n_init,
            max_iter,
            ..Default::default()
        }
    }
}

impl Default for GmmParams {
    fn default() -> Self {
        Self {
            n_components: 1,
            n_init: 1,
            max_iter: 100,
            tol: 1e-2,
            min_covar: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianMixture {
    weights: Array1<f64>,
    means: Array2<f64>,
    covariances: Vec<Array2<f64>>,
    converged: bool,
}

impl GaussianMixture {
    /// Fit a mixture to the rows of `x`
    pub fn fit<R: Rng + Clone>(x: &Array2<f64>, params: &GmmParams, rng: R) -> Result<Self> {
        let n = x.nrows();
        let k = params.n_components;
        if k == 0 {
            return Err(BinningError::dimensionality(Stage::ModelSearch, "mixture needs at least one component"));
        }
        if n < k.max(2) {
            return Err(BinningError::dimensionality(
                Stage::ModelSearch,
                format!("cannot fit {} components to {} rows", k, n),
            ));
        }

        let fitted = GaussianMixtureModel::params_with_rng(k, rng.clone())
            .covariance_type(GmmCovarType::Full)
            .init_method(GmmInitMethod::KMeans)
            .n_runs(params.n_init.max(1) as u64)
            .max_n_iterations(params.max_iter as u64)
            .tolerance(params.tol)
            .reg_covariance(params.min_covar)
            .fit(&DatasetBase::from(x.clone()));

        match fitted {
            Ok(model) => {
                debug!("EM with {} components converged", k);
                Ok(GaussianMixture {
                    weights: model.weights().clone(),
                    means: model.means().clone(),
                    covariances: model.covariances().outer_iter().map(|c| c.to_owned()).collect(),
                    converged: true,
                })
            }
            Err(GmmError::NotConverged(msg)) => {
                debug!("EM with {} components: {}", k, msg);
                Self::from_partition(x, params, rng)
            }
            Err(e) => Err(BinningError::numerical(
                Stage::ModelSearch,
                format!("mixture with {} components: {}", k, e),
            )),
        }
    }

    /// Unconverged mixture from the hard k-means partition of `x`
    fn from_partition<R: Rng + Clone>(x: &Array2<f64>, params: &GmmParams, rng: R) -> Result<Self> {
        let (n, d) = x.dim();
        let k = params.n_components;
        let kmeans = KMeans::params_with_rng(k, rng)
            .max_n_iterations(KMEANS_ITER)
            .fit(&DatasetBase::from(x.clone()))
            .map_err(|e| BinningError::numerical(Stage::ModelSearch, format!("k-means with {} clusters: {}", k, e)))?;
        let labels: Array1<usize> = kmeans.predict(x);

        let mut weights = Array1::zeros(k);
        let mut means = Array2::zeros((k, d));
        let mut covariances = Vec::with_capacity(k);
        for c in 0..k {
            let members: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|&(_, &l)| l == c)
                .map(|(i, _)| i)
                .collect();
            let rows = x.select(Axis(0), &members);
            let mean = rows.mean_axis(Axis(0)).ok_or_else(|| {
                BinningError::numerical(Stage::ModelSearch, format!("k-means left cluster {} of {} empty", c, k))
            })?;
            let diff = &rows - &mean;
            let cov = diff.t().dot(&diff) / members.len() as f64 + Array2::<f64>::eye(d) * params.min_covar;

            weights[c] = members.len() as f64 / n as f64;
            means.row_mut(c).assign(&mean);
            covariances.push(cov);
        }

        Ok(GaussianMixture {
            weights,
            means,
            covariances,
            converged: false,
        })
    }

    /// Weighted log-density of every row under every component (n x k)
    fn weighted_log_density(&self, x: &Array2<f64>, stage: Stage) -> Result<Array2<f64>> {
        let d = self.n_features();
        let eye = Array2::<f64>::eye(d);
        let singular = |c: usize| {
            move |e: linfa_linalg::LinalgError| {
                BinningError::numerical(stage, format!("covariance of component {} is not positive definite: {}", c, e))
            }
        };

        let mut out = Array2::zeros((x.nrows(), self.n_components()));
        for (c, cov) in self.covariances.iter().enumerate() {
            let chol = cov.cholesky().map_err(singular(c))?;
            let inv = chol.solve_triangular(&eye, UPLO::Lower).map_err(singular(c))?;
            let log_det = 2.0 * chol.diag().mapv(f64::ln).sum();
            let whitened = (x - &self.means.row(c)).dot(&inv.t());
            let maha = whitened.mapv(|v| v * v).sum_axis(Axis(1));
            let log_norm = -0.5 * (d as f64 * (2.0 * PI).ln() + log_det) + self.weights[c].ln();
            out.column_mut(c).assign(&(maha * -0.5 + log_norm));
        }
        Ok(out)
    }

    /// Per-row log-likelihood and responsibilities
    fn scored(&self, x: &Array2<f64>, stage: Stage) -> Result<(Array1<f64>, Array2<f64>)> {
        if x.ncols() != self.n_features() {
            return Err(BinningError::dimensionality(
                stage,
                format!(
                    "mixture was fitted on {} features but data has {}",
                    self.n_features(),
                    x.ncols()
                ),
            ));
        }
        let mut lpr = self.weighted_log_density(x, stage)?;
        let mut log_prob = Array1::zeros(x.nrows());
        for (i, mut row) in lpr.axis_iter_mut(Axis(0)).enumerate() {
            let max = row.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
            let lse = max + row.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
            log_prob[i] = lse;
            row.mapv_inplace(|v| (v - lse).exp());
        }
        Ok((log_prob, lpr))
    }

    pub fn n_components(&self) -> usize {
        self.means.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.means.ncols()
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn means(&self) -> &Array2<f64> {
        &self.means
    }

    pub fn covariances(&self) -> &[Array2<f64>] {
        &self.covariances
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Number of free parameters
    pub fn n_parameters(&self) -> usize {
        let k = self.n_components();
        let d = self.n_features();
        k * d * (d + 1) / 2 + k * d + (k - 1)
    }

    /// Total log-likelihood of `x`
    pub fn score(&self, x: &Array2<f64>) -> Result<f64> {
        Ok(self.scored(x, Stage::ModelSearch)?.0.sum())
    }

    /// Bayesian information criterion on `x`; lower is better
    pub fn bic(&self, x: &Array2<f64>) -> Result<f64> {
        let n = x.nrows() as f64;
        Ok(-2.0 * self.score(x)? + self.n_parameters() as f64 * n.ln())
    }

    /// Posterior probability of each component for each row
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.scored(x, Stage::FinalReport)?.1)
    }

    /// Most probable component for each row
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        let resp = self.predict_proba(x)?;
        Ok(hard_labels(&resp))
    }
}

/// Index of the largest entry in each row
pub fn hard_labels(resp: &Array2<f64>) -> Vec<usize> {
    resp.axis_iter(Axis(0))
        .map(|row| row.argmax().unwrap_or(0))
        .collect()
}
