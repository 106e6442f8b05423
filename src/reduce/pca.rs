//! Principal component analysis
//!
//! The decomposition is computed by `linfa_reduction::Pca`. Its loadings are
//! read back by projecting the unit vectors placed at the data mean, and each
//! component is oriented so that its largest absolute loading is positive,
//! which keeps signs stable for a given input.

use linfa::prelude::*;
use linfa::DatasetBase;
use linfa_reduction::Pca as LinfaPca;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BinningError, Result, Stage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pca {
    mean: Array1<f64>,
    /// One component per row
    components: Array2<f64>,
    explained_variance: Array1<f64>,
    total_variance: f64,
}

impl Pca {
    /// Fit `n_components` components to the rows of `data`
    pub fn fit(data: &Array2<f64>, n_components: usize) -> Result<Self> {
        let (n, d) = data.dim();
        if n_components == 0 {
            return Err(BinningError::dimensionality(Stage::PcaFit, "PCA needs at least one component"));
        }
        if n_components > n.min(d) {
            return Err(BinningError::dimensionality(
                Stage::PcaFit,
                format!(
                    "{} components requested but data has {} rows and {} features",
                    n_components, n, d
                ),
            ));
        }

        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| BinningError::dimensionality(Stage::PcaFit, "cannot fit PCA on empty data"))?;
        let model = LinfaPca::params(n_components)
            .fit(&DatasetBase::from(data.clone()))
            .map_err(|e| BinningError::numerical(Stage::PcaFit, format!("{} components: {}", n_components, e)))?;

        let probe = Array2::<f64>::eye(d) + &mean;
        let loadings: Array2<f64> = model.predict(&probe);
        let mut components = loadings.t().to_owned();
        for mut row in components.rows_mut() {
            let pivot = row
                .iter()
                .copied()
                .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
            if pivot < 0.0 {
                row.mapv_inplace(|x| -x);
            }
        }

        let (explained_variance, total_variance) = if n > 1 {
            let scores = (data - &mean).dot(&components.t());
            (scores.var_axis(Axis(0), 1.0), data.var_axis(Axis(0), 1.0).sum())
        } else {
            (Array1::zeros(n_components), 0.0)
        };
        debug!("PCA fitted on {}x{} data, {} components", n, d, n_components);

        Ok(Self {
            mean,
            components,
            explained_variance,
            total_variance,
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.components.ncols()
    }

    pub fn components(&self) -> &Array2<f64> {
        &self.components
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn explained_variance(&self) -> &Array1<f64> {
        &self.explained_variance
    }

    /// Share of total variance captured by each retained component
    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        if self.total_variance > 0.0 {
            &self.explained_variance / self.total_variance
        } else {
            Array1::zeros(self.n_components())
        }
    }

    /// Project rows of `data` onto the components
    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.n_features() {
            return Err(BinningError::dimensionality(
                Stage::PcaFit,
                format!(
                    "PCA was fitted on {} features but data has {}",
                    self.n_features(),
                    data.ncols()
                ),
            ));
        }
        let centred = data - &self.mean;
        Ok(centred.dot(&self.components.t()))
    }

    /// Map component-space rows back to the original feature space
    pub fn inverse_transform(&self, scores: &Array2<f64>) -> Result<Array2<f64>> {
        if scores.ncols() != self.n_components() {
            return Err(BinningError::dimensionality(
                Stage::FinalReport,
                format!(
                    "PCA has {} components but data has {} columns",
                    self.n_components(),
                    scores.ncols()
                ),
            ));
        }
        Ok(scores.dot(&self.components) + &self.mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_data(n: usize, d: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        // Decaying scales so every direction carries a different amount of variance
        Array2::from_shape_fn((n, d), |(_, j)| rng.gen_range(-1.0..1.0) * (d - j) as f64)
    }

    fn reconstruction_error(data: &Array2<f64>, k: usize) -> f64 {
        let pca = Pca::fit(data, k).unwrap();
        let back = pca.inverse_transform(&pca.transform(data).unwrap()).unwrap();
        (&back - data).mapv(|v| v * v).sum()
    }

    #[test]
    fn test_reconstruction_error_shrinks_with_rank() {
        let data = random_data(60, 8, 7);
        let errors: Vec<f64> = (1..=4).map(|k| reconstruction_error(&data, k)).collect();
        for pair in errors.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-6, "{:?}", errors);
        }
    }

    #[test]
    fn test_components_orthonormal_and_ordered() {
        let data = random_data(50, 6, 11);
        let pca = Pca::fit(&data, 3).unwrap();
        let gram = pca.components().dot(&pca.components().t());
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((gram[[i, j]] - expected).abs() < 1e-6);
            }
        }
        let ev = pca.explained_variance();
        assert!(ev[0] >= ev[1] && ev[1] >= ev[2]);
        assert!(pca.explained_variance_ratio().sum() <= 1.0 + 1e-9);

        // Deterministic orientation
        let again = Pca::fit(&data, 3).unwrap();
        assert_eq!(pca.components(), again.components());
    }

    #[test]
    fn test_transformed_scores_are_centred() {
        let data = random_data(30, 5, 5);
        let pca = Pca::fit(&data, 2).unwrap();
        let scores = pca.transform(&data).unwrap();
        for m in scores.mean_axis(Axis(0)).unwrap().iter() {
            assert!(m.abs() < 1e-9);
        }
    }

    #[test]
    fn test_dimension_checks() {
        let data = random_data(3, 5, 1);
        assert!(matches!(
            Pca::fit(&data, 4),
            Err(BinningError::Dimensionality { .. })
        ));
        let pca = Pca::fit(&random_data(20, 5, 1), 2).unwrap();
        assert!(pca.transform(&random_data(2, 4, 2)).is_err());
        assert!(pca.inverse_transform(&Array2::zeros((1, 3))).is_err());
    }
}
