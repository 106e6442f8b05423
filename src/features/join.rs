//! Joining composition and coverage, and reducing the joined features
//!
//! Only contigs present in both modalities survive the join. The threshold
//! filter selects the rows used to fit PCA and the mixture models; the fitted
//! transforms are then applied to every joined contig.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{BinningError, Result, Stage};
use crate::features::composition::CompositionData;
use crate::features::coverage::log_coverage;
use crate::features::table::{Column, FeatureTable, Modality};
use crate::reduce::Pca;

const EXAMPLE_IDS: usize = 5;

#[derive(Debug, Clone)]
pub struct JoinedFeatures {
    composition: FeatureTable,
    coverage: FeatureTable,
    original: FeatureTable,
    included: Vec<bool>,
    threshold: f64,
}

fn missing_examples(from: &FeatureTable, other: &FeatureTable) -> (usize, Vec<String>) {
    let missing: Vec<&String> = from.ids().iter().filter(|id| !other.contains(id)).collect();
    let examples = missing.iter().take(EXAMPLE_IDS).map(|s| s.to_string()).collect();
    (missing.len(), examples)
}

impl JoinedFeatures {
    /// Inner-join composition with the selected raw coverage columns.
    ///
    /// Coverage is log-transformed after alignment, so every joined contig
    /// has a length proxy.
    pub fn join(
        composition: &CompositionData,
        coverage: &FeatureTable,
        threshold: f64,
        read_length: f64,
    ) -> Result<Self> {
        let log_comp = composition.log_ratios.restrict_to(coverage);
        if log_comp.is_empty() {
            return Err(BinningError::JoinEmpty {
                composition: composition.n_contigs(),
                coverage: coverage.n_rows(),
            });
        }

        let (n, examples) = missing_examples(&composition.log_ratios, coverage);
        if n > 0 {
            warn!("{} contigs have no coverage and are left out, e.g. {:?}", n, examples);
        }
        let (n, examples) = missing_examples(coverage, &composition.log_ratios);
        if n > 0 {
            warn!("{} coverage rows have no sequence and are left out, e.g. {:?}", n, examples);
        }

        let raw_cov = coverage.reindex(log_comp.ids()).ok_or_else(|| {
            BinningError::dimensionality(Stage::Join, "coverage lost a contig shared with composition")
        })?;
        let log_cov = log_coverage(&raw_cov, composition, read_length)?;
        let original = composition.pseudo_counts.restrict_to(coverage).hstack(&raw_cov)?;

        let included: Vec<bool> = log_comp
            .ids()
            .iter()
            .map(|id| composition.length_of(id).map_or(false, |l| l > threshold))
            .collect();

        let joined = Self {
            composition: log_comp,
            coverage: log_cov,
            original,
            included,
            threshold,
        };
        info!(
            "Joined {} contigs ({} above length threshold {})",
            joined.n_rows(),
            joined.n_included(),
            threshold
        );
        Ok(joined)
    }

    pub fn ids(&self) -> &[String] {
        self.composition.ids()
    }

    pub fn n_rows(&self) -> usize {
        self.composition.n_rows()
    }

    /// Log-ratio composition of the joined contigs
    pub fn composition(&self) -> &FeatureTable {
        &self.composition
    }

    /// Log coverage of the joined contigs
    pub fn coverage(&self) -> &FeatureTable {
        &self.coverage
    }

    /// Pseudo-counted composition next to raw coverage, before any log transform
    pub fn original(&self) -> &FeatureTable {
        &self.original
    }

    /// Threshold filter over the joined rows
    pub fn included(&self) -> &[bool] {
        &self.included
    }

    pub fn n_included(&self) -> usize {
        self.included.iter().filter(|&&b| b).count()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Both modalities side by side
    pub fn combined(&self) -> Result<FeatureTable> {
        self.composition.hstack(&self.coverage)
    }

    /// Rows of `table` that pass the threshold filter
    pub fn included_rows(&self, table: &FeatureTable) -> FeatureTable {
        table.filter_rows(&self.included)
    }
}

/// How the joined features are reduced before clustering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReductionMode {
    /// One PCA over both modalities
    Combined { components: usize },
    /// One PCA per modality, component tables joined afterwards
    Split { composition: usize, coverage: usize },
}

/// Which joined rows to transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rows {
    Included,
    All,
}

/// Fitted PCA model(s)
#[derive(Debug, Clone)]
pub enum Reducer {
    Combined(Pca),
    Split { composition: Pca, coverage: Pca },
}

fn check_components(what: &str, components: usize, rows: usize, features: usize) -> Result<()> {
    if components == 0 || components > rows.min(features) {
        return Err(BinningError::dimensionality(
            Stage::PcaFit,
            format!(
                "{} PCA asks for {} components but only {} contigs pass the threshold and there are {} features",
                what, components, rows, features
            ),
        ));
    }
    Ok(())
}

fn log_fit(what: &str, pca: &Pca) {
    let ratio = pca.explained_variance_ratio();
    info!(
        "{} PCA: {} components explain {:.1}% of variance",
        what,
        pca.n_components(),
        ratio.sum() * 100.0
    );
}

fn scores(pca: &Pca, table: &FeatureTable, modality: Modality) -> Result<FeatureTable> {
    let values = pca.transform(table.values())?;
    let columns = (0..pca.n_components())
        .map(|i| Column::component(modality, i))
        .collect();
    table.with_columns(columns, values)
}

impl Reducer {
    /// Checks the requested dimensionality against the filtered data
    pub fn validate(joined: &JoinedFeatures, mode: ReductionMode) -> Result<()> {
        let rows = joined.n_included();
        if rows == 0 {
            return Err(BinningError::dimensionality(
                Stage::PcaFit,
                format!("no contigs pass the length threshold {}", joined.threshold()),
            ));
        }
        let comp = joined.composition().n_cols();
        let cov = joined.coverage().n_cols();
        match mode {
            ReductionMode::Combined { components } => check_components("combined", components, rows, comp + cov),
            ReductionMode::Split { composition, coverage } => {
                check_components("composition", composition, rows, comp)?;
                check_components("coverage", coverage, rows, cov)
            }
        }
    }

    /// Fit on the rows that pass the threshold filter
    pub fn fit(joined: &JoinedFeatures, mode: ReductionMode) -> Result<Self> {
        Self::validate(joined, mode)?;
        match mode {
            ReductionMode::Combined { components } => {
                let filtered = joined.included_rows(&joined.combined()?);
                let pca = Pca::fit(filtered.values(), components)?;
                log_fit("Combined", &pca);
                Ok(Reducer::Combined(pca))
            }
            ReductionMode::Split { composition, coverage } => {
                let comp = Pca::fit(joined.included_rows(joined.composition()).values(), composition)?;
                log_fit("Composition", &comp);
                let cov = Pca::fit(joined.included_rows(joined.coverage()).values(), coverage)?;
                log_fit("Coverage", &cov);
                Ok(Reducer::Split {
                    composition: comp,
                    coverage: cov,
                })
            }
        }
    }

    /// Component table for the chosen rows
    pub fn transform(&self, joined: &JoinedFeatures, rows: Rows) -> Result<FeatureTable> {
        let pick = |table: &FeatureTable| match rows {
            Rows::Included => joined.included_rows(table),
            Rows::All => table.clone(),
        };
        match self {
            Reducer::Combined(pca) => scores(pca, &pick(&joined.combined()?), Modality::Joint),
            Reducer::Split { composition, coverage } => {
                let comp = scores(composition, &pick(joined.composition()), Modality::Composition)?;
                let cov = scores(coverage, &pick(joined.coverage()), Modality::Coverage)?;
                comp.inner_join(&cov)
            }
        }
    }

    /// The joint PCA, which can map cluster parameters back to feature space
    pub fn combined_pca(&self) -> Option<&Pca> {
        match self {
            Reducer::Combined(pca) => Some(pca),
            Reducer::Split { .. } => None,
        }
    }
}
