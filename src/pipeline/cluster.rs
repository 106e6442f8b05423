//! End-to-end binning run
//!
//! The coordinator loads both modalities, joins them, fits the reduction on
//! the contigs above the length threshold and hands the component table to
//! the model search. After selection it refits the winning count and reports
//! labels and responsibilities for every joined contig. Workers only take
//! part in the search.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use ndarray::Array2;
use serde::Serialize;
use tracing::{info, warn};

use crate::dist::scheduler::{abandon_search, run_search, ExecutionMode, Role, SearchStrategy};
use crate::error::{BinningError, Result, Stage};
use crate::features::composition::load_composition;
use crate::features::coverage::{select_coverage, CoverageRange};
use crate::features::join::{JoinedFeatures, ReductionMode, Reducer, Rows};
use crate::features::table::FeatureTable;
use crate::io::coverage::read_coverage_table;
use crate::io::output::ClusterReporter;
use crate::kmer::AlphabetPolicy;
use crate::mixture::{hard_labels, GaussianMixture};
use crate::pipeline::search::{
    candidate_specs, fit_final, select_best, validate_candidates, CandidateFitter, CandidateResult,
    CandidateSpec, SearchTask, Selection,
};

/// Settings of a binning run, as given on the command line
#[derive(Debug, Clone, Serialize)]
pub struct ClusterConfig {
    pub composition_file: String,
    pub coverage_file: String,
    pub kmer_length: usize,
    pub length_threshold: f64,
    pub read_length: f64,
    pub clusters: RangeInclusive<usize>,
    pub coverage_columns: Option<CoverageRange>,
    pub reduction: ReductionMode,
    pub inits: usize,
    pub iterations: usize,
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
    pub pipe: bool,
    pub execution: ExecutionMode,
    pub alphabet_policy: AlphabetPolicy,
}

impl ClusterConfig {
    /// Reject settings no run could succeed with
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(BinningError::Config(msg));
        if self.kmer_length == 0 {
            return fail("k-mer length must be positive".into());
        }
        if !self.length_threshold.is_finite() {
            return fail(format!("length threshold {} is not finite", self.length_threshold));
        }
        if !(self.read_length > 0.0 && self.read_length.is_finite()) {
            return fail(format!("read length {} must be positive", self.read_length));
        }
        if *self.clusters.start() == 0 || self.clusters.is_empty() {
            return fail(format!(
                "cluster range {}-{} must be non-empty and start at 1 or more",
                self.clusters.start(),
                self.clusters.end()
            ));
        }
        if self.inits == 0 || self.iterations == 0 {
            return fail("initialisations and iterations must both be positive".into());
        }
        if let ExecutionMode::Local { processes: 0 } = self.execution {
            return fail("at least one local worker is needed".into());
        }
        Ok(())
    }

    pub fn candidates(&self) -> Vec<CandidateSpec> {
        candidate_specs(self.clusters.clone(), self.inits, self.iterations, self.seed)
    }
}

/// Features ready for the model search
#[derive(Debug, Clone)]
pub struct PreparedFeatures {
    pub joined: JoinedFeatures,
    pub reducer: Reducer,
    /// Component table of the contigs above the threshold
    pub search_table: FeatureTable,
}

/// Final cluster membership of every joined contig
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub ids: Vec<String>,
    pub labels: Vec<usize>,
    pub responsibilities: Array2<f64>,
    /// Whether the contig was above the length threshold
    pub included: Vec<bool>,
}

impl ClusterAssignment {
    pub fn n_clusters(&self) -> usize {
        self.responsibilities.ncols()
    }

    /// Label of a contig
    pub fn label_of(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|x| x == id).map(|i| self.labels[i])
    }
}

/// What the coordinator ends up with
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub results: Vec<CandidateResult>,
    pub selection: Selection,
    pub model: GaussianMixture,
    pub assignment: ClusterAssignment,
}

/// Load composition and coverage and join them
pub fn load_joined(config: &ClusterConfig) -> Result<JoinedFeatures> {
    let composition = load_composition(&config.composition_file, config.kmer_length, config.alphabet_policy)?;
    let raw = read_coverage_table(&config.coverage_file)?;
    let coverage = select_coverage(&raw, config.coverage_columns.as_ref())?;
    info!(
        "Loaded coverage data: {} contigs, {} samples selected of {}",
        coverage.n_rows(),
        coverage.n_cols(),
        raw.n_cols()
    );
    JoinedFeatures::join(&composition, &coverage, config.length_threshold, config.read_length)
}

/// Join, validate and reduce. Every dimensionality check runs before any fit.
pub fn prepare_features(config: &ClusterConfig) -> Result<PreparedFeatures> {
    let joined = load_joined(config)?;
    Reducer::validate(&joined, config.reduction)?;
    validate_candidates(&config.candidates(), joined.n_included())?;

    let reducer = Reducer::fit(&joined, config.reduction)?;
    let search_table = reducer.transform(&joined, Rows::Included)?;
    info!("PCA transformed data: {} x {}", search_table.n_rows(), search_table.n_cols());
    Ok(PreparedFeatures {
        joined,
        reducer,
        search_table,
    })
}

/// Assign every joined contig with the final model
pub fn assign_clusters(prepared: &PreparedFeatures, model: &GaussianMixture) -> Result<ClusterAssignment> {
    let PreparedFeatures { joined, reducer, .. } = prepared;
    let all = reducer.transform(joined, Rows::All)?;
    let responsibilities = model.predict_proba(all.values())?;
    let labels = hard_labels(&responsibilities);
    let included = all
        .ids()
        .iter()
        .map(|id| {
            joined
                .composition()
                .position(id)
                .map_or(false, |i| joined.included()[i])
        })
        .collect();
    Ok(ClusterAssignment {
        ids: all.ids().to_vec(),
        labels,
        responsibilities,
        included,
    })
}

/// Write cluster parameters and the assignment
fn report_final<R: ClusterReporter + ?Sized>(
    prepared: &PreparedFeatures,
    model: &GaussianMixture,
    assignment: &ClusterAssignment,
    reporter: &mut R,
) -> Result<()> {
    let components = prepared.search_table.columns();
    reporter.write_clustering(assignment)?;
    reporter.write_cluster_pca_means(model.means(), components)?;
    for (i, cov) in model.covariances().iter().enumerate() {
        reporter.write_cluster_pca_variance(i, cov, components)?;
    }

    // Only a joint PCA maps back to feature space
    if let Some(pca) = prepared.reducer.combined_pca() {
        let combined = prepared.joined.combined()?;
        let features = combined.columns();
        reporter.write_cluster_means(&pca.inverse_transform(model.means())?, features)?;
        for (i, cov) in model.covariances().iter().enumerate() {
            reporter.write_cluster_variance(i, &pca.inverse_transform(cov)?, components, features)?;
        }
    }

    reporter.write_responsibilities(assignment)
}

fn prepare_and_report<R: ClusterReporter + ?Sized>(config: &ClusterConfig, reporter: &mut R) -> Result<PreparedFeatures> {
    config.validate()?;
    let prepared = prepare_features(config)?;
    reporter.write_args(config)?;
    reporter.write_original_data(&prepared.joined.included_rows(prepared.joined.original()))?;
    reporter.write_pca(&prepared.search_table)?;
    Ok(prepared)
}

/// Run the whole pipeline in the given role.
///
/// The coordinator returns the outcome; workers return `None` once their
/// share of the search is delivered. When the coordinator cannot prepare
/// the search, the workers fail with its error instead of waiting.
pub fn run_cluster<F, R>(
    config: &ClusterConfig,
    role: Role,
    strategy: &SearchStrategy<'_>,
    fitter: &F,
    reporter: &mut R,
) -> Result<Option<ClusterOutcome>>
where
    F: CandidateFitter,
    R: ClusterReporter + ?Sized,
{
    let candidates = config.candidates();

    let prepared = match role {
        Role::Coordinator => match prepare_and_report(config, reporter) {
            Ok(prepared) => Some(prepared),
            Err(e) => {
                if let Err(release) = abandon_search(strategy, role, &e.to_string()) {
                    warn!("Could not release worker ranks: {}", release);
                }
                return Err(e);
            }
        },
        Role::Worker => None,
    };

    let task = prepared.as_ref().map(|p| SearchTask {
        candidates: candidates.clone(),
        features: p.search_table.values().clone(),
    });
    let results = run_search(strategy, role, task, fitter)?;

    let (prepared, results) = match (prepared, results) {
        (Some(p), Some(r)) => (p, r),
        (None, _) => return Ok(None),
        (Some(_), None) => {
            return Err(BinningError::DistributedProtocol(
                "coordinator received no search results".into(),
            ))
        }
    };

    reporter.write_bic(&results)?;
    let selection = select_best(&results).ok_or_else(|| {
        BinningError::numerical(Stage::ModelSearch, "no candidate produced a usable BIC")
    })?;
    info!(
        "Selected {} clusters with BIC {:.3}",
        selection.n_components, selection.bic
    );

    let spec = candidates
        .iter()
        .find(|c| c.n_components == selection.n_components)
        .ok_or_else(|| {
            BinningError::DistributedProtocol(format!(
                "selected cluster count {} was never a candidate",
                selection.n_components
            ))
        })?;
    let model = fit_final(spec, prepared.search_table.values())?;
    let assignment = assign_clusters(&prepared, &model)?;
    report_final(&prepared, &model, &assignment, reporter)?;

    Ok(Some(ClusterOutcome {
        results,
        selection,
        model,
        assignment,
    }))
}

/// Joined pseudo-counted composition and raw coverage, before any transform
pub fn run_features<R: ClusterReporter + ?Sized>(config: &ClusterConfig, reporter: &mut R) -> Result<FeatureTable> {
    let joined = load_joined(config)?;
    reporter.write_joined_features(joined.original())?;
    Ok(joined.original().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClusterConfig {
        ClusterConfig {
            composition_file: "contigs.fa".into(),
            coverage_file: "coverage.tsv".into(),
            kmer_length: 4,
            length_threshold: 1000.0,
            read_length: 100.0,
            clusters: 2..=5,
            coverage_columns: None,
            reduction: ReductionMode::Combined { components: 2 },
            inits: 2,
            iterations: 50,
            seed: Some(1),
            output_dir: PathBuf::from("."),
            pipe: false,
            execution: ExecutionMode::Local { processes: 2 },
            alphabet_policy: AlphabetPolicy::Strict,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());

        let mut c = config();
        c.clusters = 0..=3;
        assert!(c.validate().is_err());

        let mut c = config();
        c.clusters = 5..=2;
        assert!(c.validate().is_err());

        let mut c = config();
        c.read_length = 0.0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.execution = ExecutionMode::Local { processes: 0 };
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_candidates_follow_range() {
        let specs = config().candidates();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].n_components, 2);
        assert_eq!(specs[3].n_components, 5);
        assert!(specs.iter().all(|s| s.seed == Some(1) && s.n_init == 2 && s.max_iter == 50));
    }

    #[test]
    fn test_config_serialises() {
        let json = serde_json::to_value(config()).unwrap();
        assert_eq!(json["kmer_length"], 4);
        assert_eq!(json["clusters"]["start"], 2);
        assert_eq!(json["alphabet_policy"], "strict");
    }
}
