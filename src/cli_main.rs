use std::ops::RangeInclusive;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use mixbin::dist::ExecutionMode;
use mixbin::features::{CoverageRange, ReductionMode};
use mixbin::kmer::AlphabetPolicy;
use mixbin::pipeline::ClusterConfig;

#[derive(Parser, Debug)]
#[command(name = "mixbin", version, about = "Bin metagenomic contigs by composition and coverage", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Inputs shared by every command
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Contig sequences, FASTA(.gz)
    #[arg(long)]
    pub composition_file: String,

    /// Coverage table: header row, contig identifier in the first column
    #[arg(long)]
    pub coverage_file: String,

    /// K-mer length for composition
    #[arg(long, default_value_t = 4)]
    pub kmer_length: usize,

    /// Contigs whose pseudo-counted k-mer total exceeds this are clustered
    #[arg(long, default_value_t = 1000.0)]
    pub length_threshold: f64,

    /// Read length used for the coverage pseudo-count
    #[arg(long, default_value_t = 100.0)]
    pub read_length: f64,

    /// First and last coverage column to use, by header name (FIRST,LAST)
    #[arg(long, value_parser = parse_coverage_columns)]
    pub coverage_columns: Option<CoverageRange>,

    /// What to do with windows containing characters other than A, C, G, T
    #[arg(long, value_enum, default_value_t = AlphabetPolicy::Strict)]
    pub alphabet_policy: AlphabetPolicy,

    /// Directory for output files
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cluster contigs and write the assignment
    Cluster {
        #[command(flatten)]
        input: InputArgs,

        /// Range of cluster counts to try, MIN-MAX or MIN,MAX
        #[arg(short, long, default_value = "20-50", value_parser = parse_cluster_range)]
        clusters: RangeInclusive<usize>,

        /// Run one PCA per modality instead of a joint one
        #[arg(long)]
        split_pca: bool,

        /// PCA components: N, or COV,COMP with --split-pca
        #[arg(long, value_parser = parse_pca_components)]
        pca_components: PcaComponents,

        /// Random initialisations per mixture fit
        #[arg(short, long, default_value_t = 5)]
        inits: usize,

        /// Maximum EM iterations per initialisation
        #[arg(long, default_value_t = 100)]
        iterations: usize,

        /// Seed for reproducible fits
        #[arg(long)]
        seed: Option<u64>,

        /// Write the clustering to stdout
        #[arg(long)]
        pipe: bool,

        /// Number of local workers
        #[arg(long, default_value_t = num_cpus::get())]
        threads: usize,

        /// Distribute the model search over MPI ranks
        #[arg(long)]
        mpi: bool,
    },

    /// Write the joined composition and coverage table without clustering
    Features {
        #[command(flatten)]
        input: InputArgs,
    },
}

/// Requested PCA dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcaComponents {
    Single(usize),
    /// Coverage first, then composition
    Pair(usize, usize),
}

impl PcaComponents {
    pub fn reduction(self, split: bool) -> Result<ReductionMode, String> {
        match (self, split) {
            (PcaComponents::Single(n), false) => Ok(ReductionMode::Combined { components: n }),
            (PcaComponents::Single(n), true) => Ok(ReductionMode::Split {
                composition: n,
                coverage: n,
            }),
            (PcaComponents::Pair(cov, comp), true) => Ok(ReductionMode::Split {
                composition: comp,
                coverage: cov,
            }),
            (PcaComponents::Pair(..), false) => {
                Err("two PCA component counts are only meaningful with --split-pca".into())
            }
        }
    }
}

fn parse_count(s: &str) -> Result<usize, String> {
    s.trim()
        .parse::<usize>()
        .map_err(|_| format!("'{}' is not a non-negative integer", s.trim()))
}

fn split_pair(s: &str) -> Option<(&str, &str)> {
    s.split_once(',').or_else(|| s.split_once('-'))
}

pub fn parse_cluster_range(s: &str) -> Result<RangeInclusive<usize>, String> {
    let (lo, hi) = split_pair(s).ok_or_else(|| format!("expected MIN-MAX or MIN,MAX, got '{}'", s))?;
    let (lo, hi) = (parse_count(lo)?, parse_count(hi)?);
    if lo == 0 || lo > hi {
        return Err(format!("invalid cluster range {}-{}", lo, hi));
    }
    Ok(lo..=hi)
}

pub fn parse_pca_components(s: &str) -> Result<PcaComponents, String> {
    match s.split_once(',') {
        Some((cov, comp)) => Ok(PcaComponents::Pair(parse_count(cov)?, parse_count(comp)?)),
        None => Ok(PcaComponents::Single(parse_count(s)?)),
    }
}

pub fn parse_coverage_columns(s: &str) -> Result<CoverageRange, String> {
    match s.split_once(',') {
        Some((first, last)) if !first.trim().is_empty() && !last.trim().is_empty() => {
            Ok(CoverageRange::new(first.trim(), last.trim()))
        }
        _ => Err(format!("expected FIRST,LAST column names, got '{}'", s)),
    }
}

/// Settings for the `features` command; clustering fields keep neutral values
pub fn features_config(input: InputArgs) -> ClusterConfig {
    ClusterConfig {
        composition_file: input.composition_file,
        coverage_file: input.coverage_file,
        kmer_length: input.kmer_length,
        length_threshold: input.length_threshold,
        read_length: input.read_length,
        clusters: 1..=1,
        coverage_columns: input.coverage_columns,
        reduction: ReductionMode::Combined { components: 1 },
        inits: 1,
        iterations: 1,
        seed: None,
        output_dir: input.output_dir,
        pipe: false,
        execution: ExecutionMode::Local { processes: 1 },
        alphabet_policy: input.alphabet_policy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_range() {
        assert_eq!(parse_cluster_range("20-50").unwrap(), 20..=50);
        assert_eq!(parse_cluster_range("2,4").unwrap(), 2..=4);
        assert_eq!(parse_cluster_range("3-3").unwrap(), 3..=3);
        assert!(parse_cluster_range("0-4").is_err());
        assert!(parse_cluster_range("5-2").is_err());
        assert!(parse_cluster_range("7").is_err());
    }

    #[test]
    fn test_pca_components() {
        assert_eq!(parse_pca_components("8").unwrap(), PcaComponents::Single(8));
        assert_eq!(parse_pca_components("3,10").unwrap(), PcaComponents::Pair(3, 10));
        assert_eq!(
            PcaComponents::Pair(3, 10).reduction(true).unwrap(),
            ReductionMode::Split {
                composition: 10,
                coverage: 3
            }
        );
        assert!(PcaComponents::Pair(3, 10).reduction(false).is_err());
    }

    #[test]
    fn test_cli_parses_cluster_command() {
        let cli = Cli::try_parse_from([
            "mixbin",
            "cluster",
            "--composition-file",
            "contigs.fa",
            "--coverage-file",
            "cov.tsv",
            "--pca-components",
            "4",
            "--coverage-columns",
            "s1,s3",
            "-c",
            "2,6",
        ])
        .unwrap();
        match cli.command {
            Commands::Cluster {
                input,
                clusters,
                pca_components,
                inits,
                ..
            } => {
                assert_eq!(input.kmer_length, 4);
                assert_eq!(input.coverage_columns, Some(CoverageRange::new("s1", "s3")));
                assert_eq!(clusters, 2..=6);
                assert_eq!(pca_components, PcaComponents::Single(4));
                assert_eq!(inits, 5);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
