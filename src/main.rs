mod cli_main;

use std::process;
use std::time::Instant;

use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use cli_main::{features_config, Cli, Commands};
use mixbin::dist::{ExecutionMode, Role, SearchStrategy};
use mixbin::error::{BinningError, Result};
use mixbin::io::CsvReporter;
use mixbin::pipeline::search::GmmFitter;
use mixbin::pipeline::{run_cluster, run_features, ClusterConfig};

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting tracing default failed: {}", e);
    }

    let start = Instant::now();
    let outcome = match cli.command {
        Commands::Cluster {
            input,
            clusters,
            split_pca,
            pca_components,
            inits,
            iterations,
            seed,
            pipe,
            threads,
            mpi,
        } => pca_components
            .reduction(split_pca)
            .map_err(BinningError::Config)
            .and_then(|reduction| {
                let execution = if mpi {
                    ExecutionMode::Mpi
                } else {
                    ExecutionMode::Local { processes: threads }
                };
                let config = ClusterConfig {
                    composition_file: input.composition_file,
                    coverage_file: input.coverage_file,
                    kmer_length: input.kmer_length,
                    length_threshold: input.length_threshold,
                    read_length: input.read_length,
                    clusters,
                    coverage_columns: input.coverage_columns,
                    reduction,
                    inits,
                    iterations,
                    seed,
                    output_dir: input.output_dir,
                    pipe,
                    execution,
                    alphabet_policy: input.alphabet_policy,
                };
                cluster(&config, threads)
            }),
        Commands::Features { input } => {
            let config = features_config(input);
            CsvReporter::new(&config.output_dir, config.length_threshold, false)
                .and_then(|mut reporter| run_features(&config, &mut reporter))
                .map(|table| {
                    info!(
                        "Wrote {} joined contigs with {} features",
                        table.n_rows(),
                        table.n_cols()
                    );
                })
        }
    };

    match outcome {
        Ok(()) => info!("Finished in {:.2}s", start.elapsed().as_secs_f32()),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn cluster(config: &ClusterConfig, threads: usize) -> Result<()> {
    // Feature counting uses the global pool; the local search builds its own
    if let Err(e) = ThreadPoolBuilder::new().num_threads(threads.max(1)).build_global() {
        tracing::warn!("Could not size the global thread pool: {}", e);
    }

    match config.execution {
        ExecutionMode::Local { processes } => {
            let mut reporter = CsvReporter::new(&config.output_dir, config.length_threshold, config.pipe)?;
            info!("Writing results to {}", reporter.dir().display());
            let strategy = SearchStrategy::LocalPool { processes };
            run_cluster(config, Role::Coordinator, &strategy, &GmmFitter, &mut reporter)?;
            Ok(())
        }
        ExecutionMode::Mpi => cluster_mpi(config),
    }
}

#[cfg(feature = "mpi-support")]
fn cluster_mpi(config: &ClusterConfig) -> Result<()> {
    use mixbin::dist::{Communicator, MpiCommunicator};

    let universe = mpi::initialize()
        .ok_or_else(|| BinningError::DistributedProtocol("MPI was already initialised".into()))?;
    let comm = MpiCommunicator::new(universe.world());
    let role = Role::for_rank(comm.rank());
    info!("Rank {} of {} running as {:?}", comm.rank(), comm.size(), role);

    let strategy = SearchStrategy::Distributed(&comm);
    match role {
        Role::Coordinator => {
            let mut reporter = CsvReporter::new(&config.output_dir, config.length_threshold, config.pipe)?;
            info!("Writing results to {}", reporter.dir().display());
            run_cluster(config, role, &strategy, &GmmFitter, &mut reporter)?;
        }
        Role::Worker => {
            let mut reporter = mixbin::io::NullReporter;
            run_cluster(config, role, &strategy, &GmmFitter, &mut reporter)?;
        }
    }
    Ok(())
}

#[cfg(not(feature = "mpi-support"))]
fn cluster_mpi(_config: &ClusterConfig) -> Result<()> {
    Err(BinningError::Config(
        "--mpi needs a build with the mpi-support feature".into(),
    ))
}
