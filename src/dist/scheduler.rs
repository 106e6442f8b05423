use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::dist::comm::{Communicator, ROOT};
use crate::dist::partition::{collect, stripe};
use crate::error::{BinningError, Result};
use crate::pipeline::search::{sort_results, CandidateFitter, CandidateResult, SearchTask};

/// Where candidate fits run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionMode {
    /// Local worker pool of at most `processes` workers
    Local { processes: usize },
    /// Cooperating ranks over MPI
    Mpi,
}

/// What a process does in the run.
///
/// The coordinator prepares features, hands out the search and writes the
/// report; workers only fit the candidates assigned to them. In local mode
/// the single process is the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker,
}

impl Role {
    pub fn for_rank(rank: usize) -> Self {
        if rank == ROOT {
            Role::Coordinator
        } else {
            Role::Worker
        }
    }
}

/// How the candidate list is spread out
pub enum SearchStrategy<'a> {
    LocalPool { processes: usize },
    Distributed(&'a dyn Communicator),
}

/// Per-rank report sent back to the coordinator
type WorkerReport = std::result::Result<Vec<CandidateResult>, String>;

/// Coordinator broadcast: the task, or why there is none
type TaskMessage = std::result::Result<SearchTask, String>;

fn protocol<E: std::fmt::Display>(what: &str) -> impl FnOnce(E) -> BinningError + '_ {
    move |e| BinningError::DistributedProtocol(format!("{}: {}", what, e))
}

/// Fit every candidate on a local pool, results ordered by candidate count
pub fn evaluate_local<F: CandidateFitter>(
    task: &SearchTask,
    fitter: &F,
    processes: usize,
) -> Result<Vec<CandidateResult>> {
    let workers = processes.max(1).min(task.candidates.len().max(1));
    info!(
        "Evaluating {} candidates on {} local workers",
        task.candidates.len(),
        workers
    );
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| BinningError::Config(format!("cannot start worker pool: {}", e)))?;

    let results: Vec<CandidateResult> = pool.install(|| {
        task.candidates
            .par_iter()
            .map(|spec| fitter.fit_candidate(spec, &task.features))
            .collect::<Result<_>>()
    })?;
    Ok(sort_results(results))
}

/// Broadcast the task from the coordinator, fit this rank's stripe and
/// gather every stripe back. The coordinator gets the results ordered by
/// candidate count; workers get `None`.
pub fn evaluate_distributed<F: CandidateFitter>(
    comm: &dyn Communicator,
    role: Role,
    task: Option<SearchTask>,
    fitter: &F,
) -> Result<Option<Vec<CandidateResult>>> {
    let (rank, size) = (comm.rank(), comm.size());
    if size == 0 || rank >= size {
        return Err(BinningError::DistributedProtocol(format!(
            "rank {} is outside a world of {} ranks",
            rank, size
        )));
    }
    if role != Role::for_rank(rank) {
        return Err(BinningError::DistributedProtocol(format!(
            "rank {} cannot act as {:?}",
            rank, role
        )));
    }

    let payload = match (role, task.as_ref()) {
        (Role::Coordinator, Some(t)) => {
            let message: std::result::Result<&SearchTask, &str> = Ok(t);
            Some(serde_json::to_vec(&message).map_err(protocol("encoding search task"))?)
        }
        (Role::Coordinator, None) => {
            let reason = "coordinator has no search task";
            broadcast_failure(comm, reason)?;
            return Err(BinningError::DistributedProtocol(reason.into()));
        }
        (Role::Worker, _) => None,
    };
    let bytes = comm.broadcast(payload)?;
    let task: SearchTask = match task {
        Some(t) => t,
        None => {
            let message: TaskMessage = serde_json::from_slice(&bytes).map_err(protocol("decoding search task"))?;
            message.map_err(|reason| {
                BinningError::DistributedProtocol(format!("coordinator failed before the search: {}", reason))
            })?
        }
    };

    let mine = stripe(&task.candidates, rank, size);
    debug!(
        "Rank {} fitting {:?}",
        rank,
        mine.iter().map(|c| c.n_components).collect::<Vec<_>>()
    );
    let report: WorkerReport = mine
        .iter()
        .map(|spec| fitter.fit_candidate(spec, &task.features))
        .collect::<Result<Vec<_>>>()
        .map_err(|e| e.to_string());
    let encoded = serde_json::to_vec(&report).map_err(protocol("encoding results"))?;

    let gathered = match comm.gather(encoded)? {
        Some(g) => g,
        None => return Ok(None),
    };
    if gathered.len() != size {
        return Err(BinningError::DistributedProtocol(format!(
            "gathered {} reports from {} ranks",
            gathered.len(),
            size
        )));
    }

    let mut per_rank = Vec::with_capacity(size);
    for (r, bytes) in gathered.iter().enumerate() {
        let report: WorkerReport = serde_json::from_slice(bytes).map_err(protocol("decoding results"))?;
        match report {
            Ok(results) => per_rank.push(results),
            Err(msg) => {
                return Err(BinningError::DistributedProtocol(format!("rank {} failed: {}", r, msg)))
            }
        }
    }

    let results = collect(per_rank);
    if results.len() != task.candidates.len() {
        return Err(BinningError::DistributedProtocol(format!(
            "expected {} candidate results, got {}",
            task.candidates.len(),
            results.len()
        )));
    }
    Ok(Some(sort_results(results)))
}

fn broadcast_failure(comm: &dyn Communicator, reason: &str) -> Result<()> {
    let message: std::result::Result<&SearchTask, &str> = Err(reason);
    let bytes = serde_json::to_vec(&message).map_err(protocol("encoding failure"))?;
    comm.broadcast(Some(bytes)).map(|_| ())
}

/// Release the workers of a distributed search the coordinator cannot start.
/// Every worker then fails with `reason` instead of waiting on the broadcast.
/// Nothing to do for a local pool or on a worker.
pub fn abandon_search(strategy: &SearchStrategy<'_>, role: Role, reason: &str) -> Result<()> {
    match (strategy, role) {
        (SearchStrategy::Distributed(comm), Role::Coordinator) => {
            info!("Stopping {} worker ranks: {}", comm.size().saturating_sub(1), reason);
            broadcast_failure(*comm, reason)
        }
        _ => Ok(()),
    }
}

/// Evaluate the search with the chosen strategy
pub fn run_search<F: CandidateFitter>(
    strategy: &SearchStrategy<'_>,
    role: Role,
    task: Option<SearchTask>,
    fitter: &F,
) -> Result<Option<Vec<CandidateResult>>> {
    match strategy {
        SearchStrategy::LocalPool { processes } => {
            let task = match (role, task) {
                (Role::Coordinator, Some(t)) => t,
                _ => {
                    return Err(BinningError::Config(
                        "a local search runs only on a coordinator holding the task".into(),
                    ))
                }
            };
            evaluate_local(&task, fitter, *processes).map(Some)
        }
        SearchStrategy::Distributed(comm) => evaluate_distributed(*comm, role, task, fitter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::comm::ChannelCommunicator;
    use crate::pipeline::search::{candidate_specs, select_best, CandidateSpec};
    use ndarray::Array2;
    use std::thread;

    /// BIC is a fixed function of the candidate count, minimal at 3
    struct StubFitter;

    impl CandidateFitter for StubFitter {
        fn fit_candidate(&self, spec: &CandidateSpec, _features: &Array2<f64>) -> Result<CandidateResult> {
            let c = spec.n_components as f64;
            Ok(CandidateResult {
                bic: (c - 3.0).powi(2) + 10.0,
                n_components: spec.n_components,
                converged: spec.n_components != 5,
            })
        }
    }

    struct FailingFitter;

    impl CandidateFitter for FailingFitter {
        fn fit_candidate(&self, spec: &CandidateSpec, features: &Array2<f64>) -> Result<CandidateResult> {
            if spec.n_components == 4 {
                Err(BinningError::Config("boom".into()))
            } else {
                StubFitter.fit_candidate(spec, features)
            }
        }
    }

    fn task() -> SearchTask {
        SearchTask {
            candidates: candidate_specs(1..=7, 1, 10, Some(0)),
            features: Array2::zeros((10, 2)),
        }
    }

    fn run_ranks<F: CandidateFitter + Send + Sync + 'static>(
        size: usize,
        fitter: F,
    ) -> Vec<Result<Option<Vec<CandidateResult>>>> {
        let fitter = std::sync::Arc::new(fitter);
        let handles: Vec<_> = ChannelCommunicator::group(size)
            .into_iter()
            .map(|comm| {
                let fitter = fitter.clone();
                thread::spawn(move || {
                    let role = Role::for_rank(comm.rank());
                    let t = (role == Role::Coordinator).then(task);
                    evaluate_distributed(&comm, role, t, fitter.as_ref())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_local_and_distributed_agree() {
        let local = evaluate_local(&task(), &StubFitter, 3).unwrap();
        let outcomes = run_ranks(3, StubFitter);
        let distributed = outcomes[0].as_ref().unwrap().clone().unwrap();
        assert!(outcomes[1..].iter().all(|o| matches!(o, Ok(None))));

        assert_eq!(local, distributed);
        let a = select_best(&local).unwrap();
        let b = select_best(&distributed).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.n_components, 3);
        assert_eq!(a.bic, 10.0);
    }

    #[test]
    fn test_distributed_failure_is_fatal() {
        let outcomes = run_ranks(2, FailingFitter);
        // Candidate 4 lands on rank 1
        let err = outcomes[0].as_ref().unwrap_err();
        assert!(err.to_string().contains("rank 1 failed"));
    }

    #[test]
    fn test_nan_bic_survives_the_gather() {
        struct NanFitter;

        impl CandidateFitter for NanFitter {
            fn fit_candidate(&self, spec: &CandidateSpec, features: &Array2<f64>) -> Result<CandidateResult> {
                let mut result = StubFitter.fit_candidate(spec, features)?;
                if spec.n_components == 2 {
                    result.bic = f64::NAN;
                }
                Ok(result)
            }
        }

        let outcomes = run_ranks(3, NanFitter);
        let distributed = outcomes[0].as_ref().unwrap().clone().unwrap();
        assert!(distributed[1].bic.is_nan());
        let local = evaluate_local(&task(), &NanFitter, 2).unwrap();
        assert_eq!(select_best(&local), select_best(&distributed));
        assert_eq!(select_best(&distributed).unwrap().n_components, 3);
    }

    #[test]
    fn test_abandoned_search_releases_workers() {
        let handles: Vec<_> = ChannelCommunicator::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let role = Role::for_rank(comm.rank());
                    let strategy = SearchStrategy::Distributed(&comm);
                    match role {
                        Role::Coordinator => abandon_search(&strategy, role, "join is empty").map(|_| None),
                        Role::Worker => run_search(&strategy, role, None, &StubFitter),
                    }
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(matches!(outcomes[0], Ok(None)));
        for outcome in &outcomes[1..] {
            match outcome {
                Err(BinningError::DistributedProtocol(msg)) => assert!(msg.contains("join is empty"), "{}", msg),
                other => panic!("worker should fail, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_abandon_is_a_no_op_locally() {
        let strategy = SearchStrategy::LocalPool { processes: 2 };
        assert!(abandon_search(&strategy, Role::Coordinator, "anything").is_ok());
    }

    #[test]
    fn test_role_must_match_rank() {
        let comm = ChannelCommunicator::group(1).pop().unwrap();
        let err = evaluate_distributed(&comm, Role::Worker, None, &StubFitter).unwrap_err();
        assert!(matches!(err, BinningError::DistributedProtocol(_)));
    }

    #[test]
    fn test_run_search_local() {
        let strategy = SearchStrategy::LocalPool { processes: 2 };
        let results = run_search(&strategy, Role::Coordinator, Some(task()), &StubFitter)
            .unwrap()
            .unwrap();
        assert_eq!(results.len(), 7);
        assert!(results.windows(2).all(|w| w[0].n_components < w[1].n_components));
        assert!(run_search(&strategy, Role::Worker, None, &StubFitter).is_err());
    }
}
