//! Topological wave scheduler.
//!
//! A single-threaded cooperative driver owns the blackboard; oracle workers
//! run concurrently in a `JoinSet`, bounded by the configured worker count.
//! Waves are evaluated at quiescence: an atom's effects become visible to
//! others only between waves, never within one. Completion events are
//! merged into the blackboard in `(wave_index, dispatch_index)` order, and
//! a checkpoint is written after every terminal transition.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::atom::{Atom, AtomStatus, FailureCause};
use crate::blackboard::{Blackboard, ExecutionStatus};
use crate::checkpoint::CheckpointStore;
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::graph::TaskGraph;
use crate::pipeline::{AtomOutcome, AtomPipeline};

/// What a finished schedule looked like.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub waves: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Drives the whole DAG to quiescence.
pub struct Scheduler {
    pipeline: AtomPipeline,
    config: RunConfig,
    checkpoints: CheckpointStore,
}

impl Scheduler {
    pub fn new(pipeline: AtomPipeline, config: RunConfig, checkpoints: CheckpointStore) -> Self {
        Self {
            pipeline,
            config,
            checkpoints,
        }
    }

    /// Run every non-terminal atom to a terminal state.
    ///
    /// Returns `Err(Canceled)` when the token fires; in that case in-flight
    /// atoms get a bounded grace period, non-terminal atoms are reset to
    /// `Pending`, and a final `Aborted` checkpoint is written.
    pub async fn run(
        &self,
        board: &mut Blackboard,
        graph: &TaskGraph,
        cancel: &CancellationToken,
    ) -> Result<ScheduleSummary> {
        let mut summary = ScheduleSummary::default();

        loop {
            if cancel.is_cancelled() {
                return self.abort(board, &mut summary);
            }

            self.cascade_dependency_failures(board, graph)?;

            let mut ready = graph.ready(&board.statuses());
            if ready.is_empty() {
                break;
            }
            sort_by_dispatch_key(board, &mut ready);
            ready.truncate(self.config.worker_count);
            summary.waves += 1;
            let wave_index = summary.waves;
            tracing::info!(wave = wave_index, atoms = ?ready, "dispatching wave");

            let mut workers: JoinSet<(usize, Result<AtomOutcome>)> = JoinSet::new();
            for (dispatch_index, id) in ready.iter().enumerate() {
                board.mark_dispatched(id)?;
                let atom = board
                    .atom(id)
                    .cloned()
                    .unwrap_or_else(|| unreachable!("dispatched atom exists"));
                let dependencies: Vec<Atom> = board
                    .completed_dependencies(id)
                    .into_iter()
                    .cloned()
                    .collect();
                let catalog = board.catalog.clone();
                let pipeline = self.pipeline.clone();
                let token = cancel.clone();
                workers.spawn(async move {
                    let deps: Vec<&Atom> = dependencies.iter().collect();
                    let outcome = pipeline.process(&atom, &catalog, &deps, &token).await;
                    (dispatch_index, outcome)
                });
            }

            // Completion events are taken as they arrive but merged in
            // dispatch order so the blackboard sees a total order. Once
            // cancellation fires, in-flight workers get the configured
            // grace period to finish their current step.
            let mut outcomes: Vec<(usize, Result<AtomOutcome>)> = Vec::new();
            loop {
                let joined = if cancel.is_cancelled() {
                    match tokio::time::timeout(self.config.cancel_grace, workers.join_next()).await
                    {
                        Ok(joined) => joined,
                        Err(_) => {
                            tracing::warn!("cancellation grace period elapsed; dropping in-flight workers");
                            workers.abort_all();
                            None
                        }
                    }
                } else {
                    workers.join_next().await
                };
                let Some(joined) = joined else { break };
                match joined {
                    Ok(result) => outcomes.push(result),
                    Err(err) => {
                        tracing::error!(error = %err, "worker panicked");
                    }
                }
            }
            outcomes.sort_by_key(|(dispatch_index, _)| *dispatch_index);

            let mut canceled = false;
            for (dispatch_index, outcome) in outcomes {
                match outcome {
                    Ok(outcome) => {
                        tracing::debug!(
                            wave = wave_index,
                            dispatch = dispatch_index,
                            atom = %outcome.atom_id,
                            status = ?outcome.status,
                            "merging completion event"
                        );
                        board.apply_outcome(outcome)?;
                        self.checkpoints.save(board)?;
                    }
                    Err(Error::Canceled) => canceled = true,
                    Err(err) => return Err(err),
                }
            }
            if canceled {
                return self.abort(board, &mut summary);
            }
        }

        let counts = board.counts();
        summary.completed = counts.completed;
        summary.failed = counts.failed;
        if counts.failed > 0 {
            board.execution_status = ExecutionStatus::Failed;
        }
        self.checkpoints.save(board)?;
        tracing::info!(
            waves = summary.waves,
            completed = summary.completed,
            failed = summary.failed,
            "scheduler quiescent"
        );
        Ok(summary)
    }

    /// Fail every pending atom that transitively depends on a failed one,
    /// without invoking the oracle.
    fn cascade_dependency_failures(&self, board: &mut Blackboard, graph: &TaskGraph) -> Result<()> {
        let failed: Vec<String> = board
            .failed_atoms()
            .into_iter()
            .map(|a| a.id.clone())
            .collect();
        for failed_id in failed {
            for dependent in graph.dependents_transitive(&failed_id) {
                let needs_cascade = board
                    .atom(&dependent)
                    .is_some_and(|a| !a.is_terminal());
                if needs_cascade {
                    tracing::warn!(
                        atom = %dependent,
                        failed_dependency = %failed_id,
                        "cascading dependency failure"
                    );
                    board.mark_failed(
                        &dependent,
                        FailureCause::DependencyFailed {
                            dependency: failed_id.clone(),
                        },
                    )?;
                    self.checkpoints.save(board)?;
                }
            }
        }
        Ok(())
    }

    fn abort(&self, board: &mut Blackboard, summary: &mut ScheduleSummary) -> Result<ScheduleSummary> {
        reset_in_flight(board);
        board.execution_status = ExecutionStatus::Aborted;
        let counts = board.counts();
        summary.completed = counts.completed;
        summary.failed = counts.failed;
        self.checkpoints.save(board)?;
        tracing::warn!(completed = counts.completed, "run aborted by cancellation");
        Err(Error::Canceled)
    }
}

fn sort_by_dispatch_key(board: &Blackboard, ready: &mut [String]) {
    ready.sort_by(|a, b| {
        let rank_a = board.atom(a).map_or(u8::MAX, |atom| atom.layer.rank());
        let rank_b = board.atom(b).map_or(u8::MAX, |atom| atom.layer.rank());
        rank_a.cmp(&rank_b).then_with(|| a.cmp(b))
    });
}

/// Canceled in-flight atoms never reached a terminal state; they go back to
/// `Pending` so a resumed run re-dispatches them.
fn reset_in_flight(board: &mut Blackboard) {
    for atom in board.atoms.values_mut() {
        if matches!(
            atom.status,
            AtomStatus::Ready | AtomStatus::InProgress | AtomStatus::Review
        ) {
            atom.status = AtomStatus::Pending;
        }
    }
}
