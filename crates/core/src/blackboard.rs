//! Single-writer shared state for a run.
//!
//! The scheduler owns the blackboard mutably; every other component reads
//! through shared borrows. All mutation goes through the methods here so
//! the atom state machine and the terminal-immutability invariant are
//! enforced in one place.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::atom::{Atom, AtomStatus, FailureCause};
use crate::contract::FrozenCatalog;
use crate::error::{Error, Result};
use crate::pipeline::AtomOutcome;
use crate::schemas::{ArchitectureSummaryResponse, PackageRef};

/// Overall run status, persisted in every checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    InProgress,
    Completed,
    Failed,
    Aborted,
}

/// Counts per status bucket, used in checkpoint summaries and reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

/// The shared project state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Blackboard {
    /// Stable run identifier.
    pub run_id: String,
    /// The sanitized user request.
    pub request: String,
    /// One-line restatement of the plan.
    pub description: String,
    pub atoms: BTreeMap<String, Atom>,
    pub catalog: FrozenCatalog,
    /// Post-merge summary, empty until the run finishes.
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub architecture: Option<ArchitectureSummaryResponse>,
    /// Recorded package references for the generated project.
    #[serde(default)]
    pub packages: Vec<PackageRef>,
    pub execution_status: ExecutionStatus,
}

impl Blackboard {
    pub fn new(
        request: impl Into<String>,
        description: impl Into<String>,
        atoms: Vec<Atom>,
        catalog: FrozenCatalog,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            request: request.into(),
            description: description.into(),
            atoms: atoms.into_iter().map(|a| (a.id.clone(), a)).collect(),
            catalog,
            summary: String::new(),
            architecture: None,
            packages: Vec::new(),
            execution_status: ExecutionStatus::InProgress,
        }
    }

    pub fn atom(&self, id: &str) -> Option<&Atom> {
        self.atoms.get(id)
    }

    /// Status of every atom, for readiness queries.
    pub fn statuses(&self) -> BTreeMap<String, AtomStatus> {
        self.atoms
            .iter()
            .map(|(id, atom)| (id.clone(), atom.status.clone()))
            .collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for atom in self.atoms.values() {
            match atom.status {
                AtomStatus::Completed => counts.completed += 1,
                AtomStatus::Failed => counts.failed += 1,
                AtomStatus::InProgress | AtomStatus::Review => counts.in_progress += 1,
                AtomStatus::Pending | AtomStatus::Ready => counts.pending += 1,
            }
        }
        counts
    }

    /// Whether every atom is terminal.
    pub fn quiescent(&self) -> bool {
        self.atoms.values().all(Atom::is_terminal)
    }

    /// Completed dependencies of an atom, in id order.
    pub fn completed_dependencies(&self, id: &str) -> Vec<&Atom> {
        let Some(atom) = self.atoms.get(id) else {
            return Vec::new();
        };
        atom.dependencies
            .iter()
            .filter_map(|dep| self.atoms.get(dep))
            .filter(|dep| dep.status == AtomStatus::Completed)
            .collect()
    }

    /// Move an atom into `InProgress` for dispatch.
    pub fn mark_dispatched(&mut self, id: &str) -> Result<()> {
        let atom = self.atom_mut(id)?;
        if atom.status == AtomStatus::Pending {
            atom.status = AtomStatus::Ready;
        }
        if !atom.status.can_transition_to(&AtomStatus::InProgress) {
            return Err(Error::Config(format!(
                "atom '{id}' cannot be dispatched from {:?}",
                atom.status
            )));
        }
        atom.status = AtomStatus::InProgress;
        Ok(())
    }

    /// Merge a terminal pipeline outcome. Fragment updates are atomic: the
    /// previous fragment stays in place unless the outcome was accepted.
    /// A second outcome for a terminal atom is ignored with a warning.
    pub fn apply_outcome(&mut self, outcome: AtomOutcome) -> Result<()> {
        let atom = self.atom_mut(&outcome.atom_id)?;
        if atom.is_terminal() {
            tracing::warn!(atom = %outcome.atom_id, "ignoring outcome for terminal atom");
            return Ok(());
        }

        atom.retry_count = outcome.retry_count;
        atom.validation_attempt_count = outcome.validation_attempt_count;
        atom.diagnostics = outcome.diagnostics;

        match outcome.status {
            AtomStatus::Completed => {
                atom.status = AtomStatus::Review;
                atom.generated_fragment = outcome.fragment;
                atom.type_contract_extract = outcome.type_contract_extract;
                atom.summary = outcome.summary;
                atom.status = AtomStatus::Completed;
            }
            AtomStatus::Failed => {
                atom.status = AtomStatus::Failed;
                atom.failure_cause = outcome.failure_cause;
            }
            other => {
                return Err(Error::Config(format!(
                    "pipeline produced non-terminal status {other:?} for '{}'",
                    outcome.atom_id
                )));
            }
        }
        Ok(())
    }

    /// Fail an atom without running it (dependency cascade, cancellation).
    pub fn mark_failed(&mut self, id: &str, cause: FailureCause) -> Result<()> {
        let atom = self.atom_mut(id)?;
        if atom.is_terminal() {
            return Ok(());
        }
        atom.status = AtomStatus::Failed;
        atom.failure_cause = Some(cause);
        Ok(())
    }

    /// Completed atoms in id order, for the merge pipeline.
    pub fn completed_atoms(&self) -> Vec<&Atom> {
        self.atoms
            .values()
            .filter(|a| a.status == AtomStatus::Completed)
            .collect()
    }

    /// Failed atoms in id order, for the failure report.
    pub fn failed_atoms(&self) -> Vec<&Atom> {
        self.atoms
            .values()
            .filter(|a| a.status == AtomStatus::Failed)
            .collect()
    }

    fn atom_mut(&mut self, id: &str) -> Result<&mut Atom> {
        self.atoms
            .get_mut(id)
            .ok_or_else(|| Error::Config(format!("unknown atom '{id}'")))
    }
}
