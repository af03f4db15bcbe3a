//! The run entry point.
//!
//! Orchestrates one run end to end: sanitize the request, decompose it into
//! a DAG, freeze the contract catalog, schedule every atom through the
//! per-atom loop, merge the fragments, emit the project tree, and write the
//! documentation exports. Also hosts the resume path, which reloads the
//! latest checkpoint and re-dispatches only non-terminal atoms.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::blackboard::{Blackboard, ExecutionStatus};
use crate::checkpoint::CheckpointStore;
use crate::config::{RunConfig, MAX_REQUEST_CHARS};
use crate::contract::ContractCatalog;
use crate::decompose::{decompose, expand_oversized};
use crate::diagnostics::Diagnostic;
use crate::error::{Error, Result};
use crate::export::write_exports;
use crate::graph::TaskGraph;
use crate::merge::{merge_project, MergeOutput};
use crate::oracle::{Oracle, OracleClient};
use crate::pipeline::AtomPipeline;
use crate::project::emit_project_tree;
use crate::scheduler::Scheduler;
use crate::schemas::{
    ArchitectureSummaryResponse, PackageVersionsResponse, SchemaKind, SummaryResponse,
};

/// Per-atom detail for the failure report.
#[derive(Clone, Debug)]
pub struct FailedAtom {
    pub id: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// The structured result handed to the surface shell.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub status: ExecutionStatus,
    pub completed: usize,
    pub failed: usize,
    pub waves: usize,
    pub output_dir: PathBuf,
    /// Path of the latest checkpoint, for resumption messaging.
    pub checkpoint_path: PathBuf,
    pub failed_atoms: Vec<FailedAtom>,
    pub project_files: Vec<PathBuf>,
}

impl RunReport {
    /// Exit-code contract: 0 success, 2 per-atom failures, 4 canceled.
    /// (1 and 3 arise as errors before a report exists.)
    pub fn exit_code(&self) -> i32 {
        match self.status {
            ExecutionStatus::Completed => 0,
            ExecutionStatus::Failed => 2,
            ExecutionStatus::Aborted => 4,
            ExecutionStatus::InProgress => 2,
        }
    }
}

/// Strip control characters and cap the request length.
pub fn sanitize_request(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(MAX_REQUEST_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Owns the collaborators for one or more runs against an output directory.
pub struct Runner {
    oracle: OracleClient,
    config: RunConfig,
}

impl Runner {
    pub fn new(oracle: Arc<dyn Oracle>, config: RunConfig) -> Result<Self> {
        config.validate()?;
        let client = OracleClient::new(
            oracle,
            config.oracle_timeout,
            config.oracle_attempts,
            config.oracle_backoff,
        );
        Ok(Self {
            oracle: client,
            config,
        })
    }

    /// Run a fresh request end to end.
    pub async fn run(&self, request: &str, cancel: &CancellationToken) -> Result<RunReport> {
        let request = sanitize_request(request);
        if request.is_empty() {
            return Err(Error::Config("request is empty after sanitation".to_string()));
        }
        tracing::info!(chars = request.len(), "starting run");

        // Decompose, then split anything too large for one pass.
        let atoms = decompose(&self.oracle, &request, cancel).await?;
        let atoms = expand_oversized(&self.oracle, atoms, &self.config, cancel).await?;
        let graph = TaskGraph::build(&atoms)?;

        // Freeze the shared contracts before any implementation runs.
        let catalog = ContractCatalog::build_from_decomposition(
            &self.oracle,
            &atoms,
            &request,
            cancel,
        )
        .await?
        .freeze();
        std::fs::create_dir_all(&self.config.output_dir)?;
        catalog.save(&self.config.contracts_path())?;

        let architecture = self.architecture_summary(&request, cancel).await;
        let description = architecture
            .as_ref()
            .map(|a| a.overview.clone())
            .unwrap_or_default();

        let mut board = Blackboard::new(request.as_str(), description, atoms, catalog);
        board.architecture = architecture;

        self.drive(&mut board, &graph, cancel).await
    }

    /// Resume from the latest checkpoint in the output directory.
    /// Completed atoms are not re-run.
    pub async fn resume(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let store = CheckpointStore::new(self.config.checkpoint_dir())?;
        let snapshot = store.load_latest()?.ok_or_else(|| Error::Checkpoint {
            path: self.config.checkpoint_dir().display().to_string(),
            detail: "no checkpoint to resume from".to_string(),
        })?;
        let mut board = snapshot.board;
        let counts = board.counts();
        tracing::info!(
            run = %board.run_id,
            completed = counts.completed,
            pending = counts.pending,
            "resuming from checkpoint"
        );
        board.execution_status = ExecutionStatus::InProgress;

        let atoms: Vec<_> = board.atoms.values().cloned().collect();
        let graph = TaskGraph::build(&atoms)?;
        self.drive(&mut board, &graph, cancel).await
    }

    /// Shared tail of run and resume: schedule, merge, emit, export.
    async fn drive(
        &self,
        board: &mut Blackboard,
        graph: &TaskGraph,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let checkpoints = CheckpointStore::new(self.config.checkpoint_dir())?;
        let scheduler = Scheduler::new(
            AtomPipeline::new(self.oracle.clone()),
            self.config.clone(),
            checkpoints.clone(),
        );

        let summary = match scheduler.run(board, graph, cancel).await {
            Ok(summary) => summary,
            Err(Error::Canceled) => {
                // The scheduler already persisted the aborted state.
                return Ok(self.report(board, None, 0, Vec::new()));
            }
            Err(err) => return Err(err),
        };

        let mut merge_output: Option<MergeOutput> = None;
        let mut project_files = Vec::new();
        if summary.completed > 0 {
            let merged = merge_project(board, &self.config)?;
            project_files = emit_project_tree(&merged.source, &self.config.project_dir())?;
            merge_output = Some(merged);

            board.packages = self.package_versions(board, cancel).await;
            board.summary = self.run_summary(board, cancel).await;
        }

        board.execution_status = if summary.failed > 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        checkpoints.save(board)?;
        write_exports(board, merge_output.as_ref(), &self.config.output_dir)?;

        Ok(self.report(board, merge_output.as_ref(), summary.waves, project_files))
    }

    fn report(
        &self,
        board: &Blackboard,
        _merge: Option<&MergeOutput>,
        waves: usize,
        project_files: Vec<PathBuf>,
    ) -> RunReport {
        let counts = board.counts();
        RunReport {
            status: board.execution_status,
            completed: counts.completed,
            failed: counts.failed,
            waves,
            output_dir: self.config.output_dir.clone(),
            checkpoint_path: self.config.checkpoint_dir().join("latest.json"),
            failed_atoms: board
                .failed_atoms()
                .into_iter()
                .map(|atom| FailedAtom {
                    id: atom.id.clone(),
                    diagnostics: atom.diagnostics.clone(),
                })
                .collect(),
            project_files,
        }
    }

    /// Best-effort architecture summary; the run never fails on it.
    async fn architecture_summary(
        &self,
        request: &str,
        cancel: &CancellationToken,
    ) -> Option<ArchitectureSummaryResponse> {
        let prompt = format!(
            "Summarize the architecture of the project implementing this request:\n{request}\n"
        );
        match self
            .oracle
            .generate::<ArchitectureSummaryResponse>(&prompt, SchemaKind::ArchitectureSummary, cancel)
            .await
        {
            Ok(summary) => Some(summary),
            Err(err) => {
                tracing::warn!(error = %err, "architecture summary unavailable");
                None
            }
        }
    }

    /// Best-effort package recording; names and versions only.
    async fn package_versions(
        &self,
        board: &Blackboard,
        cancel: &CancellationToken,
    ) -> Vec<crate::schemas::PackageRef> {
        let prompt = format!(
            "List the NuGet packages (name and version) the generated project needs.\nRequest: {}\n",
            board.request
        );
        match self
            .oracle
            .generate::<PackageVersionsResponse>(&prompt, SchemaKind::PackageVersions, cancel)
            .await
        {
            Ok(response) => response.packages,
            Err(err) => {
                tracing::warn!(error = %err, "package versions unavailable");
                Vec::new()
            }
        }
    }

    /// Best-effort run summary with a deterministic fallback.
    async fn run_summary(&self, board: &Blackboard, cancel: &CancellationToken) -> String {
        let counts = board.counts();
        let fallback = format!(
            "Generated {} of {} tasks for: {}",
            counts.completed,
            board.atoms.len(),
            board.request
        );
        let prompt = format!(
            "Summarize the generated project in two sentences.\nRequest: {}\nTasks completed: {}\n",
            board.request, counts.completed
        );
        match self
            .oracle
            .generate::<SummaryResponse>(&prompt, SchemaKind::Summary, cancel)
            .await
        {
            Ok(response) if !response.summary.is_empty() => response.summary,
            Ok(_) => fallback,
            Err(err) => {
                tracing::warn!(error = %err, "summary oracle unavailable, using fallback");
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitation_strips_control_chars_and_caps_length() {
        let raw = "build\u{0007} me a\tthing\n  ";
        assert_eq!(sanitize_request(raw), "build me a\tthing");

        let long = "x".repeat(MAX_REQUEST_CHARS + 50);
        assert_eq!(sanitize_request(&long).len(), MAX_REQUEST_CHARS);
    }

    #[test]
    fn tabs_survive_sanitation() {
        // Tab is a control character in Unicode terms; the cap is on the
        // genuinely unprintable ones.
        assert_eq!(sanitize_request("a\tb"), "a\tb");
    }

    #[test]
    fn report_exit_codes() {
        let report = |status| RunReport {
            status,
            completed: 0,
            failed: 0,
            waves: 0,
            output_dir: PathBuf::new(),
            checkpoint_path: PathBuf::new(),
            failed_atoms: Vec::new(),
            project_files: Vec::new(),
        };
        assert_eq!(report(ExecutionStatus::Completed).exit_code(), 0);
        assert_eq!(report(ExecutionStatus::Failed).exit_code(), 2);
        assert_eq!(report(ExecutionStatus::Aborted).exit_code(), 4);
    }
}
