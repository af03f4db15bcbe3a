//! ForgeFlow command-line surface.
//!
//! Thin shell over `forgeflow-core`: parses arguments, installs tracing,
//! wires Ctrl-C into the cancellation token, and maps run outcomes to the
//! exit-code contract (0 success, 1 decomposition/contract failure, 2
//! per-atom failures, 3 merge failure, 4 canceled).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use forgeflow_core::oracle::Oracle;
use forgeflow_core::{RunConfig, Runner, ScriptedOracle};

mod replay;

#[derive(Debug, Parser)]
#[command(name = "forgeflow", version, about = "Generate a complete project from one request")]
struct Cli {
    /// The natural-language request (ignored with --resume).
    #[arg(required_unless_present = "resume")]
    request: Option<String>,

    /// Output directory for the project, checkpoints, and exports.
    #[arg(short, long, default_value = "forgeflow-out")]
    output: PathBuf,

    /// Resume the run persisted in the output directory.
    #[arg(long)]
    resume: bool,

    /// Concurrent oracle workers.
    #[arg(long, env = "FORGEFLOW_WORKERS")]
    workers: Option<usize>,

    /// Estimated-line threshold for auto-decomposition.
    #[arg(long, env = "FORGEFLOW_LINE_THRESHOLD")]
    line_threshold: Option<u32>,

    /// Resolve merge conflicts interactively instead of failing fast.
    #[arg(long, env = "FORGEFLOW_INTERACTIVE_MERGE")]
    interactive_merge: bool,

    /// Replay script with canned oracle responses (JSON), instead of a
    /// live model endpoint.
    #[arg(long, env = "FORGEFLOW_REPLAY")]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = RunConfig::new(&cli.output).apply_env();
    if let Some(workers) = cli.workers {
        config.worker_count = workers;
    }
    if let Some(threshold) = cli.line_threshold {
        config.max_line_threshold = threshold;
    }
    if cli.interactive_merge {
        config.interactive_merge = true;
    }

    let oracle: Arc<dyn Oracle> = match &cli.replay {
        Some(path) => match replay::load_replay_oracle(path) {
            Ok(oracle) => oracle,
            Err(err) => {
                eprintln!("forgeflow: cannot load replay script: {err}");
                return ExitCode::from(1);
            }
        },
        None => {
            // The model endpoint adapter is provided by the embedding host;
            // the CLI ships the deterministic replay oracle only. An empty
            // script fails loudly rather than hanging.
            eprintln!(
                "forgeflow: no oracle configured; pass --replay <script.json> \
                 (live model adapters plug in through the Oracle trait)"
            );
            Arc::new(ScriptedOracle::new())
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cancellation requested; finishing in-flight steps");
            ctrl_c_token.cancel();
        }
    });

    let runner = match Runner::new(oracle, config) {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("forgeflow: {err}");
            return ExitCode::from(err.exit_code() as u8);
        }
    };

    let result = if cli.resume {
        runner.resume(&cancel).await
    } else {
        let request = cli.request.unwrap_or_default();
        runner.run(&request, &cancel).await
    };

    match result {
        Ok(report) => {
            print_report(&report);
            ExitCode::from(report.exit_code() as u8)
        }
        Err(err) => {
            eprintln!("forgeflow: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn print_report(report: &forgeflow_core::RunReport) {
    use forgeflow_core::ExecutionStatus;

    match report.status {
        ExecutionStatus::Completed => {
            println!(
                "Completed {} tasks in {} waves; project written to {}",
                report.completed,
                report.waves,
                report.output_dir.display()
            );
            for file in &report.project_files {
                println!("  {}", file.display());
            }
        }
        ExecutionStatus::Failed => {
            eprintln!(
                "{} of {} tasks failed; checkpoint at {}",
                report.failed,
                report.completed + report.failed,
                report.checkpoint_path.display()
            );
            for atom in &report.failed_atoms {
                eprintln!("  {}:", atom.id);
                for diagnostic in &atom.diagnostics {
                    eprintln!("    {} {}", diagnostic.id, diagnostic.message);
                }
            }
        }
        ExecutionStatus::Aborted => {
            eprintln!(
                "Run canceled; {} tasks completed. Resume with --resume from {}",
                report.completed,
                report.checkpoint_path.display()
            );
        }
        ExecutionStatus::InProgress => {
            eprintln!("Run ended in an unexpected state; see {}", report.checkpoint_path.display());
        }
    }
}
