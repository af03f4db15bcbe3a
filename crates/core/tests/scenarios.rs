//! End-to-end scenarios driven through the public `Runner` surface with the
//! deterministic scripted oracle.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use forgeflow_core::atom::{AtomKind, AtomStatus, Layer};
use forgeflow_core::checkpoint::CheckpointStore;
use forgeflow_core::oracle::{Oracle, OracleError, ScriptedOracle};
use forgeflow_core::schemas::{
    AtomSpec, ContractsResponse, DecompositionResponse, EnumSpec, FragmentResponse, SchemaKind,
};
use forgeflow_core::{Error, ExecutionStatus, RunConfig, Runner};

fn test_config(dir: &Path) -> RunConfig {
    RunConfig {
        output_dir: dir.to_path_buf(),
        worker_count: 1,
        oracle_timeout: Duration::from_secs(5),
        oracle_backoff: Duration::from_millis(1),
        ..RunConfig::new(dir)
    }
}

fn spec(id: &str, kind: AtomKind, namespace: &str, expected: &str, deps: &[&str]) -> AtomSpec {
    AtomSpec {
        id: id.to_string(),
        kind,
        layer: Layer::Core,
        namespace: namespace.to_string(),
        description: format!("produce {expected}"),
        context: String::new(),
        dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
        expected_types: vec![expected.to_string()],
        consumed_types: Default::default(),
    }
}

fn class_fragment(namespace: &str, name: &str) -> FragmentResponse {
    FragmentResponse {
        code: format!("namespace {namespace} {{ public class {name} {{ }} }}"),
        summary: format!("declared {name}"),
    }
}

#[tokio::test]
async fn linear_chain_completes_in_three_waves() {
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_json(
        SchemaKind::Decomposition,
        &DecompositionResponse {
            atoms: vec![
                spec("a", AtomKind::Dto, "Models", "Alpha", &[]),
                spec("b", AtomKind::Implementation, "Services", "Beta", &["a"]),
                spec("c", AtomKind::Implementation, "Services", "Gamma", &["b"]),
            ],
            plan: "three steps".to_string(),
        },
    );
    oracle.push_json(SchemaKind::Contracts, &ContractsResponse::default());
    oracle.push_json(SchemaKind::Fragment, &class_fragment("Models", "Alpha"));
    oracle.push_json(SchemaKind::Fragment, &class_fragment("Services", "Beta"));
    oracle.push_json(SchemaKind::Fragment, &class_fragment("Services", "Gamma"));

    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(oracle.clone(), test_config(dir.path())).expect("runner");
    let report = runner
        .run("build a three step pipeline", &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.waves, 3, "one wave per chain link");
    assert_eq!(report.completed, 3);
    assert_eq!(report.failed, 0);
    assert!(dir.path().join("src/Models/Alpha.cs").exists());
    assert!(dir.path().join("src/Services/Beta.cs").exists());
    assert!(dir.path().join("src/Services/Gamma.cs").exists());
    assert!(dir.path().join("contracts.json").exists());
    assert!(dir.path().join("PROJECT.md").exists());

    // Final checkpoint: 3 completed, 0 pending, 0 failed, budgets honored.
    let store = CheckpointStore::new(dir.path().join("checkpoints")).expect("store");
    let snapshot = store.load_latest().expect("load").expect("latest");
    let board = snapshot.board;
    let counts = board.counts();
    assert_eq!(counts.completed, 3);
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.failed, 0);
    for atom in board.atoms.values() {
        assert!(atom.retry_count <= 3);
        assert!(atom.validation_attempt_count <= 3);
        assert!(
            atom.status != AtomStatus::Completed || !atom.generated_fragment.is_empty(),
            "no atom completes with an empty fragment"
        );
        for dep in &atom.dependencies {
            assert!(board.atoms.contains_key(dep), "dangling dependency {dep}");
        }
    }
}

#[tokio::test]
async fn contract_conflict_at_freeze_is_fatal_with_exit_one() {
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_json(
        SchemaKind::Decomposition,
        &DecompositionResponse {
            atoms: vec![
                spec("a", AtomKind::ContractEnum, "Models", "Status", &[]),
                spec("b", AtomKind::ContractEnum, "Shared", "Status", &[]),
            ],
            plan: String::new(),
        },
    );
    // Two enums named Status in different namespaces: irreconcilable.
    oracle.push_json(
        SchemaKind::Contracts,
        &ContractsResponse {
            enums: vec![
                EnumSpec {
                    name: "Status".to_string(),
                    namespace: "Models".to_string(),
                    members: vec!["Ok".to_string()],
                },
                EnumSpec {
                    name: "Status".to_string(),
                    namespace: "Shared".to_string(),
                    members: vec!["Ok".to_string()],
                },
            ],
            ..ContractsResponse::default()
        },
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(oracle, test_config(dir.path())).expect("runner");
    let err = runner
        .run("conflicting contracts", &CancellationToken::new())
        .await
        .expect_err("should fail at freeze");

    assert!(matches!(err, Error::ContractOverlap { .. }));
    assert_eq!(err.exit_code(), 1);
    // No implementation atom ever ran, so no checkpoints were written.
    assert!(!dir.path().join("checkpoints").exists());
}

#[tokio::test]
async fn cyclic_decomposition_retries_three_times_then_exits_one() {
    let oracle = Arc::new(ScriptedOracle::new());
    for _ in 0..3 {
        oracle.push_json(
            SchemaKind::Decomposition,
            &DecompositionResponse {
                atoms: vec![
                    spec("a", AtomKind::Implementation, "Services", "A", &["b"]),
                    spec("b", AtomKind::Implementation, "Services", "B", &["a"]),
                ],
                plan: String::new(),
            },
        );
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(oracle.clone(), test_config(dir.path())).expect("runner");
    let err = runner
        .run("cyclic", &CancellationToken::new())
        .await
        .expect_err("should fail");

    assert!(matches!(err, Error::CycleDetected { .. }));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(oracle.call_count(SchemaKind::Decomposition), 3);
}

#[tokio::test]
async fn sealed_inheritance_is_rewritten_to_composition() {
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_json(
        SchemaKind::Decomposition,
        &DecompositionResponse {
            atoms: vec![spec(
                "rep",
                AtomKind::Implementation,
                "Services",
                "Reporter",
                &[],
            )],
            plan: String::new(),
        },
    );
    oracle.push_json(
        SchemaKind::Contracts,
        &ContractsResponse {
            abstracts: vec![forgeflow_core::schemas::AbstractSpec {
                name: "AbstractReporter".to_string(),
                namespace: "Services".to_string(),
                abstract_methods: Vec::new(),
                is_sealed: true,
            }],
            ..ContractsResponse::default()
        },
    );
    oracle.push_json(
        SchemaKind::Fragment,
        &FragmentResponse {
            code: "namespace Services { public class Reporter : AbstractReporter { } }"
                .to_string(),
            summary: String::new(),
        },
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(oracle.clone(), test_config(dir.path())).expect("runner");
    let report = runner
        .run("reporter over the sealed base", &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.status, ExecutionStatus::Completed);
    // One oracle round-trip: the rewrite is deterministic, not model-driven.
    assert_eq!(oracle.call_count(SchemaKind::Fragment), 1);
    let reporter =
        std::fs::read_to_string(dir.path().join("src/Services/Reporter.cs")).expect("read");
    assert!(!reporter.contains(": AbstractReporter"));
    assert!(reporter.contains("private readonly AbstractReporter _abstractReporter;"));
}

#[tokio::test]
async fn ambiguous_record_references_prefer_the_models_bucket() {
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_json(
        SchemaKind::Decomposition,
        &DecompositionResponse {
            atoms: vec![
                spec("m", AtomKind::Dto, "Models", "Record", &[]),
                spec("s", AtomKind::Dto, "Services", "Record", &[]),
                spec("z", AtomKind::Implementation, "Api", "Handler", &["m", "s"]),
            ],
            plan: String::new(),
        },
    );
    oracle.push_json(SchemaKind::Contracts, &ContractsResponse::default());
    oracle.push_json(SchemaKind::Fragment, &class_fragment("Models", "Record"));
    oracle.push_json(SchemaKind::Fragment, &class_fragment("Services", "Record"));
    oracle.push_json(
        SchemaKind::Fragment,
        &FragmentResponse {
            code: "namespace Api { public class Handler { public Record Current() { return new Record(); } } }"
                .to_string(),
            summary: String::new(),
        },
    );

    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(oracle, test_config(dir.path())).expect("runner");
    let report = runner
        .run("two records and a handler", &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.status, ExecutionStatus::Completed);
    let handler = std::fs::read_to_string(dir.path().join("src/Api/Handler.cs")).expect("read");
    assert!(handler.contains("public Models.Record Current()"));
    assert!(handler.contains("new Models.Record()"));
    // Both declarations survive in their own namespaces.
    assert!(dir.path().join("src/Models/Record.cs").exists());
    assert!(dir.path().join("src/Services/Record.cs").exists());
}

/// Oracle wrapper that cancels the run after a fixed number of successful
/// fragment calls, simulating a user interrupt mid-run.
struct CancelAfterFragments {
    inner: Arc<ScriptedOracle>,
    token: CancellationToken,
    remaining: AtomicUsize,
}

#[async_trait]
impl Oracle for CancelAfterFragments {
    async fn generate(
        &self,
        prompt: &str,
        schema: SchemaKind,
    ) -> std::result::Result<String, OracleError> {
        if schema == SchemaKind::Fragment {
            let before = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    Some(n.saturating_sub(1))
                })
                .unwrap_or(0);
            if before == 0 {
                self.token.cancel();
                return Err(OracleError::Transport("interrupted".to_string()));
            }
        }
        self.inner.generate(prompt, schema).await
    }
}

fn full_script(oracle: &ScriptedOracle, fragments: &[(&str, &str)]) {
    oracle.push_json(
        SchemaKind::Decomposition,
        &DecompositionResponse {
            atoms: vec![
                spec("n1", AtomKind::Dto, "Models", "C1", &[]),
                spec("n2", AtomKind::Dto, "Models", "C2", &[]),
                spec("n3", AtomKind::Dto, "Models", "C3", &[]),
                spec("n4", AtomKind::Dto, "Models", "C4", &[]),
            ],
            plan: String::new(),
        },
    );
    oracle.push_json(SchemaKind::Contracts, &ContractsResponse::default());
    for (namespace, name) in fragments {
        oracle.push_json(SchemaKind::Fragment, &class_fragment(namespace, name));
    }
}

#[tokio::test]
async fn canceled_run_resumes_to_the_same_project() {
    // Reference: the same script, uninterrupted.
    let reference_oracle = Arc::new(ScriptedOracle::new());
    full_script(
        &reference_oracle,
        &[("Models", "C1"), ("Models", "C2"), ("Models", "C3"), ("Models", "C4")],
    );
    let reference_dir = tempfile::tempdir().expect("tempdir");
    let reference_runner =
        Runner::new(reference_oracle, test_config(reference_dir.path())).expect("runner");
    let reference_report = reference_runner
        .run("four models", &CancellationToken::new())
        .await
        .expect("reference run");
    assert_eq!(reference_report.status, ExecutionStatus::Completed);

    // Interrupted: cancellation fires after two fragments complete.
    let scripted = Arc::new(ScriptedOracle::new());
    full_script(&scripted, &[("Models", "C1"), ("Models", "C2")]);
    let cancel = CancellationToken::new();
    let interrupting = Arc::new(CancelAfterFragments {
        inner: scripted,
        token: cancel.clone(),
        remaining: AtomicUsize::new(2),
    });
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(interrupting, test_config(dir.path())).expect("runner");
    let report = runner.run("four models", &cancel).await.expect("aborted run");

    assert_eq!(report.status, ExecutionStatus::Aborted);
    assert_eq!(report.exit_code(), 4);
    assert_eq!(report.completed, 2, "completed count equals the pre-signal count");

    let store = CheckpointStore::new(dir.path().join("checkpoints")).expect("store");
    let snapshot = store.load_latest().expect("load").expect("latest");
    assert_eq!(snapshot.board.execution_status, ExecutionStatus::Aborted);
    assert_eq!(snapshot.board.counts().completed, 2);
    assert_eq!(snapshot.board.counts().pending, 2, "in-flight atoms reset to pending");

    // Resume with replies for the remaining two atoms only.
    let resume_oracle = Arc::new(ScriptedOracle::new());
    resume_oracle.push_json(SchemaKind::Fragment, &class_fragment("Models", "C3"));
    resume_oracle.push_json(SchemaKind::Fragment, &class_fragment("Models", "C4"));
    let resume_runner = Runner::new(resume_oracle.clone(), test_config(dir.path())).expect("runner");
    let resumed = resume_runner
        .resume(&CancellationToken::new())
        .await
        .expect("resume");

    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.completed, 4);
    // Completed atoms were not re-run: only the two remaining fragments.
    assert_eq!(resume_oracle.call_count(SchemaKind::Fragment), 2);

    // The resumed project is byte-identical to the uninterrupted one.
    for name in ["C1", "C2", "C3", "C4"] {
        let reference =
            std::fs::read_to_string(reference_dir.path().join(format!("src/Models/{name}.cs")))
                .expect("reference file");
        let resumed_file =
            std::fs::read_to_string(dir.path().join(format!("src/Models/{name}.cs")))
                .expect("resumed file");
        assert_eq!(reference, resumed_file, "{name}.cs differs");
    }
}

#[tokio::test]
async fn failed_atom_cascades_and_exits_two() {
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_json(
        SchemaKind::Decomposition,
        &DecompositionResponse {
            atoms: vec![
                spec("base", AtomKind::Dto, "Models", "Base", &[]),
                spec("mid", AtomKind::Implementation, "Services", "Mid", &["base"]),
                spec("top", AtomKind::Implementation, "Services", "Top", &["mid"]),
            ],
            plan: String::new(),
        },
    );
    oracle.push_json(SchemaKind::Contracts, &ContractsResponse::default());
    oracle.push_json(SchemaKind::Fragment, &class_fragment("Models", "Base"));
    // "mid" always returns an unparseable fragment and exhausts its budget.
    for _ in 0..3 {
        oracle.push_json(
            SchemaKind::Fragment,
            &FragmentResponse {
                code: "namespace Services { public class Mid {".to_string(),
                summary: String::new(),
            },
        );
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(oracle.clone(), test_config(dir.path())).expect("runner");
    let report = runner
        .run("a chain that breaks in the middle", &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 2);
    // "top" failed by cascade without a single oracle call: 1 + 3 fragments.
    assert_eq!(oracle.call_count(SchemaKind::Fragment), 4);
    let failed_ids: Vec<&str> = report.failed_atoms.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(failed_ids, vec!["mid", "top"]);
    // The failure report carries the diagnostics of the broken atom.
    assert!(report
        .failed_atoms
        .iter()
        .any(|f| !f.diagnostics.is_empty()));
    // The completed part of the project still merges and emits.
    assert!(dir.path().join("src/Models/Base.cs").exists());
}

#[tokio::test]
async fn empty_contract_catalog_permits_any_fragment() {
    let oracle = Arc::new(ScriptedOracle::new());
    oracle.push_json(
        SchemaKind::Decomposition,
        &DecompositionResponse {
            atoms: vec![spec("solo", AtomKind::Dto, "Models", "Anything", &[])],
            plan: String::new(),
        },
    );
    oracle.push_json(SchemaKind::Contracts, &ContractsResponse::default());
    oracle.push_json(SchemaKind::Fragment, &class_fragment("Models", "Anything"));

    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(oracle, test_config(dir.path())).expect("runner");
    let report = runner
        .run("anything at all", &CancellationToken::new())
        .await
        .expect("run");
    assert_eq!(report.status, ExecutionStatus::Completed);
}
