//! Request decomposition and complexity-driven auto-decomposition.
//!
//! The oracle proposes a task DAG; the proposal is rejected and retried if
//! it references unknown ids or contains a cycle. Oversized atoms are then
//! split into sub-atoms using one of four strategies, chosen
//! deterministically from the metrics.

use tokio_util::sync::CancellationToken;

use crate::atom::{Atom, AtomKind};
use crate::complexity::{analyze, ComplexityMetrics};
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::graph::TaskGraph;
use crate::oracle::OracleClient;
use crate::schemas::{DecompositionResponse, SchemaKind, SubtasksResponse};

/// Attempts granted to the oracle for a structurally valid decomposition.
const DECOMPOSITION_ATTEMPTS: u32 = 3;

/// How an oversized atom is split. Preference order when several apply:
/// Functional > PartialClass > InterfaceBased > LayerBased.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecompositionStrategy {
    /// Split by functional area; each sub-atom owns a slice of methods.
    Functional,
    /// One large class split into partial-class parts, chained linearly.
    PartialClass,
    /// Interface declarations split from their implementations.
    InterfaceBased,
    /// Fallback: split along architectural layers.
    LayerBased,
}

impl DecompositionStrategy {
    /// Deterministic selection from the metrics.
    pub fn choose(atom: &Atom, metrics: &ComplexityMetrics) -> Self {
        if metrics.method_count_estimate >= 6 && metrics.type_count <= 2 {
            return DecompositionStrategy::Functional;
        }
        if metrics.type_count <= 1 {
            return DecompositionStrategy::PartialClass;
        }
        let has_interface = atom
            .expected_types
            .iter()
            .any(|t| t.len() > 1 && t.starts_with('I') && t[1..2].chars().all(char::is_uppercase));
        let has_implementation = atom
            .expected_types
            .iter()
            .any(|t| !(t.len() > 1 && t.starts_with('I') && t[1..2].chars().all(char::is_uppercase)));
        if has_interface && has_implementation {
            return DecompositionStrategy::InterfaceBased;
        }
        DecompositionStrategy::LayerBased
    }
}

/// Decompose the user request into a validated task DAG.
///
/// Structurally invalid proposals (unknown dependency ids, cycles) are
/// rejected and retried up to three times; the last structural error is
/// returned if the oracle never produces a valid DAG.
pub async fn decompose(
    oracle: &OracleClient,
    request: &str,
    cancel: &CancellationToken,
) -> Result<Vec<Atom>> {
    let prompt = decomposition_prompt(request);
    let mut last_err: Option<Error> = None;

    for attempt in 1..=DECOMPOSITION_ATTEMPTS {
        let response: DecompositionResponse = oracle
            .generate(&prompt, SchemaKind::Decomposition, cancel)
            .await?;
        let atoms: Vec<Atom> = response.atoms.into_iter().map(|a| a.into_atom()).collect();

        match TaskGraph::build(&atoms) {
            Ok(_) => {
                tracing::info!(atoms = atoms.len(), attempt, "decomposition accepted");
                return Ok(atoms);
            }
            Err(err @ (Error::CycleDetected { .. } | Error::UnknownDependency { .. })) => {
                tracing::warn!(attempt, error = %err, "rejecting structurally invalid decomposition");
                last_err = Some(err);
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_err.unwrap_or(Error::CycleDetected {
        atom: String::new(),
    }))
}

/// Analyze every atom and split the oversized ones. Dependencies of
/// split-away parents are rewired onto the final sub-atom so downstream
/// edges stay valid. The result is re-validated as a DAG.
pub async fn expand_oversized(
    oracle: &OracleClient,
    atoms: Vec<Atom>,
    config: &RunConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Atom>> {
    let mut expanded: Vec<Atom> = Vec::with_capacity(atoms.len());
    // parent id → replacement id for dependents.
    let mut rewires: Vec<(String, String)> = Vec::new();

    for atom in atoms {
        let metrics = analyze(&atom, config.max_line_threshold);
        if !metrics.requires_decomposition {
            expanded.push(atom);
            continue;
        }
        let strategy = DecompositionStrategy::choose(&atom, &metrics);
        tracing::info!(
            atom = %atom.id,
            estimated_lines = metrics.estimated_lines,
            overall = metrics.overall,
            ?strategy,
            subtasks = metrics.recommended_subtask_count,
            "auto-decomposing oversized atom"
        );
        let subatoms = auto_decompose(oracle, &atom, &metrics, strategy, config, cancel).await?;
        if let Some(last) = subatoms.last() {
            rewires.push((atom.id.clone(), last.id.clone()));
        }
        expanded.extend(subatoms);
    }

    for (old, new) in &rewires {
        for atom in &mut expanded {
            if atom.dependencies.remove(old) {
                atom.dependencies.insert(new.clone());
            }
            if let Some(consumed) = atom.consumed_types.remove(old) {
                atom.consumed_types.insert(new.clone(), consumed);
            }
        }
    }

    TaskGraph::build(&expanded)?;
    Ok(expanded)
}

/// Oracle-assisted split of one atom. Preserves the parent namespace, hands
/// the parent's dependencies to the first sub-atom, and chains sub-atoms
/// linearly (always acyclic). Partial-class splits keep the parent type
/// name in every part.
pub async fn auto_decompose(
    oracle: &OracleClient,
    atom: &Atom,
    metrics: &ComplexityMetrics,
    strategy: DecompositionStrategy,
    config: &RunConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Atom>> {
    let budget = config.max_line_threshold.saturating_sub(10);
    let prompt = subtasks_prompt(atom, metrics, strategy, budget);
    let response: SubtasksResponse = oracle
        .generate(&prompt, SchemaKind::Subtasks, cancel)
        .await?;

    let count = response
        .subtasks
        .len()
        .min(metrics.recommended_subtask_count as usize)
        .max(2);
    let mut subatoms = Vec::with_capacity(count);

    for (i, spec) in response.subtasks.into_iter().take(count).enumerate() {
        let id = format!("{}.{}", atom.id, i + 1);
        let mut sub = Atom::new(&id, atom.kind, atom.layer, &atom.namespace, spec.description);
        sub.context = atom.context.clone();
        if i == 0 {
            sub.dependencies = atom.dependencies.clone();
            sub.consumed_types = atom.consumed_types.clone();
        } else {
            sub.dependencies.insert(format!("{}.{}", atom.id, i));
        }
        sub.expected_types = match strategy {
            // Every partial part declares the same type.
            DecompositionStrategy::PartialClass => atom.expected_types.clone(),
            _ => spec.expected_types,
        };
        subatoms.push(sub);
    }

    Ok(subatoms)
}

fn decomposition_prompt(request: &str) -> String {
    format!(
        "Decompose the following request into atomic code-generation tasks \
         forming a dependency DAG. Each task produces one file. Reference \
         dependencies only by the ids of other tasks in this response; do \
         not introduce cycles.\n\nRequest:\n{request}\n"
    )
}

fn subtasks_prompt(
    atom: &Atom,
    metrics: &ComplexityMetrics,
    strategy: DecompositionStrategy,
    line_budget: u32,
) -> String {
    let strategy_hint = match strategy {
        DecompositionStrategy::Functional => {
            "Split by functional area: each sub-task implements a coherent group of methods."
        }
        DecompositionStrategy::PartialClass => {
            "Split into partial-class parts of the same type; parts are generated in order."
        }
        DecompositionStrategy::InterfaceBased => {
            "Split interface declarations from their implementations."
        }
        DecompositionStrategy::LayerBased => {
            "Split along architectural layers (core, infrastructure, presentation)."
        }
    };
    format!(
        "The task below is too large for one pass (estimated {} lines, \
         complexity {}). Split it into {} sub-tasks of at most {} lines \
         each. {}\nKeep the namespace '{}'.\n\nTask '{}': {}\nExpected types: {}\n",
        metrics.estimated_lines,
        metrics.overall,
        metrics.recommended_subtask_count,
        line_budget,
        strategy_hint,
        atom.namespace,
        atom.id,
        atom.description,
        atom.expected_types.join(", "),
    )
}

/// Whether an atom id names an auto-generated sub-atom (`parent.N`).
pub fn is_subatom_id(id: &str) -> bool {
    id.rsplit_once('.')
        .is_some_and(|(_, n)| n.chars().all(|c| c.is_ascii_digit()))
}

/// Partial-class sub-atoms need `partial` on their declarations; the prompt
/// and repair paths use this to decide.
pub fn is_partial_split(atom: &Atom) -> bool {
    atom.kind == AtomKind::Implementation && is_subatom_id(&atom.id)
}
