//! Task atoms: the unit of code generation.
//!
//! An atom corresponds to one generated file or one partial-class part. It
//! is created during decomposition, mutated only by the scheduler slot that
//! owns it, and becomes immutable once it reaches a terminal status.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostic;

/// What kind of artifact an atom produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AtomKind {
    Interface,
    Dto,
    Implementation,
    Test,
    ContractEnum,
    ContractAbstract,
}

/// Architectural layer an atom belongs to. Dispatch order within a wave is
/// stable by `(layer rank, id)`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Core,
    Infrastructure,
    Presentation,
}

impl Layer {
    /// Rank used for stable dispatch ordering (Core first).
    pub fn rank(&self) -> u8 {
        match self {
            Layer::Core => 0,
            Layer::Infrastructure => 1,
            Layer::Presentation => 2,
        }
    }
}

/// Atom lifecycle status.
///
/// ```text
/// Pending → Ready → InProgress → Review → Completed
///                        │
///                        └──────────→ Failed
/// ```
///
/// `Completed` and `Failed` are terminal; a terminal atom is never mutated
/// again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomStatus {
    Pending,
    Ready,
    InProgress,
    Review,
    Completed,
    Failed,
}

impl AtomStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AtomStatus::Completed | AtomStatus::Failed)
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: &AtomStatus) -> bool {
        use AtomStatus::*;
        match (self, next) {
            (Pending, Ready) => true,
            (Ready, InProgress) => true,
            (InProgress, Review) => true,
            (InProgress, Failed) => true,
            (Review, Completed) => true,
            (Review, Failed) => true,
            // Dependency-failure cascade skips the pipeline entirely.
            (Pending, Failed) | (Ready, Failed) => true,
            _ => false,
        }
    }
}

/// Why an atom failed, when it did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The per-atom retry/repair budget was exhausted.
    BudgetExhausted,
    /// A dependency failed, making this atom structurally unreachable.
    DependencyFailed {
        /// The dependency that failed first.
        dependency: String,
    },
    /// The run was canceled before this atom could complete.
    Canceled,
}

/// A single code-generation task node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// Stable identifier, unique within a run.
    pub id: String,
    pub kind: AtomKind,
    pub layer: Layer,
    pub status: AtomStatus,
    /// Dependency atom ids. Must form a DAG over the manifest.
    pub dependencies: BTreeSet<String>,
    /// What this atom should implement.
    pub description: String,
    /// Additional context handed to the oracle verbatim.
    #[serde(default)]
    pub context: String,
    /// Namespace the produced types live in.
    pub namespace: String,
    /// Ordered list of symbol names the atom must produce.
    #[serde(default)]
    pub expected_types: Vec<String>,
    /// Symbols consumed from each dependency: dependency id → symbol names.
    #[serde(default)]
    pub consumed_types: BTreeMap<String, BTreeSet<String>>,
    /// The most recently accepted code fragment (empty until first accept).
    #[serde(default)]
    pub generated_fragment: String,
    /// Classified diagnostics from the most recent compile.
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    /// Oracle round-trips consumed. Bounded by policy (3).
    #[serde(default)]
    pub retry_count: u32,
    /// Compile/validate cycles consumed. Bounded by policy (3).
    #[serde(default)]
    pub validation_attempt_count: u32,
    /// One-line post-generation summary.
    #[serde(default)]
    pub summary: String,
    /// Public-signature extract published to the blackboard on completion.
    #[serde(default)]
    pub type_contract_extract: String,
    /// Populated iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<FailureCause>,
}

impl Atom {
    /// Create a pending atom with the given identity and namespace.
    pub fn new(
        id: impl Into<String>,
        kind: AtomKind,
        layer: Layer,
        namespace: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            layer,
            status: AtomStatus::Pending,
            dependencies: BTreeSet::new(),
            description: description.into(),
            context: String::new(),
            namespace: namespace.into(),
            expected_types: Vec::new(),
            consumed_types: BTreeMap::new(),
            generated_fragment: String::new(),
            diagnostics: Vec::new(),
            retry_count: 0,
            validation_attempt_count: 0,
            summary: String::new(),
            type_contract_extract: String::new(),
            failure_cause: None,
        }
    }

    /// Add a dependency edge.
    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    /// Declare an expected output type.
    #[must_use]
    pub fn with_expected_type(mut self, name: impl Into<String>) -> Self {
        self.expected_types.push(name.into());
        self
    }

    /// Whether the atom has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Sort key for stable dispatch within a wave.
    pub fn dispatch_key(&self) -> (u8, &str) {
        (self.layer.rank(), self.id.as_str())
    }
}
