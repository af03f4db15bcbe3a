//! Schema-constrained oracle payloads.
//!
//! Every oracle call names one of these schemas; the response must
//! deserialize into the matching struct or the call counts as malformed.
//! The `schemars` derives let the adapter hand the model a JSON Schema for
//! constrained decoding.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::atom::{Atom, AtomKind, AtomStatus, Layer};

/// The schema vocabulary used across the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Decomposition,
    Contracts,
    Subtasks,
    Fragment,
    Summary,
    ArchitectureSummary,
    PackageVersions,
}

impl SchemaKind {
    /// Stable schema name handed to the adapter.
    pub fn name(&self) -> &'static str {
        match self {
            SchemaKind::Decomposition => "Decomposition",
            SchemaKind::Contracts => "Contracts",
            SchemaKind::Subtasks => "Subtasks",
            SchemaKind::Fragment => "Fragment",
            SchemaKind::Summary => "Summary",
            SchemaKind::ArchitectureSummary => "ArchitectureSummary",
            SchemaKind::PackageVersions => "PackageVersions",
        }
    }

    /// JSON Schema document for constrained decoding.
    pub fn schema_json(&self) -> serde_json::Value {
        let schema = match self {
            SchemaKind::Decomposition => schemars::schema_for!(DecompositionResponse),
            SchemaKind::Contracts => schemars::schema_for!(ContractsResponse),
            SchemaKind::Subtasks => schemars::schema_for!(SubtasksResponse),
            SchemaKind::Fragment => schemars::schema_for!(FragmentResponse),
            SchemaKind::Summary => schemars::schema_for!(SummaryResponse),
            SchemaKind::ArchitectureSummary => {
                schemars::schema_for!(ArchitectureSummaryResponse)
            }
            SchemaKind::PackageVersions => schemars::schema_for!(PackageVersionsResponse),
        };
        serde_json::to_value(schema).unwrap_or_default()
    }
}

impl std::fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One proposed task node in a decomposition response.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct AtomSpec {
    pub id: String,
    pub kind: AtomKind,
    pub layer: Layer,
    pub namespace: String,
    pub description: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub expected_types: Vec<String>,
    /// Dependency id → symbol names consumed from it.
    #[serde(default)]
    pub consumed_types: BTreeMap<String, Vec<String>>,
}

impl AtomSpec {
    /// Materialize a pending atom from the spec.
    pub fn into_atom(self) -> Atom {
        let mut atom = Atom::new(self.id, self.kind, self.layer, self.namespace, self.description);
        atom.context = self.context;
        atom.status = AtomStatus::Pending;
        atom.dependencies = self.dependencies.into_iter().collect();
        atom.expected_types = self.expected_types;
        atom.consumed_types = self
            .consumed_types
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect();
        atom
    }
}

/// Decomposition of the user request into a task DAG.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct DecompositionResponse {
    pub atoms: Vec<AtomSpec>,
    /// Optional one-paragraph plan restatement.
    #[serde(default)]
    pub plan: String,
}

/// A method signature proposed for an interface or abstract contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MethodSpec {
    pub name: String,
    pub return_type: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

/// A parameter in a contract method signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ParameterSpec {
    pub type_name: String,
    pub name: String,
}

/// A property on a model contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PropertySpec {
    pub type_name: String,
    pub name: String,
}

/// A proposed enum contract.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct EnumSpec {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub members: Vec<String>,
}

/// A proposed interface contract.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct InterfaceSpec {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub methods: Vec<MethodSpec>,
}

/// A proposed DTO/model contract.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ModelSpec {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    pub properties: Vec<PropertySpec>,
}

/// A proposed abstract-class contract.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct AbstractSpec {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub abstract_methods: Vec<MethodSpec>,
    #[serde(default)]
    pub is_sealed: bool,
}

/// Shared-contract proposal for the whole run.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ContractsResponse {
    #[serde(default)]
    pub enums: Vec<EnumSpec>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub abstracts: Vec<AbstractSpec>,
}

/// One proposed sub-task in an auto-decomposition response. Sub-task ids
/// are derived from the parent (`parent.1`, `parent.2`, ...), never
/// proposed by the oracle.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct SubtaskSpec {
    pub description: String,
    #[serde(default)]
    pub expected_types: Vec<String>,
}

/// Auto-decomposition of an oversized atom.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct SubtasksResponse {
    pub subtasks: Vec<SubtaskSpec>,
}

/// A generated code fragment.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct FragmentResponse {
    /// The complete fragment source.
    pub code: String,
    /// One-line summary of what was generated.
    #[serde(default)]
    pub summary: String,
}

/// Post-merge run summary.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct SummaryResponse {
    pub summary: String,
}

/// One named component in the architecture summary.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct ComponentSummary {
    pub name: String,
    pub responsibility: String,
}

/// Architecture overview produced at decomposition time.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ArchitectureSummaryResponse {
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub components: Vec<ComponentSummary>,
}

/// A package the generated project depends on. Recorded, never resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PackageRef {
    pub name: String,
    pub version: String,
}

/// Package names/versions for the generated project.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct PackageVersionsResponse {
    #[serde(default)]
    pub packages: Vec<PackageRef>,
}
