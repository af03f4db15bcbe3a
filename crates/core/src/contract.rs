//! The freeze-once contract catalog.
//!
//! Shared symbols (enums, interfaces, models, abstracts) are agreed before
//! any implementation is generated, so downstream atoms cannot invent
//! incompatible variants of the same type. The catalog is built once from
//! the decomposition, frozen atomically, and read-only for the rest of the
//! run; freezing is enforced by the type system: [`FrozenCatalog`] has no
//! mutating API.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::atom::Atom;
use crate::error::{Error, Result};
use crate::oracle::OracleClient;
use crate::schemas::{
    AbstractSpec, ContractsResponse, EnumSpec, InterfaceSpec, MethodSpec, ModelSpec, SchemaKind,
};
use crate::syntax::lexer::{lex, TokenKind};
use crate::syntax::CompilationUnit;

/// Default namespace for enums and DTO models.
pub const MODELS_NAMESPACE: &str = "Models";
/// Default namespace for interfaces and abstracts.
pub const SERVICES_NAMESPACE: &str = "Services";

/// Contract classification, used for `list_by_kind` lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    Enum,
    Interface,
    Model,
    Abstract,
}

/// A method signature carried by interface and abstract contracts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodContract {
    pub name: String,
    pub return_type: String,
    #[serde(default)]
    pub parameters: Vec<(String, String)>,
}

impl MethodContract {
    fn from_spec(spec: MethodSpec) -> Self {
        Self {
            name: spec.name,
            return_type: spec.return_type,
            parameters: spec
                .parameters
                .into_iter()
                .map(|p| (p.type_name, p.name))
                .collect(),
        }
    }

    /// `ReturnType Name(ParamType name, ...)`.
    pub fn render(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|(t, n)| format!("{t} {n}"))
            .collect();
        format!("{} {}({})", self.return_type, self.name, params.join(", "))
    }

    /// Signature key matching [`crate::syntax::Member::signature_key`].
    pub fn signature_key(&self) -> String {
        let params: Vec<&str> = self.parameters.iter().map(|(t, _)| t.as_str()).collect();
        format!("{}({})", self.name, params.join(","))
    }
}

/// An enum contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumContract {
    pub name: String,
    pub namespace: String,
    pub members: Vec<String>,
}

/// An interface contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceContract {
    pub name: String,
    pub namespace: String,
    pub methods: Vec<MethodContract>,
}

/// A DTO/model contract: property name → type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelContract {
    pub name: String,
    pub namespace: String,
    pub properties: Vec<(String, String)>,
}

/// An abstract-class contract. Sealed abstracts may never be extended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractContract {
    pub name: String,
    pub namespace: String,
    pub abstract_methods: Vec<MethodContract>,
    pub is_sealed: bool,
}

/// A shared symbol agreed before implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Contract {
    Enum(EnumContract),
    Interface(InterfaceContract),
    Model(ModelContract),
    Abstract(AbstractContract),
}

impl Contract {
    pub fn name(&self) -> &str {
        match self {
            Contract::Enum(c) => &c.name,
            Contract::Interface(c) => &c.name,
            Contract::Model(c) => &c.name,
            Contract::Abstract(c) => &c.name,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Contract::Enum(c) => &c.namespace,
            Contract::Interface(c) => &c.namespace,
            Contract::Model(c) => &c.namespace,
            Contract::Abstract(c) => &c.namespace,
        }
    }

    /// Fully-qualified `namespace.name`.
    pub fn fqn(&self) -> String {
        format!("{}.{}", self.namespace(), self.name())
    }

    pub fn kind(&self) -> ContractKind {
        match self {
            Contract::Enum(_) => ContractKind::Enum,
            Contract::Interface(_) => ContractKind::Interface,
            Contract::Model(_) => ContractKind::Model,
            Contract::Abstract(_) => ContractKind::Abstract,
        }
    }

    /// Whether this contract is a sealed abstract.
    pub fn is_sealed_abstract(&self) -> bool {
        matches!(self, Contract::Abstract(a) if a.is_sealed)
    }

    /// Render a C# stub declaration, used for fragment-level compilation
    /// context and for prompt assembly.
    pub fn render_stub(&self) -> String {
        match self {
            Contract::Enum(c) => {
                let members = c.members.join(",\n    ");
                format!(
                    "namespace {}\n{{\n    public enum {}\n    {{\n    {}\n    }}\n}}",
                    c.namespace, c.name, members
                )
            }
            Contract::Interface(c) => {
                let methods: Vec<String> =
                    c.methods.iter().map(|m| format!("    {};", m.render())).collect();
                format!(
                    "namespace {}\n{{\n    public interface {}\n    {{\n{}\n    }}\n}}",
                    c.namespace,
                    c.name,
                    methods.join("\n")
                )
            }
            Contract::Model(c) => {
                let props: Vec<String> = c
                    .properties
                    .iter()
                    .map(|(name, ty)| format!("    public {ty} {name} {{ get; set; }}"))
                    .collect();
                format!(
                    "namespace {}\n{{\n    public class {}\n    {{\n{}\n    }}\n}}",
                    c.namespace,
                    c.name,
                    props.join("\n")
                )
            }
            Contract::Abstract(c) => {
                let sealed = if c.is_sealed { "sealed " } else { "abstract " };
                let methods: Vec<String> = c
                    .abstract_methods
                    .iter()
                    .map(|m| format!("    public abstract {};", m.render()))
                    .collect();
                format!(
                    "namespace {}\n{{\n    public {}class {}\n    {{\n{}\n    }}\n}}",
                    c.namespace,
                    sealed,
                    c.name,
                    methods.join("\n")
                )
            }
        }
    }
}

/// A violation found by the syntactic fragment scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContractViolation {
    /// The fragment redeclares a frozen type.
    RedefinesFrozenType { name: String, fqn: String },
    /// The fragment uses an enum member the contract does not declare.
    UndeclaredEnumMember { enum_name: String, member: String },
    /// The fragment inherits from a sealed abstract.
    InheritsFromSealed { type_name: String, base: String },
}

/// Mutable catalog under construction. Freezing consumes it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContractCatalog {
    entries: BTreeMap<String, Contract>,
}

impl ContractCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a contract, enforcing global fqn uniqueness, per-enum member
    /// uniqueness, and globally unique enum simple names. Enum members are
    /// referenced by simple name (`Status.Pending`), so two enums named
    /// `Status` are irreconcilable even across namespaces.
    pub fn insert(&mut self, contract: Contract) -> Result<()> {
        if let Contract::Enum(e) = &contract {
            let mut seen = BTreeSet::new();
            for member in &e.members {
                if !seen.insert(member.as_str()) {
                    return Err(Error::ContractOverlap {
                        fqn: format!("{}.{}", contract.fqn(), member),
                    });
                }
            }
            let clash = self
                .entries
                .values()
                .any(|c| matches!(c, Contract::Enum(other) if other.name == e.name));
            if clash {
                return Err(Error::ContractOverlap {
                    fqn: contract.fqn(),
                });
            }
        }
        let fqn = contract.fqn();
        if self.entries.contains_key(&fqn) {
            return Err(Error::ContractOverlap { fqn });
        }
        self.entries.insert(fqn, contract);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One-shot freeze. The returned catalog has no mutating API.
    pub fn freeze(self) -> FrozenCatalog {
        FrozenCatalog {
            entries: self.entries,
        }
    }

    /// Propose contracts for the decomposed plan via the oracle and build
    /// the catalog. A uniqueness violation in the proposal is fatal
    /// ([`Error::ContractOverlap`]); oracle failures follow the client's
    /// retry policy and are fatal for the run after exhaustion.
    pub async fn build_from_decomposition(
        oracle: &OracleClient,
        atoms: &[Atom],
        request: &str,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let prompt = contracts_prompt(atoms, request);
        let response: ContractsResponse = oracle
            .generate(&prompt, SchemaKind::Contracts, cancel)
            .await?;

        let mut catalog = Self::new();
        for spec in response.enums {
            catalog.insert(Contract::Enum(enum_from_spec(spec)))?;
        }
        for spec in response.interfaces {
            catalog.insert(Contract::Interface(interface_from_spec(spec)))?;
        }
        for spec in response.models {
            catalog.insert(Contract::Model(model_from_spec(spec)))?;
        }
        for spec in response.abstracts {
            catalog.insert(Contract::Abstract(abstract_from_spec(spec)))?;
        }
        tracing::info!(contracts = catalog.len(), "contract catalog built");
        Ok(catalog)
    }
}

fn default_namespace(given: &str, fallback: &str) -> String {
    if given.is_empty() {
        fallback.to_string()
    } else {
        given.to_string()
    }
}

fn enum_from_spec(spec: EnumSpec) -> EnumContract {
    EnumContract {
        namespace: default_namespace(&spec.namespace, MODELS_NAMESPACE),
        name: spec.name,
        members: spec.members,
    }
}

fn interface_from_spec(spec: InterfaceSpec) -> InterfaceContract {
    InterfaceContract {
        namespace: default_namespace(&spec.namespace, SERVICES_NAMESPACE),
        name: spec.name,
        methods: spec.methods.into_iter().map(MethodContract::from_spec).collect(),
    }
}

fn model_from_spec(spec: ModelSpec) -> ModelContract {
    ModelContract {
        namespace: default_namespace(&spec.namespace, MODELS_NAMESPACE),
        name: spec.name,
        properties: spec
            .properties
            .into_iter()
            .map(|p| (p.name, p.type_name))
            .collect(),
    }
}

fn abstract_from_spec(spec: AbstractSpec) -> AbstractContract {
    AbstractContract {
        namespace: default_namespace(&spec.namespace, SERVICES_NAMESPACE),
        name: spec.name,
        abstract_methods: spec
            .abstract_methods
            .into_iter()
            .map(MethodContract::from_spec)
            .collect(),
        is_sealed: spec.is_sealed,
    }
}

fn contracts_prompt(atoms: &[Atom], request: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("Propose the shared type contracts for the following project.\n");
    prompt.push_str("Request:\n");
    prompt.push_str(request);
    prompt.push_str("\n\nPlanned tasks:\n");
    for atom in atoms {
        prompt.push_str(&format!(
            "- {} [{:?}] in {}: {}\n",
            atom.id, atom.kind, atom.namespace, atom.description
        ));
        if !atom.expected_types.is_empty() {
            prompt.push_str(&format!("  produces: {}\n", atom.expected_types.join(", ")));
        }
    }
    prompt.push_str(
        "\nDeclare every enum, interface, DTO model, and abstract class that \
         more than one task consumes. Each fully-qualified name must be unique.\n",
    );
    prompt
}

/// The frozen catalog: lookups only, no mutation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FrozenCatalog {
    entries: BTreeMap<String, Contract>,
}

impl FrozenCatalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in fqn order.
    pub fn iter(&self) -> impl Iterator<Item = &Contract> {
        self.entries.values()
    }

    /// Exact fully-qualified lookup.
    pub fn lookup_by_fqn(&self, fqn: &str) -> Option<&Contract> {
        self.entries.get(fqn)
    }

    /// Simple-name lookup; ambiguous names return every match, in fqn order.
    pub fn lookup_by_simple(&self, name: &str) -> Vec<&Contract> {
        self.entries
            .values()
            .filter(|c| c.name() == name)
            .collect()
    }

    pub fn list_by_kind(&self, kind: ContractKind) -> Vec<&Contract> {
        self.entries.values().filter(|c| c.kind() == kind).collect()
    }

    /// Simple names that map to more than one fqn, with their fqns.
    pub fn ambiguous_simple_names(&self) -> BTreeMap<String, Vec<String>> {
        let mut by_simple: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for contract in self.entries.values() {
            by_simple
                .entry(contract.name().to_string())
                .or_default()
                .push(contract.fqn());
        }
        by_simple.retain(|_, fqns| fqns.len() > 1);
        by_simple
    }

    /// Purely syntactic scan of a parsed fragment: redefinitions of frozen
    /// names, undeclared enum members, and inheritance from sealed
    /// abstracts. `owned_types` lists the symbols this fragment is supposed
    /// to define (a contract atom legitimately declares its own contract).
    pub fn validate_fragment(
        &self,
        unit: &CompilationUnit,
        owned_types: &[String],
    ) -> Vec<ContractViolation> {
        let mut violations = Vec::new();

        for (namespace, decl) in unit.types() {
            if !owned_types.iter().any(|t| t == &decl.name) {
                let matches = self.lookup_by_simple(&decl.name);
                for contract in matches {
                    let redefines_same_ns =
                        namespace.is_empty() || contract.namespace() == namespace;
                    if redefines_same_ns {
                        violations.push(ContractViolation::RedefinesFrozenType {
                            name: decl.name.clone(),
                            fqn: contract.fqn(),
                        });
                    }
                }
            }

            for contract in self.entries.values() {
                if contract.is_sealed_abstract() && decl.inherits_from(contract.name()) {
                    violations.push(ContractViolation::InheritsFromSealed {
                        type_name: decl.name.clone(),
                        base: contract.name().to_string(),
                    });
                }
            }

            for member in &decl.members {
                for text in member_texts(member) {
                    violations.extend(self.scan_enum_usage(&text));
                }
            }
        }

        violations
    }

    /// Token scan of raw text for `EnumName.Member` references to members
    /// the contract does not declare.
    fn scan_enum_usage(&self, text: &str) -> Vec<ContractViolation> {
        let Ok(tokens) = lex(text) else {
            return Vec::new();
        };
        let mut violations = Vec::new();
        let mut i = 0;
        while i + 2 < tokens.len() {
            if let (TokenKind::Ident(first), true, TokenKind::Ident(member)) = (
                &tokens[i].kind,
                tokens[i + 1].is_punct('.'),
                &tokens[i + 2].kind,
            ) {
                for contract in self.lookup_by_simple(first) {
                    if let Contract::Enum(e) = contract {
                        if !e.members.iter().any(|m| m == member) {
                            violations.push(ContractViolation::UndeclaredEnumMember {
                                enum_name: e.name.clone(),
                                member: member.clone(),
                            });
                        }
                    }
                }
            }
            i += 1;
        }
        violations
    }

    /// Serialize to `contracts.json` under the output directory.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        crate::checkpoint::atomic_write(path, json.as_bytes()).map_err(|e| Error::Checkpoint {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Load a previously frozen catalog.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

fn member_texts(member: &crate::syntax::Member) -> Vec<String> {
    let mut texts = Vec::new();
    match &member.body {
        crate::syntax::MemberBody::Block(text)
        | crate::syntax::MemberBody::Expression(text) => texts.push(text.clone()),
        crate::syntax::MemberBody::None => {}
    }
    if let Some(init) = &member.initializer {
        texts.push(init.clone());
    }
    texts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_unit;
    use pretty_assertions::assert_eq;

    fn sample_catalog() -> FrozenCatalog {
        let mut catalog = ContractCatalog::new();
        catalog
            .insert(Contract::Enum(EnumContract {
                name: "OrderStatus".to_string(),
                namespace: MODELS_NAMESPACE.to_string(),
                members: vec!["Pending".to_string(), "Shipped".to_string()],
            }))
            .expect("insert enum");
        catalog
            .insert(Contract::Interface(InterfaceContract {
                name: "IOrderService".to_string(),
                namespace: SERVICES_NAMESPACE.to_string(),
                methods: vec![MethodContract {
                    name: "GetOrder".to_string(),
                    return_type: "Order".to_string(),
                    parameters: vec![("Guid".to_string(), "id".to_string())],
                }],
            }))
            .expect("insert interface");
        catalog
            .insert(Contract::Abstract(AbstractContract {
                name: "AbstractReporter".to_string(),
                namespace: SERVICES_NAMESPACE.to_string(),
                abstract_methods: Vec::new(),
                is_sealed: true,
            }))
            .expect("insert abstract");
        catalog.freeze()
    }

    #[test]
    fn duplicate_fqn_is_contract_overlap() {
        let mut catalog = ContractCatalog::new();
        let status = Contract::Enum(EnumContract {
            name: "Status".to_string(),
            namespace: MODELS_NAMESPACE.to_string(),
            members: vec!["Ok".to_string()],
        });
        catalog.insert(status.clone()).expect("first insert");
        let err = catalog.insert(status).expect_err("duplicate should fail");
        assert!(matches!(err, Error::ContractOverlap { fqn } if fqn == "Models.Status"));
    }

    #[test]
    fn same_simple_name_in_different_namespaces_is_allowed() {
        let mut catalog = ContractCatalog::new();
        catalog
            .insert(Contract::Model(ModelContract {
                name: "Record".to_string(),
                namespace: "Models".to_string(),
                properties: Vec::new(),
            }))
            .expect("Models.Record");
        catalog
            .insert(Contract::Model(ModelContract {
                name: "Record".to_string(),
                namespace: "Services".to_string(),
                properties: Vec::new(),
            }))
            .expect("Services.Record");
        let frozen = catalog.freeze();
        assert_eq!(frozen.lookup_by_simple("Record").len(), 2);
        let ambiguous = frozen.ambiguous_simple_names();
        assert_eq!(
            ambiguous["Record"],
            vec!["Models.Record".to_string(), "Services.Record".to_string()]
        );
    }

    #[test]
    fn enum_simple_names_are_globally_unique() {
        let mut catalog = ContractCatalog::new();
        catalog
            .insert(Contract::Enum(EnumContract {
                name: "Status".to_string(),
                namespace: "Models".to_string(),
                members: vec!["Ok".to_string()],
            }))
            .expect("first Status");
        let err = catalog
            .insert(Contract::Enum(EnumContract {
                name: "Status".to_string(),
                namespace: "Shared".to_string(),
                members: vec!["Ok".to_string()],
            }))
            .expect_err("cross-namespace enum name clash");
        assert!(matches!(err, Error::ContractOverlap { .. }));
    }

    #[test]
    fn duplicate_enum_members_rejected() {
        let mut catalog = ContractCatalog::new();
        let err = catalog
            .insert(Contract::Enum(EnumContract {
                name: "Status".to_string(),
                namespace: MODELS_NAMESPACE.to_string(),
                members: vec!["Ok".to_string(), "Ok".to_string()],
            }))
            .expect_err("duplicate members");
        assert!(matches!(err, Error::ContractOverlap { .. }));
    }

    #[test]
    fn lookup_by_fqn_and_kind() {
        let catalog = sample_catalog();
        assert!(catalog.lookup_by_fqn("Models.OrderStatus").is_some());
        assert!(catalog.lookup_by_fqn("Models.Nothing").is_none());
        assert_eq!(catalog.list_by_kind(ContractKind::Enum).len(), 1);
        assert_eq!(catalog.list_by_kind(ContractKind::Interface).len(), 1);
        assert_eq!(catalog.list_by_kind(ContractKind::Model).len(), 0);
    }

    #[test]
    fn empty_catalog_validates_anything() {
        let catalog = ContractCatalog::new().freeze();
        let unit = parse_unit("namespace Models { public class Anything { } }").expect("parse");
        assert!(catalog.validate_fragment(&unit, &[]).is_empty());
    }

    #[test]
    fn redefinition_of_frozen_type_detected() {
        let catalog = sample_catalog();
        let unit = parse_unit(
            "namespace Models { public enum OrderStatus { Pending } }",
        )
        .expect("parse");
        let violations = catalog.validate_fragment(&unit, &[]);
        assert!(violations.iter().any(|v| matches!(
            v,
            ContractViolation::RedefinesFrozenType { fqn, .. } if fqn == "Models.OrderStatus"
        )));
    }

    #[test]
    fn owner_atom_may_define_its_contract() {
        let catalog = sample_catalog();
        let unit = parse_unit(
            "namespace Models { public enum OrderStatus { Pending, Shipped } }",
        )
        .expect("parse");
        let violations = catalog.validate_fragment(&unit, &["OrderStatus".to_string()]);
        assert!(violations.is_empty());
    }

    #[test]
    fn undeclared_enum_member_detected() {
        let catalog = sample_catalog();
        let unit = parse_unit(
            r#"
namespace Services
{
    public class Svc
    {
        public OrderStatus Next()
        {
            return OrderStatus.Cancelled;
        }
    }
}
"#,
        )
        .expect("parse");
        let violations = catalog.validate_fragment(&unit, &["Svc".to_string()]);
        assert!(violations.iter().any(|v| matches!(
            v,
            ContractViolation::UndeclaredEnumMember { enum_name, member }
                if enum_name == "OrderStatus" && member == "Cancelled"
        )));
    }

    #[test]
    fn sealed_inheritance_detected() {
        let catalog = sample_catalog();
        let unit = parse_unit(
            "namespace Services { public class Reporter : AbstractReporter { } }",
        )
        .expect("parse");
        let violations = catalog.validate_fragment(&unit, &["Reporter".to_string()]);
        assert!(violations.iter().any(|v| matches!(
            v,
            ContractViolation::InheritsFromSealed { base, .. } if base == "AbstractReporter"
        )));
    }

    #[test]
    fn stub_rendering_parses_back() {
        let catalog = sample_catalog();
        for contract in catalog.iter() {
            let stub = contract.render_stub();
            parse_unit(&stub).unwrap_or_else(|e| panic!("stub should parse: {e}\n{stub}"));
        }
    }
}
