//! Deterministic auto-repair.
//!
//! Applies the fixed rewrite per diagnostic category on the syntax tree,
//! re-emits, recompiles, and repeats up to the pass budget. Anything the
//! rewrites cannot fix is left in the final diagnostic list for the retry
//! path to hand back to the oracle.

use crate::compile::{compile_fragment, CompileContext, CompileOutput};
use crate::config::REPAIR_PASSES;
use crate::contract::Contract;
use crate::diagnostics::{Diagnostic, DiagnosticCategory};
use crate::syntax::{emit_unit, rewrite, CompilationUnit};

/// Result of the bounded repair loop.
#[derive(Clone, Debug)]
pub struct RepairOutcome {
    /// The (possibly rewritten) fragment source.
    pub source: String,
    /// Human-readable record of every rewrite applied, in order.
    pub applied: Vec<String>,
    /// Compile passes consumed, including the initial one.
    pub passes: u32,
    /// Compile result of the final source.
    pub output: CompileOutput,
}

impl RepairOutcome {
    /// Whether the final source compiles clean.
    pub fn clean(&self) -> bool {
        self.output.ok()
    }
}

/// Compile and repair a fragment, up to `REPAIR_PASSES` rewrite passes.
pub fn repair_fragment(source: &str, ctx: &CompileContext<'_>) -> RepairOutcome {
    repair_with_budget(source, ctx, REPAIR_PASSES)
}

/// Same loop with an explicit pass budget; the merge pipeline runs it once
/// over the assembled project with its own bound.
pub fn repair_with_budget(
    source: &str,
    ctx: &CompileContext<'_>,
    max_passes: u32,
) -> RepairOutcome {
    let mut current = source.to_string();
    let mut applied = Vec::new();
    let mut passes = 0u32;

    loop {
        passes += 1;
        let output = compile_fragment(&current, ctx);
        let fixable: Vec<Diagnostic> = output
            .diagnostics
            .iter()
            .filter(|d| d.auto_fixable)
            .cloned()
            .collect();

        if output.ok() || fixable.is_empty() || passes > max_passes {
            return RepairOutcome {
                source: current,
                applied,
                passes,
                output,
            };
        }

        let Some(mut unit) = output.unit.clone() else {
            // Unparseable fragments have nothing to rewrite.
            return RepairOutcome {
                source: current,
                applied,
                passes,
                output,
            };
        };

        let before = applied.len();
        for diagnostic in &fixable {
            if let Some(description) = apply_fix(&mut unit, diagnostic, ctx) {
                tracing::debug!(code = %diagnostic.id, %description, "auto-repair applied");
                applied.push(description);
            }
        }

        if applied.len() == before {
            // No rewrite made progress; further passes would loop.
            return RepairOutcome {
                source: current,
                applied,
                passes,
                output,
            };
        }

        current = emit_unit(&unit);
    }
}

/// Apply the category's rewrite. Returns a description when a change was
/// made.
fn apply_fix(
    unit: &mut CompilationUnit,
    diagnostic: &Diagnostic,
    ctx: &CompileContext<'_>,
) -> Option<String> {
    match diagnostic.category {
        DiagnosticCategory::MissingInterfaceMember | DiagnosticCategory::MissingAbstractMember => {
            let fix = diagnostic.suggested_fix.as_deref()?;
            let (contract_name, signature_key) = fix.split_once("::")?;
            let type_name = diagnostic.location.type_name.as_deref()?;
            let method = find_contract_method(ctx, contract_name, signature_key)?;
            let namespace = unit.namespace_of(type_name)?.to_string();
            let decl = unit.type_mut(&namespace, type_name)?;
            if decl.find_member(signature_key).is_some() {
                return None;
            }
            rewrite::insert_method_stub(
                decl,
                &method.name,
                &method.return_type,
                &method.parameters,
            );
            Some(format!("stubbed {contract_name}.{} on {type_name}", method.name))
        }
        DiagnosticCategory::IllegalInheritanceFromSealed => {
            let base = diagnostic.suggested_fix.as_deref()?;
            let type_name = diagnostic.location.type_name.as_deref()?;
            let namespace = unit.namespace_of(type_name)?.to_string();
            let decl = unit.type_mut(&namespace, type_name)?;
            if !decl.inherits_from(base) {
                return None;
            }
            rewrite::replace_inheritance_with_composition(decl, base);
            Some(format!("replaced sealed base {base} with composition on {type_name}"))
        }
        DiagnosticCategory::AmbiguousReference => {
            let fqn = diagnostic.suggested_fix.as_deref()?;
            let simple = fqn.rsplit('.').next()?;
            rewrite::qualify_simple_name(unit, simple, fqn)
                .then(|| format!("qualified {simple} as {fqn}"))
        }
        DiagnosticCategory::MissingImport => {
            let namespace = diagnostic.suggested_fix.as_deref()?;
            if unit.usings.iter().any(|u| u == namespace) {
                return None;
            }
            rewrite::add_using(unit, namespace);
            Some(format!("added using {namespace}"))
        }
        DiagnosticCategory::SymbolCollision => {
            let fix = diagnostic.suggested_fix.as_deref()?;
            match diagnostic.id.as_str() {
                crate::diagnostics::codes::DUPLICATE_MEMBER => {
                    let type_name = diagnostic.location.type_name.as_deref()?;
                    remove_later_member(unit, type_name, fix)
                        .then(|| format!("dropped duplicate member {fix} on {type_name}"))
                }
                _ => remove_later_type(unit, fix, ctx)
                    .then(|| format!("dropped duplicate declaration of {fix}")),
            }
        }
        DiagnosticCategory::SignatureMismatch => {
            let fix = diagnostic.suggested_fix.as_deref()?;
            let (signature_key, expected) = fix.split_once("->")?;
            let type_name = diagnostic.location.type_name.as_deref()?;
            let namespace = unit.namespace_of(type_name)?.to_string();
            let decl = unit.type_mut(&namespace, type_name)?;
            rewrite::set_return_type(decl, signature_key, expected)
                .then(|| format!("rewrote {type_name}.{signature_key} to return {expected}"))
        }
        DiagnosticCategory::MissingEnumMember | DiagnosticCategory::Other => None,
    }
}

fn find_contract_method<'a>(
    ctx: &'a CompileContext<'_>,
    contract_name: &str,
    signature_key: &str,
) -> Option<ContractMethod<'a>> {
    for contract in ctx.catalog.lookup_by_simple(contract_name) {
        let methods = match contract {
            Contract::Interface(i) => &i.methods,
            Contract::Abstract(a) => &a.abstract_methods,
            _ => continue,
        };
        if let Some(method) = methods.iter().find(|m| m.signature_key() == signature_key) {
            return Some(ContractMethod {
                name: &method.name,
                return_type: &method.return_type,
                parameters: &method.parameters,
            });
        }
    }
    None
}

struct ContractMethod<'a> {
    name: &'a str,
    return_type: &'a str,
    parameters: &'a [(String, String)],
}

/// Drop every declaration of `name` after the first. When the only
/// declaration redefines a frozen contract, drop it entirely.
fn remove_later_type(unit: &mut CompilationUnit, name: &str, ctx: &CompileContext<'_>) -> bool {
    let mut total = 0usize;
    for (_, decl) in unit.types() {
        if decl.name == name {
            total += 1;
        }
    }
    if total == 0 {
        return false;
    }

    // A single declaration colliding with the catalog is the redefinition
    // case: the frozen contract wins.
    let keep = if total == 1 && !ctx.catalog.lookup_by_simple(name).is_empty() {
        0
    } else {
        1
    };

    let mut seen = 0usize;
    let mut removed = false;
    for ns in &mut unit.namespaces {
        ns.types.retain(|t| {
            if t.name == name {
                seen += 1;
                if seen > keep {
                    removed = true;
                    return false;
                }
            }
            true
        });
    }
    unit.global_types.retain(|t| {
        if t.name == name {
            seen += 1;
            if seen > keep {
                removed = true;
                return false;
            }
        }
        true
    });
    removed
}

/// Drop every member matching `signature_key` after the first.
fn remove_later_member(unit: &mut CompilationUnit, type_name: &str, signature_key: &str) -> bool {
    let Some(namespace) = unit.namespace_of(type_name).map(str::to_string) else {
        return false;
    };
    let Some(decl) = unit.type_mut(&namespace, type_name) else {
        return false;
    };
    let mut seen = 0usize;
    let before = decl.members.len();
    decl.members.retain(|m| {
        if m.signature_key() == signature_key {
            seen += 1;
            seen == 1
        } else {
            true
        }
    });
    decl.members.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{
        AbstractContract, ContractCatalog, FrozenCatalog, InterfaceContract, MethodContract,
    };

    fn catalog() -> FrozenCatalog {
        let mut catalog = ContractCatalog::new();
        catalog
            .insert(Contract::Interface(InterfaceContract {
                name: "IOrderService".to_string(),
                namespace: "Services".to_string(),
                methods: vec![MethodContract {
                    name: "Cancel".to_string(),
                    return_type: "void".to_string(),
                    parameters: vec![("Guid".to_string(), "id".to_string())],
                }],
            }))
            .expect("interface");
        catalog
            .insert(Contract::Abstract(AbstractContract {
                name: "AbstractReporter".to_string(),
                namespace: "Services".to_string(),
                abstract_methods: Vec::new(),
                is_sealed: true,
            }))
            .expect("abstract");
        catalog.freeze()
    }

    fn repair(source: &str, owned: &[&str]) -> RepairOutcome {
        let catalog = catalog();
        let owned: Vec<String> = owned.iter().map(|s| (*s).to_string()).collect();
        let ctx = CompileContext {
            catalog: &catalog,
            dependency_extracts: &[],
            owned_types: &owned,
        };
        repair_fragment(source, &ctx)
    }

    #[test]
    fn missing_interface_member_gets_stub() {
        let source = r#"
using System;

namespace Services
{
    public class OrderService : IOrderService
    {
    }
}
"#;
        let outcome = repair(source, &["OrderService"]);
        assert!(outcome.clean(), "diagnostics: {:?}", outcome.output.diagnostics);
        assert!(outcome.source.contains("public void Cancel(Guid id)"));
        assert!(outcome.source.contains("throw new NotImplementedException();"));
    }

    #[test]
    fn sealed_inheritance_becomes_composition() {
        let source = r#"
namespace Services
{
    public class Reporter : AbstractReporter
    {
    }
}
"#;
        let outcome = repair(source, &["Reporter"]);
        assert!(outcome.clean(), "diagnostics: {:?}", outcome.output.diagnostics);
        assert!(!outcome.source.contains(": AbstractReporter"));
        assert!(outcome
            .source
            .contains("private readonly AbstractReporter _abstractReporter;"));
    }

    #[test]
    fn missing_using_is_inserted() {
        let source = r#"
namespace Services
{
    public class Box
    {
        public List<string> Items()
        {
            return new List<string>();
        }
    }
}
"#;
        let outcome = repair(source, &["Box"]);
        assert!(outcome.clean(), "diagnostics: {:?}", outcome.output.diagnostics);
        assert!(outcome.source.contains("using System.Collections.Generic;"));
    }

    #[test]
    fn duplicate_member_is_dropped() {
        let source = r#"
namespace Services
{
    public class Box
    {
        public int Size(string unit) { return 1; }
        public int Size(string unit) { return 2; }
    }
}
"#;
        let outcome = repair(source, &["Box"]);
        assert!(outcome.clean(), "diagnostics: {:?}", outcome.output.diagnostics);
        assert_eq!(outcome.source.matches("public int Size(string unit)").count(), 1);
        assert!(outcome.source.contains("return 1;"));
        assert!(!outcome.source.contains("return 2;"));
    }

    #[test]
    fn frozen_redefinition_is_removed() {
        let source = r#"
namespace Services
{
    public interface IOrderService
    {
        void Cancel(Guid id);
    }

    public class Keeper
    {
        public int Value;
    }
}
"#;
        let outcome = repair(source, &["Keeper"]);
        assert!(outcome.clean(), "diagnostics: {:?}", outcome.output.diagnostics);
        assert!(!outcome.source.contains("interface IOrderService"));
        assert!(outcome.source.contains("class Keeper"));
    }

    #[test]
    fn unfixable_diagnostics_survive() {
        let source = r#"
namespace Services
{
    public class Box
    {
        public FluxCapacitor Warp()
        {
            return null;
        }
    }
}
"#;
        let outcome = repair(source, &["Box"]);
        assert!(!outcome.clean());
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.passes, 1);
    }

    #[test]
    fn passes_are_bounded() {
        // Clean input: exactly one compile pass, no rewrites.
        let source = "namespace Services { public class Ok { } }";
        let outcome = repair(source, &["Ok"]);
        assert!(outcome.clean());
        assert_eq!(outcome.passes, 1);
        assert!(outcome.passes <= REPAIR_PASSES + 1);
    }
}
