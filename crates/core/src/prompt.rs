//! Prompt assembly for the per-atom loop.
//!
//! The prompt carries everything the oracle needs to produce a fragment
//! that compiles against the frozen catalog: the relevant contracts, the
//! known symbols, ambiguity warnings, dependency extracts, and a fixed
//! guardrail block. Assembly is deterministic for a given blackboard state.

use crate::atom::Atom;
use crate::contract::{Contract, FrozenCatalog};
use crate::diagnostics::Diagnostic;

/// Dependency fragments at or under this size are inlined whole;
/// larger ones contribute their signature extract only.
const FULL_FRAGMENT_LIMIT: usize = 500;

/// Fixed guardrail block appended to every generation prompt.
const GUARDRAILS: &str = "\
Rules:
- Do not redefine any frozen contract type; use them as declared.
- Never inherit from a sealed abstract type; hold it as a field instead.
- Use only the enum members declared in the contracts; invent none.
- Keep DTOs in the Models namespace and services in the Services namespace.
- Emit complete, compilable C# for exactly the expected types.";

/// A completed dependency visible to the prompt.
pub struct DependencyView<'a> {
    pub atom: &'a Atom,
}

/// Everything prompt assembly reads.
pub struct PromptContext<'a> {
    pub catalog: &'a FrozenCatalog,
    pub dependencies: Vec<DependencyView<'a>>,
}

/// Contracts relevant to one atom: namespace match, expected-type match,
/// a mention in the description, or consumption from a dependency.
pub fn relevant_contracts<'a>(atom: &Atom, catalog: &'a FrozenCatalog) -> Vec<&'a Contract> {
    catalog
        .iter()
        .filter(|contract| {
            contract.namespace() == atom.namespace
                || atom.expected_types.iter().any(|t| t == contract.name())
                || atom.description.contains(contract.name())
                || atom
                    .consumed_types
                    .values()
                    .any(|names| names.contains(contract.name()))
        })
        .collect()
}

/// The initial generation prompt for an atom.
pub fn generation_prompt(atom: &Atom, ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Generate the C# fragment for task '{}' in namespace '{}'.\n",
        atom.id, atom.namespace
    ));
    prompt.push_str(&format!("Task: {}\n", atom.description));
    if !atom.context.is_empty() {
        prompt.push_str(&format!("Context: {}\n", atom.context));
    }
    if !atom.expected_types.is_empty() {
        prompt.push_str(&format!(
            "The fragment must declare exactly these types: {}\n",
            atom.expected_types.join(", ")
        ));
    }
    if crate::decompose::is_partial_split(atom) {
        prompt.push_str(
            "Declare the expected types as partial classes; the other parts \
             are generated separately.\n",
        );
    }

    push_contracts_section(&mut prompt, atom, ctx);
    push_known_symbols(&mut prompt, ctx);
    push_ambiguity_warnings(&mut prompt, ctx);
    push_dependency_extracts(&mut prompt, atom, ctx);

    prompt.push('\n');
    prompt.push_str(GUARDRAILS);
    prompt.push('\n');
    prompt
}

/// Re-prompt after a failed validation round: original intent, the current
/// fragment, and the diagnostics that survived the contract-violation
/// filter.
pub fn repair_prompt(
    atom: &Atom,
    ctx: &PromptContext<'_>,
    fragment: &str,
    diagnostics: &[Diagnostic],
) -> String {
    let mut prompt = generation_prompt(atom, ctx);
    prompt.push_str("\nThe previous fragment does not compile. Fix these errors and return the complete corrected fragment:\n");
    for diagnostic in diagnostics {
        prompt.push_str(&format!("- {} {}\n", diagnostic.id, diagnostic.message));
    }
    prompt.push_str("\nPrevious fragment:\n");
    prompt.push_str(fragment);
    prompt.push('\n');
    prompt
}

/// Final-attempt prompt: same content with the non-negotiables repeated.
pub fn amplified_prompt(
    atom: &Atom,
    ctx: &PromptContext<'_>,
    fragment: &str,
    diagnostics: &[Diagnostic],
) -> String {
    let mut prompt = repair_prompt(atom, ctx, fragment, diagnostics);
    prompt.push_str(&format!(
        "\nThis is the final attempt. The fragment MUST compile. \
         Use namespace '{}' exactly. Declare exactly: {}. \
         Match every contract signature verbatim.\n",
        atom.namespace,
        atom.expected_types.join(", ")
    ));
    prompt
}

fn push_contracts_section(prompt: &mut String, atom: &Atom, ctx: &PromptContext<'_>) {
    let contracts = relevant_contracts(atom, ctx.catalog);
    if contracts.is_empty() {
        return;
    }
    prompt.push_str("\nFrozen contracts in scope (use verbatim, do not redeclare unless listed as expected):\n");
    for contract in contracts {
        prompt.push_str(&contract.render_stub());
        prompt.push('\n');
    }
}

fn push_known_symbols(prompt: &mut String, ctx: &PromptContext<'_>) {
    if ctx.catalog.is_empty() && ctx.dependencies.is_empty() {
        return;
    }
    prompt.push_str("\nKnown symbols:\n");
    for contract in ctx.catalog.iter() {
        prompt.push_str(&format!("- {}\n", contract.fqn()));
    }
    for dep in &ctx.dependencies {
        for name in &dep.atom.expected_types {
            prompt.push_str(&format!("- {}.{} (from {})\n", dep.atom.namespace, name, dep.atom.id));
        }
    }
}

fn push_ambiguity_warnings(prompt: &mut String, ctx: &PromptContext<'_>) {
    let ambiguous = ctx.catalog.ambiguous_simple_names();
    if ambiguous.is_empty() {
        return;
    }
    prompt.push_str("\nAmbiguous simple names; always qualify these fully:\n");
    for (simple, fqns) in ambiguous {
        prompt.push_str(&format!("- {} may mean {}\n", simple, fqns.join(" or ")));
    }
}

fn push_dependency_extracts(prompt: &mut String, atom: &Atom, ctx: &PromptContext<'_>) {
    if ctx.dependencies.is_empty() {
        return;
    }
    prompt.push_str("\nCompleted dependencies:\n");
    for dep in &ctx.dependencies {
        let consumed = atom
            .consumed_types
            .get(&dep.atom.id)
            .map(|names| names.iter().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        if consumed.is_empty() {
            prompt.push_str(&format!("-- {} --\n", dep.atom.id));
        } else {
            prompt.push_str(&format!("-- {} (you consume: {consumed}) --\n", dep.atom.id));
        }
        let fragment = &dep.atom.generated_fragment;
        if !fragment.is_empty() && fragment.len() <= FULL_FRAGMENT_LIMIT {
            prompt.push_str(fragment);
        } else {
            prompt.push_str(&dep.atom.type_contract_extract);
        }
        prompt.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AtomKind, Layer};
    use crate::contract::{ContractCatalog, EnumContract, ModelContract};

    fn catalog() -> FrozenCatalog {
        let mut builder = ContractCatalog::new();
        builder
            .insert(Contract::Enum(EnumContract {
                name: "OrderStatus".to_string(),
                namespace: "Models".to_string(),
                members: vec!["Pending".to_string()],
            }))
            .expect("enum");
        for ns in ["Models", "Services"] {
            builder
                .insert(Contract::Model(ModelContract {
                    name: "Record".to_string(),
                    namespace: ns.to_string(),
                    properties: Vec::new(),
                }))
                .expect("model");
        }
        builder.freeze()
    }

    fn atom() -> Atom {
        let mut atom = Atom::new(
            "svc",
            AtomKind::Implementation,
            Layer::Core,
            "Services",
            "order service using OrderStatus",
        );
        atom.expected_types = vec!["OrderService".to_string()];
        atom
    }

    #[test]
    fn prompt_is_deterministic() {
        let catalog = catalog();
        let ctx = PromptContext {
            catalog: &catalog,
            dependencies: Vec::new(),
        };
        let a = atom();
        assert_eq!(generation_prompt(&a, &ctx), generation_prompt(&a, &ctx));
    }

    #[test]
    fn relevant_contracts_include_description_mentions() {
        let catalog = catalog();
        let a = atom();
        let relevant = relevant_contracts(&a, &catalog);
        // OrderStatus is mentioned in the description; both Records match
        // the Services namespace or not at all.
        assert!(relevant.iter().any(|c| c.name() == "OrderStatus"));
    }

    #[test]
    fn ambiguity_warnings_present() {
        let catalog = catalog();
        let ctx = PromptContext {
            catalog: &catalog,
            dependencies: Vec::new(),
        };
        let prompt = generation_prompt(&atom(), &ctx);
        assert!(prompt.contains("Record may mean Models.Record or Services.Record"));
    }

    #[test]
    fn guardrails_always_present() {
        let catalog = ContractCatalog::new().freeze();
        let ctx = PromptContext {
            catalog: &catalog,
            dependencies: Vec::new(),
        };
        let prompt = generation_prompt(&atom(), &ctx);
        assert!(prompt.contains("Never inherit from a sealed abstract type"));
    }

    #[test]
    fn short_dependency_fragments_inline_whole() {
        let catalog = ContractCatalog::new().freeze();
        let mut dep = Atom::new("dto", AtomKind::Dto, Layer::Core, "Models", "dto");
        dep.generated_fragment =
            "namespace Models { public class Order { } }".to_string();
        dep.type_contract_extract = "// extract".to_string();
        dep.expected_types = vec!["Order".to_string()];
        let ctx = PromptContext {
            catalog: &catalog,
            dependencies: vec![DependencyView { atom: &dep }],
        };
        let mut a = atom();
        a.consumed_types
            .entry("dto".to_string())
            .or_default()
            .insert("Order".to_string());
        let prompt = generation_prompt(&a, &ctx);
        assert!(prompt.contains("public class Order"));
        assert!(prompt.contains("you consume: Order"));
    }

    #[test]
    fn long_dependency_fragments_use_extract() {
        let catalog = ContractCatalog::new().freeze();
        let mut dep = Atom::new("dto", AtomKind::Dto, Layer::Core, "Models", "dto");
        dep.generated_fragment = format!(
            "namespace Models {{ public class Order {{ {} }} }}",
            "public int X { get; set; } ".repeat(40)
        );
        dep.type_contract_extract =
            "namespace Models { public class Order { public int X { get; set; } } }".to_string();
        let ctx = PromptContext {
            catalog: &catalog,
            dependencies: vec![DependencyView { atom: &dep }],
        };
        let prompt = generation_prompt(&atom(), &ctx);
        assert!(!prompt.contains(&dep.generated_fragment));
        assert!(prompt.contains(&dep.type_contract_extract));
    }

    #[test]
    fn amplified_prompt_names_the_namespace() {
        let catalog = ContractCatalog::new().freeze();
        let ctx = PromptContext {
            catalog: &catalog,
            dependencies: Vec::new(),
        };
        let prompt = amplified_prompt(&atom(), &ctx, "x", &[]);
        assert!(prompt.contains("final attempt"));
        assert!(prompt.contains("Use namespace 'Services' exactly"));
    }
}
