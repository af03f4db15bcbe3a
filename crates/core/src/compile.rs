//! Fragment-level compilation.
//!
//! A fragment is parsed on its own, together with the frozen contract stubs
//! and the signature extracts of its completed dependencies, and checked
//! semantically against the catalog. The output is a diagnostic list using
//! the stable error-code vocabulary; errors only, never warnings.

use std::collections::BTreeSet;

use crate::contract::{Contract, ContractViolation, FrozenCatalog, MODELS_NAMESPACE};
use crate::diagnostics::{codes, Diagnostic, SourceLocation};
use crate::syntax::lexer::{lex, TokenKind};
use crate::syntax::{parse_unit, CompilationUnit, MemberBody, TypeKind};

/// Built-in names that never need an import.
const BUILTIN_TYPES: &[&str] = &[
    "bool", "byte", "char", "decimal", "double", "float", "int", "long", "object", "sbyte",
    "short", "string", "uint", "ulong", "ushort", "var", "void", "dynamic", "DateTime",
    "TimeSpan", "Exception", "NotImplementedException", "ArgumentException",
    "InvalidOperationException", "Console", "Math", "Convert",
];

/// Fixed symbol → namespace table for using-directive repair.
const WELL_KNOWN_NAMESPACES: &[(&str, &str)] = &[
    ("Guid", "System"),
    ("List", "System.Collections.Generic"),
    ("Dictionary", "System.Collections.Generic"),
    ("HashSet", "System.Collections.Generic"),
    ("Queue", "System.Collections.Generic"),
    ("IEnumerable", "System.Collections.Generic"),
    ("IList", "System.Collections.Generic"),
    ("IDictionary", "System.Collections.Generic"),
    ("IReadOnlyList", "System.Collections.Generic"),
    ("Task", "System.Threading.Tasks"),
    ("CancellationToken", "System.Threading"),
    ("StringBuilder", "System.Text"),
    ("Regex", "System.Text.RegularExpressions"),
    ("File", "System.IO"),
    ("Path", "System.IO"),
    ("Stream", "System.IO"),
    ("JsonSerializer", "System.Text.Json"),
];

/// Namespace for a well-known symbol, if the fixed table has it.
pub fn well_known_namespace(symbol: &str) -> Option<&'static str> {
    WELL_KNOWN_NAMESPACES
        .iter()
        .find(|(name, _)| *name == symbol)
        .map(|(_, ns)| *ns)
}

/// Preferred qualification for an ambiguous simple name: the `Models`
/// namespace wins over `Services`, then the alphabetically first fqn.
pub fn preferred_fqn(fqns: &[String]) -> Option<&String> {
    fqns.iter()
        .find(|fqn| fqn.starts_with(MODELS_NAMESPACE) && fqn.as_bytes().get(MODELS_NAMESPACE.len()) == Some(&b'.'))
        .or_else(|| fqns.iter().min())
}

/// Everything the compiler knows beyond the fragment itself.
pub struct CompileContext<'a> {
    pub catalog: &'a FrozenCatalog,
    /// Signature extracts of completed dependencies.
    pub dependency_extracts: &'a [String],
    /// Symbols this fragment is expected to define itself.
    pub owned_types: &'a [String],
}

/// Result of a fragment compile: the parsed unit (when parsing succeeded)
/// plus classified error diagnostics.
#[derive(Clone, Debug)]
pub struct CompileOutput {
    pub unit: Option<CompilationUnit>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileOutput {
    /// Whether the fragment compiled clean.
    pub fn ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Compile one fragment against its context.
pub fn compile_fragment(source: &str, ctx: &CompileContext<'_>) -> CompileOutput {
    let unit = match parse_unit(source) {
        Ok(unit) => unit,
        Err(err) => {
            let line = match &err {
                crate::syntax::ParseError::UnterminatedString { line }
                | crate::syntax::ParseError::UnterminatedComment { line }
                | crate::syntax::ParseError::Unexpected { line, .. } => *line,
                crate::syntax::ParseError::UnexpectedEnd { .. } => 0,
            };
            let mut diagnostic = Diagnostic::from_code(
                "CS1001",
                format!("fragment does not parse: {err}"),
                SourceLocation {
                    line,
                    type_name: None,
                },
            );
            diagnostic.auto_fixable = false;
            return CompileOutput {
                unit: None,
                diagnostics: vec![diagnostic],
            };
        }
    };

    let mut diagnostics = Vec::new();
    let known = KnownSymbols::collect(&unit, ctx);

    check_duplicate_types(&unit, &mut diagnostics);
    check_duplicate_members(&unit, &mut diagnostics);
    check_contract_violations(&unit, ctx, &mut diagnostics);
    check_interface_implementations(&unit, ctx, &mut diagnostics);
    check_unknown_types(&unit, &known, &mut diagnostics);
    check_ambiguous_references(&unit, ctx, &mut diagnostics);

    dedup(&mut diagnostics);
    CompileOutput {
        unit: Some(unit),
        diagnostics,
    }
}

/// Names resolvable without any repair, plus the fragment's usings.
struct KnownSymbols {
    names: BTreeSet<String>,
    usings: BTreeSet<String>,
}

/// How a referenced name resolves against the known-symbol set.
enum Resolution {
    Known,
    /// Resolvable by inserting a using directive for this namespace.
    NeedsUsing(&'static str),
    Unknown,
}

impl KnownSymbols {
    fn collect(unit: &CompilationUnit, ctx: &CompileContext<'_>) -> Self {
        let mut names: BTreeSet<String> = BUILTIN_TYPES.iter().map(|s| (*s).to_string()).collect();
        for (_, decl) in unit.types() {
            names.insert(bare_name(&decl.name).to_string());
        }
        for contract in ctx.catalog.iter() {
            names.insert(contract.name().to_string());
        }
        for extract in ctx.dependency_extracts {
            if let Ok(dep_unit) = parse_unit(extract) {
                for (_, decl) in dep_unit.types() {
                    names.insert(bare_name(&decl.name).to_string());
                }
            }
        }
        for owned in ctx.owned_types {
            names.insert(owned.clone());
        }
        Self {
            names,
            usings: unit.usings.iter().cloned().collect(),
        }
    }

    fn resolve(&self, name: &str) -> Resolution {
        // Qualified names resolve through their head segment.
        let head = name.split('.').next().unwrap_or(name);
        if self.names.contains(head) {
            return Resolution::Known;
        }
        match well_known_namespace(head) {
            Some(ns) if self.usings.contains(ns) => Resolution::Known,
            Some(ns) => Resolution::NeedsUsing(ns),
            None => Resolution::Unknown,
        }
    }
}

fn bare_name(name: &str) -> &str {
    name.split('<').next().unwrap_or(name)
}

fn check_duplicate_types(unit: &CompilationUnit, diagnostics: &mut Vec<Diagnostic>) {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    for (namespace, decl) in unit.types() {
        let key = (namespace.to_string(), decl.name.clone());
        if !seen.insert(key) {
            // Partial class parts legitimately share a name.
            let all_partial = unit
                .types()
                .filter(|(ns, t)| *ns == namespace && t.name == decl.name)
                .all(|(_, t)| t.kind == TypeKind::Class && t.modifiers.is_partial);
            if all_partial {
                continue;
            }
            diagnostics.push(
                Diagnostic::from_code(
                    codes::DUPLICATE_TYPE,
                    format!("the namespace '{namespace}' already contains a definition for '{}'", decl.name),
                    SourceLocation {
                        line: decl.line,
                        type_name: Some(decl.name.clone()),
                    },
                )
                .with_fix(decl.name.clone()),
            );
        }
    }
}

fn check_duplicate_members(unit: &CompilationUnit, diagnostics: &mut Vec<Diagnostic>) {
    for (_, decl) in unit.types() {
        if decl.kind == TypeKind::Enum {
            continue;
        }
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for member in &decl.members {
            let key = member.signature_key();
            if !seen.insert(key.clone()) {
                diagnostics.push(
                    Diagnostic::from_code(
                        codes::DUPLICATE_MEMBER,
                        format!("type '{}' already defines a member '{}'", decl.name, key),
                        SourceLocation {
                            line: member.line,
                            type_name: Some(decl.name.clone()),
                        },
                    )
                    .with_fix(key),
                );
            }
        }
    }
}

fn check_contract_violations(
    unit: &CompilationUnit,
    ctx: &CompileContext<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for violation in ctx.catalog.validate_fragment(unit, ctx.owned_types) {
        match violation {
            ContractViolation::RedefinesFrozenType { name, fqn } => {
                diagnostics.push(
                    Diagnostic::from_code(
                        codes::DUPLICATE_TYPE,
                        format!("'{name}' redefines the frozen contract '{fqn}'"),
                        SourceLocation {
                            line: 0,
                            type_name: Some(name.clone()),
                        },
                    )
                    .with_fix(name),
                );
            }
            ContractViolation::UndeclaredEnumMember { enum_name, member } => {
                diagnostics.push(Diagnostic::from_code(
                    codes::MEMBER_NOT_FOUND,
                    format!("'{enum_name}' does not contain a definition for '{member}'"),
                    SourceLocation {
                        line: 0,
                        type_name: Some(enum_name),
                    },
                ));
            }
            ContractViolation::InheritsFromSealed { type_name, base } => {
                diagnostics.push(
                    Diagnostic::from_code(
                        codes::SEALED_BASE,
                        format!("'{type_name}' cannot derive from sealed type '{base}'"),
                        SourceLocation {
                            line: 0,
                            type_name: Some(type_name),
                        },
                    )
                    .with_fix(base),
                );
            }
        }
    }
}

fn check_interface_implementations(
    unit: &CompilationUnit,
    ctx: &CompileContext<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (namespace, decl) in unit.types() {
        if decl.kind != TypeKind::Class {
            continue;
        }
        for base in &decl.base_list {
            let simple = base.rsplit('.').next().unwrap_or(base);
            for contract in ctx.catalog.lookup_by_simple(simple) {
                let (contract_name, code, methods) = match contract {
                    Contract::Interface(iface) => (
                        iface.name.as_str(),
                        codes::INTERFACE_NOT_IMPLEMENTED,
                        &iface.methods,
                    ),
                    Contract::Abstract(abs) if !abs.is_sealed => (
                        abs.name.as_str(),
                        codes::ABSTRACT_NOT_IMPLEMENTED,
                        &abs.abstract_methods,
                    ),
                    _ => continue,
                };
                for method in methods {
                    let signature_key = method.signature_key();
                    // A partial type satisfies the contract across all of
                    // its parts, not just the one carrying the base list.
                    let implemented = unit
                        .types()
                        .filter(|(ns, part)| *ns == namespace && part.name == decl.name)
                        .find_map(|(_, part)| {
                            part.find_member(&signature_key).map(|idx| &part.members[idx])
                        });
                    match implemented {
                        None => diagnostics.push(
                            Diagnostic::from_code(
                                code,
                                format!(
                                    "'{}' does not implement member '{}.{}'",
                                    decl.name, contract_name, method.name
                                ),
                                SourceLocation {
                                    line: decl.line,
                                    type_name: Some(decl.name.clone()),
                                },
                            )
                            .with_fix(format!("{contract_name}::{signature_key}")),
                        ),
                        Some(member) if member.return_type != method.return_type => {
                            diagnostics.push(
                                Diagnostic::from_code(
                                    codes::RETURN_TYPE_MISMATCH,
                                    format!(
                                        "'{}.{}' returns '{}' but the contract requires '{}'",
                                        decl.name,
                                        member.name,
                                        member.return_type,
                                        method.return_type
                                    ),
                                    SourceLocation {
                                        line: member.line,
                                        type_name: Some(decl.name.clone()),
                                    },
                                )
                                .with_fix(format!("{signature_key}->{}", method.return_type)),
                            );
                        }
                        Some(_) => {}
                    }
                }
            }
        }
    }
}

fn check_unknown_types(
    unit: &CompilationUnit,
    known: &KnownSymbols,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for (_, decl) in unit.types() {
        let mut referenced: Vec<(String, usize)> = Vec::new();
        for base in &decl.base_list {
            referenced.extend(type_idents(base).into_iter().map(|n| (n, decl.line)));
        }
        for member in &decl.members {
            if !member.return_type.is_empty() {
                referenced.extend(
                    type_idents(&member.return_type)
                        .into_iter()
                        .map(|n| (n, member.line)),
                );
            }
            for param in &member.parameters {
                referenced.extend(
                    type_idents(&param.type_name)
                        .into_iter()
                        .map(|n| (n, member.line)),
                );
            }
        }

        let mut reported: BTreeSet<String> = BTreeSet::new();
        for (name, line) in referenced {
            let resolution = known.resolve(&name);
            if matches!(resolution, Resolution::Known) || !reported.insert(name.clone()) {
                continue;
            }
            let mut diagnostic = Diagnostic::from_code(
                codes::TYPE_NOT_FOUND,
                format!("the type or namespace name '{name}' could not be found"),
                SourceLocation {
                    line,
                    type_name: Some(decl.name.clone()),
                },
            );
            // Only fixable when the fixed table can derive a using.
            match resolution {
                Resolution::NeedsUsing(ns) => diagnostic.suggested_fix = Some(ns.to_string()),
                _ => diagnostic.auto_fixable = false,
            }
            diagnostics.push(diagnostic);
        }
    }
}

/// Capitalized identifiers inside a type reference (`List<Order>` yields
/// `List` and `Order`). Identifiers touching a `.` on either side belong to
/// a qualified name and are skipped; fully-qualified references resolve on
/// their own.
fn type_idents(type_text: &str) -> Vec<String> {
    let Ok(tokens) = lex(type_text) else {
        return Vec::new();
    };
    let mut idents = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if let TokenKind::Ident(name) = &token.kind {
            let prev_dot = i > 0 && tokens[i - 1].is_punct('.');
            let next_dot = tokens.get(i + 1).is_some_and(|t| t.is_punct('.'));
            if !prev_dot && !next_dot && name.chars().next().is_some_and(char::is_uppercase) {
                idents.push(name.clone());
            }
        }
    }
    idents
}

fn check_ambiguous_references(
    unit: &CompilationUnit,
    ctx: &CompileContext<'_>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let ambiguous = ctx.catalog.ambiguous_simple_names();
    if ambiguous.is_empty() {
        return;
    }

    for (simple, fqns) in &ambiguous {
        let mut used_at: Option<(usize, String)> = None;
        'outer: for (_, decl) in unit.types() {
            for base in &decl.base_list {
                if type_idents(base).iter().any(|n| n == simple) {
                    used_at = Some((decl.line, decl.name.clone()));
                    break 'outer;
                }
            }
            for member in &decl.members {
                let mut texts: Vec<String> = vec![member.return_type.clone()];
                texts.extend(member.parameters.iter().map(|p| p.type_name.clone()));
                if let Some(init) = &member.initializer {
                    texts.push(init.clone());
                }
                match &member.body {
                    MemberBody::Block(b) | MemberBody::Expression(b) => texts.push(b.clone()),
                    MemberBody::None => {}
                }
                if texts.iter().any(|t| uses_unqualified(t, simple)) {
                    used_at = Some((member.line, decl.name.clone()));
                    break 'outer;
                }
            }
        }

        if let Some((line, type_name)) = used_at {
            let preferred = preferred_fqn(fqns).cloned().unwrap_or_default();
            diagnostics.push(
                Diagnostic::from_code(
                    codes::AMBIGUOUS_REFERENCE,
                    format!(
                        "'{simple}' is an ambiguous reference between {}",
                        fqns.join(" and ")
                    ),
                    SourceLocation {
                        line,
                        type_name: Some(type_name),
                    },
                )
                .with_fix(preferred),
            );
        }
    }
}

fn uses_unqualified(text: &str, simple: &str) -> bool {
    let Ok(tokens) = lex(text) else {
        return false;
    };
    let mut prev_was_dot = false;
    for token in &tokens {
        if let TokenKind::Ident(name) = &token.kind {
            if name == simple && !prev_was_dot {
                return true;
            }
        }
        prev_was_dot = token.is_punct('.');
    }
    false
}

fn dedup(diagnostics: &mut Vec<Diagnostic>) {
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    diagnostics.retain(|d| seen.insert((d.id.clone(), d.message.clone())));
}
