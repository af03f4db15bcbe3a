//! Tree rewrites for auto-repair and merge resolution.
//!
//! Every rewrite operates on the parsed tree or on token boundaries inside
//! captured bodies; none of them does raw substring surgery, so identifiers
//! embedded in string literals or longer names are never touched.

use super::ast::{
    CompilationUnit, Member, MemberBody, MemberKind, Modifiers, Parameter, TypeDecl,
};
use super::lexer::{lex, TokenKind};

/// Add a using directive if not already present.
pub fn add_using(unit: &mut CompilationUnit, namespace: &str) {
    if !unit.usings.iter().any(|u| u == namespace) {
        unit.usings.push(namespace.to_string());
    }
}

/// Insert a public method stub whose body throws `NotImplementedException`.
/// The signature is taken verbatim from the catalog contract.
pub fn insert_method_stub(
    decl: &mut TypeDecl,
    name: &str,
    return_type: &str,
    parameters: &[(String, String)],
) {
    let parameters: Vec<Parameter> = parameters
        .iter()
        .map(|(type_name, name)| Parameter {
            type_name: type_name.clone(),
            name: name.clone(),
        })
        .collect();
    let member = Member {
        kind: MemberKind::Method,
        modifiers: Modifiers {
            visibility: Some("public".to_string()),
            ..Modifiers::default()
        },
        return_type: return_type.to_string(),
        name: name.to_string(),
        parameters,
        body: MemberBody::Block(
            "{\n    throw new NotImplementedException();\n}".to_string(),
        ),
        initializer: None,
        line: 0,
    };
    decl.members.push(member);
}

/// Remove `base_name` from the base list and inject a
/// `private readonly` composition field of that type instead.
pub fn replace_inheritance_with_composition(decl: &mut TypeDecl, base_name: &str) {
    let before = decl.base_list.len();
    decl.base_list
        .retain(|b| b != base_name && b.rsplit('.').next() != Some(base_name));
    if decl.base_list.len() == before {
        return;
    }
    let simple = base_name.rsplit('.').next().unwrap_or(base_name);
    let field = Member {
        kind: MemberKind::Field,
        modifiers: Modifiers {
            visibility: Some("private".to_string()),
            is_readonly: true,
            ..Modifiers::default()
        },
        return_type: simple.to_string(),
        name: composition_field_name(simple),
        parameters: Vec::new(),
        body: MemberBody::None,
        initializer: None,
        line: 0,
    };
    decl.members.insert(0, field);
}

/// `AbstractReporter` → `_abstractReporter`.
pub fn composition_field_name(type_name: &str) -> String {
    let mut chars = type_name.chars();
    match chars.next() {
        Some(first) => format!("_{}{}", first.to_lowercase(), chars.as_str()),
        None => "_inner".to_string(),
    }
}

/// Rewrite the member's return type to the expected literal.
pub fn set_return_type(decl: &mut TypeDecl, signature_key: &str, return_type: &str) -> bool {
    match decl.find_member(signature_key) {
        Some(idx) => {
            decl.members[idx].return_type = return_type.to_string();
            true
        }
        None => false,
    }
}

/// Mark a declaration `partial`.
pub fn make_partial(decl: &mut TypeDecl) {
    decl.modifiers.is_partial = true;
}

/// Qualify every free-standing occurrence of `simple` with `fqn`, across
/// base lists, member types, parameter types, initializers, and bodies.
/// Occurrences already qualified (preceded by `.`) are left alone.
/// Returns whether anything changed.
pub fn qualify_simple_name(unit: &mut CompilationUnit, simple: &str, fqn: &str) -> bool {
    let mut changed = false;
    for ns in &mut unit.namespaces {
        for decl in &mut ns.types {
            changed |= qualify_type_decl(decl, simple, fqn);
        }
    }
    for decl in &mut unit.global_types {
        changed |= qualify_type_decl(decl, simple, fqn);
    }
    changed
}

/// Qualify occurrences inside one declaration. Returns whether anything
/// changed.
pub fn qualify_type_decl(decl: &mut TypeDecl, simple: &str, fqn: &str) -> bool {
    let mut changed = false;
    for base in &mut decl.base_list {
        if base == simple {
            *base = fqn.to_string();
            changed = true;
        }
    }
    for member in &mut decl.members {
        let rewritten = qualify_in_text(&member.return_type, simple, fqn);
        if rewritten != member.return_type {
            member.return_type = rewritten;
            changed = true;
        }
        for param in &mut member.parameters {
            let rewritten = qualify_in_text(&param.type_name, simple, fqn);
            if rewritten != param.type_name {
                param.type_name = rewritten;
                changed = true;
            }
        }
        if let Some(init) = &member.initializer {
            let rewritten = qualify_in_text(init, simple, fqn);
            if rewritten != *init {
                member.initializer = Some(rewritten);
                changed = true;
            }
        }
        match &member.body {
            MemberBody::Block(text) => {
                let rewritten = qualify_in_text(text, simple, fqn);
                if rewritten != *text {
                    member.body = MemberBody::Block(rewritten);
                    changed = true;
                }
            }
            MemberBody::Expression(text) => {
                let rewritten = qualify_in_text(text, simple, fqn);
                if rewritten != *text {
                    member.body = MemberBody::Expression(rewritten);
                    changed = true;
                }
            }
            MemberBody::None => {}
        }
    }
    changed
}

/// Token-boundary replacement of `simple` with `fqn` inside raw text.
/// Falls back to the unmodified text when the snippet does not tokenize.
pub fn qualify_in_text(text: &str, simple: &str, fqn: &str) -> String {
    let Ok(tokens) = lex(text) else {
        return text.to_string();
    };
    let mut out = String::new();
    let mut cursor = 0usize;
    let mut prev_was_dot = false;
    for token in &tokens {
        let is_match = matches!(&token.kind, TokenKind::Ident(s) if s == simple);
        if is_match && !prev_was_dot {
            out.push_str(&text[cursor..token.start]);
            out.push_str(fqn);
            cursor = token.end;
        }
        prev_was_dot = matches!(&token.kind, TokenKind::Punct('.'));
    }
    out.push_str(&text[cursor..]);
    out
}
