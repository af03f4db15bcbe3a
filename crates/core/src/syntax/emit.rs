//! Deterministic source emission.
//!
//! Given the same compilation unit, `emit_unit` produces byte-identical
//! output: usings are deduplicated and sorted, namespaces are sorted
//! lexicographically, and the default-namespace bucket comes last. Member
//! bodies are re-indented but otherwise preserved verbatim.

use std::collections::BTreeSet;

use super::ast::{CompilationUnit, Member, MemberBody, MemberKind, TypeDecl, TypeKind};

const INDENT: &str = "    ";

/// Render a whole unit.
pub fn emit_unit(unit: &CompilationUnit) -> String {
    let mut out = String::new();

    let usings: BTreeSet<&str> = unit.usings.iter().map(String::as_str).collect();
    for using in &usings {
        out.push_str("using ");
        out.push_str(using);
        out.push_str(";\n");
    }
    if !usings.is_empty() {
        out.push('\n');
    }

    let mut namespaces: Vec<_> = unit.namespaces.iter().filter(|n| !n.types.is_empty()).collect();
    namespaces.sort_by(|a, b| a.name.cmp(&b.name));

    for (i, ns) in namespaces.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str("namespace ");
        out.push_str(&ns.name);
        out.push_str("\n{\n");
        for (j, decl) in ns.types.iter().enumerate() {
            if j > 0 {
                out.push('\n');
            }
            emit_type(&mut out, decl, 1);
        }
        out.push_str("}\n");
    }

    for (i, decl) in unit.global_types.iter().enumerate() {
        if i > 0 || !namespaces.is_empty() {
            out.push('\n');
        }
        emit_type(&mut out, decl, 0);
    }

    out
}

/// Render a signatures-only view of the unit: method and constructor
/// bodies become bare semicolons, properties collapse to `{ get; set; }`,
/// field initializers are dropped. Used for type-contract extracts.
pub fn emit_signatures(unit: &CompilationUnit) -> String {
    let mut stripped = unit.clone();
    for ns in &mut stripped.namespaces {
        for decl in &mut ns.types {
            strip_type(decl);
        }
    }
    for decl in &mut stripped.global_types {
        strip_type(decl);
    }
    emit_unit(&stripped)
}

fn strip_type(decl: &mut TypeDecl) {
    if decl.kind == TypeKind::Enum {
        return;
    }
    decl.members.retain(|m| {
        !matches!(m.kind, MemberKind::Field)
            || m.modifiers.visibility.as_deref() == Some("public")
    });
    for member in &mut decl.members {
        match member.kind {
            MemberKind::Method | MemberKind::Constructor => {
                member.body = MemberBody::None;
            }
            MemberKind::Property => {
                member.body = MemberBody::Block("{ get; set; }".to_string());
                member.initializer = None;
            }
            MemberKind::Field => {
                member.initializer = None;
            }
            MemberKind::EnumVariant => {}
        }
    }
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

/// Render one type declaration at the given indent depth.
pub fn emit_type(out: &mut String, decl: &TypeDecl, depth: usize) {
    push_indent(out, depth);
    let mods = decl.modifiers.render();
    if !mods.is_empty() {
        out.push_str(&mods);
        out.push(' ');
    }
    out.push_str(decl.kind.keyword());
    out.push(' ');
    out.push_str(&decl.name);
    if !decl.base_list.is_empty() {
        out.push_str(" : ");
        out.push_str(&decl.base_list.join(", "));
    }
    out.push('\n');
    push_indent(out, depth);
    out.push_str("{\n");

    if decl.kind == TypeKind::Enum {
        let last = decl.members.len().saturating_sub(1);
        for (i, variant) in decl.members.iter().enumerate() {
            push_indent(out, depth + 1);
            out.push_str(&variant.name);
            if let Some(value) = &variant.initializer {
                out.push_str(" = ");
                out.push_str(value);
            }
            if i != last {
                out.push(',');
            }
            out.push('\n');
        }
    } else {
        for (i, member) in decl.members.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            emit_member(out, member, depth + 1);
        }
    }

    push_indent(out, depth);
    out.push_str("}\n");
}

fn emit_member(out: &mut String, member: &Member, depth: usize) {
    push_indent(out, depth);
    let mods = member.modifiers.render();
    if !mods.is_empty() {
        out.push_str(&mods);
        out.push(' ');
    }
    match member.kind {
        MemberKind::Constructor => {
            out.push_str(&member.name);
            emit_parameters(out, member);
        }
        MemberKind::Method => {
            out.push_str(&member.return_type);
            out.push(' ');
            out.push_str(&member.name);
            emit_parameters(out, member);
        }
        MemberKind::Property | MemberKind::Field => {
            out.push_str(&member.return_type);
            out.push(' ');
            out.push_str(&member.name);
        }
        MemberKind::EnumVariant => {
            out.push_str(&member.name);
        }
    }

    match &member.body {
        MemberBody::Block(body) => {
            if member.kind == MemberKind::Property {
                // Auto-properties stay on one line.
                out.push(' ');
                out.push_str(&collapse_if_trivial(body));
                if let Some(init) = &member.initializer {
                    out.push_str(" = ");
                    out.push_str(init);
                    out.push(';');
                }
                out.push('\n');
            } else {
                out.push('\n');
                out.push_str(&reindent_block(body, depth));
                out.push('\n');
            }
        }
        MemberBody::Expression(expr) => {
            out.push(' ');
            out.push_str(expr.trim());
            out.push('\n');
        }
        MemberBody::None => {
            if let Some(init) = &member.initializer {
                out.push_str(" = ");
                out.push_str(init);
            }
            out.push_str(";\n");
        }
    }
}

fn emit_parameters(out: &mut String, member: &Member) {
    out.push('(');
    let params: Vec<String> = member.parameters.iter().map(|p| p.render()).collect();
    out.push_str(&params.join(", "));
    out.push(')');
}

/// `{ get; set; }`-style bodies collapse to one line; anything with a
/// newline keeps its shape.
fn collapse_if_trivial(body: &str) -> String {
    if body.contains('\n') {
        let collapsed: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed
    } else {
        body.to_string()
    }
}

/// Re-indent a captured block so the opening brace sits at `depth`,
/// preserving the body's interior relative indentation.
fn reindent_block(body: &str, depth: usize) -> String {
    let lines: Vec<&str> = body.lines().collect();
    if lines.len() <= 1 {
        let mut out = String::new();
        push_indent(&mut out, depth);
        out.push_str(body.trim());
        return out;
    }

    // Minimal indentation across non-empty interior lines.
    let min_indent = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out = String::new();
    for (i, raw) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let line = if i == 0 {
            raw.trim_start()
        } else if raw.trim().is_empty() {
            ""
        } else {
            &raw[min_indent.min(raw.len() - raw.trim_start().len())..]
        };
        if !line.is_empty() {
            push_indent(&mut out, depth);
            out.push_str(line);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_unit;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn emission_is_deterministic() {
        let src = r#"
using Zeta;
using Alpha;
using Zeta;

namespace Services { public class B { } }
namespace Models { public class A { public int Count { get; set; } } }
"#;
        let unit = parse_unit(src).expect("parse");
        let first = emit_unit(&unit);
        let second = emit_unit(&unit);
        assert_eq!(first, second);
        // Usings deduplicated and sorted, namespaces sorted.
        let alpha = first.find("using Alpha;").expect("alpha");
        let zeta = first.find("using Zeta;").expect("zeta");
        assert!(alpha < zeta);
        assert_eq!(first.matches("using Zeta;").count(), 1);
        let models = first.find("namespace Models").expect("models");
        let services = first.find("namespace Services").expect("services");
        assert!(models < services);
    }

    #[test]
    fn round_trip_parses_back() {
        let src = r#"
namespace Models
{
    public enum Color
    {
        Red,
        Green = 5
    }

    public class Shape
    {
        public Color Fill { get; set; }

        public int Area()
        {
            return 0;
        }
    }
}
"#;
        let unit = parse_unit(src).expect("parse");
        let emitted = emit_unit(&unit);
        let reparsed = parse_unit(&emitted).expect("reparse emitted");
        assert_eq!(unit.namespaces.len(), reparsed.namespaces.len());
        let shape = &reparsed.namespaces[0].types[1];
        assert_eq!(shape.members.len(), 2);
        assert_eq!(
            reparsed.namespaces[0].types[0].members[1].initializer.as_deref(),
            Some("5")
        );
    }

    #[test]
    fn emitted_fixed_point() {
        // Emitting an already-emitted unit changes nothing.
        let src = "namespace Models { public class A { public int N { get; set; } } }";
        let unit = parse_unit(src).expect("parse");
        let once = emit_unit(&unit);
        let twice = emit_unit(&parse_unit(&once).expect("reparse"));
        assert_eq!(once, twice);
    }

    #[test]
    fn signature_extract_is_a_fixed_point() {
        let src = r#"
namespace Services
{
    public class Svc
    {
        private readonly int _hits;

        public int Count { get; set; } = 3;

        public string Greet(string name)
        {
            return name;
        }
    }
}
"#;
        let unit = parse_unit(src).expect("parse");
        let extract = emit_signatures(&unit);
        // Public signatures survive; bodies, initializers, and private
        // fields do not.
        assert!(extract.contains("public string Greet(string name);"));
        assert!(extract.contains("public int Count { get; set; }"));
        assert!(!extract.contains("return name;"));
        assert!(!extract.contains("_hits"));
        assert!(!extract.contains("= 3"));
        // Re-extracting the extract changes nothing.
        let reparsed = parse_unit(&extract).expect("reparse");
        assert_eq!(emit_signatures(&reparsed), extract);
    }

    #[test]
    fn method_bodies_are_reindented() {
        let src = "public class A { public void Go()\n{\nvar x = 1;\n} }";
        let unit = parse_unit(src).expect("parse");
        let emitted = emit_unit(&unit);
        assert!(emitted.contains("    public void Go()\n    {\n"));
        assert!(emitted.contains("var x = 1;"));
    }
}
