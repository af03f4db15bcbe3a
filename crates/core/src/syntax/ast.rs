//! Syntax tree types for generated fragments.

use serde::{Deserialize, Serialize};

/// Top-level declaration kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Struct,
    Record,
}

impl TypeKind {
    /// Keyword as written in source.
    pub fn keyword(&self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Interface => "interface",
            TypeKind::Enum => "enum",
            TypeKind::Struct => "struct",
            TypeKind::Record => "record",
        }
    }
}

/// Declaration modifiers that matter to the pipeline. Anything else the
/// model emits (e.g. `async` on members) is preserved verbatim in
/// [`Modifiers::extra`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default)]
    pub is_partial: bool,
    #[serde(default)]
    pub is_sealed: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_readonly: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<String>,
}

impl Modifiers {
    /// Render in canonical order: visibility, static, abstract/sealed,
    /// readonly, partial, extras.
    pub fn render(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(v) = &self.visibility {
            parts.push(v);
        }
        if self.is_static {
            parts.push("static");
        }
        if self.is_abstract {
            parts.push("abstract");
        }
        if self.is_sealed {
            parts.push("sealed");
        }
        if self.is_readonly {
            parts.push("readonly");
        }
        for extra in &self.extra {
            parts.push(extra);
        }
        if self.is_partial {
            parts.push("partial");
        }
        parts.join(" ")
    }
}

/// A method or constructor parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub type_name: String,
    pub name: String,
}

impl Parameter {
    pub fn render(&self) -> String {
        format!("{} {}", self.type_name, self.name)
    }
}

/// Member classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Method,
    Property,
    Field,
    Constructor,
    EnumVariant,
}

/// How a member ends: a balanced block, an expression body, or a bare
/// semicolon (interface/abstract members, fields).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberBody {
    /// `{ ... }`, raw text including the braces.
    Block(String),
    /// `=> expr;`, raw text including the arrow and semicolon.
    Expression(String),
    /// `;` or an enum variant with no initializer.
    None,
}

/// A type member. Bodies are opaque; signatures are structured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub kind: MemberKind,
    pub modifiers: Modifiers,
    /// Return type for methods, declared type for fields/properties,
    /// empty for constructors and enum variants.
    #[serde(default)]
    pub return_type: String,
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub body: MemberBody,
    /// Field initializer or enum variant value, without the `=`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initializer: Option<String>,
    /// 1-based line of the declaration in the original fragment.
    #[serde(default)]
    pub line: usize,
}

impl Member {
    /// Signature used for duplicate detection and contract comparison:
    /// name plus ordered parameter types. Return type is deliberately
    /// excluded so that return-type mismatches collide rather than coexist.
    pub fn signature_key(&self) -> String {
        let params: Vec<&str> = self
            .parameters
            .iter()
            .map(|p| p.type_name.as_str())
            .collect();
        format!("{}({})", self.name, params.join(","))
    }

    /// Full rendered signature including return type, for extracts.
    pub fn signature_text(&self) -> String {
        let params: Vec<String> = self.parameters.iter().map(Parameter::render).collect();
        match self.kind {
            MemberKind::Method => {
                format!("{} {}({})", self.return_type, self.name, params.join(", "))
            }
            MemberKind::Constructor => format!("{}({})", self.name, params.join(", ")),
            MemberKind::Property | MemberKind::Field => {
                format!("{} {}", self.return_type, self.name)
            }
            MemberKind::EnumVariant => self.name.clone(),
        }
    }
}

/// A top-level type declaration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub kind: TypeKind,
    pub modifiers: Modifiers,
    pub name: String,
    /// Base types and implemented interfaces, in source order.
    #[serde(default)]
    pub base_list: Vec<String>,
    #[serde(default)]
    pub members: Vec<Member>,
    /// 1-based line of the declaration in the original fragment.
    #[serde(default)]
    pub line: usize,
}

impl TypeDecl {
    /// Find a member index by signature key.
    pub fn find_member(&self, signature_key: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.signature_key() == signature_key)
    }

    /// Whether any base-list entry matches `name` by simple or qualified name.
    pub fn inherits_from(&self, name: &str) -> bool {
        self.base_list
            .iter()
            .any(|b| b == name || b.rsplit('.').next() == Some(name))
    }
}

/// A namespace block and the types it declares.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NamespaceDecl {
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeDecl>,
}

/// A parsed fragment: usings, namespaces, and any types declared outside a
/// namespace (the default bucket).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationUnit {
    #[serde(default)]
    pub usings: Vec<String>,
    #[serde(default)]
    pub namespaces: Vec<NamespaceDecl>,
    #[serde(default)]
    pub global_types: Vec<TypeDecl>,
}

impl CompilationUnit {
    /// Iterate `(namespace, type)` over every declared type. Global types
    /// report an empty namespace.
    pub fn types(&self) -> impl Iterator<Item = (&str, &TypeDecl)> {
        self.namespaces
            .iter()
            .flat_map(|ns| ns.types.iter().map(move |t| (ns.name.as_str(), t)))
            .chain(self.global_types.iter().map(|t| ("", t)))
    }

    /// Mutable lookup of a type by namespace and name.
    pub fn type_mut(&mut self, namespace: &str, name: &str) -> Option<&mut TypeDecl> {
        if namespace.is_empty() {
            return self.global_types.iter_mut().find(|t| t.name == name);
        }
        self.namespaces
            .iter_mut()
            .find(|ns| ns.name == namespace)?
            .types
            .iter_mut()
            .find(|t| t.name == name)
    }

    /// Namespace (or default bucket) that declares `name`, if any.
    pub fn namespace_of(&self, name: &str) -> Option<&str> {
        self.types()
            .find(|(_, t)| t.name == name)
            .map(|(ns, _)| ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modifiers_render_in_canonical_order() {
        let m = Modifiers {
            visibility: Some("public".to_string()),
            is_sealed: true,
            is_partial: true,
            ..Modifiers::default()
        };
        assert_eq!(m.render(), "public sealed partial");
    }

    #[test]
    fn signature_key_ignores_return_type() {
        let a = Member {
            kind: MemberKind::Method,
            modifiers: Modifiers::default(),
            return_type: "int".to_string(),
            name: "Compute".to_string(),
            parameters: vec![Parameter {
                type_name: "string".to_string(),
                name: "input".to_string(),
            }],
            body: MemberBody::None,
            initializer: None,
            line: 1,
        };
        let mut b = a.clone();
        b.return_type = "long".to_string();
        assert_eq!(a.signature_key(), b.signature_key());
        assert_eq!(a.signature_key(), "Compute(string)");
    }

    #[test]
    fn inherits_from_matches_qualified_names() {
        let t = TypeDecl {
            kind: TypeKind::Class,
            modifiers: Modifiers::default(),
            name: "Reporter".to_string(),
            base_list: vec!["Services.AbstractReporter".to_string()],
            members: Vec::new(),
            line: 1,
        };
        assert!(t.inherits_from("AbstractReporter"));
        assert!(t.inherits_from("Services.AbstractReporter"));
        assert!(!t.inherits_from("Reporter"));
    }
}
