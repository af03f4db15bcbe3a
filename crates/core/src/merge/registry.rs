//! The type registry populated during merge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::syntax::{TypeDecl, TypeKind};

/// One declared top-level type observed during the merge parse phase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// `namespace.name`, or just `name` for the default bucket.
    pub fqn: String,
    pub simple_name: String,
    pub namespace: String,
    pub kind: TypeKind,
    /// Atom that produced this declaration.
    pub owner_atom_id: String,
    pub is_partial: bool,
    /// Rendered member signatures, in declaration order.
    pub members: Vec<String>,
}

impl RegistryEntry {
    pub fn from_decl(namespace: &str, decl: &TypeDecl, owner: &str) -> Self {
        let fqn = if namespace.is_empty() {
            decl.name.clone()
        } else {
            format!("{namespace}.{}", decl.name)
        };
        Self {
            fqn,
            simple_name: decl.name.clone(),
            namespace: namespace.to_string(),
            kind: decl.kind,
            owner_atom_id: owner.to_string(),
            is_partial: decl.modifiers.is_partial,
            members: decl.members.iter().map(|m| m.signature_text()).collect(),
        }
    }
}

/// Accumulates declarations and enforces the per-fqn invariant: at most one
/// non-partial entry, and multiple entries only when all are partial
/// classes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TypeRegistry {
    entries: Vec<RegistryEntry>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: RegistryEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Remove an entry by fqn and owner (used when a resolution drops a
    /// duplicate declaration).
    pub fn remove(&mut self, fqn: &str, owner: &str) {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.fqn == fqn && e.owner_atom_id == owner)
        {
            self.entries.remove(pos);
        }
    }

    /// Mark every entry of `fqn` partial.
    pub fn mark_partial(&mut self, fqn: &str) {
        for entry in &mut self.entries {
            if entry.fqn == fqn {
                entry.is_partial = true;
            }
        }
    }

    /// Entries grouped by fqn, in fqn order.
    pub fn by_fqn(&self) -> BTreeMap<&str, Vec<&RegistryEntry>> {
        let mut map: BTreeMap<&str, Vec<&RegistryEntry>> = BTreeMap::new();
        for entry in &self.entries {
            map.entry(entry.fqn.as_str()).or_default().push(entry);
        }
        map
    }

    /// Simple names declared under more than one fqn, with the fqns.
    pub fn ambiguous_simple_names(&self) -> BTreeMap<String, Vec<String>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in &self.entries {
            let fqns = map.entry(entry.simple_name.clone()).or_default();
            if !fqns.contains(&entry.fqn) {
                fqns.push(entry.fqn.clone());
            }
        }
        map.retain(|_, fqns| fqns.len() > 1);
        for fqns in map.values_mut() {
            fqns.sort();
        }
        map
    }

    /// Check the registry invariant after resolution.
    pub fn validate(&self) -> Result<()> {
        for (fqn, entries) in self.by_fqn() {
            if entries.len() > 1 {
                let all_partial_classes = entries
                    .iter()
                    .all(|e| e.kind == TypeKind::Class && e.is_partial);
                if !all_partial_classes {
                    return Err(Error::ConflictUnresolvable {
                        detail: format!(
                            "'{fqn}' has {} declarations that are not all partial classes",
                            entries.len()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Modifiers;

    fn entry(fqn: &str, owner: &str, partial: bool, kind: TypeKind) -> RegistryEntry {
        let (namespace, simple) = fqn.rsplit_once('.').unwrap_or(("", fqn));
        RegistryEntry {
            fqn: fqn.to_string(),
            simple_name: simple.to_string(),
            namespace: namespace.to_string(),
            kind,
            owner_atom_id: owner.to_string(),
            is_partial: partial,
            members: Vec::new(),
        }
    }

    #[test]
    fn from_decl_builds_fqn() {
        let decl = TypeDecl {
            kind: TypeKind::Class,
            modifiers: Modifiers::default(),
            name: "Order".to_string(),
            base_list: Vec::new(),
            members: Vec::new(),
            line: 1,
        };
        let e = RegistryEntry::from_decl("Models", &decl, "dto");
        assert_eq!(e.fqn, "Models.Order");
        assert_eq!(e.simple_name, "Order");
        assert!(!e.is_partial);
    }

    #[test]
    fn partial_classes_satisfy_the_invariant() {
        let mut registry = TypeRegistry::new();
        registry.insert(entry("Services.Svc", "a", true, TypeKind::Class));
        registry.insert(entry("Services.Svc", "b", true, TypeKind::Class));
        registry.validate().expect("all partial classes is legal");
    }

    #[test]
    fn mixed_partiality_violates_the_invariant() {
        let mut registry = TypeRegistry::new();
        registry.insert(entry("Services.Svc", "a", true, TypeKind::Class));
        registry.insert(entry("Services.Svc", "b", false, TypeKind::Class));
        assert!(registry.validate().is_err());
    }

    #[test]
    fn duplicate_enums_violate_the_invariant() {
        let mut registry = TypeRegistry::new();
        registry.insert(entry("Models.Status", "a", false, TypeKind::Enum));
        registry.insert(entry("Models.Status", "b", false, TypeKind::Enum));
        assert!(registry.validate().is_err());
    }

    #[test]
    fn ambiguity_detection_spans_namespaces() {
        let mut registry = TypeRegistry::new();
        registry.insert(entry("Models.Record", "a", false, TypeKind::Class));
        registry.insert(entry("Services.Record", "b", false, TypeKind::Class));
        registry.insert(entry("Models.Order", "c", false, TypeKind::Class));
        let ambiguous = registry.ambiguous_simple_names();
        assert_eq!(ambiguous.len(), 1);
        assert_eq!(
            ambiguous["Record"],
            vec!["Models.Record".to_string(), "Services.Record".to_string()]
        );
    }
}
