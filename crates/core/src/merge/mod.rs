//! The project merge and deduplication pipeline.
//!
//! Runs once, after the scheduler quiesces with at least one completed
//! atom: parse every fragment, populate the type registry, resolve
//! conflicts per the fixed policy table, emit one deterministic project,
//! and run the auto-repair pipeline a final time over the whole. Given the
//! same atoms, fragments, and catalog, the emitted project is
//! byte-identical.

pub mod conflict;
pub mod registry;

pub use conflict::{Conflict, ConflictKind, ConflictResolution};
pub use registry::{RegistryEntry, TypeRegistry};

use std::collections::BTreeSet;

use crate::blackboard::Blackboard;
use crate::compile::{preferred_fqn, CompileContext};
use crate::config::{RunConfig, MERGE_REPAIR_PASSES};
use crate::diagnostics::Diagnostic;
use crate::error::{Error, Result};
use crate::repair::repair_with_budget;
use crate::syntax::{
    emit_unit, parse_unit, rewrite, CompilationUnit, Member, NamespaceDecl, TypeDecl, TypeKind,
};

/// Result of the merge pipeline.
#[derive(Clone, Debug)]
pub struct MergeOutput {
    /// The assembled project source.
    pub source: String,
    /// Every conflict detected, with its resolution.
    pub conflicts: Vec<Conflict>,
    /// Diagnostics remaining after the final repair pass.
    pub diagnostics: Vec<Diagnostic>,
    /// The populated registry after resolution.
    pub registry: TypeRegistry,
}

impl MergeOutput {
    /// Resolutions that actually changed the project.
    pub fn applied_resolutions(&self) -> usize {
        self.conflicts.iter().filter(|c| c.applied).count()
    }
}

/// A declaration plus its provenance, tracked through resolution.
struct OwnedDecl {
    namespace: String,
    owner: String,
    decl: TypeDecl,
    removed: bool,
}

impl OwnedDecl {
    fn fqn(&self) -> String {
        if self.namespace.is_empty() {
            self.decl.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.decl.name)
        }
    }
}

/// Merge every completed fragment into one project.
pub fn merge_project(board: &Blackboard, config: &RunConfig) -> Result<MergeOutput> {
    // Phase 1: parse all. Completed atoms iterate in id order, so the
    // working set is deterministic.
    let mut usings: BTreeSet<String> = BTreeSet::new();
    let mut decls: Vec<OwnedDecl> = Vec::new();

    for atom in board.completed_atoms() {
        if atom.generated_fragment.is_empty() {
            continue;
        }
        let unit = match parse_unit(&atom.generated_fragment) {
            Ok(unit) => unit,
            Err(err) => {
                tracing::warn!(atom = %atom.id, error = %err, "skipping unparseable fragment at merge");
                continue;
            }
        };
        usings.extend(unit.usings.iter().cloned());
        for NamespaceDecl { name, types } in unit.namespaces {
            for decl in types {
                decls.push(OwnedDecl {
                    namespace: name.clone(),
                    owner: atom.id.clone(),
                    decl,
                    removed: false,
                });
            }
        }
        for decl in unit.global_types {
            decls.push(OwnedDecl {
                namespace: String::new(),
                owner: atom.id.clone(),
                decl,
                removed: false,
            });
        }
    }

    // Phase 2: populate the registry.
    let mut registry = TypeRegistry::new();
    for owned in &decls {
        registry.insert(RegistryEntry::from_decl(&owned.namespace, &owned.decl, &owned.owner));
    }

    // Phase 3: resolve duplicate types, then ambiguous simple names.
    let mut conflicts = Vec::new();
    resolve_duplicate_types(&mut decls, &mut registry, &mut conflicts, config)?;
    resolve_ambiguous_names(&mut decls, &registry, &mut conflicts);

    // Phase 4: emit. Fragment boundaries are gone; contents group by
    // namespace, sorted, with the default bucket last.
    let mut unit = CompilationUnit {
        usings: usings.into_iter().collect(),
        namespaces: Vec::new(),
        global_types: Vec::new(),
    };
    for owned in decls.into_iter().filter(|d| !d.removed) {
        if owned.namespace.is_empty() {
            unit.global_types.push(owned.decl);
        } else {
            match unit.namespaces.iter_mut().find(|ns| ns.name == owned.namespace) {
                Some(ns) => ns.types.push(owned.decl),
                None => unit.namespaces.push(NamespaceDecl {
                    name: owned.namespace,
                    types: vec![owned.decl],
                }),
            }
        }
    }
    let assembled = emit_unit(&unit);

    // Phase 5: one whole-project auto-repair pass to pick up cross-fragment
    // missing imports and ambiguities.
    let owned_types: Vec<String> = unit
        .types()
        .map(|(_, decl)| decl.name.clone())
        .collect();
    let ctx = CompileContext {
        catalog: &board.catalog,
        dependency_extracts: &[],
        owned_types: &owned_types,
    };
    let repaired = repair_with_budget(&assembled, &ctx, MERGE_REPAIR_PASSES);

    registry.validate()?;
    tracing::info!(
        types = registry.len(),
        conflicts = conflicts.len(),
        remaining_diagnostics = repaired.output.diagnostics.len(),
        "merge complete"
    );

    Ok(MergeOutput {
        source: repaired.source,
        conflicts,
        diagnostics: repaired.output.diagnostics,
        registry,
    })
}

/// Pairwise resolution of same-fqn declarations against the first
/// occurrence, per the policy table.
fn resolve_duplicate_types(
    decls: &mut [OwnedDecl],
    registry: &mut TypeRegistry,
    conflicts: &mut Vec<Conflict>,
    config: &RunConfig,
) -> Result<()> {
    let fqns: Vec<String> = {
        let mut seen = BTreeSet::new();
        decls
            .iter()
            .map(OwnedDecl::fqn)
            .filter(|f| seen.insert(f.clone()))
            .collect()
    };

    for fqn in fqns {
        let group: Vec<usize> = decls
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.removed && d.fqn() == fqn)
            .map(|(i, _)| i)
            .collect();
        if group.len() < 2 {
            continue;
        }

        let first_idx = group[0];
        for &second_idx in &group[1..] {
            let first_entry =
                RegistryEntry::from_decl(&decls[first_idx].namespace, &decls[first_idx].decl, &decls[first_idx].owner);
            let second_entry =
                RegistryEntry::from_decl(&decls[second_idx].namespace, &decls[second_idx].decl, &decls[second_idx].owner);

            let both_classes = decls[first_idx].decl.kind == TypeKind::Class
                && decls[second_idx].decl.kind == TypeKind::Class;
            let compatible = both_classes
                && signatures_compatible(&decls[first_idx].decl, &decls[second_idx].decl);

            if compatible {
                // MergeAsPartial: both sides get the partial modifier, then
                // exact-duplicate members are removed from the second part.
                let mut applied = false;
                if !decls[first_idx].decl.modifiers.is_partial {
                    rewrite::make_partial(&mut decls[first_idx].decl);
                    applied = true;
                }
                if !decls[second_idx].decl.modifiers.is_partial {
                    rewrite::make_partial(&mut decls[second_idx].decl);
                    applied = true;
                }
                registry.mark_partial(&fqn);
                conflicts.push(Conflict {
                    kind: ConflictKind::DuplicateType,
                    first: first_entry.clone(),
                    second: second_entry.clone(),
                    resolution: ConflictResolution::MergeAsPartial,
                    detail: format!("'{fqn}' declared by both; merged as partial class"),
                    applied,
                });

                resolve_duplicate_members(
                    decls,
                    first_idx,
                    second_idx,
                    &first_entry,
                    &second_entry,
                    conflicts,
                    config,
                )?;
            } else {
                decls[second_idx].removed = true;
                registry.remove(&fqn, &second_entry.owner_atom_id);
                conflicts.push(Conflict {
                    kind: ConflictKind::DuplicateType,
                    first: first_entry,
                    second: second_entry,
                    resolution: ConflictResolution::KeepFirst,
                    detail: if both_classes {
                        format!("'{fqn}' declared twice with incompatible signatures; second dropped")
                    } else {
                        format!("'{fqn}' declared twice (non-class); second dropped")
                    },
                    applied: true,
                });
            }
        }
    }
    Ok(())
}

/// Overlapping member signature keys must agree on the full signature for
/// two class parts to merge.
fn signatures_compatible(first: &TypeDecl, second: &TypeDecl) -> bool {
    for member in &second.members {
        if let Some(idx) = first.find_member(&member.signature_key()) {
            if first.members[idx].signature_text() != member.signature_text() {
                return false;
            }
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
fn resolve_duplicate_members(
    decls: &mut [OwnedDecl],
    first_idx: usize,
    second_idx: usize,
    first_entry: &RegistryEntry,
    second_entry: &RegistryEntry,
    conflicts: &mut Vec<Conflict>,
    config: &RunConfig,
) -> Result<()> {
    let overlapping: Vec<String> = decls[second_idx]
        .decl
        .members
        .iter()
        .map(Member::signature_key)
        .filter(|key| decls[first_idx].decl.find_member(key).is_some())
        .collect();

    for key in overlapping {
        let first_member_idx = decls[first_idx]
            .decl
            .find_member(&key)
            .unwrap_or_else(|| unreachable!("overlap computed above"));
        let second_member_idx = decls[second_idx]
            .decl
            .find_member(&key)
            .unwrap_or_else(|| unreachable!("overlap computed above"));
        let identical_bodies = decls[first_idx].decl.members[first_member_idx].body
            == decls[second_idx].decl.members[second_member_idx].body;

        if identical_bodies {
            decls[second_idx].decl.members.remove(second_member_idx);
            conflicts.push(Conflict {
                kind: ConflictKind::DuplicateMember,
                first: first_entry.clone(),
                second: second_entry.clone(),
                resolution: ConflictResolution::RemoveDuplicate,
                detail: format!("duplicate member '{key}' removed from the second part"),
                applied: true,
            });
        } else if config.interactive_merge {
            // Interactive mode keeps the first body rather than prompting.
            decls[second_idx].decl.members.remove(second_member_idx);
            tracing::warn!(
                member = %key,
                "conflicting member bodies; keeping the first part's implementation"
            );
            conflicts.push(Conflict {
                kind: ConflictKind::DuplicateMember,
                first: first_entry.clone(),
                second: second_entry.clone(),
                resolution: ConflictResolution::KeepFirst,
                detail: format!("member '{key}' has conflicting bodies; first kept"),
                applied: true,
            });
        } else {
            conflicts.push(Conflict {
                kind: ConflictKind::DuplicateMember,
                first: first_entry.clone(),
                second: second_entry.clone(),
                resolution: ConflictResolution::FailFast,
                detail: format!("member '{key}' has conflicting bodies"),
                applied: false,
            });
            return Err(Error::ConflictUnresolvable {
                detail: format!(
                    "member '{}' of '{}' is implemented differently by '{}' and '{}'",
                    key, first_entry.fqn, first_entry.owner_atom_id, second_entry.owner_atom_id
                ),
            });
        }
    }
    Ok(())
}

/// Rewrite unqualified references to ambiguous simple names to the
/// preferred fqn. Declarations living in a namespace that itself declares
/// the name are left alone; they already resolve locally.
fn resolve_ambiguous_names(
    decls: &mut [OwnedDecl],
    registry: &TypeRegistry,
    conflicts: &mut Vec<Conflict>,
) {
    let ambiguous = registry.ambiguous_simple_names();
    for (simple, fqns) in ambiguous {
        let Some(preferred) = preferred_fqn(&fqns).cloned() else {
            continue;
        };
        let declaring_namespaces: BTreeSet<String> = fqns
            .iter()
            .filter_map(|fqn| fqn.rsplit_once('.').map(|(ns, _)| ns.to_string()))
            .collect();

        let mut applied = false;
        for owned in decls.iter_mut().filter(|d| !d.removed) {
            if declaring_namespaces.contains(&owned.namespace) {
                continue;
            }
            applied |= rewrite::qualify_type_decl(&mut owned.decl, &simple, &preferred);
        }

        let entries: Vec<&RegistryEntry> = registry
            .entries()
            .iter()
            .filter(|e| e.simple_name == simple)
            .collect();
        if let [first, second, ..] = entries.as_slice() {
            conflicts.push(Conflict {
                kind: ConflictKind::AmbiguousSimpleName,
                first: (*first).clone(),
                second: (*second).clone(),
                resolution: ConflictResolution::UseFullyQualifiedName,
                detail: format!(
                    "'{simple}' may mean {}; unqualified references rewritten to '{preferred}'",
                    fqns.join(" or ")
                ),
                applied,
            });
        }
    }
}
