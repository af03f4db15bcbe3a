//! The merge conflict taxonomy.

use serde::{Deserialize, Serialize};

use super::registry::RegistryEntry;

/// What collided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    DuplicateType,
    DuplicateMember,
    AmbiguousSimpleName,
}

/// How a conflict is resolved. Exactly one resolution fires per conflict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    KeepFirst,
    MergeAsPartial,
    RemoveDuplicate,
    UseFullyQualifiedName,
    /// No automatic resolution; fatal in non-interactive mode.
    FailFast,
}

/// A detected conflict with the two offending entries and the resolution
/// chosen by policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub first: RegistryEntry,
    pub second: RegistryEntry,
    pub resolution: ConflictResolution,
    /// Human-readable account of what collided.
    pub detail: String,
    /// Whether applying the resolution actually changed the project.
    /// Re-merging already-resolved output records conflicts with
    /// `applied == false`.
    pub applied: bool,
}

impl Conflict {
    pub fn describe(&self) -> String {
        format!(
            "{:?} on '{}' ({} vs {}): {:?}: {}",
            self.kind,
            self.first.fqn,
            self.first.owner_atom_id,
            self.second.owner_atom_id,
            self.resolution,
            self.detail
        )
    }
}
