//! Emission of the generated project tree.
//!
//! One file per declared top-level type, under directories derived from the
//! namespace. Partial-class parts of the same type share one file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::checkpoint::atomic_write;
use crate::error::Result;
use crate::syntax::{emit_unit, parse_unit, CompilationUnit, NamespaceDecl, TypeDecl};

/// Write the merged project under `project_dir`. Returns the written paths
/// in deterministic order.
pub fn emit_project_tree(merged_source: &str, project_dir: &Path) -> Result<Vec<PathBuf>> {
    let unit = parse_unit(merged_source).map_err(|e| crate::error::Error::ConflictUnresolvable {
        detail: format!("merged project does not parse: {e}"),
    })?;

    // Group declarations by (namespace, type name); partial parts stay
    // together.
    let mut groups: BTreeMap<(String, String), Vec<TypeDecl>> = BTreeMap::new();
    for (namespace, decl) in unit.types() {
        groups
            .entry((namespace.to_string(), decl.name.clone()))
            .or_default()
            .push(decl.clone());
    }

    let mut written = Vec::new();
    for ((namespace, type_name), decls) in groups {
        let mut dir = project_dir.to_path_buf();
        for segment in namespace.split('.').filter(|s| !s.is_empty()) {
            dir.push(segment);
        }
        std::fs::create_dir_all(&dir)?;

        let file_unit = CompilationUnit {
            usings: unit.usings.clone(),
            namespaces: if namespace.is_empty() {
                Vec::new()
            } else {
                vec![NamespaceDecl {
                    name: namespace.clone(),
                    types: decls.clone(),
                }]
            },
            global_types: if namespace.is_empty() { decls } else { Vec::new() },
        };

        let path = dir.join(format!("{}.cs", sanitize_file_stem(&type_name)));
        atomic_write(&path, emit_unit(&file_unit).as_bytes())?;
        written.push(path);
    }

    tracing::info!(files = written.len(), dir = %project_dir.display(), "project tree written");
    Ok(written)
}

/// Generic arity markers do not belong in file names (`Repository<T>` →
/// `Repository`).
fn sanitize_file_stem(type_name: &str) -> &str {
    type_name.split('<').next().unwrap_or(type_name)
}
