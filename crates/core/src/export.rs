//! Documentation exports.
//!
//! After a run, three views of the result are written next to the project:
//! a human-readable `PROJECT.md`, a structured `project.json`, and a
//! one-record-per-line `training.jsonl` suitable for fine-tuning
//! collection.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::blackboard::Blackboard;
use crate::checkpoint::atomic_write;
use crate::error::Result;
use crate::merge::MergeOutput;

/// One atom as exported to JSON and JSONL.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct AtomRecord {
    id: String,
    kind: crate::atom::AtomKind,
    namespace: String,
    description: String,
    status: crate::atom::AtomStatus,
    retry_count: u32,
    summary: String,
    fragment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ProjectExport {
    run_id: String,
    request: String,
    summary: String,
    atoms: Vec<AtomRecord>,
    packages: Vec<crate::schemas::PackageRef>,
    conflicts: Vec<crate::merge::Conflict>,
}

/// Write all three exports. Conflict data comes from the merge output when
/// the run got that far.
pub fn write_exports(
    board: &Blackboard,
    merge: Option<&MergeOutput>,
    dir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let atoms: Vec<AtomRecord> = board
        .atoms
        .values()
        .map(|atom| AtomRecord {
            id: atom.id.clone(),
            kind: atom.kind,
            namespace: atom.namespace.clone(),
            description: atom.description.clone(),
            status: atom.status.clone(),
            retry_count: atom.retry_count,
            summary: atom.summary.clone(),
            fragment: atom.generated_fragment.clone(),
        })
        .collect();

    let export = ProjectExport {
        run_id: board.run_id.clone(),
        request: board.request.clone(),
        summary: board.summary.clone(),
        atoms,
        packages: board.packages.clone(),
        conflicts: merge.map(|m| m.conflicts.clone()).unwrap_or_default(),
    };

    atomic_write(
        &dir.join("project.json"),
        serde_json::to_string_pretty(&export)?.as_bytes(),
    )?;
    atomic_write(&dir.join("PROJECT.md"), render_markdown(board, merge).as_bytes())?;

    let mut jsonl = String::new();
    for record in &export.atoms {
        jsonl.push_str(&serde_json::to_string(record)?);
        jsonl.push('\n');
    }
    atomic_write(&dir.join("training.jsonl"), jsonl.as_bytes())?;

    Ok(())
}

fn render_markdown(board: &Blackboard, merge: Option<&MergeOutput>) -> String {
    let mut out = String::new();
    out.push_str("# Generated Project\n\n");
    out.push_str(&format!("**Request:** {}\n\n", board.request));
    if let Some(architecture) = &board.architecture {
        if !architecture.overview.is_empty() {
            out.push_str(&format!("{}\n\n", architecture.overview));
        }
        if !architecture.components.is_empty() {
            out.push_str("## Components\n\n");
            for component in &architecture.components {
                out.push_str(&format!("- **{}**: {}\n", component.name, component.responsibility));
            }
            out.push('\n');
        }
    }

    out.push_str("## Contracts\n\n");
    if board.catalog.is_empty() {
        out.push_str("No shared contracts.\n");
    } else {
        for contract in board.catalog.iter() {
            out.push_str(&format!("- `{}` ({:?})\n", contract.fqn(), contract.kind()));
        }
    }

    out.push_str("\n## Tasks\n\n");
    out.push_str("| Task | Kind | Status | Summary |\n");
    out.push_str("|------|------|--------|--------|\n");
    for atom in board.atoms.values() {
        out.push_str(&format!(
            "| {} | {:?} | {:?} | {} |\n",
            atom.id, atom.kind, atom.status, atom.summary
        ));
    }

    if let Some(merge) = merge {
        if !merge.conflicts.is_empty() {
            out.push_str("\n## Merge conflicts\n\n");
            for conflict in &merge.conflicts {
                out.push_str(&format!("- {}\n", conflict.describe()));
            }
        }
    }

    if !board.packages.is_empty() {
        out.push_str("\n## Packages\n\n");
        for package in &board.packages {
            out.push_str(&format!("- {} {}\n", package.name, package.version));
        }
    }

    if !board.summary.is_empty() {
        out.push_str(&format!("\n## Summary\n\n{}\n", board.summary));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Atom, AtomKind, AtomStatus, Layer};
    use crate::contract::ContractCatalog;

    fn board() -> Blackboard {
        let mut atom = Atom::new("a", AtomKind::Dto, Layer::Core, "Models", "dto");
        atom.status = AtomStatus::Completed;
        atom.generated_fragment = "namespace Models { public class A { } }".to_string();
        atom.summary = "made A".to_string();
        let mut board =
            Blackboard::new("build things", "plan", vec![atom], ContractCatalog::new().freeze());
        board.summary = "one atom, one class".to_string();
        board.packages.push(crate::schemas::PackageRef {
            name: "Newtonsoft.Json".to_string(),
            version: "13.0.3".to_string(),
        });
        board
    }

    #[test]
    fn writes_all_three_exports() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_exports(&board(), None, dir.path()).expect("export");
        assert!(dir.path().join("PROJECT.md").exists());
        assert!(dir.path().join("project.json").exists());
        assert!(dir.path().join("training.jsonl").exists());
    }

    #[test]
    fn jsonl_has_one_record_per_atom() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_exports(&board(), None, dir.path()).expect("export");
        let jsonl = std::fs::read_to_string(dir.path().join("training.jsonl")).expect("read");
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 1);
        let record: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(record["id"], "a");
        assert_eq!(record["status"], "completed");
    }

    #[test]
    fn markdown_mentions_packages_and_summary() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_exports(&board(), None, dir.path()).expect("export");
        let md = std::fs::read_to_string(dir.path().join("PROJECT.md")).expect("read");
        assert!(md.contains("Newtonsoft.Json 13.0.3"));
        assert!(md.contains("one atom, one class"));
        assert!(md.contains("| a |"));
    }
}
