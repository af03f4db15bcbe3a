//! Versioned checkpoints.
//!
//! Every material state change persists the blackboard as a timestamped
//! JSON snapshot plus a human-readable Markdown summary; a `latest` pointer
//! pair is refreshed after each successful write. Writes are atomic
//! (unique temp file, fsync, rename) so a crash can never leave a torn
//! checkpoint behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::blackboard::Blackboard;
use crate::error::{Error, Result};

/// Bump when the snapshot layout changes.
const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// One persisted snapshot of the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    /// Snapshot format version.
    pub version: u32,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// The complete shared state.
    pub board: Blackboard,
}

/// Atomic file write: unique temp file in the target directory, fsync,
/// then rename over the destination.
pub fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let temp_name = format!(
        ".{}.{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        uuid::Uuid::new_v4()
    );
    let temp_path = path.with_file_name(&temp_name);

    let mut file = std::fs::File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    std::fs::rename(&temp_path, path)?;

    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }

    Ok(())
}

/// Directory-backed checkpoint store.
#[derive(Clone, Debug)]
pub struct CheckpointStore {
    directory: PathBuf,
}

impl CheckpointStore {
    /// Open (and create) the checkpoint directory.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| Error::Checkpoint {
            path: directory.display().to_string(),
            detail: e.to_string(),
        })?;
        Ok(Self { directory })
    }

    /// Persist a snapshot and refresh the `latest` pointers. Returns the
    /// path of the timestamped JSON file.
    pub fn save(&self, board: &Blackboard) -> Result<PathBuf> {
        let timestamp = Utc::now();
        let snapshot = CheckpointSnapshot {
            version: CHECKPOINT_FORMAT_VERSION,
            timestamp,
            board: board.clone(),
        };

        let stamp = timestamp.format("%Y%m%d_%H%M%S");
        let mut json_path = self.directory.join(format!("checkpoint_{stamp}.json"));
        if json_path.exists() {
            // Two checkpoints in the same second; disambiguate.
            json_path = self
                .directory
                .join(format!("checkpoint_{stamp}_{}.json", timestamp.timestamp_subsec_millis()));
        }

        let json = serde_json::to_string_pretty(&snapshot)?;
        let markdown = render_markdown(&snapshot);

        self.write(&json_path, json.as_bytes())?;
        self.write(&json_path.with_extension("md"), markdown.as_bytes())?;
        self.write(&self.directory.join("latest.json"), json.as_bytes())?;
        self.write(&self.directory.join("latest.md"), markdown.as_bytes())?;

        tracing::debug!(path = %json_path.display(), "checkpoint written");
        Ok(json_path)
    }

    /// Load the snapshot the `latest` pointer names, if any.
    pub fn load_latest(&self) -> Result<Option<CheckpointSnapshot>> {
        let latest = self.directory.join("latest.json");
        if !latest.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&latest).map_err(|e| Error::Checkpoint {
            path: latest.display().to_string(),
            detail: e.to_string(),
        })?;
        let snapshot: CheckpointSnapshot =
            serde_json::from_str(&data).map_err(|e| Error::Checkpoint {
                path: latest.display().to_string(),
                detail: format!("corrupt checkpoint: {e}"),
            })?;
        if snapshot.version > CHECKPOINT_FORMAT_VERSION {
            return Err(Error::Checkpoint {
                path: latest.display().to_string(),
                detail: format!(
                    "unsupported checkpoint version {} (supported up to {})",
                    snapshot.version, CHECKPOINT_FORMAT_VERSION
                ),
            });
        }
        Ok(Some(snapshot))
    }

    fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        atomic_write(path, data).map_err(|e| Error::Checkpoint {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }
}

/// Human-readable companion to the JSON snapshot.
fn render_markdown(snapshot: &CheckpointSnapshot) -> String {
    let board = &snapshot.board;
    let counts = board.counts();
    let mut out = String::new();

    out.push_str("# ForgeFlow Checkpoint\n\n");
    out.push_str(&format!(
        "- **Time:** {}\n",
        snapshot.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    out.push_str(&format!("- **Run:** {}\n", board.run_id));
    out.push_str(&format!("- **Status:** {:?}\n", board.execution_status));
    out.push_str(&format!(
        "- **Tasks:** {} completed, {} failed, {} in progress, {} pending\n",
        counts.completed, counts.failed, counts.in_progress, counts.pending
    ));
    out.push_str(&format!("\n**Request:** {}\n", board.request));
    if !board.description.is_empty() {
        out.push_str(&format!("\n**Plan:** {}\n", board.description));
    }

    out.push_str("\n## Tasks\n\n");
    out.push_str("| Task | Status | Retries | Summary |\n");
    out.push_str("|------|--------|---------|---------|\n");
    for atom in board.atoms.values() {
        out.push_str(&format!(
            "| {} | {:?} | {} | {} |\n",
            atom.id, atom.status, atom.retry_count, atom.summary
        ));
    }

    if !board.summary.is_empty() {
        out.push_str(&format!("\n## Summary\n\n{}\n", board.summary));
    }

    out
}
