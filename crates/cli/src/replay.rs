//! Replay oracle loading.
//!
//! A replay script is a JSON file with canned oracle responses, consumed in
//! order per schema kind. It makes runs reproducible end to end and is the
//! only oracle the CLI ships; live model adapters implement the `Oracle`
//! trait in the embedding host.
//!
//! ```json
//! {
//!   "responses": [
//!     { "schema": "decomposition", "content": { "atoms": [ ... ] } },
//!     { "schema": "fragment", "content": { "code": "namespace ..." } },
//!     { "schema": "fragment", "transport_error": "simulated outage" }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde::Deserialize;

use forgeflow_core::oracle::{Oracle, ScriptedOracle, ScriptedReply};
use forgeflow_core::schemas::SchemaKind;

#[derive(Debug, Deserialize)]
struct ReplayScript {
    responses: Vec<ReplayEntry>,
}

#[derive(Debug, Deserialize)]
struct ReplayEntry {
    schema: SchemaKind,
    #[serde(default)]
    content: Option<serde_json::Value>,
    #[serde(default)]
    transport_error: Option<String>,
    #[serde(default)]
    malformed: Option<String>,
}

/// Load a replay script into a deterministic oracle.
pub fn load_replay_oracle(path: &Path) -> anyhow::Result<Arc<dyn Oracle>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading replay script {}", path.display()))?;
    let script: ReplayScript =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;

    let oracle = ScriptedOracle::new();
    for (index, entry) in script.responses.into_iter().enumerate() {
        let reply = match (entry.content, entry.transport_error, entry.malformed) {
            (Some(content), None, None) => ScriptedReply::Content(content.to_string()),
            (None, Some(detail), None) => ScriptedReply::Transport(detail),
            (None, None, Some(detail)) => ScriptedReply::Malformed(detail),
            _ => bail!(
                "replay entry {index} must have exactly one of content, transport_error, malformed"
            ),
        };
        oracle.push(entry.schema, reply);
    }
    Ok(Arc::new(oracle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_minimal_script() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("replay.json");
        std::fs::write(
            &path,
            r#"{
                "responses": [
                    { "schema": "summary", "content": { "summary": "done" } },
                    { "schema": "fragment", "transport_error": "outage" }
                ]
            }"#,
        )
        .expect("write");
        load_replay_oracle(&path).expect("load");
    }

    #[test]
    fn rejects_ambiguous_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("replay.json");
        std::fs::write(
            &path,
            r#"{
                "responses": [
                    { "schema": "summary", "content": {}, "transport_error": "both" }
                ]
            }"#,
        )
        .expect("write");
        assert!(load_replay_oracle(&path).is_err());
    }

    #[test]
    fn missing_file_is_a_context_error() {
        let err = load_replay_oracle(Path::new("/nonexistent/replay.json"))
            .expect_err("should fail");
        assert!(err.to_string().contains("replay.json"));
    }
}
