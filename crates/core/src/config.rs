//! Run configuration.
//!
//! Defaults follow the fixed policy budgets; a handful of knobs can be
//! overridden from the environment (`FORGEFLOW_*`) or by the CLI.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Hard per-atom oracle round-trip budget.
pub const ATOM_ROUND_TRIPS: u32 = 3;
/// Hard per-atom auto-repair pass budget.
pub const REPAIR_PASSES: u32 = 3;
/// Hard merge-phase auto-repair pass budget.
pub const MERGE_REPAIR_PASSES: u32 = 3;
/// Longest request accepted by the run entry point, in characters.
pub const MAX_REQUEST_CHARS: usize = 2000;

/// Configuration for one run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Output directory for checkpoints, contracts, and the emitted project.
    pub output_dir: PathBuf,
    /// Concurrent oracle workers per wave.
    pub worker_count: usize,
    /// Estimated-line threshold above which an atom is auto-decomposed.
    pub max_line_threshold: u32,
    /// Per-oracle-call timeout.
    pub oracle_timeout: Duration,
    /// Attempts per logical oracle call (transport + schema combined).
    pub oracle_attempts: u32,
    /// Linear backoff unit between oracle attempts.
    pub oracle_backoff: Duration,
    /// Grace period granted to in-flight atoms on cancellation.
    pub cancel_grace: Duration,
    /// Interactive merge downgrades unresolvable conflicts instead of failing.
    pub interactive_merge: bool,
    /// Drop parser advisories, keeping errors only.
    pub suppress_warnings: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("forgeflow-out"),
            worker_count: 4,
            max_line_threshold: 150,
            oracle_timeout: Duration::from_secs(120),
            oracle_attempts: 3,
            oracle_backoff: Duration::from_millis(500),
            cancel_grace: Duration::from_secs(30),
            interactive_merge: false,
            suppress_warnings: true,
        }
    }
}

impl RunConfig {
    /// Config rooted at an output directory, with defaults elsewhere.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Apply `FORGEFLOW_*` environment overrides.
    ///
    /// Recognized: `FORGEFLOW_WORKERS`, `FORGEFLOW_LINE_THRESHOLD`,
    /// `FORGEFLOW_ORACLE_TIMEOUT_SECS`, `FORGEFLOW_ORACLE_ATTEMPTS`,
    /// `FORGEFLOW_INTERACTIVE_MERGE`.
    pub fn apply_env(mut self) -> Self {
        if let Some(n) = read_env("FORGEFLOW_WORKERS") {
            self.worker_count = n;
        }
        if let Some(n) = read_env("FORGEFLOW_LINE_THRESHOLD") {
            self.max_line_threshold = n;
        }
        if let Some(n) = read_env::<u64>("FORGEFLOW_ORACLE_TIMEOUT_SECS") {
            self.oracle_timeout = Duration::from_secs(n);
        }
        if let Some(n) = read_env("FORGEFLOW_ORACLE_ATTEMPTS") {
            self.oracle_attempts = n;
        }
        if let Ok(v) = std::env::var("FORGEFLOW_INTERACTIVE_MERGE") {
            self.interactive_merge = matches!(v.as_str(), "1" | "true" | "yes");
        }
        self
    }

    /// Reject configurations the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.max_line_threshold < 20 {
            return Err(Error::Config(
                "max_line_threshold below the 20-line estimator floor".to_string(),
            ));
        }
        if self.oracle_attempts == 0 {
            return Err(Error::Config("oracle_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Directory holding timestamped checkpoints.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.output_dir.join("checkpoints")
    }

    /// Path of the frozen contract catalog.
    pub fn contracts_path(&self) -> PathBuf {
        self.output_dir.join("contracts.json")
    }

    /// Root of the emitted project tree.
    pub fn project_dir(&self) -> PathBuf {
        self.output_dir.join("src")
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_line_threshold, 150);
    }

    #[test]
    fn zero_workers_rejected() {
        let config = RunConfig {
            worker_count: 0,
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn threshold_below_floor_rejected() {
        let config = RunConfig {
            max_line_threshold: 10,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn derived_paths_nest_under_output_dir() {
        let config = RunConfig::new("/tmp/run");
        assert_eq!(config.checkpoint_dir(), PathBuf::from("/tmp/run/checkpoints"));
        assert_eq!(config.contracts_path(), PathBuf::from("/tmp/run/contracts.json"));
        assert_eq!(config.project_dir(), PathBuf::from("/tmp/run/src"));
    }
}
