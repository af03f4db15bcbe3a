//! Error types for the ForgeFlow core.
//!
//! Every fallible operation returns an explicit [`Result`] carrying one of
//! the kinds below; the scheduler and runner branch on the kind rather than
//! on exception-style control flow. Compile diagnostics are *data* (carried
//! in `Atom::diagnostics`), never error values.

use thiserror::Error;

/// Result type alias for ForgeFlow core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors for a ForgeFlow run.
///
/// Only a small subset ever bubbles to the entry point: `ContractOverlap`,
/// `CycleDetected`, `ConflictUnresolvable`, and `Canceled`. Per-atom
/// failures are absorbed into the run report as `Failed` atoms.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Retriable oracle transport failure that outlived its retry budget.
    #[error("Oracle transport failed after {attempts} attempts: {detail}")]
    OracleTransient {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Last transport error observed.
        detail: String,
    },

    /// The oracle returned a response that does not satisfy the requested schema.
    #[error("Oracle returned malformed {schema} payload after {attempts} attempts: {detail}")]
    OracleMalformed {
        /// Schema the response was validated against.
        schema: String,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Deserialization or validation failure detail.
        detail: String,
    },

    /// The contract catalog uniqueness invariant was violated at build time.
    #[error("Contract catalog overlap: '{fqn}' declared more than once")]
    ContractOverlap {
        /// The fully-qualified name that collided.
        fqn: String,
    },

    /// Decomposition produced a cyclic dependency graph.
    #[error("Dependency cycle detected involving atom '{atom}'")]
    CycleDetected {
        /// One atom known to participate in the cycle.
        atom: String,
    },

    /// An atom references a dependency id that does not exist in the manifest.
    #[error("Atom '{atom}' depends on unknown atom '{dependency}'")]
    UnknownDependency {
        /// The atom carrying the bad edge.
        atom: String,
        /// The missing dependency id.
        dependency: String,
    },

    /// An atom exhausted its retry/repair budget.
    #[error("Atom '{atom}' exhausted its retry budget ({round_trips} oracle round-trips)")]
    AtomExhausted {
        /// The failed atom id.
        atom: String,
        /// Oracle round-trips consumed.
        round_trips: u32,
    },

    /// A merge conflict had no automatic resolution in non-interactive mode.
    #[error("Unresolvable merge conflict: {detail}")]
    ConflictUnresolvable {
        /// Human-readable conflict description.
        detail: String,
    },

    /// The run was canceled by user signal.
    #[error("Run canceled")]
    Canceled,

    /// Checkpoint persistence failed.
    #[error("Checkpoint error at '{path}': {detail}")]
    Checkpoint {
        /// The path being written or read.
        path: String,
        /// Underlying failure.
        detail: String,
    },

    /// Invalid run configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error outside of checkpointing (project emission, exports).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Map an error kind to the process exit code contract:
    /// 1 decomposition/contract failure, 2 per-atom failures exceeded policy,
    /// 3 merge failure, 4 user-canceled.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::AtomExhausted { .. } => 2,
            Error::ConflictUnresolvable { .. } => 3,
            Error::Canceled => 4,
            _ => 1,
        }
    }
}
