//! CLI command implementations.

pub mod scenario;
pub mod simulate;

/// Errors reported by CLI commands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// An argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A scenario name was not recognized.
    #[error("unknown scenario '{0}' (expected stale-read, write-skew or lost-update)")]
    UnknownScenario(String),

    /// An output format was not recognized.
    #[error("unknown format '{0}' (expected text or json)")]
    UnknownFormat(String),

    /// The workload broke an invariant.
    #[error("invariant violated: {0}")]
    Invariant(String),
}
