//! CLI error type.

use snapdump_core::ReplicationError;
use snapdump_storage::StorageError;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Reading the fixture file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The fixture or an output value is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The fixture is valid JSON but not a valid fixture.
    #[error("invalid fixture: {0}")]
    Fixture(String),

    /// Loading the fixture into the engine failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A replication call failed.
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// The command line is incomplete.
    #[error("{0}")]
    Usage(String),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
