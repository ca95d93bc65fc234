//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The named database does not exist.
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    /// The named collection does not exist in the database.
    #[error("collection not found: {database}/{name}")]
    CollectionNotFound {
        /// Database searched.
        database: String,
        /// Collection name.
        name: String,
    },

    /// A database or collection with this name already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The database is still referenced by live guards.
    #[error("database {name} is in use by {guards} guard(s)")]
    DatabaseInUse {
        /// Database name.
        name: String,
        /// Number of outstanding guards.
        guards: usize,
    },

    /// The collection was dropped while an iterator was open on it.
    #[error("collection dropped: {0}")]
    CollectionDropped(String),

    /// The document key is not acceptable.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// A read failed because a fault was injected.
    #[error("injected read failure on {0}")]
    Injected(String),
}
