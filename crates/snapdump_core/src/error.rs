//! Error types for replication contexts.

use snapdump_storage::StorageError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Coarse classification of a [`ReplicationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown batch, database or collection.
    NotFound,
    /// Lease exclusivity violated or cursor already being advanced.
    Conflict,
    /// Context deleted or destroyed, or collection dropped.
    Gone,
    /// Malformed request parameter.
    BadParameter,
    /// Storage engine or rendering failure.
    Internal,
}

/// Errors that can occur in replication operations.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// Something the caller named does not exist.
    #[error("{what} not found: {name}")]
    NotFound {
        /// Kind of object looked up.
        what: &'static str,
        /// Name or identifier used.
        name: String,
    },

    /// The operation collides with a concurrent one.
    #[error("conflict: {reason}")]
    Conflict {
        /// Why the operation was rejected.
        reason: String,
    },

    /// The target has been deleted or released.
    #[error("gone: {what}")]
    Gone {
        /// What is no longer available.
        what: String,
    },

    /// A parameter is out of range or inconsistent.
    #[error("bad parameter: {message}")]
    BadParameter {
        /// Description of the problem.
        message: String,
    },

    /// The storage engine failed.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),

    /// Any other internal failure.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl ReplicationError {
    /// Creates a not found error.
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Creates a gone error.
    pub fn gone(what: impl Into<String>) -> Self {
        Self::Gone { what: what.into() }
    }

    /// Creates a bad parameter error.
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::BadParameter {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Gone { .. } => ErrorKind::Gone,
            Self::BadParameter { .. } => ErrorKind::BadParameter,
            Self::Storage(_) | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns true if the caller can fix the request (4xx-style).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns true if the failure is on the server side (5xx-style).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }
}

impl From<StorageError> for ReplicationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::CollectionDropped(name) => Self::gone(format!("collection {name}")),
            StorageError::DatabaseNotFound(name) => Self::not_found("database", name),
            StorageError::CollectionNotFound { database, name } => {
                Self::not_found("collection", format!("{database}/{name}"))
            }
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert_eq!(
            ReplicationError::conflict("busy").kind(),
            ErrorKind::Conflict
        );
        assert!(ReplicationError::bad_parameter("chunk").is_client_error());
        assert!(ReplicationError::internal("oops").is_server_error());
        assert!(!ReplicationError::gone("batch:1").is_server_error());
    }

    #[test]
    fn storage_errors_map_to_kinds() {
        let dropped: ReplicationError = StorageError::CollectionDropped("c".into()).into();
        assert_eq!(dropped.kind(), ErrorKind::Gone);

        let injected: ReplicationError = StorageError::Injected("c".into()).into();
        assert_eq!(injected.kind(), ErrorKind::Internal);

        let missing: ReplicationError = StorageError::DatabaseNotFound("x".into()).into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn error_display() {
        let err = ReplicationError::not_found("collection", "users");
        assert_eq!(err.to_string(), "collection not found: users");
    }
}
