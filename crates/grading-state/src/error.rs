//! Error types for grading-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by [`SessionStore`](crate::storage_traits::SessionStore) operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record is stored under the session id
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// A write carried a revision that is not newer than the stored one
    #[error("stale write for session {session_id}: stored revision {stored}, attempted {attempted}")]
    StaleRevision {
        session_id: String,
        stored: u64,
        attempted: u64,
    },

    /// Session id failed validation
    #[error("invalid session id {session_id:?}: {reason}")]
    InvalidSessionId { session_id: String, reason: String },

    /// Digest string is not 64 hex characters
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Payload could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_revision_display() {
        let err = StorageError::StaleRevision {
            session_id: "grading_1234abcd".to_string(),
            stored: 4,
            attempted: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("grading_1234abcd"));
        assert!(msg.contains("stored revision 4"));
    }

    #[test]
    fn test_state_error_converts_to_backend() {
        let err: StorageError = StateError::Connection("refused".to_string()).into();
        assert!(matches!(err, StorageError::Backend(_)));
        assert!(err.to_string().contains("refused"));
    }
}
