//! Error types for store collaborators

use rbg_types::ObjectKey;
use thiserror::Error;

/// Errors returned by an object store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Object does not exist
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    /// Create hit an existing key
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    /// The caller's version token is stale
    #[error("conflict writing {kind} {key}: expected version {expected}, found {actual}")]
    Conflict {
        kind: &'static str,
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    /// Object rejected on write
    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    /// Backend failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the schema-existence probe
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// Required schema is not installed
    #[error("required schema {0} is not registered")]
    MissingSchema(String),

    /// Probe could not answer
    #[error("schema probe failed: {0}")]
    Probe(String),
}
