//! Error taxonomy for reconciliation

use rbg_store::StoreError;
use thiserror::Error;

/// Object problems that no amount of retrying will fix
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Dependency names no role in the group
    #[error("role {role} depends on unknown role {dependency}")]
    UnknownDependency { role: String, dependency: String },

    /// Roles depend on each other in a loop
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    /// Two roles share a name
    #[error("duplicate role name {0}")]
    DuplicateRole(String),

    /// Surge or unavailable bound does not resolve
    #[error("invalid rollout strategy for role {role}: {reason}")]
    InvalidRollout { role: String, reason: String },

    /// Patched template no longer decodes
    #[error("invalid template patch for role {role}: {reason}")]
    InvalidTemplatePatch { role: String, reason: String },
}

/// How the reconcile entrypoint treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Terminal until the object is edited; no requeue
    Validation,
    /// Retried with backoff
    Transient,
    /// Bounded fixed-delay requeue, not surfaced as an error
    NotReady,
}

/// Reconciliation errors
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Invalid group; terminal until edited
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A role is gated behind a dependency
    #[error("dependency {dependency} of role {role} is not ready")]
    DependencyNotReady { role: String, dependency: String },

    /// Object store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Referenced engine runtime profile is missing
    #[error("runtime profile {0} not found")]
    ProfileNotFound(String),

    /// Conflict retry budget spent
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Deadline passed while polling
    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },

    /// JSON or YAML encoding failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Another error with what was being attempted
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ReconcileError>,
    },
}

impl ReconcileError {
    /// Classify for retry handling, looking through context wrappers
    pub fn class(&self) -> ErrorClass {
        match self {
            ReconcileError::Validation(_) => ErrorClass::Validation,
            ReconcileError::DependencyNotReady { .. } => ErrorClass::NotReady,
            ReconcileError::Context { source, .. } => source.class(),
            _ => ErrorClass::Transient,
        }
    }

    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_conflict(),
            ReconcileError::Context { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_not_found(),
            ReconcileError::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Wrap with a description of what was being attempted
    pub fn context(self, context: impl Into<String>) -> Self {
        ReconcileError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        ReconcileError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ReconcileError {
    fn from(err: serde_yaml::Error) -> Self {
        ReconcileError::Serialization(err.to_string())
    }
}

/// Attach context to fallible results
pub trait ResultExt<T> {
    fn context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T>;
}

impl<T, E: Into<ReconcileError>> ResultExt<T> for std::result::Result<T, E> {
    fn context<C: Into<String>>(self, context: impl FnOnce() -> C) -> Result<T> {
        self.map_err(|e| e.into().context(context()))
    }
}

/// Result type for reconciliation
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rbg_types::ObjectKey;

    #[test]
    fn test_classification_sees_through_context() {
        let err = ReconcileError::from(ValidationError::CycleDetected {
            path: vec!["a".into(), "b".into(), "a".into()],
        })
        .context("group default/g");
        assert_eq!(err.class(), ErrorClass::Validation);
        assert_eq!(
            err.to_string(),
            "group default/g: validation failed: dependency cycle detected: a -> b -> a"
        );

        let conflict = ReconcileError::from(StoreError::Conflict {
            kind: "RoleGroup",
            key: ObjectKey::new("default", "g"),
            expected: 1,
            actual: 2,
        })
        .context("status");
        assert!(conflict.is_conflict());
        assert_eq!(conflict.class(), ErrorClass::Transient);

        let blocked = ReconcileError::DependencyNotReady {
            role: "web".into(),
            dependency: "db".into(),
        };
        assert_eq!(blocked.class(), ErrorClass::NotReady);
    }

    #[test]
    fn test_result_ext() {
        let res: std::result::Result<(), StoreError> = Err(StoreError::Storage("down".into()));
        let err = res.context(|| "role web").unwrap_err();
        assert_eq!(err.to_string(), "role web: store error: storage error: down");
    }
}
