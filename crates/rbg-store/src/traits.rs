//! Object store trait

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use rbg_types::{LabelSelector, ObjectKey, Resource};
use tokio::sync::broadcast;

/// Change notification delivered to watchers
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    /// Carries the last stored state with `deletion_timestamp` set
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, WatchEvent::Deleted(_))
    }
}

/// Typed access to one kind of stored object.
///
/// Every write assigns a fresh `resource_version`. `update` and
/// `update_status` require the caller's version to match the stored one and
/// fail with [`StoreError::Conflict`] otherwise. `patch` and `patch_status`
/// are merge-applies without a version check.
#[async_trait]
pub trait ObjectStore<T: Resource>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<T>>;

    /// List objects, optionally restricted to one namespace
    async fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> StoreResult<Vec<T>>;

    /// Create an object; an empty name with `generate_name` gets a random suffix
    async fn create(&self, object: T) -> StoreResult<T>;

    /// Replace metadata and spec, guarded by the version token
    async fn update(&self, object: T) -> StoreResult<T>;

    /// Replace status, guarded by the version token
    async fn update_status(&self, object: T) -> StoreResult<T>;

    /// Merge-apply metadata and spec, creating the object if absent
    async fn patch(&self, object: T) -> StoreResult<T>;

    /// Replace status unconditionally
    async fn patch_status(&self, object: T) -> StoreResult<T>;

    /// Delete an object, returning its last state
    async fn delete(&self, key: &ObjectKey) -> StoreResult<Option<T>>;

    /// Subscribe to change notifications
    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>>;

    /// Get an object that must exist
    async fn get_required(&self, key: &ObjectKey) -> StoreResult<T> {
        self.get(key).await?.ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        })
    }
}
