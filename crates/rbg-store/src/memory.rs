//! In-memory object store for the daemon and tests

use crate::error::{StoreError, StoreResult};
use crate::traits::{ObjectStore, WatchEvent};
use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rbg_types::{LabelSelector, ObjectKey, Resource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const WATCH_CHANNEL_CAPACITY: usize = 1024;
const GENERATED_SUFFIX_LEN: usize = 5;

/// Process-wide version counter shared by every in-memory store
static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::SeqCst)
}

/// In-memory storage for one object kind
#[derive(Debug)]
pub struct InMemoryObjectStore<T: Resource> {
    objects: Arc<RwLock<HashMap<ObjectKey, T>>>,
    events: broadcast::Sender<WatchEvent<T>>,
    /// Number of upcoming guarded writes to reject with a conflict
    injected_conflicts: AtomicUsize,
    writes: AtomicU64,
}

impl<T: Resource> Default for InMemoryObjectStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> InMemoryObjectStore<T> {
    /// Create an empty store
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            events,
            injected_conflicts: AtomicUsize::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Make the next `count` calls to `update`/`update_status` fail with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Total successful writes, deletes included
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_version(&self, stored: &T, incoming: &T) -> StoreResult<()> {
        let actual = stored.metadata().resource_version;
        let expected = incoming.metadata().resource_version;
        if self.take_injected_conflict() || expected != actual {
            return Err(StoreError::Conflict {
                kind: T::KIND,
                key: incoming.key(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn notify(&self, event: WatchEvent<T>) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn prepare_new(mut object: T) -> StoreResult<T> {
        let meta = object.metadata_mut();
        if meta.name.is_empty() {
            match &meta.generate_name {
                Some(prefix) => {
                    let suffix: String = rand::thread_rng()
                        .sample_iter(&Alphanumeric)
                        .take(GENERATED_SUFFIX_LEN)
                        .map(|c| char::from(c).to_ascii_lowercase())
                        .collect();
                    meta.name = format!("{prefix}{suffix}");
                }
                None => {
                    return Err(StoreError::Invalid {
                        kind: T::KIND,
                        reason: "name or generateName is required".to_string(),
                    })
                }
            }
        }
        meta.uid = Uuid::new_v4().to_string();
        meta.resource_version = next_version();
        meta.generation = 1;
        meta.creation_timestamp = Some(Utc::now());
        meta.deletion_timestamp = None;
        Ok(object)
    }
}

#[async_trait]
impl<T: Resource> ObjectStore<T> for InMemoryObjectStore<T> {
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<T>> {
        let objects = self.objects.read().await;
        Ok(objects.get(key).cloned())
    }

    async fn list(&self, namespace: Option<&str>, selector: &LabelSelector) -> StoreResult<Vec<T>> {
        let objects = self.objects.read().await;
        let mut items: Vec<T> = objects
            .values()
            .filter(|o| namespace.map_or(true, |ns| o.metadata().namespace == ns))
            .filter(|o| selector.matches(&o.metadata().labels))
            .cloned()
            .collect();
        items.sort_by_key(|o| o.key());
        Ok(items)
    }

    async fn create(&self, object: T) -> StoreResult<T> {
        let object = Self::prepare_new(object)?;
        let key = object.key();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: T::KIND, key });
        }
        objects.insert(key, object.clone());
        drop(objects);

        self.notify(WatchEvent::Added(object.clone()));
        Ok(object)
    }

    async fn update(&self, object: T) -> StoreResult<T> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let stored = objects.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        })?;
        self.check_version(stored, &object)?;

        let spec_changed = !stored.spec_eq(&object);
        stored.copy_spec_from(&object);
        let incoming = object.metadata();
        let meta = stored.metadata_mut();
        meta.labels = incoming.labels.clone();
        meta.annotations = incoming.annotations.clone();
        meta.owner_references = incoming.owner_references.clone();
        if spec_changed {
            meta.generation += 1;
        }
        meta.resource_version = next_version();
        let updated = stored.clone();
        drop(objects);

        self.notify(WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    async fn update_status(&self, object: T) -> StoreResult<T> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let stored = objects.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        })?;
        self.check_version(stored, &object)?;

        stored.copy_status_from(&object);
        stored.metadata_mut().resource_version = next_version();
        let updated = stored.clone();
        drop(objects);

        self.notify(WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    async fn patch(&self, object: T) -> StoreResult<T> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let Some(stored) = objects.get_mut(&key) else {
            let created = Self::prepare_new(object)?;
            objects.insert(key, created.clone());
            drop(objects);
            self.notify(WatchEvent::Added(created.clone()));
            return Ok(created);
        };

        let spec_changed = !stored.spec_eq(&object);
        stored.copy_spec_from(&object);
        let incoming = object.metadata();
        let meta = stored.metadata_mut();
        for (k, v) in &incoming.labels {
            meta.labels.insert(k.clone(), v.clone());
        }
        for (k, v) in &incoming.annotations {
            meta.annotations.insert(k.clone(), v.clone());
        }
        for owner in &incoming.owner_references {
            meta.add_owner_reference(owner.clone());
        }
        if spec_changed {
            meta.generation += 1;
        }
        // A merge-apply always moves the version, even when nothing changed
        meta.resource_version = next_version();
        let patched = stored.clone();
        drop(objects);

        self.notify(WatchEvent::Modified(patched.clone()));
        Ok(patched)
    }

    async fn patch_status(&self, object: T) -> StoreResult<T> {
        let key = object.key();
        let mut objects = self.objects.write().await;
        let stored = objects.get_mut(&key).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            key: key.clone(),
        })?;
        stored.copy_status_from(&object);
        stored.metadata_mut().resource_version = next_version();
        let patched = stored.clone();
        drop(objects);

        self.notify(WatchEvent::Modified(patched.clone()));
        Ok(patched)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<Option<T>> {
        let mut objects = self.objects.write().await;
        let removed = objects.remove(key);
        drop(objects);

        Ok(removed.map(|mut object| {
            object.metadata_mut().deletion_timestamp = Some(Utc::now());
            self.notify(WatchEvent::Deleted(object.clone()));
            object
        }))
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}
