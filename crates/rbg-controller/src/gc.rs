//! Owner-reference garbage collection
//!
//! Deleting an owner deletes its dependents across all kinds, recursively
//! along set -> group -> workload -> service. Dependents are found by the
//! uid in their owner references.

use crate::error::Result;
use rbg_store::{Client, ObjectStore};
use rbg_types::{LabelSelector, Resource};
use std::collections::HashSet;
use tracing::{debug, info};

pub struct GarbageCollector {
    client: Client,
}

/// Delete every object in `store` owned by `owner_uid`, returning the
/// uids of what was removed
async fn delete_owned<T: Resource>(
    store: &dyn ObjectStore<T>,
    owner_uid: &str,
) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for object in store.list(None, &LabelSelector::everything()).await? {
        if !object.metadata().is_owned_by(owner_uid) {
            continue;
        }
        if let Some(gone) = store.delete(&object.key()).await? {
            debug!(kind = T::KIND, object = %gone.key(), owner = owner_uid, "Collected dependent");
            removed.push(gone.metadata().uid.clone());
        }
    }
    Ok(removed)
}

/// Objects whose owner references all point at uids outside `live`
async fn orphans<T: Resource>(store: &dyn ObjectStore<T>, live: &HashSet<String>) -> Result<Vec<T>> {
    let objects = store.list(None, &LabelSelector::everything()).await?;
    Ok(objects
        .into_iter()
        .filter(|o| {
            let owners = &o.metadata().owner_references;
            !owners.is_empty() && owners.iter().all(|r| !live.contains(&r.uid))
        })
        .collect())
}

async fn uids<T: Resource>(store: &dyn ObjectStore<T>) -> Result<HashSet<String>> {
    let objects = store.list(None, &LabelSelector::everything()).await?;
    Ok(objects.into_iter().map(|o| o.metadata().uid.clone()).collect())
}

async fn delete_all<T: Resource>(store: &dyn ObjectStore<T>, objects: Vec<T>) -> Result<usize> {
    let mut count = 0;
    for object in objects {
        if store.delete(&object.key()).await?.is_some() {
            count += 1;
        }
    }
    Ok(count)
}

impl GarbageCollector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Delete the dependents of a deleted owner, then theirs
    pub async fn cascade(&self, owner_uid: &str) -> Result<usize> {
        let mut pending = vec![owner_uid.to_string()];
        let mut total = 0;
        while let Some(uid) = pending.pop() {
            let c = &self.client;
            let mut removed = delete_owned(c.groups.as_ref(), &uid).await?;
            removed.extend(delete_owned(c.workloads.as_ref(), &uid).await?);
            removed.extend(delete_owned(c.services.as_ref(), &uid).await?);
            removed.extend(delete_owned(c.config_maps.as_ref(), &uid).await?);
            removed.extend(delete_owned(c.adapters.as_ref(), &uid).await?);
            total += removed.len();
            pending.extend(removed);
        }
        if total > 0 {
            info!(owner = owner_uid, collected = total, "Cascaded deletion");
        }
        Ok(total)
    }

    /// Remove dependents whose owners are all gone, level by level.
    ///
    /// Catches deletions that happened while no watcher was running.
    pub async fn sweep(&self) -> Result<usize> {
        let c = &self.client;
        let mut total = 0;

        let sets = uids(c.sets.as_ref()).await?;
        total += delete_all(c.groups.as_ref(), orphans(c.groups.as_ref(), &sets).await?).await?;

        let groups = uids(c.groups.as_ref()).await?;
        total += delete_all(c.workloads.as_ref(), orphans(c.workloads.as_ref(), &groups).await?).await?;
        total += delete_all(
            c.config_maps.as_ref(),
            orphans(c.config_maps.as_ref(), &groups).await?,
        )
        .await?;
        total += delete_all(c.adapters.as_ref(), orphans(c.adapters.as_ref(), &groups).await?).await?;

        let workloads = uids(c.workloads.as_ref()).await?;
        total += delete_all(c.services.as_ref(), orphans(c.services.as_ref(), &workloads).await?).await?;

        if total > 0 {
            info!(collected = total, "Swept orphaned objects");
        }
        Ok(total)
    }
}
