//! Workload abstraction layer
//!
//! Each [`WorkloadKind`] has a reconciler that knows how to materialize a
//! role into its kind of workload object. Everything else (apply with
//! equality suppression, status projection, orphan cleanup, recreation) is
//! shared and provided through default methods.

mod deployment;
mod leader_worker;
mod statefulset;

pub use deployment::DeploymentReconciler;
pub use leader_worker::LeaderWorkerReconciler;
pub use statefulset::StatefulSetReconciler;

use crate::equality::{project_meta, semantic_diff_config_map, semantic_diff_workload};
use crate::error::{ReconcileError, Result, ResultExt};
use crate::template::build_config_map;
use async_trait::async_trait;
use rbg_store::Client;
use rbg_types::{
    labels, EngineRuntimeProfile, LabelSelector, ObjectMeta, OwnerReference, Resource, RoleGroup,
    RoleSpec, RoleStatus, Workload, WorkloadKind,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Result of applying a role's desired workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated { diff: String },
    Unchanged,
}

/// Per-kind workload operations
#[async_trait]
pub trait WorkloadReconciler: Send + Sync {
    fn kind(&self) -> WorkloadKind;

    fn client(&self) -> &Client;

    /// Desired workload for `role`. Pure; `observed` is the live object of
    /// this kind, if any.
    fn materialize(
        &self,
        group: &RoleGroup,
        role: &RoleSpec,
        profiles: &BTreeMap<String, EngineRuntimeProfile>,
        observed: Option<&Workload>,
    ) -> Result<Workload>;

    /// Objects that accompany the workload, written after it
    async fn apply_companions(
        &self,
        _group: &RoleGroup,
        _role: &RoleSpec,
        _workload: &Workload,
    ) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, group: &RoleGroup, role: &RoleSpec) -> Result<ApplyOutcome> {
        apply_workload(self, group, role).await
    }

    async fn read_status(&self, group: &RoleGroup, role: &RoleSpec) -> Result<RoleStatus> {
        let workload = self.client().workloads.get(&group.workload_key(&role.name)).await?;
        Ok(RoleStatus {
            name: role.name.clone(),
            replicas: workload.as_ref().map_or(0, |w| w.status.replicas),
            ready_replicas: workload.as_ref().map_or(0, |w| w.status.ready_replicas),
        })
    }

    /// Whether the role's workload has all replicas ready; absent is not ready
    async fn is_ready(&self, group: &RoleGroup, role: &RoleSpec) -> Result<bool> {
        let workload = self.client().workloads.get(&group.workload_key(&role.name)).await?;
        Ok(workload.map_or(false, |w| w.is_ready()))
    }

    /// Delete workloads of this kind whose role is no longer in the group
    async fn cleanup_orphans(&self, group: &RoleGroup) -> Result<Vec<String>> {
        cleanup_orphans(self, group).await
    }

    /// Delete the role's workload and wait until a new one exists
    async fn recreate(
        &self,
        group: &RoleGroup,
        role: &RoleSpec,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<()> {
        recreate(self.client(), group, role, poll_interval, timeout).await
    }
}

/// Reconciler for a workload kind
pub fn reconciler_for(kind: WorkloadKind, client: Client) -> Box<dyn WorkloadReconciler> {
    match kind {
        WorkloadKind::StatefulSet => Box::new(StatefulSetReconciler::new(client)),
        WorkloadKind::Deployment => Box::new(DeploymentReconciler::new(client)),
        WorkloadKind::LeaderWorkerSet => Box::new(LeaderWorkerReconciler::new(client)),
    }
}

/// Selector shared by every kind: the group and role identity labels
pub fn role_selector(group: &RoleGroup, role: &RoleSpec) -> LabelSelector {
    LabelSelector::default()
        .with(labels::GROUP_NAME_LABEL, group.name())
        .with(labels::ROLE_NAME_LABEL, role.name.as_str())
}

/// Metadata for a role's workload; `revision` goes into the annotations
pub fn workload_meta(group: &RoleGroup, role: &RoleSpec, revision: String) -> ObjectMeta {
    let mut meta = ObjectMeta::named(group.namespace(), group.workload_name(&role.name));
    meta.labels = group.common_labels(role);
    meta.annotations = group.common_annotations(role);
    meta.annotations.insert(labels::REVISION_ANNOTATION.to_string(), revision);
    meta.owner_references = vec![group.owner_reference()];
    meta
}

/// Controlling owner reference pointing at a workload
pub fn workload_owner(workload: &Workload) -> OwnerReference {
    OwnerReference {
        kind: Workload::KIND.to_string(),
        name: workload.metadata.name.clone(),
        uid: workload.metadata.uid.clone(),
        controller: true,
        block_owner_deletion: true,
    }
}

async fn load_profiles(
    client: &Client,
    role: &RoleSpec,
) -> Result<BTreeMap<String, EngineRuntimeProfile>> {
    if role.engine_runtimes.is_empty() {
        return Ok(BTreeMap::new());
    }
    let wanted: BTreeSet<&str> = role
        .engine_runtimes
        .iter()
        .map(|r| r.profile_name.as_str())
        .collect();
    let profiles = client
        .profiles
        .list(None, &LabelSelector::everything())
        .await?;
    Ok(profiles
        .into_iter()
        .filter(|p| wanted.contains(p.metadata.name.as_str()))
        .map(|p| (p.metadata.name.clone(), p))
        .collect())
}

async fn apply_config_map(client: &Client, group: &RoleGroup, role: &RoleSpec) -> Result<()> {
    let desired = build_config_map(group, role)?;
    match client.config_maps.get(&desired.key()).await? {
        Some(observed) => {
            let mut projected = desired.clone();
            projected.metadata = project_meta(&desired.metadata, &observed.metadata);
            if let Some(diff) = semantic_diff_config_map(&projected, &observed) {
                debug!(config_map = %desired.key(), %diff, "Updating cluster config");
                client.config_maps.patch(desired).await?;
            }
        }
        None => {
            client.config_maps.patch(desired).await?;
        }
    }
    Ok(())
}

async fn apply_workload<R: WorkloadReconciler + ?Sized>(
    reconciler: &R,
    group: &RoleGroup,
    role: &RoleSpec,
) -> Result<ApplyOutcome> {
    let client = reconciler.client();
    let key = group.workload_key(&role.name);

    let profiles = load_profiles(client, role).await?;
    apply_config_map(client, group, role)
        .await
        .context(|| format!("config map for role {}", role.name))?;

    let mut observed = client.workloads.get(&key).await?;
    if let Some(existing) = &observed {
        if existing.kind() != reconciler.kind() {
            info!(
                workload = %key,
                from = %existing.kind(),
                to = %reconciler.kind(),
                "Workload kind changed, replacing"
            );
            client.workloads.delete(&key).await?;
            observed = None;
        }
    }

    let desired = reconciler.materialize(group, role, &profiles, observed.as_ref())?;
    let (outcome, live) = match observed {
        None => {
            let created = client.workloads.patch(desired).await?;
            info!(workload = %key, kind = %reconciler.kind(), "Created workload");
            (ApplyOutcome::Created, created)
        }
        Some(observed) => {
            let mut projected = desired.clone();
            projected.metadata = project_meta(&desired.metadata, &observed.metadata);
            match semantic_diff_workload(&projected, &observed) {
                None => (ApplyOutcome::Unchanged, observed),
                Some(diff) => {
                    info!(workload = %key, %diff, "Updating workload");
                    let patched = client.workloads.patch(desired).await?;
                    (ApplyOutcome::Updated { diff }, patched)
                }
            }
        }
    };

    reconciler.apply_companions(group, role, &live).await?;
    Ok(outcome)
}

async fn cleanup_orphans<R: WorkloadReconciler + ?Sized>(
    reconciler: &R,
    group: &RoleGroup,
) -> Result<Vec<String>> {
    let client = reconciler.client();
    let selector = LabelSelector::default().with(labels::GROUP_NAME_LABEL, group.name());
    let roles: BTreeSet<&str> = group.spec.roles.iter().map(|r| r.name.as_str()).collect();

    let mut deleted = Vec::new();
    for workload in client.workloads.list(Some(group.namespace()), &selector).await? {
        if workload.kind() != reconciler.kind() || !workload.metadata.is_owned_by(&group.metadata.uid) {
            continue;
        }
        let role = workload.metadata.labels.get(labels::ROLE_NAME_LABEL);
        if role.map_or(false, |r| roles.contains(r.as_str())) {
            continue;
        }
        info!(workload = %workload.key(), "Deleting orphaned workload");
        client.workloads.delete(&workload.key()).await?;
        deleted.push(workload.metadata.name);
    }
    Ok(deleted)
}

async fn recreate(
    client: &Client,
    group: &RoleGroup,
    role: &RoleSpec,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let key = group.workload_key(&role.name);
    let previous_uid = client
        .workloads
        .delete(&key)
        .await?
        .map(|w| w.metadata.uid);
    info!(workload = %key, "Deleted workload for recreation");

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(current) = client.workloads.get(&key).await? {
            if Some(&current.metadata.uid) != previous_uid.as_ref() {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(ReconcileError::Timeout {
                operation: format!("recreation of workload {key}"),
            });
        }
        tokio::time::sleep(poll_interval).await;
    }
}
