//! Group reconciler: converges a role group's workloads in dependency order

use crate::context::ControllerContext;
use crate::dependency::sort_roles;
use crate::error::{ReconcileError, Result, ResultExt};
use crate::retry::retry_on_conflict;
use crate::rollout::RolloutSnapshot;
use crate::runtime::{Action, Reconciler};
use crate::workload::reconciler_for;
use async_trait::async_trait;
use rbg_types::{
    labels, reasons, set_condition, Condition, ConditionType, EventReason, EventSource,
    LabelSelector, ObjectKey, Resource, RoleGroup, RoleSpec, RoleStatus, ScalingAdapter,
};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

/// Role blocked behind a dependency that is not ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedRole {
    pub role: String,
    pub dependency: String,
}

pub struct GroupReconciler {
    ctx: ControllerContext,
}

impl GroupReconciler {
    pub fn new(ctx: ControllerContext) -> Self {
        Self { ctx }
    }

    fn event_kind() -> &'static str {
        RoleGroup::KIND
    }

    /// Converge one group. Stops at the first role whose dependencies are
    /// not ready and reports it through [`ReconcileError::DependencyNotReady`].
    #[instrument(skip(self), fields(group = %key))]
    pub async fn reconcile_group(&self, key: &ObjectKey) -> Result<Action> {
        let client = &self.ctx.client;
        let group = match client.groups.get(key).await {
            Ok(Some(group)) => group,
            Ok(None) => {
                debug!("Group no longer exists");
                return Ok(Action::await_change());
            }
            Err(err) => {
                self.warn(key, EventReason::FailedGetRBG, err.to_string());
                return Err(ReconcileError::from(err).context(format!("group {key}")));
            }
        };
        if group.metadata.is_deleting() {
            return Ok(Action::await_change());
        }

        let order = match sort_roles(&group) {
            Ok(order) => order,
            Err(err) => {
                self.warn(key, EventReason::InvalidRoleDependency, err.to_string());
                let ready = Condition::new(
                    ConditionType::Ready,
                    false,
                    reasons::INVALID_ROLE_DEPENDENCY,
                    err.to_string(),
                );
                self.write_status(&group, None, vec![ready]).await?;
                return Err(err.into());
            }
        };

        let mut blocked: Option<BlockedRole> = None;

        'roles: for role in &order {
            for dependency in &role.dependencies {
                let Some(dep_role) = group.role(dependency) else {
                    continue;
                };
                let ready = reconciler_for(dep_role.workload, client.clone())
                    .is_ready(&group, dep_role)
                    .await
                    .map_err(|err| {
                        self.warn(key, EventReason::FailedCheckRoleDependency, err.to_string());
                        err.context(format!("dependency {dependency} of role {}", role.name))
                    })?;
                if !ready {
                    info!(role = %role.name, %dependency, "Dependency not ready, deferring");
                    blocked = Some(BlockedRole {
                        role: role.name.clone(),
                        dependency: dependency.clone(),
                    });
                    break 'roles;
                }
            }

            let workloads = reconciler_for(role.workload, client.clone());
            if let Err(err) = workloads.apply(&group, role).await {
                self.warn(
                    key,
                    EventReason::FailedReconcileWorkload,
                    format!("role {}: {err}", role.name),
                );
                return Err(err.context(format!("role {}", role.name)));
            }
        }

        // Every role, applied this pass or not, reports what its workload shows
        let mut statuses = Vec::with_capacity(group.spec.roles.len());
        for role in &group.spec.roles {
            let status = reconciler_for(role.workload, client.clone())
                .read_status(&group, role)
                .await
                .context(|| format!("status of role {}", role.name))?;
            statuses.push(status);
        }

        self.reconcile_adapters(&group).await?;
        self.cleanup(&group).await?;

        statuses.sort_by(|a, b| a.name.cmp(&b.name));

        let rolling = self.rollout_in_progress(&group).await?;
        let conditions = group_conditions(&group, &statuses, blocked.as_ref(), rolling);
        let changed = self.write_status(&group, Some(statuses), conditions).await?;

        match blocked {
            Some(BlockedRole { role, dependency }) => {
                Err(ReconcileError::DependencyNotReady { role, dependency })
            }
            None => {
                if changed {
                    self.ctx.normal(
                        EventSource::Group,
                        Self::event_kind(),
                        key,
                        EventReason::Succeed,
                        "reconciled all roles",
                    );
                }
                Ok(Action::await_change())
            }
        }
    }

    fn warn(&self, key: &ObjectKey, reason: EventReason, message: String) {
        self.ctx
            .warning(EventSource::Group, Self::event_kind(), key, reason, message);
    }

    async fn rollout_in_progress(&self, group: &RoleGroup) -> Result<bool> {
        for role in &group.spec.roles {
            let workload = self
                .ctx
                .client
                .workloads
                .get(&group.workload_key(&role.name))
                .await?;
            if let Some(w) = workload {
                if RolloutSnapshot::from_workload(&w).in_progress(role.replicas.max(0)) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Create adapters for roles that enable one; delete those no longer wanted
    async fn reconcile_adapters(&self, group: &RoleGroup) -> Result<()> {
        let client = &self.ctx.client;
        let selector = LabelSelector::default().with(labels::ADAPTER_MANAGED_BY_LABEL, group.name());
        let existing = client
            .adapters
            .list(Some(group.namespace()), &selector)
            .await?;

        let wanted: BTreeSet<String> = group
            .spec
            .roles
            .iter()
            .filter(|r| r.scaling_adapter_enabled())
            .map(|r| ScalingAdapter::name_for(group.name(), &r.name))
            .collect();

        for role in group.spec.roles.iter().filter(|r| r.scaling_adapter_enabled()) {
            let name = ScalingAdapter::name_for(group.name(), &role.name);
            if existing.iter().any(|a| a.metadata.name == name) {
                continue;
            }
            let mut adapter = ScalingAdapter::new(group.namespace(), name, group.name(), role.name.as_str());
            adapter
                .metadata
                .labels
                .insert(labels::ADAPTER_MANAGED_BY_LABEL.to_string(), group.name().to_string());
            match client.adapters.create(adapter).await {
                Ok(created) => info!(adapter = %created.key(), "Created scaling adapter"),
                Err(err) if err.is_already_exists() => {}
                Err(err) => return Err(ReconcileError::from(err).context("scaling adapter")),
            }
        }

        for adapter in existing {
            if !wanted.contains(&adapter.metadata.name) {
                info!(adapter = %adapter.key(), "Deleting scaling adapter no longer enabled");
                client.adapters.delete(&adapter.key()).await?;
            }
        }
        Ok(())
    }

    /// Remove workloads and config maps of roles no longer in the group
    async fn cleanup(&self, group: &RoleGroup) -> Result<()> {
        let client = &self.ctx.client;
        for kind in rbg_types::WorkloadKind::ALL {
            reconciler_for(kind, client.clone())
                .cleanup_orphans(group)
                .await
                .context(|| format!("orphaned {kind} workloads"))?;
        }

        let roles: BTreeSet<&str> = group.spec.roles.iter().map(|r| r.name.as_str()).collect();
        let selector = LabelSelector::default().with(labels::GROUP_NAME_LABEL, group.name());
        for cm in client
            .config_maps
            .list(Some(group.namespace()), &selector)
            .await?
        {
            let role = cm.metadata.labels.get(labels::ROLE_NAME_LABEL);
            let orphaned = role.map_or(true, |r| !roles.contains(r.as_str()));
            if orphaned && cm.metadata.is_owned_by(&group.metadata.uid) {
                info!(config_map = %cm.key(), "Deleting orphaned config map");
                client.config_maps.delete(&cm.key()).await?;
            }
        }
        Ok(())
    }

    /// Merge statuses and conditions into the stored group.
    ///
    /// Re-reads on conflict; conditions of other types (e.g. the restart
    /// marker) are preserved. Returns whether anything was written.
    async fn write_status(
        &self,
        group: &RoleGroup,
        statuses: Option<Vec<RoleStatus>>,
        conditions: Vec<Condition>,
    ) -> Result<bool> {
        let client = &self.ctx.client;
        let key = group.key();
        let generation = group.metadata.generation;
        let statuses = &statuses;
        let conditions = &conditions;
        let key_ref = &key;

        let result = retry_on_conflict(&self.ctx.config.conflict_retry, "group status", move || async move {
            let Some(fresh) = client.groups.get(key_ref).await? else {
                return Ok(false);
            };
            let mut updated = fresh.clone();
            if let Some(statuses) = statuses {
                updated.status.role_statuses = statuses.clone();
            }
            for condition in conditions {
                set_condition(&mut updated.status.conditions, condition.clone());
            }
            updated.status.observed_generation = generation;
            if updated.status == fresh.status {
                return Ok(false);
            }
            client.groups.update_status(updated).await?;
            Ok(true)
        })
        .await;

        result.map_err(|err| {
            warn!(group = %key, error = %err, "Failed to update group status");
            self.warn(&key, EventReason::FailedUpdateStatus, err.to_string());
            err.context(format!("status of group {key}"))
        })
    }
}

#[async_trait]
impl Reconciler for GroupReconciler {
    type Key = ObjectKey;

    fn name(&self) -> &'static str {
        "rolebasedgroup"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        self.reconcile_group(key).await
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>> {
        let groups = self
            .ctx
            .client
            .groups
            .list(None, &LabelSelector::everything())
            .await?;
        Ok(groups.iter().map(|g| g.key()).collect())
    }
}

fn role_ready(role: &RoleSpec, statuses: &[RoleStatus]) -> bool {
    statuses
        .iter()
        .find(|s| s.name == role.name)
        .map_or(false, |s| {
            s.ready_replicas == s.replicas && s.replicas >= role.replicas.max(0)
        })
}

/// Ready, Progressing and RollingUpdateInProgress for one pass
pub fn group_conditions(
    group: &RoleGroup,
    statuses: &[RoleStatus],
    blocked: Option<&BlockedRole>,
    rolling: bool,
) -> Vec<Condition> {
    let not_ready: Vec<&str> = group
        .spec
        .roles
        .iter()
        .filter(|r| !role_ready(r, statuses))
        .map(|r| r.name.as_str())
        .collect();
    let all_ready = blocked.is_none() && not_ready.is_empty();

    let ready = if all_ready {
        Condition::new(ConditionType::Ready, true, reasons::ALL_ROLES_READY, "all roles are ready")
    } else {
        Condition::new(
            ConditionType::Ready,
            false,
            reasons::ROLE_NOT_READY,
            format!("roles not ready: {}", not_ready.join(", ")),
        )
    };

    let progressing = match blocked {
        Some(b) => Condition::new(
            ConditionType::Progressing,
            true,
            reasons::DEPENDENCY_NOT_READY,
            format!("role {} waits for {}", b.role, b.dependency),
        ),
        None if !all_ready => Condition::new(
            ConditionType::Progressing,
            true,
            reasons::ROLE_NOT_READY,
            "waiting for roles to become ready",
        ),
        None => Condition::new(ConditionType::Progressing, false, reasons::ALL_ROLES_READY, ""),
    };

    let rolling = if rolling {
        Condition::new(
            ConditionType::RollingUpdateInProgress,
            true,
            reasons::ROLLING_UPDATE,
            "a role is rolling out a new template",
        )
    } else {
        Condition::new(
            ConditionType::RollingUpdateInProgress,
            false,
            reasons::ROLLOUT_COMPLETE,
            "",
        )
    };

    vec![ready, progressing, rolling]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use rbg_store::{BroadcastRecorder, Client};
    use rbg_types::{
        find_condition, is_condition_true, Container, ScalingAdapterToggle, WorkloadKind,
        WorkloadStatus,
    };
    use std::sync::Arc;

    fn role(name: &str, deps: &[&str]) -> RoleSpec {
        let mut role = RoleSpec::new(name, 1);
        role.workload = WorkloadKind::Deployment;
        role.dependencies = deps.iter().map(|d| d.to_string()).collect();
        role.template.spec.containers = vec![Container::new("main", "img:1")];
        role
    }

    fn setup() -> (Client, Arc<BroadcastRecorder>, GroupReconciler) {
        let client = Client::in_memory();
        let recorder = Arc::new(BroadcastRecorder::default());
        let ctx = ControllerContext::new(client.clone(), recorder.clone(), ControllerConfig::default());
        (client, recorder, GroupReconciler::new(ctx))
    }

    async fn mark_ready(client: &Client, group: &RoleGroup, role: &str) {
        let mut w = client
            .workloads
            .get(&group.workload_key(role))
            .await
            .unwrap()
            .unwrap();
        w.status = WorkloadStatus {
            observed_generation: w.metadata.generation,
            replicas: w.replicas(),
            ready_replicas: w.replicas(),
            updated_replicas: w.replicas(),
            updated_ready_replicas: w.replicas(),
        };
        client.workloads.patch_status(w).await.unwrap();
    }

    #[tokio::test]
    async fn test_dependency_gating() {
        let (client, recorder, reconciler) = setup();
        let group = client
            .groups
            .create(RoleGroup::new(
                "default",
                "g",
                vec![role("router", &["prefill"]), role("prefill", &[])],
            ))
            .await
            .unwrap();

        let err = reconciler.reconcile_group(&group.key()).await.unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::DependencyNotReady { ref role, ref dependency }
                if role == "router" && dependency == "prefill"
        ));
        assert!(client.workloads.get(&group.workload_key("prefill")).await.unwrap().is_some());
        assert!(client.workloads.get(&group.workload_key("router")).await.unwrap().is_none());

        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        let progressing = find_condition(&stored.status.conditions, ConditionType::Progressing).unwrap();
        assert_eq!(progressing.reason, reasons::DEPENDENCY_NOT_READY);

        mark_ready(&client, &group, "prefill").await;
        reconciler.reconcile_group(&group.key()).await.unwrap();
        assert!(client.workloads.get(&group.workload_key("router")).await.unwrap().is_some());

        mark_ready(&client, &group, "router").await;
        reconciler.reconcile_group(&group.key()).await.unwrap();
        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        assert!(is_condition_true(&stored.status.conditions, ConditionType::Ready));
        assert_eq!(stored.status.observed_generation, stored.metadata.generation);
        assert_eq!(stored.status.role_statuses.len(), 2);
        assert!(recorder.count(EventReason::Succeed) >= 1);
    }

    async fn set_ready_replicas(client: &Client, group: &RoleGroup, role: &str, ready: i32) {
        let mut w = client
            .workloads
            .get(&group.workload_key(role))
            .await
            .unwrap()
            .unwrap();
        w.status.ready_replicas = ready;
        client.workloads.patch_status(w).await.unwrap();
    }

    #[tokio::test]
    async fn test_blocked_roles_report_live_status() {
        let (client, _, reconciler) = setup();
        let mut router = role("router", &["prefill"]);
        router.replicas = 2;
        let group = client
            .groups
            .create(RoleGroup::new("default", "g", vec![router, role("prefill", &[])]))
            .await
            .unwrap();

        reconciler.reconcile_group(&group.key()).await.unwrap_err();
        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        let router = stored.role_status("router").unwrap();
        assert_eq!((router.replicas, router.ready_replicas), (0, 0));

        mark_ready(&client, &group, "prefill").await;
        reconciler.reconcile_group(&group.key()).await.unwrap();
        mark_ready(&client, &group, "router").await;
        reconciler.reconcile_group(&group.key()).await.unwrap();
        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        assert_eq!(stored.role_status("router").unwrap().ready_replicas, 2);

        // prefill degrades, router loses a pod while gated behind it
        set_ready_replicas(&client, &group, "prefill", 0).await;
        set_ready_replicas(&client, &group, "router", 1).await;
        reconciler.reconcile_group(&group.key()).await.unwrap_err();

        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        assert_eq!(stored.role_status("router").unwrap().ready_replicas, 1);
        assert_eq!(stored.role_status("prefill").unwrap().ready_replicas, 0);
    }

    #[tokio::test]
    async fn test_scale_down_is_not_reported_as_rollout() {
        let (client, _, reconciler) = setup();
        let mut web = role("web", &[]);
        web.replicas = 3;
        let group = client
            .groups
            .create(RoleGroup::new("default", "g", vec![web]))
            .await
            .unwrap();
        reconciler.reconcile_group(&group.key()).await.unwrap();
        assert!(!reconciler.rollout_in_progress(&group).await.unwrap());

        // Workload still at the old size while the role shrinks
        let mut smaller = group.clone();
        smaller.spec.roles[0].replicas = 1;
        assert!(!reconciler.rollout_in_progress(&smaller).await.unwrap());

        // Replicas above the recorded size are a held surge
        let mut surged = client.workloads.get(&group.workload_key("web")).await.unwrap().unwrap();
        if let rbg_types::WorkloadSpec::Deployment(d) = &mut surged.spec {
            d.replicas = 4;
        }
        client.workloads.update(surged).await.unwrap();
        assert!(reconciler.rollout_in_progress(&group).await.unwrap());
    }

    #[tokio::test]
    async fn test_cycle_is_terminal() {
        let (client, recorder, reconciler) = setup();
        let group = client
            .groups
            .create(RoleGroup::new(
                "default",
                "g",
                vec![role("a", &["b"]), role("b", &["a"])],
            ))
            .await
            .unwrap();

        let err = reconciler.reconcile_group(&group.key()).await.unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Validation);
        assert_eq!(recorder.count(EventReason::InvalidRoleDependency), 1);

        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        let ready = find_condition(&stored.status.conditions, ConditionType::Ready).unwrap();
        assert!(!ready.is_true());
        assert_eq!(ready.reason, reasons::INVALID_ROLE_DEPENDENCY);
        assert!(client.workloads.list(None, &LabelSelector::everything()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_removed_role_is_cleaned_up() {
        let (client, _, reconciler) = setup();
        let group = client
            .groups
            .create(RoleGroup::new("default", "g", vec![role("a", &[]), role("b", &[])]))
            .await
            .unwrap();
        reconciler.reconcile_group(&group.key()).await.unwrap();

        let mut edited = client.groups.get(&group.key()).await.unwrap().unwrap();
        edited.spec.roles.retain(|r| r.name == "a");
        client.groups.update(edited).await.unwrap();
        reconciler.reconcile_group(&group.key()).await.unwrap();

        assert!(client.workloads.get(&group.workload_key("b")).await.unwrap().is_none());
        assert!(client.config_maps.get(&group.workload_key("b")).await.unwrap().is_none());
        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        assert!(stored.role_status("b").is_none());
    }

    #[tokio::test]
    async fn test_steady_state_writes_nothing() {
        let (client, _, reconciler) = setup();
        let group = client
            .groups
            .create(RoleGroup::new("default", "g", vec![role("a", &[])]))
            .await
            .unwrap();
        reconciler.reconcile_group(&group.key()).await.unwrap();
        let before = client.groups.get(&group.key()).await.unwrap().unwrap();
        let workload_before = client.workloads.get(&group.workload_key("a")).await.unwrap().unwrap();

        reconciler.reconcile_group(&group.key()).await.unwrap();
        let after = client.groups.get(&group.key()).await.unwrap().unwrap();
        let workload_after = client.workloads.get(&group.workload_key("a")).await.unwrap().unwrap();
        assert_eq!(before.metadata.resource_version, after.metadata.resource_version);
        assert_eq!(
            workload_before.metadata.resource_version,
            workload_after.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn test_scaling_adapter_lifecycle() {
        let (client, _, reconciler) = setup();
        let mut worker = role("worker", &[]);
        worker.scaling_adapter = Some(ScalingAdapterToggle { enable: true });
        let group = client
            .groups
            .create(RoleGroup::new("default", "g", vec![worker]))
            .await
            .unwrap();
        reconciler.reconcile_group(&group.key()).await.unwrap();

        let key = ObjectKey::new("default", "g-worker");
        let adapter = client.adapters.get(&key).await.unwrap().unwrap();
        assert_eq!(adapter.spec.scale_target_ref.role, "worker");
        assert!(adapter.metadata.owner_references.is_empty());

        let mut edited = client.groups.get(&group.key()).await.unwrap().unwrap();
        edited.spec.roles[0].scaling_adapter = None;
        client.groups.update(edited).await.unwrap();
        reconciler.reconcile_group(&group.key()).await.unwrap();
        assert!(client.adapters.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_condition_is_preserved() {
        let (client, _, reconciler) = setup();
        let mut group = RoleGroup::new("default", "g", vec![role("a", &[])]);
        set_condition(
            &mut group.status.conditions,
            Condition::new(ConditionType::RestartInProgress, true, reasons::RESTART_STARTED, ""),
        );
        let created = client.groups.create(group.clone()).await.unwrap();
        let mut with_status = created.clone();
        with_status.status = group.status.clone();
        client.groups.update_status(with_status).await.unwrap();

        reconciler.reconcile_group(&created.key()).await.unwrap();
        let stored = client.groups.get(&created.key()).await.unwrap().unwrap();
        assert!(is_condition_true(&stored.status.conditions, ConditionType::RestartInProgress));
    }

    #[test]
    fn test_group_conditions() {
        let group = RoleGroup::new("default", "g", vec![role("a", &[])]);
        let ready = vec![RoleStatus {
            name: "a".into(),
            replicas: 1,
            ready_replicas: 1,
        }];
        let conditions = group_conditions(&group, &ready, None, false);
        assert!(is_condition_true(&conditions, ConditionType::Ready));
        assert!(!is_condition_true(&conditions, ConditionType::RollingUpdateInProgress));

        let conditions = group_conditions(&group, &[], None, true);
        assert!(!is_condition_true(&conditions, ConditionType::Ready));
        assert!(is_condition_true(&conditions, ConditionType::RollingUpdateInProgress));
    }
}
