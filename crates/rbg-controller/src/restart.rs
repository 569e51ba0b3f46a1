//! Group-wide restart on pod failure
//!
//! When a pod of a role with `RecreateGroupOnPodRestart` restarts or is
//! deleted, every role's workload is deleted and recreated in dependency
//! order. The `RestartInProgress` condition is the cross-process guard:
//! whoever flips it to true with an optimistic status write owns the
//! restart. Restarts are at-least-once; an interrupted sequence starts over
//! from the first role.

use crate::config::ControllerConfig;
use crate::context::ControllerContext;
use crate::dependency::sort_roles;
use crate::error::{Result, ResultExt};
use crate::retry::retry_on_conflict;
use crate::runtime::{Action, Reconciler};
use crate::workload::reconciler_for;
use async_trait::async_trait;
use dashmap::DashSet;
use rbg_store::WatchEvent;
use rbg_types::{
    find_condition, is_condition_true, labels, reasons, set_condition, Condition, ConditionType,
    EventReason, EventSource, LabelSelector, ObjectKey, Pod, Resource, RestartPolicy, RoleGroup,
};
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// A pod failure in one role of a group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RestartTrigger {
    pub group: ObjectKey,
    pub role: String,
}

impl fmt::Display for RestartTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.group, self.role)
    }
}

/// Whether a pod event signals a failure worth acting on
pub fn trigger_for_pod(event: &WatchEvent<Pod>) -> Option<RestartTrigger> {
    let pod = event.object();
    let group = pod.metadata.labels.get(labels::GROUP_NAME_LABEL)?;
    let role = pod.metadata.labels.get(labels::ROLE_NAME_LABEL)?;
    let failed = event.is_deleted() || pod.metadata.is_deleting() || pod.has_container_restarted();
    failed.then(|| RestartTrigger {
        group: ObjectKey::new(pod.metadata.namespace.clone(), group.clone()),
        role: role.clone(),
    })
}

struct ActiveGuard<'a> {
    active: &'a DashSet<ObjectKey>,
    key: ObjectKey,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.key);
    }
}

pub struct RestartCoordinator {
    ctx: ControllerContext,
    /// Groups with a sequence running in this process
    active: DashSet<ObjectKey>,
    /// Groups whose sequence failed or was interrupted and must run again
    retrying: DashSet<ObjectKey>,
}

impl RestartCoordinator {
    pub fn new(ctx: ControllerContext) -> Self {
        Self {
            ctx,
            active: DashSet::new(),
            retrying: DashSet::new(),
        }
    }

    /// Map a pod event to a restart trigger.
    ///
    /// Pods created before the group's last restart transition belong to
    /// workloads that restart already replaced and are ignored.
    pub async fn triggers_for(&self, event: WatchEvent<Pod>) -> Vec<RestartTrigger> {
        let Some(trigger) = trigger_for_pod(&event) else {
            return Vec::new();
        };
        let group = match self.ctx.client.groups.get(&trigger.group).await {
            Ok(Some(group)) => group,
            _ => return Vec::new(),
        };
        let created = event.object().metadata.creation_timestamp;
        let last_restart = find_condition(&group.status.conditions, ConditionType::RestartInProgress)
            .map(|c| c.last_transition_time);
        match (created, last_restart) {
            (Some(created), Some(restarted)) if created < restarted => Vec::new(),
            _ => vec![trigger],
        }
    }

    /// Re-enqueue groups whose restart was interrupted by a process exit
    pub async fn resume_interrupted(&self) -> Result<Vec<RestartTrigger>> {
        let groups = self
            .ctx
            .client
            .groups
            .list(None, &LabelSelector::everything())
            .await?;
        let mut triggers = Vec::new();
        for group in groups {
            if !is_condition_true(&group.status.conditions, ConditionType::RestartInProgress) {
                continue;
            }
            let Some(role) = group
                .spec
                .roles
                .iter()
                .find(|r| r.restart_policy == RestartPolicy::RecreateGroupOnPodRestart)
            else {
                continue;
            };
            info!(group = %group.key(), "Resuming interrupted restart");
            self.retrying.insert(group.key());
            triggers.push(RestartTrigger {
                group: group.key(),
                role: role.name.clone(),
            });
        }
        Ok(triggers)
    }

    #[instrument(skip(self), fields(trigger = %trigger))]
    pub async fn handle(&self, trigger: &RestartTrigger) -> Result<Action> {
        let Some(group) = self.ctx.client.groups.get(&trigger.group).await? else {
            return Ok(Action::await_change());
        };
        let Some(role) = group.role(&trigger.role) else {
            debug!("Role no longer in group");
            return Ok(Action::await_change());
        };
        if role.restart_policy != RestartPolicy::RecreateGroupOnPodRestart {
            return Ok(Action::await_change());
        }

        let key = group.key();
        if !self.active.insert(key.clone()) {
            debug!("Restart already running in this process");
            return Ok(Action::await_change());
        }
        let _guard = ActiveGuard {
            active: &self.active,
            key: key.clone(),
        };

        let resuming = self.retrying.contains(&key);
        let group = if is_condition_true(&group.status.conditions, ConditionType::RestartInProgress) {
            if !resuming {
                debug!("Restart already in progress");
                return Ok(Action::await_change());
            }
            group
        } else {
            match self.claim(&key).await? {
                Some(group) => group,
                None => {
                    debug!("Another trigger claimed the restart");
                    return Ok(Action::await_change());
                }
            }
        };

        match self.run_sequence(&group, &trigger.role).await {
            Ok(()) => {
                self.retrying.remove(&key);
                Ok(Action::await_change())
            }
            Err(err) => {
                warn!(group = %key, error = %err, "Restart failed, will retry");
                self.ctx.warning(
                    EventSource::Restart,
                    RoleGroup::KIND,
                    &key,
                    EventReason::FailedRestart,
                    err.to_string(),
                );
                self.retrying.insert(key);
                Err(err)
            }
        }
    }

    /// Flip RestartInProgress to true; `None` when someone else already did
    async fn claim(&self, key: &ObjectKey) -> Result<Option<RoleGroup>> {
        let client = &self.ctx.client;
        retry_on_conflict(&self.ctx.config.conflict_retry, "claim restart", move || async move {
            let Some(mut group) = client.groups.get(key).await? else {
                return Ok(None);
            };
            if is_condition_true(&group.status.conditions, ConditionType::RestartInProgress) {
                return Ok(None);
            }
            set_condition(
                &mut group.status.conditions,
                Condition::new(
                    ConditionType::RestartInProgress,
                    true,
                    reasons::RESTART_STARTED,
                    "recreating all roles",
                ),
            );
            Ok(Some(client.groups.update_status(group).await?))
        })
        .await
    }

    async fn run_sequence(&self, group: &RoleGroup, trigger_role: &str) -> Result<()> {
        let key = group.key();
        self.ctx.normal(
            EventSource::Restart,
            RoleGroup::KIND,
            &key,
            EventReason::RBGRestart,
            format!("pod failure in role {trigger_role}, recreating all roles"),
        );
        info!(group = %key, role = trigger_role, "Starting group restart");

        let order = sort_roles(group)?;
        let interval = self.ctx.config.restart_poll_interval();
        let timeout = self.ctx.config.restart_poll_timeout();
        for role in order {
            reconciler_for(role.workload, self.ctx.client.clone())
                .recreate(group, role, interval, timeout)
                .await
                .context(|| format!("recreate role {}", role.name))?;
            info!(group = %key, role = %role.name, "Role recreated");
        }

        let client = &self.ctx.client;
        let key_ref = &key;
        retry_on_conflict(&self.ctx.config.conflict_retry, "finish restart", move || async move {
            let Some(mut fresh) = client.groups.get(key_ref).await? else {
                return Ok(());
            };
            set_condition(
                &mut fresh.status.conditions,
                Condition::new(
                    ConditionType::RestartInProgress,
                    false,
                    reasons::RESTART_COMPLETED,
                    "all roles recreated",
                ),
            );
            client.groups.update_status(fresh).await?;
            Ok(())
        })
        .await?;

        self.ctx.normal(
            EventSource::Restart,
            RoleGroup::KIND,
            &key,
            EventReason::RBGRestartCompleted,
            "all roles recreated",
        );
        info!(group = %key, "Group restart completed");
        Ok(())
    }
}

#[async_trait]
impl Reconciler for RestartCoordinator {
    type Key = RestartTrigger;

    fn name(&self) -> &'static str {
        "restart"
    }

    async fn reconcile(&self, trigger: &RestartTrigger) -> Result<Action> {
        self.handle(trigger).await
    }

    /// A sequence is bounded per role by the recreation poll timeout
    fn pass_timeout(&self, _config: &ControllerConfig) -> Option<std::time::Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupReconciler;
    use rbg_store::{BroadcastRecorder, Client};
    use rbg_types::{Container, ContainerStatus, ObjectMeta, PodStatus, RoleSpec, WorkloadKind};
    use std::sync::Arc;
    use tokio::task::JoinHandle;

    fn config(timeout_ms: u64) -> ControllerConfig {
        ControllerConfig {
            restart_poll_interval_ms: 5,
            restart_poll_timeout_ms: timeout_ms,
            ..Default::default()
        }
    }

    fn role(name: &str) -> RoleSpec {
        let mut role = RoleSpec::new(name, 1);
        role.workload = WorkloadKind::Deployment;
        role.restart_policy = RestartPolicy::RecreateGroupOnPodRestart;
        role.template.spec.containers = vec![Container::new("main", "img:1")];
        role
    }

    fn pod(group: &str, role: &str, restarts: i32) -> Pod {
        let mut metadata = ObjectMeta::named("default", format!("{group}-{role}-0"));
        metadata.labels.insert(labels::GROUP_NAME_LABEL.into(), group.into());
        metadata.labels.insert(labels::ROLE_NAME_LABEL.into(), role.into());
        Pod {
            metadata,
            spec: Default::default(),
            status: PodStatus {
                phase: Some("Running".into()),
                container_statuses: vec![ContainerStatus {
                    name: "main".into(),
                    ready: true,
                    restart_count: restarts,
                }],
            },
        }
    }

    /// Stands in for the group loop: recreates workloads as they disappear
    fn spawn_recreator(client: &Client, recorder: Arc<BroadcastRecorder>) -> JoinHandle<()> {
        let mut events = client.workloads.watch();
        let ctx = ControllerContext::new(client.clone(), recorder, ControllerConfig::default());
        let groups = GroupReconciler::new(ctx);
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let WatchEvent::Deleted(w) = event {
                    if let Some(group) = w.metadata.labels.get(labels::GROUP_NAME_LABEL) {
                        let key = ObjectKey::new(w.metadata.namespace.clone(), group.clone());
                        let _ = groups.reconcile_group(&key).await;
                    }
                }
            }
        })
    }

    async fn seeded(client: &Client, recorder: &Arc<BroadcastRecorder>) -> RoleGroup {
        let group = client
            .groups
            .create(RoleGroup::new("default", "g", vec![role("a"), role("b")]))
            .await
            .unwrap();
        let ctx = ControllerContext::new(client.clone(), recorder.clone(), ControllerConfig::default());
        GroupReconciler::new(ctx).reconcile_group(&group.key()).await.unwrap();
        group
    }

    fn trigger(role: &str) -> RestartTrigger {
        RestartTrigger {
            group: ObjectKey::new("default", "g"),
            role: role.to_string(),
        }
    }

    #[test]
    fn test_trigger_for_pod() {
        assert!(trigger_for_pod(&WatchEvent::Modified(pod("g", "a", 0))).is_none());
        assert_eq!(
            trigger_for_pod(&WatchEvent::Modified(pod("g", "a", 1))),
            Some(trigger("a"))
        );
        assert_eq!(
            trigger_for_pod(&WatchEvent::Deleted(pod("g", "b", 0))),
            Some(trigger("b"))
        );

        let mut unlabelled = pod("g", "a", 3);
        unlabelled.metadata.labels.clear();
        assert!(trigger_for_pod(&WatchEvent::Modified(unlabelled)).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_run_one_sequence() {
        let client = Client::in_memory();
        let recorder = Arc::new(BroadcastRecorder::default());
        let group = seeded(&client, &recorder).await;
        let before = client.workloads.get(&group.workload_key("a")).await.unwrap().unwrap();
        let recreator = spawn_recreator(&client, recorder.clone());

        // Two processes, each with its own in-memory guard
        let first = RestartCoordinator::new(ControllerContext::new(
            client.clone(),
            recorder.clone(),
            config(5_000),
        ));
        let second = RestartCoordinator::new(ControllerContext::new(
            client.clone(),
            recorder.clone(),
            config(5_000),
        ));
        let (on_a, on_b) = (trigger("a"), trigger("b"));
        let (a, b) = tokio::join!(first.handle(&on_a), second.handle(&on_b));
        a.unwrap();
        b.unwrap();

        assert_eq!(recorder.count(EventReason::RBGRestart), 1);
        assert_eq!(recorder.count(EventReason::RBGRestartCompleted), 1);

        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        let restart = find_condition(&stored.status.conditions, ConditionType::RestartInProgress).unwrap();
        assert!(!restart.is_true());
        assert_eq!(restart.reason, reasons::RESTART_COMPLETED);

        let after = client.workloads.get(&group.workload_key("a")).await.unwrap().unwrap();
        assert_ne!(before.metadata.uid, after.metadata.uid);
        recreator.abort();
    }

    #[tokio::test]
    async fn test_failed_restart_keeps_condition_and_retries() {
        let client = Client::in_memory();
        let recorder = Arc::new(BroadcastRecorder::default());
        let group = seeded(&client, &recorder).await;
        let coordinator = RestartCoordinator::new(ControllerContext::new(
            client.clone(),
            recorder.clone(),
            config(300),
        ));

        // Nothing recreates the workload, so the poll times out
        coordinator.handle(&trigger("a")).await.unwrap_err();
        assert_eq!(recorder.count(EventReason::FailedRestart), 1);
        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        assert!(is_condition_true(&stored.status.conditions, ConditionType::RestartInProgress));

        // Another process would see the condition and stay away
        let bystander = RestartCoordinator::new(ControllerContext::new(
            client.clone(),
            recorder.clone(),
            config(300),
        ));
        bystander.handle(&trigger("b")).await.unwrap();
        assert_eq!(recorder.count(EventReason::RBGRestart), 1);

        let recreator = spawn_recreator(&client, recorder.clone());
        // The first role's workload is gone; recreate it before retrying
        let ctx = ControllerContext::new(client.clone(), recorder.clone(), ControllerConfig::default());
        GroupReconciler::new(ctx).reconcile_group(&group.key()).await.unwrap();

        coordinator.handle(&trigger("a")).await.unwrap();
        assert_eq!(recorder.count(EventReason::RBGRestart), 2);
        assert_eq!(recorder.count(EventReason::RBGRestartCompleted), 1);
        let stored = client.groups.get(&group.key()).await.unwrap().unwrap();
        assert!(!is_condition_true(&stored.status.conditions, ConditionType::RestartInProgress));
        recreator.abort();
    }

    #[tokio::test]
    async fn test_resume_interrupted() {
        let client = Client::in_memory();
        let recorder = Arc::new(BroadcastRecorder::default());
        let mut group = RoleGroup::new("default", "g", vec![role("a")]);
        set_condition(
            &mut group.status.conditions,
            Condition::new(ConditionType::RestartInProgress, true, reasons::RESTART_STARTED, ""),
        );
        client.groups.create(group).await.unwrap();

        let coordinator = RestartCoordinator::new(ControllerContext::new(
            client.clone(),
            recorder,
            config(50),
        ));
        let triggers = coordinator.resume_interrupted().await.unwrap();
        assert_eq!(triggers, vec![trigger("a")]);
        assert!(coordinator.retrying.contains(&ObjectKey::new("default", "g")));
    }

    #[tokio::test]
    async fn test_stale_pods_are_ignored() {
        let client = Client::in_memory();
        let recorder = Arc::new(BroadcastRecorder::default());
        let mut group = RoleGroup::new("default", "g", vec![role("a")]);
        set_condition(
            &mut group.status.conditions,
            Condition::new(ConditionType::RestartInProgress, false, reasons::RESTART_COMPLETED, ""),
        );
        client.groups.create(group).await.unwrap();
        let coordinator = RestartCoordinator::new(ControllerContext::new(
            client.clone(),
            recorder,
            config(50),
        ));

        let mut old = pod("g", "a", 0);
        old.metadata.creation_timestamp = Some(chrono::Utc::now() - chrono::Duration::hours(1));
        assert!(coordinator.triggers_for(WatchEvent::Deleted(old)).await.is_empty());

        let mut fresh = pod("g", "a", 2);
        fresh.metadata.creation_timestamp = Some(chrono::Utc::now() + chrono::Duration::seconds(1));
        assert_eq!(
            coordinator.triggers_for(WatchEvent::Modified(fresh)).await,
            vec![trigger("a")]
        );
    }

    #[tokio::test]
    async fn test_policy_none_is_ignored() {
        let client = Client::in_memory();
        let recorder = Arc::new(BroadcastRecorder::default());
        let mut plain = role("a");
        plain.restart_policy = RestartPolicy::None;
        client
            .groups
            .create(RoleGroup::new("default", "g", vec![plain]))
            .await
            .unwrap();
        let coordinator = RestartCoordinator::new(ControllerContext::new(
            client.clone(),
            recorder.clone(),
            config(50),
        ));
        coordinator.handle(&trigger("a")).await.unwrap();
        assert_eq!(recorder.count(EventReason::RBGRestart), 0);
    }
}
