//! Group-set replicator: keeps N groups stamped from one template

use crate::context::ControllerContext;
use crate::error::Result;
use crate::runtime::{Action, Reconciler};
use async_trait::async_trait;
use futures::future::join_all;
use rbg_types::{
    is_condition_true, labels, ConditionType, EventReason, EventSource, LabelSelector, ObjectKey,
    ObjectMeta, Resource, RoleGroup, RoleGroupSet, RoleGroupSetStatus,
};
use tracing::{debug, info, instrument, warn};

pub struct GroupSetReplicator {
    ctx: ControllerContext,
}

impl GroupSetReplicator {
    pub fn new(ctx: ControllerContext) -> Self {
        Self { ctx }
    }

    /// Groups carrying the set label and owned by this set instance
    pub async fn owned_groups(&self, set: &RoleGroupSet) -> Result<Vec<RoleGroup>> {
        let selector = LabelSelector::everything().with(labels::SET_NAME_LABEL, set.metadata.name.clone());
        let groups = self
            .ctx
            .client
            .groups
            .list(Some(&set.metadata.namespace), &selector)
            .await?;
        Ok(groups
            .into_iter()
            .filter(|g| g.metadata.is_owned_by(&set.metadata.uid))
            .collect())
    }

    fn instance(set: &RoleGroupSet) -> RoleGroup {
        let mut metadata = ObjectMeta {
            namespace: set.metadata.namespace.clone(),
            generate_name: Some(format!("{}-", set.metadata.name)),
            ..Default::default()
        };
        metadata
            .labels
            .insert(labels::SET_NAME_LABEL.to_string(), set.metadata.name.clone());
        metadata.add_owner_reference(set.owner_reference());
        RoleGroup {
            metadata,
            spec: set.spec.template.clone(),
            status: Default::default(),
        }
    }

    #[instrument(skip(self), fields(set = %key))]
    pub async fn reconcile_set(&self, key: &ObjectKey) -> Result<Action> {
        let client = &self.ctx.client;
        let Some(set) = client.sets.get(key).await? else {
            return Ok(Action::await_change());
        };
        if set.metadata.is_deleting() {
            return Ok(Action::await_change());
        }

        let mut owned = self.owned_groups(&set).await?;
        let desired = set.spec.replicas.max(0);
        let current = owned.len() as i32;

        if current < desired {
            let deficit = desired - current;
            info!(set = %key, current, desired, "Creating missing groups");
            let creates = (0..deficit).map(|_| client.groups.create(Self::instance(&set)));
            let mut failure = None;
            for result in join_all(creates).await {
                match result {
                    Ok(group) => {
                        self.ctx.normal(
                            EventSource::GroupSet,
                            RoleGroupSet::KIND,
                            key,
                            EventReason::SuccessfulCreate,
                            format!("created group {}", group.metadata.name),
                        );
                        owned.push(group);
                    }
                    Err(err) => {
                        self.ctx.warning(
                            EventSource::GroupSet,
                            RoleGroupSet::KIND,
                            key,
                            EventReason::FailedCreate,
                            err.to_string(),
                        );
                        failure.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = failure {
                return Err(err.into());
            }
        } else if current > desired {
            // Scale-down is not handled; surplus groups stay until removed by hand
            warn!(set = %key, current, desired, "Set has more groups than desired");
        }

        let status = RoleGroupSetStatus {
            observed_generation: set.metadata.generation,
            replicas: owned.len() as i32,
            ready_replicas: owned
                .iter()
                .filter(|g| is_condition_true(&g.status.conditions, ConditionType::Ready))
                .count() as i32,
            conditions: set.status.conditions.clone(),
        };
        if status != set.status {
            debug!(replicas = status.replicas, ready = status.ready_replicas, "Updating set status");
            let mut updated = set;
            updated.status = status;
            client.sets.patch_status(updated).await?;
        }
        Ok(Action::await_change())
    }
}

#[async_trait]
impl Reconciler for GroupSetReplicator {
    type Key = ObjectKey;

    fn name(&self) -> &'static str {
        "rolebasedgroupset"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        self.reconcile_set(key).await
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>> {
        let sets = self
            .ctx
            .client
            .sets
            .list(None, &LabelSelector::everything())
            .await?;
        Ok(sets.iter().map(|s| s.key()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use rbg_store::{BroadcastRecorder, Client};
    use rbg_types::{reasons, set_condition, Condition, RoleGroupSetSpec, RoleGroupSpec, RoleSpec};
    use std::sync::Arc;

    fn set(replicas: i32) -> RoleGroupSet {
        RoleGroupSet {
            metadata: ObjectMeta::named("default", "inference"),
            spec: RoleGroupSetSpec {
                replicas,
                template: RoleGroupSpec {
                    roles: vec![RoleSpec::new("prefill", 1), RoleSpec::new("decode", 2)],
                },
            },
            status: Default::default(),
        }
    }

    fn setup() -> (Client, Arc<BroadcastRecorder>, GroupSetReplicator) {
        let client = Client::in_memory();
        let recorder = Arc::new(BroadcastRecorder::default());
        let ctx = ControllerContext::new(client.clone(), recorder.clone(), ControllerConfig::default());
        (client, recorder, GroupSetReplicator::new(ctx))
    }

    #[tokio::test]
    async fn test_creates_missing_groups() {
        let (client, recorder, replicator) = setup();
        let set = client.sets.create(set(3)).await.unwrap();

        replicator.reconcile_set(&set.key()).await.unwrap();

        let groups = replicator.owned_groups(&set).await.unwrap();
        assert_eq!(groups.len(), 3);
        for group in &groups {
            assert!(group.metadata.name.starts_with("inference-"));
            assert_eq!(group.spec, set.spec.template);
            assert_eq!(
                group.metadata.labels.get(labels::SET_NAME_LABEL),
                Some(&"inference".to_string())
            );
        }
        assert_eq!(recorder.count(EventReason::SuccessfulCreate), 3);

        let stored = client.sets.get(&set.key()).await.unwrap().unwrap();
        assert_eq!(stored.status.replicas, 3);
        assert_eq!(stored.status.ready_replicas, 0);

        // Converged: no further creates
        replicator.reconcile_set(&set.key()).await.unwrap();
        assert_eq!(replicator.owned_groups(&set).await.unwrap().len(), 3);
        assert_eq!(recorder.count(EventReason::SuccessfulCreate), 3);
    }

    #[tokio::test]
    async fn test_groups_of_other_owners_do_not_count() {
        let (client, _, replicator) = setup();
        let set = client.sets.create(set(1)).await.unwrap();

        // Same label, but left behind by an earlier set with the same name
        let mut stray = RoleGroup::new("default", "inference-old", vec![RoleSpec::new("a", 1)]);
        stray
            .metadata
            .labels
            .insert(labels::SET_NAME_LABEL.into(), "inference".into());
        client.groups.create(stray).await.unwrap();

        replicator.reconcile_set(&set.key()).await.unwrap();
        assert_eq!(replicator.owned_groups(&set).await.unwrap().len(), 1);
        let all = client
            .groups
            .list(None, &LabelSelector::everything())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_scale_down_leaves_groups() {
        let (client, _, replicator) = setup();
        let set = client.sets.create(set(2)).await.unwrap();
        replicator.reconcile_set(&set.key()).await.unwrap();

        let mut smaller = client.sets.get(&set.key()).await.unwrap().unwrap();
        smaller.spec.replicas = 1;
        client.sets.update(smaller).await.unwrap();
        replicator.reconcile_set(&set.key()).await.unwrap();

        assert_eq!(replicator.owned_groups(&set).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ready_replicas_follow_group_condition() {
        let (client, _, replicator) = setup();
        let set = client.sets.create(set(2)).await.unwrap();
        replicator.reconcile_set(&set.key()).await.unwrap();

        let mut group = replicator.owned_groups(&set).await.unwrap().remove(0);
        set_condition(
            &mut group.status.conditions,
            Condition::new(ConditionType::Ready, true, reasons::ALL_ROLES_READY, ""),
        );
        client.groups.update_status(group).await.unwrap();

        replicator.reconcile_set(&set.key()).await.unwrap();
        let stored = client.sets.get(&set.key()).await.unwrap().unwrap();
        assert_eq!(stored.status.replicas, 2);
        assert_eq!(stored.status.ready_replicas, 1);
        assert_eq!(stored.status.observed_generation, stored.metadata.generation);
    }
}
