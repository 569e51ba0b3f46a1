//! Scaling adapter reconciler
//!
//! Binds an adapter to one role of a group and propagates the replica count
//! an external autoscaler writes into `spec.replicas` onto that role.
//! An adapter only reaches `Bound` after its owner reference to the target
//! group has been persisted in a pass of its own.

use crate::context::ControllerContext;
use crate::error::{ReconcileError, Result};
use crate::retry::retry_on_conflict;
use crate::runtime::{Action, Reconciler};
use crate::workload::role_selector;
use async_trait::async_trait;
use chrono::Utc;
use rbg_types::{
    AdapterPhase, EventReason, EventSource, LabelSelector, ObjectKey, Resource, RoleGroup,
    ScalingAdapter,
};
use std::time::Duration;
use tracing::{info, instrument, warn};

pub struct ScalingAdapterReconciler {
    ctx: ControllerContext,
}

impl ScalingAdapterReconciler {
    pub fn new(ctx: ControllerContext) -> Self {
        Self { ctx }
    }

    fn warn(&self, key: &ObjectKey, reason: EventReason, message: String) {
        self.ctx.warning(
            EventSource::ScalingAdapter,
            ScalingAdapter::KIND,
            key,
            reason,
            message,
        );
    }

    fn normal(&self, key: &ObjectKey, reason: EventReason, message: String) {
        self.ctx.normal(
            EventSource::ScalingAdapter,
            ScalingAdapter::KIND,
            key,
            reason,
            message,
        );
    }

    #[instrument(skip(self), fields(adapter = %key))]
    pub async fn reconcile_adapter(&self, key: &ObjectKey) -> Result<Action> {
        let client = &self.ctx.client;
        let Some(adapter) = client.adapters.get(key).await? else {
            return Ok(Action::await_change());
        };
        if adapter.metadata.is_deleting() {
            return Ok(Action::await_change());
        }

        let group_key = adapter.target_group_key();
        let group = match client.groups.get(&group_key).await {
            Ok(Some(group)) => group,
            Ok(None) => {
                let message = format!("target group {group_key} not found");
                self.warn(key, EventReason::FailedGetRBG, message);
                self.mark_not_bound(&adapter).await?;
                return Ok(Action::await_change());
            }
            Err(err) => {
                self.warn(key, EventReason::FailedGetRBG, err.to_string());
                return Err(ReconcileError::from(err).context(format!("target group {group_key}")));
            }
        };

        let role_name = adapter.spec.scale_target_ref.role.clone();
        let Some(role) = group.role(&role_name) else {
            let message = format!("role {role_name} not found in group {group_key}");
            self.warn(key, EventReason::FailedGetRBGRole, message);
            self.mark_not_bound(&adapter).await?;
            return Ok(Action::await_change());
        };

        if !adapter.metadata.is_owned_by(&group.metadata.uid) {
            let mut owned = adapter.clone();
            owned.metadata.add_owner_reference(group.owner_reference());
            client.adapters.update(owned).await?;
            info!(group = %group_key, "Persisted owner reference to target group");
            return Ok(Action::requeue(Duration::ZERO));
        }

        if adapter.status.phase != AdapterPhase::Bound {
            return self.bind(adapter, &group, role.replicas).await;
        }

        let (Some(desired), actual) = (adapter.spec.replicas, role.replicas) else {
            return Ok(Action::await_change());
        };
        if desired == actual {
            return Ok(Action::await_change());
        }
        if desired < 0 {
            self.warn(key, EventReason::FailedScale, format!("refusing negative replicas {desired}"));
            return Ok(Action::await_change());
        }

        self.scale(&adapter, desired, actual).await?;
        Ok(Action::await_change())
    }

    async fn mark_not_bound(&self, adapter: &ScalingAdapter) -> Result<()> {
        if adapter.status.phase == AdapterPhase::NotBound {
            return Ok(());
        }
        let mut updated = adapter.clone();
        updated.status.phase = AdapterPhase::NotBound;
        self.ctx.client.adapters.patch_status(updated).await?;
        Ok(())
    }

    async fn bind(&self, adapter: ScalingAdapter, group: &RoleGroup, replicas: i32) -> Result<Action> {
        let client = &self.ctx.client;
        let key = adapter.key();
        let role_name = adapter.spec.scale_target_ref.role.clone();

        // The role's size is the baseline; a preset value does not rescale it
        let mut adapter = adapter;
        if adapter.spec.replicas != Some(replicas) {
            adapter.spec.replicas = Some(replicas);
            adapter = client.adapters.update(adapter).await?;
        }

        let selector = match client.workloads.get(&group.workload_key(&role_name)).await? {
            Some(w) if !w.selector().is_empty() => w.selector().to_string(),
            _ => match group.role(&role_name) {
                Some(role) => role_selector(group, role).to_string(),
                None => LabelSelector::default().to_string(),
            },
        };

        adapter.status.phase = AdapterPhase::Bound;
        adapter.status.replicas = Some(replicas);
        adapter.status.selector = selector;
        client.adapters.patch_status(adapter).await?;

        info!(adapter = %key, role = %role_name, replicas, "Bound scaling adapter");
        self.normal(
            &key,
            EventReason::SuccessfulBound,
            format!("bound to role {role_name} of group {}", group.name()),
        );
        Ok(Action::await_change())
    }

    async fn scale(&self, adapter: &ScalingAdapter, desired: i32, actual: i32) -> Result<()> {
        let client = &self.ctx.client;
        let key = adapter.key();
        let group_key = adapter.target_group_key();
        let role_name = adapter.spec.scale_target_ref.role.as_str();
        let group_key_ref = &group_key;

        let scaled = retry_on_conflict(&self.ctx.config.conflict_retry, "scale role", move || async move {
            let mut group = client.groups.get_required(group_key_ref).await?;
            match group.role_mut(role_name) {
                Some(role) if role.replicas == desired => return Ok(true),
                Some(role) => role.replicas = desired,
                // Picked up as NotBound on the next pass
                None => return Ok(false),
            }
            client.groups.update(group).await?;
            Ok(true)
        })
        .await;

        match scaled {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(err) => {
                warn!(adapter = %key, error = %err, "Failed to scale role");
                self.warn(&key, EventReason::FailedScale, err.to_string());
                return Err(err.context(format!("scale role {role_name}")));
            }
        }

        let mut updated = adapter.clone();
        updated.status.replicas = Some(desired);
        updated.status.last_scale_time = Some(Utc::now());
        client.adapters.patch_status(updated).await?;

        info!(adapter = %key, from = actual, to = desired, "Scaled role");
        self.normal(
            &key,
            EventReason::SuccessfulScale,
            format!("scaled role {role_name} from {actual} to {desired}"),
        );
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ScalingAdapterReconciler {
    type Key = ObjectKey;

    fn name(&self) -> &'static str {
        "scalingadapter"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        self.reconcile_adapter(key).await
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>> {
        let adapters = self
            .ctx
            .client
            .adapters
            .list(None, &LabelSelector::everything())
            .await?;
        Ok(adapters.iter().map(|a| a.key()).collect())
    }
}
