use super::{role_selector, workload_meta, WorkloadReconciler};
use crate::error::Result;
use crate::template::{build_pod_template, patch_template, revision_hash};
use async_trait::async_trait;
use rbg_store::Client;
use rbg_types::{
    EngineRuntimeProfile, GroupRestartPolicy, LeaderWorkerSetSpec, RestartPolicy, RoleGroup,
    RoleSpec, Workload, WorkloadKind, WorkloadSpec, WorkloadStatus,
};
use std::collections::BTreeMap;

/// Replicated groups of one leader plus `size - 1` workers
pub struct LeaderWorkerReconciler {
    client: Client,
}

impl LeaderWorkerReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn group_restart_policy(policy: RestartPolicy) -> GroupRestartPolicy {
    match policy {
        RestartPolicy::None => GroupRestartPolicy::None,
        _ => GroupRestartPolicy::RecreateGroupOnPodRestart,
    }
}

#[async_trait]
impl WorkloadReconciler for LeaderWorkerReconciler {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::LeaderWorkerSet
    }

    fn client(&self) -> &Client {
        &self.client
    }

    fn materialize(
        &self,
        group: &RoleGroup,
        role: &RoleSpec,
        profiles: &BTreeMap<String, EngineRuntimeProfile>,
        _observed: Option<&Workload>,
    ) -> Result<Workload> {
        let lws = role.leader_worker_set.clone().unwrap_or_default();
        let leader_base = patch_template(role, lws.patch_leader_template.as_ref())?;
        let worker_base = patch_template(role, lws.patch_worker_template.as_ref())?;

        // Only the leader carries engine runtime sidecars
        let leader_template = build_pod_template(group, role, &leader_base, profiles, true)?;
        let worker_template = build_pod_template(group, role, &worker_base, profiles, false)?;
        let revision = revision_hash([&leader_template, &worker_template])?;

        Ok(Workload {
            metadata: workload_meta(group, role, revision),
            spec: WorkloadSpec::LeaderWorkerSet(LeaderWorkerSetSpec {
                replicas: role.replicas.max(0),
                size: lws.size.unwrap_or(1).max(1),
                selector: role_selector(group, role),
                leader_template,
                worker_template,
                restart_policy: group_restart_policy(role.restart_policy),
                max_surge: role.rollout_strategy.max_surge,
                max_unavailable: role.rollout_strategy.max_unavailable,
            }),
            status: WorkloadStatus::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ReconcileError, ValidationError};
    use rbg_types::{Container, EngineRuntime, LeaderWorkerTemplate, ObjectMeta};
    use serde_json::json;

    fn role() -> RoleSpec {
        let mut role = RoleSpec::new("infer", 2);
        role.workload = WorkloadKind::LeaderWorkerSet;
        role.restart_policy = RestartPolicy::RecreateGroupOnPodRestart;
        role.template.spec.containers = vec![Container::new("main", "engine:1")];
        role.engine_runtimes = vec![EngineRuntime {
            profile_name: "patio".into(),
            containers: vec![],
        }];
        role.leader_worker_set = Some(LeaderWorkerTemplate {
            size: Some(4),
            patch_leader_template: Some(json!({"labels": {"tier": "leader"}})),
            patch_worker_template: Some(json!({"labels": {"tier": "worker"}})),
        });
        role
    }

    fn profiles() -> BTreeMap<String, EngineRuntimeProfile> {
        let mut profile = EngineRuntimeProfile {
            metadata: ObjectMeta::named("", "patio"),
            ..Default::default()
        };
        profile.spec.containers = vec![Container::new("patio-runtime", "patio:1")];
        BTreeMap::from([("patio".to_string(), profile)])
    }

    fn lws(w: &Workload) -> &LeaderWorkerSetSpec {
        match &w.spec {
            WorkloadSpec::LeaderWorkerSet(l) => l,
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn test_leader_and_worker_templates() {
        let r = LeaderWorkerReconciler::new(Client::in_memory());
        let g = RoleGroup::new("default", "g", vec![role()]);
        let w = r.materialize(&g, &g.spec.roles[0], &profiles(), None).unwrap();
        let spec = lws(&w);

        assert_eq!(spec.size, 4);
        assert_eq!(spec.replicas, 2);
        assert_eq!(spec.restart_policy, GroupRestartPolicy::RecreateGroupOnPodRestart);
        assert_eq!(spec.leader_template.labels["tier"], "leader");
        assert_eq!(spec.worker_template.labels["tier"], "worker");
        assert_eq!(spec.leader_template.spec.containers.len(), 2);
        assert_eq!(spec.worker_template.spec.containers.len(), 1);
    }

    #[test]
    fn test_defaults_and_policy_mapping() {
        let r = LeaderWorkerReconciler::new(Client::in_memory());
        let mut role = role();
        role.leader_worker_set = None;
        role.engine_runtimes.clear();
        role.restart_policy = RestartPolicy::None;
        let g = RoleGroup::new("default", "g", vec![role]);
        let w = r.materialize(&g, &g.spec.roles[0], &BTreeMap::new(), None).unwrap();
        assert_eq!(lws(&w).size, 1);
        assert_eq!(lws(&w).restart_policy, GroupRestartPolicy::None);
    }

    #[test]
    fn test_invalid_patch_is_validation_error() {
        let r = LeaderWorkerReconciler::new(Client::in_memory());
        let mut role = role();
        if let Some(lws) = role.leader_worker_set.as_mut() {
            lws.patch_worker_template = Some(json!({"spec": {"containers": 5}}));
        }
        let g = RoleGroup::new("default", "g", vec![role]);
        let err = r.materialize(&g, &g.spec.roles[0], &profiles(), None).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Validation(ValidationError::InvalidTemplatePatch { .. })
        ));
    }
}
