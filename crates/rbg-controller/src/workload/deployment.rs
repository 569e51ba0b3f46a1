use super::{role_selector, workload_meta, WorkloadReconciler};
use crate::error::Result;
use crate::template::{build_pod_template, revision_hash};
use async_trait::async_trait;
use rbg_store::Client;
use rbg_types::{
    DeploymentSpec, EngineRuntimeProfile, RoleGroup, RoleSpec, Workload, WorkloadKind,
    WorkloadSpec, WorkloadStatus,
};
use std::collections::BTreeMap;

/// Interchangeable stateless replicas
pub struct DeploymentReconciler {
    client: Client,
}

impl DeploymentReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadReconciler for DeploymentReconciler {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::Deployment
    }

    fn client(&self) -> &Client {
        &self.client
    }

    fn materialize(
        &self,
        group: &RoleGroup,
        role: &RoleSpec,
        profiles: &BTreeMap<String, EngineRuntimeProfile>,
        observed: Option<&Workload>,
    ) -> Result<Workload> {
        let template = build_pod_template(group, role, &role.template, profiles, true)?;
        let revision = revision_hash([&template])?;

        // The selector cannot change once the object exists
        let selector = match observed {
            Some(w) if !w.selector().is_empty() => w.selector().clone(),
            _ => role_selector(group, role),
        };

        Ok(Workload {
            metadata: workload_meta(group, role, revision),
            spec: WorkloadSpec::Deployment(DeploymentSpec {
                replicas: role.replicas.max(0),
                selector,
                template,
                max_surge: role.rollout_strategy.max_surge,
                max_unavailable: role.rollout_strategy.max_unavailable,
            }),
            status: WorkloadStatus::default(),
        })
    }
}
