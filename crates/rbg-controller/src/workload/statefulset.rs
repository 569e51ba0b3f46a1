use super::{role_selector, workload_meta, workload_owner, WorkloadReconciler};
use crate::equality::{project_meta, semantic_diff_service};
use crate::error::Result;
use crate::rollout::{self, RolloutInput, RolloutSnapshot};
use crate::template::{build_pod_template, revision_hash};
use async_trait::async_trait;
use rbg_store::Client;
use rbg_types::{
    labels, EngineRuntimeProfile, ObjectMeta, Resource, RoleGroup, RoleSpec, Service, ServiceSpec,
    StatefulSetSpec, Workload, WorkloadKind, WorkloadSpec, WorkloadStatus,
};
use std::collections::BTreeMap;
use tracing::debug;

/// Ordinal-indexed workloads with a headless service and staged rollout
pub struct StatefulSetReconciler {
    client: Client,
}

impl StatefulSetReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn headless_service(group: &RoleGroup, role: &RoleSpec, workload: &Workload) -> Service {
        let mut metadata = ObjectMeta::named(group.namespace(), group.workload_name(&role.name));
        metadata.labels = group.common_labels(role);
        metadata.owner_references = vec![workload_owner(workload)];
        Service {
            metadata,
            spec: ServiceSpec {
                cluster_ip: Some("None".to_string()),
                selector: role_selector(group, role).match_labels,
                publish_not_ready_addresses: true,
                ports: role.service_ports.clone(),
            },
        }
    }
}

#[async_trait]
impl WorkloadReconciler for StatefulSetReconciler {
    fn kind(&self) -> WorkloadKind {
        WorkloadKind::StatefulSet
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
        let (max_surge, max_unavailable) = rollout::resolve_bounds(role)?;

        let template_changed = observed.map_or(false, |w| {
            w.metadata.annotations.get(labels::REVISION_ANNOTATION) != Some(&revision)
        });
        let target = rollout::compute(&RolloutInput {
            desired: role.replicas,
            max_surge,
            max_unavailable,
            current: observed.map(RolloutSnapshot::from_workload),
            template_changed,
        });
        if template_changed || target.partition > 0 {
            debug!(
                role = %role.name,
                replicas = target.replicas,
                partition = target.partition,
                "Rollout step"
            );
        }

        Ok(Workload {
            metadata: workload_meta(group, role, revision),
            spec: WorkloadSpec::StatefulSet(StatefulSetSpec {
                replicas: target.replicas,
                selector: role_selector(group, role),
                service_name: group.workload_name(&role.name),
                template,
                partition: target.partition,
            }),
            status: WorkloadStatus::default(),
        })
    }

    async fn apply_companions(
        &self,
        group: &RoleGroup,
        role: &RoleSpec,
        workload: &Workload,
    ) -> Result<()> {
        let desired = Self::headless_service(group, role, workload);
        match self.client.services.get(&desired.key()).await? {
            Some(observed) => {
                let mut projected = desired.clone();
                projected.metadata = project_meta(&desired.metadata, &observed.metadata);
                if let Some(diff) = semantic_diff_service(&projected, &observed) {
                    debug!(service = %desired.key(), %diff, "Updating headless service");
                    self.client.services.patch(desired).await?;
                }
            }
            None => {
                self.client.services.patch(desired).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::ApplyOutcome;
    use rbg_types::{Container, IntOrPercent};

    fn group(client_uid: &str) -> RoleGroup {
        let mut role = RoleSpec::new("db", 4);
        role.template.spec.containers = vec![Container::new("main", "db:1")];
        role.rollout_strategy.max_surge = IntOrPercent::Int(2);
        role.rollout_strategy.max_unavailable = IntOrPercent::Int(2);
        let mut g = RoleGroup::new("default", "g", vec![role]);
        g.metadata.uid = client_uid.to_string();
        g
    }

    fn sts(w: &Workload) -> &StatefulSetSpec {
        match &w.spec {
            WorkloadSpec::StatefulSet(s) => s,
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_creates_workload_and_headless_service() {
        let client = Client::in_memory();
        let r = StatefulSetReconciler::new(client.clone());
        let g = group("g-uid");
        assert_eq!(r.apply(&g, &g.spec.roles[0]).await.unwrap(), ApplyOutcome::Created);

        let w = client.workloads.get(&g.workload_key("db")).await.unwrap().unwrap();
        assert_eq!((sts(&w).replicas, sts(&w).partition), (4, 0));
        assert_eq!(sts(&w).service_name, "g-db");
        assert!(w.metadata.annotations.contains_key(labels::REVISION_ANNOTATION));

        let svc = client.services.get(&g.workload_key("db")).await.unwrap().unwrap();
        assert_eq!(svc.spec.cluster_ip.as_deref(), Some("None"));
        assert!(svc.spec.publish_not_ready_addresses);
        assert!(svc.metadata.is_owned_by(&w.metadata.uid));
        assert_eq!(svc.spec.selector[labels::ROLE_NAME_LABEL], "db");
    }

    #[tokio::test]
    async fn test_rollout_surges_then_settles() {
        let client = Client::in_memory();
        let r = StatefulSetReconciler::new(client.clone());
        let mut g = group("g-uid");
        r.apply(&g, &g.spec.roles[0]).await.unwrap();

        // Template change starts the surge
        g.spec.roles[0].template.spec.containers[0].image = "db:2".into();
        r.apply(&g, &g.spec.roles[0]).await.unwrap();
        let mut w = client.workloads.get(&g.workload_key("db")).await.unwrap().unwrap();
        assert_eq!((sts(&w).replicas, sts(&w).partition), (6, 2));

        // Platform reports the new revision fully ready
        w.status = WorkloadStatus {
            observed_generation: w.metadata.generation,
            replicas: 6,
            ready_replicas: 6,
            updated_replicas: 4,
            updated_ready_replicas: 4,
        };
        client.workloads.patch_status(w).await.unwrap();

        r.apply(&g, &g.spec.roles[0]).await.unwrap();
        let w = client.workloads.get(&g.workload_key("db")).await.unwrap().unwrap();
        assert_eq!((sts(&w).replicas, sts(&w).partition), (4, 0));
    }

    #[test]
    fn test_materialize_is_deterministic() {
        let client = Client::in_memory();
        let r = StatefulSetReconciler::new(client);
        let g = group("g-uid");
        let profiles = BTreeMap::new();
        let a = r.materialize(&g, &g.spec.roles[0], &profiles, None).unwrap();
        let b = r.materialize(&g, &g.spec.roles[0], &profiles, None).unwrap();
        assert_eq!(a, b);
    }
}
