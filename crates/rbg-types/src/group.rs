//! Role groups: the user-declared aggregate of interdependent roles

use crate::condition::Condition;
use crate::intstr::IntOrPercent;
use crate::labels;
use crate::meta::{ObjectKey, ObjectMeta, OwnerReference};
use crate::pod::{Container, PodTemplateSpec};
use crate::workload::WorkloadKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A set of named roles converged as one unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleGroup {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RoleGroupSpec,
    #[serde(default)]
    pub status: RoleGroupStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleGroupSpec {
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
}

/// One homogeneous sub-workload of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Unique within the group
    pub name: String,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Roles that must be ready before this one is materialized
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub workload: WorkloadKind,

    #[serde(default)]
    pub template: PodTemplateSpec,

    #[serde(default)]
    pub restart_policy: RestartPolicy,

    #[serde(default)]
    pub rollout_strategy: RolloutStrategy,

    /// Leader/worker shape; only read for the leader/worker kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_worker_set: Option<LeaderWorkerTemplate>,

    /// Ports published through discovery
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_ports: Vec<ServicePort>,

    /// Runtime profiles whose sidecars are injected into the pod template
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub engine_runtimes: Vec<EngineRuntime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_adapter: Option<ScalingAdapterToggle>,
}

fn default_replicas() -> i32 {
    1
}

impl RoleSpec {
    /// Minimal role of the default kind
    pub fn new(name: impl Into<String>, replicas: i32) -> Self {
        Self {
            name: name.into(),
            replicas,
            dependencies: Vec::new(),
            workload: WorkloadKind::default(),
            template: PodTemplateSpec::default(),
            restart_policy: RestartPolicy::default(),
            rollout_strategy: RolloutStrategy::default(),
            leader_worker_set: None,
            service_ports: Vec::new(),
            engine_runtimes: Vec::new(),
            scaling_adapter: None,
        }
    }

    pub fn scaling_adapter_enabled(&self) -> bool {
        self.scaling_adapter.map(|s| s.enable).unwrap_or(false)
    }
}

/// What happens to a group when one of its pods fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    None,
    /// Recreate every role of the group in dependency order
    #[serde(alias = "RecreateRBGOnPodRestart")]
    RecreateGroupOnPodRestart,
    /// Recreate only the affected role instance
    RecreateRoleInstanceOnPodRestart,
}

/// Staged rollout bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStrategy {
    /// Extra replicas allowed above desired during a rollout
    #[serde(default)]
    pub max_surge: IntOrPercent,

    /// Replicas that may be replaced at the same time
    #[serde(default = "default_max_unavailable")]
    pub max_unavailable: IntOrPercent,
}

fn default_max_unavailable() -> IntOrPercent {
    IntOrPercent::Int(1)
}

impl Default for RolloutStrategy {
    fn default() -> Self {
        Self {
            max_surge: IntOrPercent::Int(0),
            max_unavailable: default_max_unavailable(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderWorkerTemplate {
    /// Pods per leader/worker group, leader included
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,

    /// JSON merge patch applied to the role template for the leader
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_leader_template: Option<serde_json::Value>,

    /// JSON merge patch applied to the role template for workers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_worker_template: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: i32,
}

/// Reference to a runtime profile plus per-role container overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRuntime {
    pub profile_name: String,

    /// Env and args appended to the profile container of the same name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingAdapterToggle {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGroupStatus {
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default)]
    pub role_statuses: Vec<RoleStatus>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Cached projection of a role's workload; always re-derived
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleStatus {
    pub name: String,
    pub replicas: i32,
    pub ready_replicas: i32,
}

impl RoleGroup {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, roles: Vec<RoleSpec>) -> Self {
        Self {
            metadata: ObjectMeta::named(namespace, name),
            spec: RoleGroupSpec { roles },
            status: RoleGroupStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn role(&self, name: &str) -> Option<&RoleSpec> {
        self.spec.roles.iter().find(|r| r.name == name)
    }

    pub fn role_mut(&mut self, name: &str) -> Option<&mut RoleSpec> {
        self.spec.roles.iter_mut().find(|r| r.name == name)
    }

    pub fn role_status(&self, name: &str) -> Option<&RoleStatus> {
        self.status.role_statuses.iter().find(|s| s.name == name)
    }

    /// Name shared by a role's workload, service and config map
    pub fn workload_name(&self, role: &str) -> String {
        format!("{}-{}", self.metadata.name, role)
    }

    pub fn workload_key(&self, role: &str) -> ObjectKey {
        ObjectKey::new(self.metadata.namespace.clone(), self.workload_name(role))
    }

    /// Total replicas across all roles
    pub fn group_size(&self) -> i32 {
        self.spec.roles.iter().map(|r| r.replicas.max(0)).sum()
    }

    /// Stable identity labels for a role's objects and pods
    pub fn common_labels(&self, role: &RoleSpec) -> BTreeMap<String, String> {
        let mut identity = BTreeMap::new();
        identity.insert(labels::APP_NAME_LABEL.to_string(), self.metadata.name.clone());
        identity.insert(labels::APP_COMPONENT_LABEL.to_string(), role.name.clone());
        identity.insert(
            labels::APP_MANAGED_BY_LABEL.to_string(),
            labels::CONTROLLER_NAME.to_string(),
        );
        identity.insert(labels::APP_INSTANCE_LABEL.to_string(), self.metadata.name.clone());
        identity.insert(labels::GROUP_NAME_LABEL.to_string(), self.metadata.name.clone());
        identity.insert(labels::ROLE_NAME_LABEL.to_string(), role.name.clone());
        identity
    }

    /// Size annotations for a role's objects
    pub fn common_annotations(&self, role: &RoleSpec) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            labels::ROLE_SIZE_ANNOTATION.to_string(),
            role.replicas.to_string(),
        );
        annotations.insert(
            labels::GROUP_SIZE_ANNOTATION.to_string(),
            self.group_size().to_string(),
        );
        annotations
    }

    /// Controlling owner reference pointing at this group
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: "RoleGroup".to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
            block_owner_deletion: true,
        }
    }

    /// Dependency map used for ordering
    pub fn dependency_map(&self) -> BTreeMap<String, Vec<String>> {
        self.spec
            .roles
            .iter()
            .map(|r| (r.name.clone(), r.dependencies.clone()))
            .collect()
    }
}
