//! Workload objects a role materializes to

use crate::intstr::IntOrPercent;
use crate::meta::{LabelSelector, ObjectMeta};
use crate::pod::PodTemplateSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of deployable abstractions a role can use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// Ordinal-indexed replicas with stable identities
    #[default]
    StatefulSet,
    /// Interchangeable stateless replicas
    Deployment,
    /// Groups of one leader plus workers
    LeaderWorkerSet,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 3] = [
        WorkloadKind::StatefulSet,
        WorkloadKind::Deployment,
        WorkloadKind::LeaderWorkerSet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::LeaderWorkerSet => "LeaderWorkerSet",
        }
    }

    /// Whether pods carry a per-instance ordinal
    pub fn is_ordinal(&self) -> bool {
        matches!(self, WorkloadKind::StatefulSet | WorkloadKind::LeaderWorkerSet)
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A materialized role workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: WorkloadSpec,
    #[serde(default)]
    pub status: WorkloadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WorkloadSpec {
    StatefulSet(StatefulSetSpec),
    Deployment(DeploymentSpec),
    LeaderWorkerSet(LeaderWorkerSetSpec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatefulSetSpec {
    pub replicas: i32,
    pub selector: LabelSelector,
    /// Headless service governing pod DNS
    pub service_name: String,
    pub template: PodTemplateSpec,
    /// Pods with ordinal >= partition run the new revision
    #[serde(default)]
    pub partition: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub replicas: i32,
    pub selector: LabelSelector,
    pub template: PodTemplateSpec,
    #[serde(default)]
    pub max_surge: IntOrPercent,
    #[serde(default)]
    pub max_unavailable: IntOrPercent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderWorkerSetSpec {
    /// Number of leader/worker groups
    pub replicas: i32,
    /// Pods per group, leader included
    pub size: i32,
    pub selector: LabelSelector,
    pub leader_template: PodTemplateSpec,
    pub worker_template: PodTemplateSpec,
    #[serde(default)]
    pub restart_policy: GroupRestartPolicy,
    #[serde(default)]
    pub max_surge: IntOrPercent,
    #[serde(default)]
    pub max_unavailable: IntOrPercent,
}

/// Restart behavior inside one leader/worker group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupRestartPolicy {
    #[default]
    None,
    RecreateGroupOnPodRestart,
}

/// Observed state reported by the platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    /// Replicas running the latest template
    #[serde(default)]
    pub updated_replicas: i32,
    /// Ready replicas running the latest template
    #[serde(default)]
    pub updated_ready_replicas: i32,
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self.spec {
            WorkloadSpec::StatefulSet(_) => WorkloadKind::StatefulSet,
            WorkloadSpec::Deployment(_) => WorkloadKind::Deployment,
            WorkloadSpec::LeaderWorkerSet(_) => WorkloadKind::LeaderWorkerSet,
        }
    }

    /// Desired replica count recorded on the object
    pub fn replicas(&self) -> i32 {
        match &self.spec {
            WorkloadSpec::StatefulSet(s) => s.replicas,
            WorkloadSpec::Deployment(d) => d.replicas,
            WorkloadSpec::LeaderWorkerSet(l) => l.replicas,
        }
    }

    pub fn selector(&self) -> &LabelSelector {
        match &self.spec {
            WorkloadSpec::StatefulSet(s) => &s.selector,
            WorkloadSpec::Deployment(d) => &d.selector,
            WorkloadSpec::LeaderWorkerSet(l) => &l.selector,
        }
    }

    /// Current rollout partition; zero for kinds without one
    pub fn partition(&self) -> i32 {
        match &self.spec {
            WorkloadSpec::StatefulSet(s) => s.partition,
            _ => 0,
        }
    }

    /// `readyReplicas == replicas`
    ///
    /// This cannot tell a deliberate scale-down apart from degradation.
    pub fn is_ready(&self) -> bool {
        self.status.ready_replicas == self.replicas()
    }
}
