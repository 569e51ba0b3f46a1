//! Scaling adapters: bridges letting an external autoscaler drive one role

use crate::meta::{ObjectKey, ObjectMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScalingAdapter {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: ScalingAdapterSpec,
    #[serde(default)]
    pub status: ScalingAdapterStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingAdapterSpec {
    /// Desired role replicas, set by the external scaler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    pub scale_target_ref: ScaleTargetRef,
}

/// The (group, role) pair an adapter drives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleTargetRef {
    /// Group name, in the adapter's namespace
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterPhase {
    #[default]
    None,
    NotBound,
    Bound,
}

impl fmt::Display for AdapterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingAdapterStatus {
    #[serde(default)]
    pub phase: AdapterPhase,

    /// Role replicas last propagated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Pod selector of the target workload, `k=v,...` form
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_time: Option<DateTime<Utc>>,
}

impl ScalingAdapter {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        group: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::named(namespace, name),
            spec: ScalingAdapterSpec {
                replicas: None,
                scale_target_ref: ScaleTargetRef {
                    name: group.into(),
                    role: role.into(),
                },
            },
            status: ScalingAdapterStatus::default(),
        }
    }

    /// Key of the target group
    pub fn target_group_key(&self) -> ObjectKey {
        ObjectKey::new(
            self.metadata.namespace.clone(),
            self.spec.scale_target_ref.name.clone(),
        )
    }

    /// Adapter name the group controller uses for a role
    pub fn name_for(group: &str, role: &str) -> String {
        format!("{group}-{role}")
    }
}
