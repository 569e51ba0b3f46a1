//! Role group sets: N identical groups stamped from one template

use crate::condition::Condition;
use crate::group::RoleGroupSpec;
use crate::meta::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleGroupSet {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: RoleGroupSetSpec,
    #[serde(default)]
    pub status: RoleGroupSetStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleGroupSetSpec {
    #[serde(default = "default_set_replicas")]
    pub replicas: i32,
    pub template: RoleGroupSpec,
}

fn default_set_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGroupSetStatus {
    #[serde(default)]
    pub observed_generation: i64,
    /// Groups currently owned by the set
    #[serde(default)]
    pub replicas: i32,
    /// Owned groups whose Ready condition is true
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl RoleGroupSet {
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            kind: "RoleGroupSet".to_string(),
            name: self.metadata.name.clone(),
            uid: self.metadata.uid.clone(),
            controller: true,
            block_owner_deletion: true,
        }
    }
}
