//! Engine runtime profiles: named sidecar bundles injected into role pods

use crate::meta::ObjectMeta;
use crate::pod::{Container, Volume};
use serde::{Deserialize, Serialize};

/// Cluster-wide profile; looked up by name regardless of namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineRuntimeProfile {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: EngineRuntimeProfileSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRuntimeProfileSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
}
