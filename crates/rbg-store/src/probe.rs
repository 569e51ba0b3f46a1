//! Startup-time schema existence probe

use crate::error::ProbeError;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{info, warn};

/// Schemas the controller cannot run without
pub const REQUIRED_SCHEMAS: &[&str] = &[
    "rolebasedgroups.workloads.x-k8s.io",
    "rolebasedgroupscalingadapters.workloads.x-k8s.io",
    "rolebasedgroupsets.workloads.x-k8s.io",
    "clusterengineruntimeprofiles.workloads.x-k8s.io",
];

/// Schemas whose absence only disables a workload kind
pub const OPTIONAL_SCHEMAS: &[&str] = &["leaderworkersets.leaderworkerset.x-k8s.io"];

#[async_trait]
pub trait SchemaProbe: Send + Sync {
    async fn is_registered(&self, schema: &str) -> Result<bool, ProbeError>;
}

/// Probe backed by a fixed set of registered schema names
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaProbe {
    registered: HashSet<String>,
}

impl StaticSchemaProbe {
    pub fn new<I, S>(schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registered: schemas.into_iter().map(Into::into).collect(),
        }
    }

    /// Probe with every known schema registered
    pub fn all() -> Self {
        Self::new(REQUIRED_SCHEMAS.iter().chain(OPTIONAL_SCHEMAS.iter()).copied())
    }
}

#[async_trait]
impl SchemaProbe for StaticSchemaProbe {
    async fn is_registered(&self, schema: &str) -> Result<bool, ProbeError> {
        Ok(self.registered.contains(schema))
    }
}

/// Check every required schema; returns the optional ones that are missing
pub async fn verify_schemas(probe: &dyn SchemaProbe) -> Result<Vec<String>, ProbeError> {
    for schema in REQUIRED_SCHEMAS {
        if !probe.is_registered(schema).await? {
            return Err(ProbeError::MissingSchema(schema.to_string()));
        }
        info!(schema = %schema, "schema registered");
    }

    let mut missing = Vec::new();
    for schema in OPTIONAL_SCHEMAS {
        if !probe.is_registered(schema).await? {
            warn!(schema = %schema, "optional schema not registered");
            missing.push(schema.to_string());
        }
    }
    Ok(missing)
}
