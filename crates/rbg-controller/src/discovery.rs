//! Peer discovery for role pods
//!
//! Every container learns its own identity plus the stable DNS address and
//! ports of every instance of every role in the group, both as environment
//! variables and as a YAML document mounted from a config map.

use rbg_types::{labels, EnvVar, RoleGroup, RoleSpec, ServicePort};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key used for a service port in variable names and the cluster config
pub fn port_key(port: &ServicePort) -> String {
    match &port.name {
        Some(name) if !name.is_empty() => name.to_lowercase().replace('-', "_"),
        _ => format!("port{}", port.port),
    }
}

fn env_segment(name: &str) -> String {
    name.to_uppercase().replace(['-', '.'], "_")
}

/// Stable DNS name of instance `index` of `role`
pub fn instance_address(group: &RoleGroup, role: &RoleSpec, index: i32) -> String {
    format!("{}-{}.{}", role.name, index, group.workload_name(&role.name))
}

/// Discovery variables for containers of `role`, sorted by name
pub fn discovery_env(group: &RoleGroup, role: &RoleSpec) -> Vec<EnvVar> {
    let mut env = vec![
        EnvVar::value("GROUP_NAME", group.name()),
        EnvVar::value("ROLE_NAME", role.name.as_str()),
        EnvVar::value(
            format!("ROLES_{}_SIZE", env_segment(&role.name)),
            role.replicas.max(0).to_string(),
        ),
        EnvVar::value("RBG_GROUP_SIZE", group.group_size().to_string()),
    ];

    if role.workload.is_ordinal() {
        env.push(EnvVar::field_ref(
            "ROLE_INDEX",
            format!("metadata.labels['{}']", labels::POD_INDEX_LABEL),
        ));
    }

    for peer in &group.spec.roles {
        let segment = env_segment(&peer.name);
        for index in 0..peer.replicas.max(0) {
            env.push(EnvVar::value(
                format!("ROLES_{segment}_{index}_ADDRESS"),
                instance_address(group, peer, index),
            ));
            for port in &peer.service_ports {
                env.push(EnvVar::value(
                    format!(
                        "ROLES_{segment}_{index}_{}_PORT",
                        env_segment(&port_key(port))
                    ),
                    port.port.to_string(),
                ));
            }
        }
    }

    env.sort_by(|a, b| a.name.cmp(&b.name));
    env
}

/// Overlay `updates` on `existing`; same-named entries are replaced
pub fn merge_env(existing: &[EnvVar], updates: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged: BTreeMap<&str, &EnvVar> = existing.iter().map(|e| (e.name.as_str(), e)).collect();
    for update in updates {
        merged.insert(update.name.as_str(), update);
    }
    merged.into_values().cloned().collect()
}

/// Cluster topology document mounted into every pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub group: GroupInfo,
    pub roles: BTreeMap<String, RoleInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    /// Number of roles
    pub size: usize,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub size: i32,
    pub instances: Vec<InstanceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub address: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ports: BTreeMap<String, i32>,
}

impl ClusterConfig {
    pub fn for_group(group: &RoleGroup) -> Self {
        let roles = group
            .spec
            .roles
            .iter()
            .map(|role| {
                let ports: BTreeMap<String, i32> = role
                    .service_ports
                    .iter()
                    .map(|p| (port_key(p), p.port))
                    .collect();
                let instances = (0..role.replicas.max(0))
                    .map(|index| InstanceInfo {
                        address: instance_address(group, role, index),
                        ports: ports.clone(),
                    })
                    .collect();
                (
                    role.name.clone(),
                    RoleInfo {
                        size: role.replicas.max(0),
                        instances,
                    },
                )
            })
            .collect();

        Self {
            group: GroupInfo {
                name: group.name().to_string(),
                size: group.spec.roles.len(),
                roles: group.spec.roles.iter().map(|r| r.name.clone()).collect(),
            },
            roles,
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
