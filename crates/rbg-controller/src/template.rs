//! Desired pod template and companion objects for a role
//!
//! Construction is pure: the same group, role and profiles always produce
//! the same template, so repeated passes converge to a fixed point.

use crate::discovery::{discovery_env, merge_env, ClusterConfig};
use crate::equality::normalize_template;
use crate::error::{Result, ValidationError};
use crate::sidecar::inject_sidecars;
use rbg_types::{
    ConfigMap, EngineRuntimeProfile, KeyToPath, ObjectMeta, PodTemplateSpec, RoleGroup, RoleSpec,
    Volume, VolumeMount, VolumeSource,
};
use serde_json::Value;
use std::collections::BTreeMap;

pub const CONFIG_VOLUME_NAME: &str = "rbg-cluster-config";
pub const CONFIG_MOUNT_PATH: &str = "/etc/rbg";
pub const CONFIG_KEY: &str = "config.yaml";

const REVISION_LEN: usize = 16;

/// Materialize the pod template for `role`.
///
/// Starts from the role template, then layers sidecars (when requested),
/// the cluster config mount, discovery env and identity labels.
pub fn build_pod_template(
    group: &RoleGroup,
    role: &RoleSpec,
    base: &PodTemplateSpec,
    profiles: &BTreeMap<String, EngineRuntimeProfile>,
    inject_sidecar: bool,
) -> Result<PodTemplateSpec> {
    let mut template = base.clone();

    if inject_sidecar {
        inject_sidecars(&mut template, role, profiles)?;
    }

    let spec = &mut template.spec;
    if !spec.volumes.iter().any(|v| v.name == CONFIG_VOLUME_NAME) {
        spec.volumes.push(Volume {
            name: CONFIG_VOLUME_NAME.to_string(),
            source: VolumeSource::ConfigMap {
                name: group.workload_name(&role.name),
                items: vec![KeyToPath {
                    key: CONFIG_KEY.to_string(),
                    path: CONFIG_KEY.to_string(),
                }],
            },
        });
    }

    let env = discovery_env(group, role);
    for container in spec.containers.iter_mut() {
        container.env = merge_env(&container.env, &env);
        if !container.volume_mounts.iter().any(|m| m.name == CONFIG_VOLUME_NAME) {
            container.volume_mounts.push(VolumeMount {
                name: CONFIG_VOLUME_NAME.to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                read_only: true,
            });
        }
    }
    for init in spec.init_containers.iter_mut() {
        init.env = merge_env(&init.env, &env);
    }

    template.labels.extend(group.common_labels(role));
    template.annotations.extend(group.common_annotations(role));
    Ok(template)
}

/// Short content hash over one or more templates, stable under reordering
pub fn revision_hash<'a, I>(templates: I) -> Result<String>
where
    I: IntoIterator<Item = &'a PodTemplateSpec>,
{
    let mut hasher = blake3::Hasher::new();
    for template in templates {
        hasher.update(&serde_json::to_vec(&normalize_template(template))?);
    }
    let hex = hasher.finalize().to_hex();
    Ok(hex.as_str()[..REVISION_LEN].to_string())
}

/// RFC 7386 JSON merge patch
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Role template with an optional merge patch applied
pub fn patch_template(
    role: &RoleSpec,
    patch: Option<&Value>,
) -> std::result::Result<PodTemplateSpec, ValidationError> {
    let Some(patch) = patch else {
        return Ok(role.template.clone());
    };
    let invalid = |e: serde_json::Error| ValidationError::InvalidTemplatePatch {
        role: role.name.clone(),
        reason: e.to_string(),
    };
    let mut value = serde_json::to_value(&role.template).map_err(invalid)?;
    apply_merge_patch(&mut value, patch);
    serde_json::from_value(value).map_err(invalid)
}

/// Config map carrying the rendered cluster topology for `role`
pub fn build_config_map(group: &RoleGroup, role: &RoleSpec) -> Result<ConfigMap> {
    let mut metadata = ObjectMeta::named(group.namespace(), group.workload_name(&role.name));
    metadata.labels = group.common_labels(role);
    metadata.owner_references = vec![group.owner_reference()];

    let yaml = ClusterConfig::for_group(group).to_yaml()?;
    Ok(ConfigMap {
        metadata,
        data: BTreeMap::from([(CONFIG_KEY.to_string(), yaml)]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbg_types::{labels, Container, EnvVar};
    use serde_json::json;

    fn group() -> RoleGroup {
        let mut worker = RoleSpec::new("worker", 2);
        worker.template.spec.containers = vec![Container::new("main", "engine:1")];
        worker.template.spec.containers[0].env = vec![EnvVar::value("GROUP_NAME", "stale")];
        RoleGroup::new("default", "g", vec![worker])
    }

    #[test]
    fn test_build_pod_template() {
        let g = group();
        let role = &g.spec.roles[0];
        let t = build_pod_template(&g, role, &role.template, &BTreeMap::new(), true).unwrap();

        assert_eq!(t.labels[labels::GROUP_NAME_LABEL], "g");
        assert_eq!(t.labels[labels::ROLE_NAME_LABEL], "worker");
        assert_eq!(t.annotations[labels::ROLE_SIZE_ANNOTATION], "2");

        let main = &t.spec.containers[0];
        let group_name = main.env.iter().find(|e| e.name == "GROUP_NAME").unwrap();
        assert_eq!(group_name.value.as_deref(), Some("g"));
        assert!(main
            .volume_mounts
            .iter()
            .any(|m| m.name == CONFIG_VOLUME_NAME && m.read_only && m.mount_path == CONFIG_MOUNT_PATH));
        assert!(t.spec.volumes.iter().any(|v| v.name == CONFIG_VOLUME_NAME));
    }

    #[test]
    fn test_build_is_pure_and_idempotent() {
        let g = group();
        let role = &g.spec.roles[0];
        let profiles = BTreeMap::new();
        let once = build_pod_template(&g, role, &role.template, &profiles, true).unwrap();
        let again = build_pod_template(&g, role, &role.template, &profiles, true).unwrap();
        assert_eq!(once, again);

        // Feeding the output back in is a fixed point
        let twice = build_pod_template(&g, role, &once, &profiles, true).unwrap();
        assert_eq!(twice, once);
        assert_eq!(revision_hash([&once]).unwrap(), revision_hash([&twice]).unwrap());
    }

    #[test]
    fn test_revision_tracks_template_changes() {
        let g = group();
        let mut role = g.spec.roles[0].clone();
        let before = revision_hash([&role.template]).unwrap();
        assert_eq!(before.len(), 16);
        role.template.spec.containers[0].image = "engine:2".into();
        assert_ne!(revision_hash([&role.template]).unwrap(), before);
    }

    #[test]
    fn test_merge_patch() {
        let mut doc = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        apply_merge_patch(&mut doc, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(doc, json!({"a": "z", "c": {"d": "e"}}));

        let mut doc = json!({"a": [1, 2]});
        apply_merge_patch(&mut doc, &json!({"a": [3]}));
        assert_eq!(doc, json!({"a": [3]}));
    }

    #[test]
    fn test_patch_template() {
        let g = group();
        let role = &g.spec.roles[0];
        let patched = patch_template(
            role,
            Some(&json!({"labels": {"tier": "leader"}, "spec": {"serviceAccountName": "lead"}})),
        )
        .unwrap();
        assert_eq!(patched.labels["tier"], "leader");
        assert_eq!(patched.spec.service_account_name.as_deref(), Some("lead"));
        assert_eq!(patched.spec.containers, role.template.spec.containers);

        let err = patch_template(role, Some(&json!({"spec": {"containers": "nope"}}))).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTemplatePatch { .. }));
    }

    #[test]
    fn test_config_map() {
        let g = group();
        let cm = build_config_map(&g, &g.spec.roles[0]).unwrap();
        assert_eq!(cm.metadata.name, "g-worker");
        assert!(cm.data[CONFIG_KEY].contains("worker-1.g-worker"));
        assert_eq!(cm.metadata.owner_references[0].kind, "RoleGroup");
    }
}
