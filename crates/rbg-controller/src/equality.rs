//! Semantic equality between desired and observed objects
//!
//! Two objects are equal when a write would not change anything the
//! controller owns. Platform-managed label/annotation keys, bookkeeping
//! metadata and the order of name-keyed lists are ignored. Each comparison
//! returns the first difference found so callers can log why they write.

use rbg_types::{
    labels, ConfigMap, Container, ObjectMeta, OwnerReference, PodTemplateSpec, Service, Workload,
    WorkloadSpec,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Canonical form of a pod template used for comparison and hashing
pub fn normalize_template(template: &PodTemplateSpec) -> PodTemplateSpec {
    let mut out = template.clone();
    out.labels = filter_system(&out.labels);
    out.annotations = filter_system(&out.annotations);

    let spec = &mut out.spec;
    spec.containers.iter_mut().for_each(normalize_container);
    spec.init_containers.iter_mut().for_each(normalize_container);
    spec.containers.sort_by(|a, b| a.name.cmp(&b.name));
    spec.init_containers.sort_by(|a, b| a.name.cmp(&b.name));
    spec.volumes.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn normalize_container(container: &mut Container) {
    container.env.sort_by(|a, b| a.name.cmp(&b.name));
    container.volume_mounts.sort_by(|a, b| a.name.cmp(&b.name));
}

fn filter_system(map: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    map.iter()
        .filter(|(k, _)| !labels::is_system_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn normalize_workload_spec(spec: &WorkloadSpec) -> WorkloadSpec {
    let mut out = spec.clone();
    match &mut out {
        WorkloadSpec::StatefulSet(s) => s.template = normalize_template(&s.template),
        WorkloadSpec::Deployment(d) => d.template = normalize_template(&d.template),
        WorkloadSpec::LeaderWorkerSet(l) => {
            l.leader_template = normalize_template(&l.leader_template);
            l.worker_template = normalize_template(&l.worker_template);
        }
    }
    out
}

/// Labels, annotations and owner references, ignoring bookkeeping fields
pub fn semantic_diff_meta(desired: &ObjectMeta, observed: &ObjectMeta) -> Option<String> {
    let (dl, ol) = (filter_system(&desired.labels), filter_system(&observed.labels));
    if dl != ol {
        return map_difference("metadata.labels", &dl, &ol);
    }
    let (da, oa) = (
        filter_system(&desired.annotations),
        filter_system(&observed.annotations),
    );
    if da != oa {
        return map_difference("metadata.annotations", &da, &oa);
    }
    if sorted_owners(&desired.owner_references) != sorted_owners(&observed.owner_references) {
        return Some("metadata.ownerReferences differ".to_string());
    }
    None
}

fn sorted_owners(owners: &[OwnerReference]) -> Vec<&OwnerReference> {
    let mut sorted: Vec<_> = owners.iter().collect();
    sorted.sort_by(|a, b| a.uid.cmp(&b.uid).then_with(|| a.name.cmp(&b.name)));
    sorted
}

fn map_difference(
    path: &str,
    desired: &BTreeMap<String, String>,
    observed: &BTreeMap<String, String>,
) -> Option<String> {
    desired
        .keys()
        .chain(observed.keys())
        .find(|k| desired.get(*k) != observed.get(*k))
        .map(|k| {
            format!(
                "{path}[{k}]: {:?} != {:?}",
                desired.get(k),
                observed.get(k)
            )
        })
}

/// First difference between two serializable values, as a dotted path
fn value_difference<T: Serialize>(path: &str, desired: &T, observed: &T) -> Option<String> {
    match (serde_json::to_value(desired), serde_json::to_value(observed)) {
        (Ok(d), Ok(o)) => first_difference(path.to_string(), &d, &o),
        _ => Some(format!("{path}: not serializable")),
    }
}

fn first_difference(path: String, desired: &Value, observed: &Value) -> Option<String> {
    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => d
            .keys()
            .chain(o.keys())
            .find_map(|k| {
                let (dv, ov) = (d.get(k).unwrap_or(&Value::Null), o.get(k).unwrap_or(&Value::Null));
                first_difference(format!("{path}.{k}"), dv, ov)
            }),
        (Value::Array(d), Value::Array(o)) if d.len() == o.len() => d
            .iter()
            .zip(o)
            .enumerate()
            .find_map(|(i, (dv, ov))| first_difference(format!("{path}[{i}]"), dv, ov)),
        (d, o) if d == o => None,
        (d, o) => Some(format!("{path}: {d} != {o}")),
    }
}

/// `None` when equal, otherwise the first difference
pub fn semantic_diff_workload(desired: &Workload, observed: &Workload) -> Option<String> {
    if desired.kind() != observed.kind() {
        return Some(format!("kind: {} != {}", desired.kind(), observed.kind()));
    }
    semantic_diff_meta(&desired.metadata, &observed.metadata).or_else(|| {
        value_difference(
            "spec",
            &normalize_workload_spec(&desired.spec),
            &normalize_workload_spec(&observed.spec),
        )
    })
}

pub fn semantic_diff_service(desired: &Service, observed: &Service) -> Option<String> {
    semantic_diff_meta(&desired.metadata, &observed.metadata)
        .or_else(|| value_difference("spec", &desired.spec, &observed.spec))
}

pub fn semantic_diff_config_map(desired: &ConfigMap, observed: &ConfigMap) -> Option<String> {
    semantic_diff_meta(&desired.metadata, &observed.metadata)
        .or_else(|| map_difference("data", &desired.data, &observed.data))
}

/// What `observed` would look like after merge-applying `desired` metadata.
///
/// Merge-apply never removes keys, so comparing against this projection keeps
/// extra keys on the live object from forcing a write every pass.
pub fn project_meta(desired: &ObjectMeta, observed: &ObjectMeta) -> ObjectMeta {
    let mut projected = desired.clone();
    projected.labels = observed.labels.clone();
    projected.labels.extend(desired.labels.clone());
    projected.annotations = observed.annotations.clone();
    projected.annotations.extend(desired.annotations.clone());
    projected.owner_references = observed.owner_references.clone();
    for owner in &desired.owner_references {
        projected.add_owner_reference(owner.clone());
    }
    projected
}
