//! Identity keys shared by every object the controller writes.
//!
//! These keys are used both as selector labels (stable across the
//! lifetime of a workload) and as change-detection annotations.

/// Domain prefix for all controller-owned keys
pub const DOMAIN_PREFIX: &str = "rolebasedgroup.workloads.x-k8s.io/";

/// Label: owning group name
pub const GROUP_NAME_LABEL: &str = "rolebasedgroup.workloads.x-k8s.io/name";

/// Label: role name within the group
pub const ROLE_NAME_LABEL: &str = "rolebasedgroup.workloads.x-k8s.io/role";

/// Label: per-instance ordinal for ordinal-indexed kinds
pub const ROLE_INDEX_LABEL: &str = "rolebasedgroup.workloads.x-k8s.io/role-index";

/// Annotation: hash of the materialized pod template
pub const REVISION_ANNOTATION: &str = "rolebasedgroup.workloads.x-k8s.io/revision";

/// Annotation: desired role size at the time of the last write
pub const ROLE_SIZE_ANNOTATION: &str = "rolebasedgroup.workloads.x-k8s.io/role-size";

/// Annotation: total replicas across all roles of the group
pub const GROUP_SIZE_ANNOTATION: &str = "rolebasedgroup.workloads.x-k8s.io/group-size";

/// Label: owning group set name
pub const SET_NAME_LABEL: &str = "rolebasedgroup.workloads.x-k8s.io/set-name";

/// Label: the group that manages a scaling adapter it created
pub const ADAPTER_MANAGED_BY_LABEL: &str = "rolebasedgroup.workloads.x-k8s.io/adapter-managed-by";

/// Label set by the platform on ordinal pods
pub const POD_INDEX_LABEL: &str = "apps.kubernetes.io/pod-index";

pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
pub const APP_COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const APP_MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const APP_INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Value of `app.kubernetes.io/managed-by` on every controller-written object
pub const CONTROLLER_NAME: &str = "rolebasedgroup-controller";

/// Label and annotation prefixes owned by the platform rather than the controller.
///
/// Keys under these prefixes are ignored by semantic equality.
pub const SYSTEM_KEY_PREFIXES: &[&str] = &[
    "deployment.kubernetes.io/",
    "statefulset.kubernetes.io/",
    "kubectl.kubernetes.io/",
    "leaderworkerset.sigs.k8s.io/",
    "controller-revision-hash",
    "pod-template-hash",
    "kubernetes.io/",
];

/// Whether `key` is platform-managed
pub fn is_system_key(key: &str) -> bool {
    SYSTEM_KEY_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}
