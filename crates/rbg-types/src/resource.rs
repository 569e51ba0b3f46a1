//! Common interface over every stored object kind

use crate::adapter::ScalingAdapter;
use crate::group::RoleGroup;
use crate::meta::{ObjectKey, ObjectMeta};
use crate::pod::Pod;
use crate::profile::EngineRuntimeProfile;
use crate::service::{ConfigMap, Service};
use crate::set::RoleGroupSet;
use crate::workload::Workload;
use std::fmt::Debug;

/// A stored object: metadata plus a user-owned spec and a controller-owned status.
///
/// The object store uses this to split spec writes from status writes and
/// to decide when `generation` moves.
pub trait Resource: Clone + Debug + Send + Sync + 'static {
    /// Kind name used in owner references and events
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Whether the spec portions of both objects are identical
    fn spec_eq(&self, other: &Self) -> bool;

    /// Overwrite the spec portion with `other`'s
    fn copy_spec_from(&mut self, other: &Self);

    /// Overwrite the status portion with `other`'s
    fn copy_status_from(&mut self, other: &Self);

    fn key(&self) -> ObjectKey {
        self.metadata().key()
    }
}

macro_rules! impl_resource {
    ($ty:ty, $kind:literal, spec: $spec:ident, status: $status:ident) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }

            fn spec_eq(&self, other: &Self) -> bool {
                self.$spec == other.$spec
            }

            fn copy_spec_from(&mut self, other: &Self) {
                self.$spec = other.$spec.clone();
            }

            fn copy_status_from(&mut self, other: &Self) {
                self.$status = other.$status.clone();
            }
        }
    };
    ($ty:ty, $kind:literal, spec: $spec:ident) => {
        impl Resource for $ty {
            const KIND: &'static str = $kind;

            fn metadata(&self) -> &ObjectMeta {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }

            fn spec_eq(&self, other: &Self) -> bool {
                self.$spec == other.$spec
            }

            fn copy_spec_from(&mut self, other: &Self) {
                self.$spec = other.$spec.clone();
            }

            fn copy_status_from(&mut self, _other: &Self) {}
        }
    };
}

impl_resource!(RoleGroup, "RoleGroup", spec: spec, status: status);
impl_resource!(Workload, "Workload", spec: spec, status: status);
impl_resource!(ScalingAdapter, "ScalingAdapter", spec: spec, status: status);
impl_resource!(RoleGroupSet, "RoleGroupSet", spec: spec, status: status);
impl_resource!(Pod, "Pod", spec: spec, status: status);
impl_resource!(Service, "Service", spec: spec);
impl_resource!(ConfigMap, "ConfigMap", spec: data);
impl_resource!(EngineRuntimeProfile, "EngineRuntimeProfile", spec: spec);
