//! Bundle of typed stores handed to every controller loop

use crate::memory::InMemoryObjectStore;
use crate::traits::ObjectStore;
use rbg_types::{
    ConfigMap, EngineRuntimeProfile, Pod, RoleGroup, RoleGroupSet, ScalingAdapter, Service,
    Workload,
};
use std::sync::Arc;

/// Typed handles to the object store, one per kind
#[derive(Clone)]
pub struct Client {
    pub groups: Arc<dyn ObjectStore<RoleGroup>>,
    pub workloads: Arc<dyn ObjectStore<Workload>>,
    pub services: Arc<dyn ObjectStore<Service>>,
    pub config_maps: Arc<dyn ObjectStore<ConfigMap>>,
    pub adapters: Arc<dyn ObjectStore<ScalingAdapter>>,
    pub sets: Arc<dyn ObjectStore<RoleGroupSet>>,
    pub pods: Arc<dyn ObjectStore<Pod>>,
    pub profiles: Arc<dyn ObjectStore<EngineRuntimeProfile>>,
}

impl Client {
    /// Client over fresh in-memory stores
    pub fn in_memory() -> Self {
        Self {
            groups: Arc::new(InMemoryObjectStore::new()),
            workloads: Arc::new(InMemoryObjectStore::new()),
            services: Arc::new(InMemoryObjectStore::new()),
            config_maps: Arc::new(InMemoryObjectStore::new()),
            adapters: Arc::new(InMemoryObjectStore::new()),
            sets: Arc::new(InMemoryObjectStore::new()),
            pods: Arc::new(InMemoryObjectStore::new()),
            profiles: Arc::new(InMemoryObjectStore::new()),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}
