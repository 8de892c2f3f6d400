//! Read-side stores for the kinds predicates and priorities consult but the
//! cluster cache does not own: persistent volumes and claims, services,
//! replication controllers and replica sets.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use podgrid_types::{
    KubeObject, PersistentVolume, PersistentVolumeClaim, Pod, ReplicaSet, ReplicationController,
    Service, map_selects,
};

/// Key → latest object of one kind.
#[derive(Debug)]
pub struct ResourceStore<T> {
    items: RwLock<HashMap<String, T>>,
}

impl<T: KubeObject> Default for ResourceStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: KubeObject> ResourceStore<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace; returns the previous object.
    pub fn upsert(&self, obj: T) -> Option<T> {
        self.items.write().insert(obj.key(), obj)
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.items.write().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.items.read().get(key).cloned()
    }

    pub fn list(&self) -> Vec<T> {
        self.items.read().values().cloned().collect()
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.items
            .read()
            .values()
            .filter(|o| predicate(o))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

/// Shared handle to every lister store.
#[derive(Debug, Default)]
pub struct Listers {
    pub persistent_volumes: ResourceStore<PersistentVolume>,
    pub persistent_volume_claims: ResourceStore<PersistentVolumeClaim>,
    pub services: ResourceStore<Service>,
    pub replication_controllers: ResourceStore<ReplicationController>,
    pub replica_sets: ResourceStore<ReplicaSet>,
}

impl Listers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `name` in `namespace`.
    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.persistent_volume_claims.get(&format!("{namespace}/{name}"))
    }

    pub fn volume(&self, name: &str) -> Option<PersistentVolume> {
        self.persistent_volumes.get(name)
    }

    /// Services in the pod's namespace whose selector matches it.
    pub fn services_for_pod(&self, pod: &Pod) -> Vec<Service> {
        self.services.filter(|s| {
            s.meta.namespace == pod.meta.namespace && map_selects(&s.spec.selector, &pod.meta.labels)
        })
    }

    pub fn controllers_for_pod(&self, pod: &Pod) -> Vec<ReplicationController> {
        self.replication_controllers.filter(|rc| {
            rc.meta.namespace == pod.meta.namespace && map_selects(&rc.spec.selector, &pod.meta.labels)
        })
    }

    /// An empty replica set selector matches nothing here.
    pub fn replica_sets_for_pod(&self, pod: &Pod) -> Vec<ReplicaSet> {
        self.replica_sets.filter(|rs| {
            rs.meta.namespace == pod.meta.namespace
                && !rs.spec.selector.is_empty()
                && rs.spec.selector.matches(&pod.meta.labels)
        })
    }
}
