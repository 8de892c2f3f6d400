//! In-memory Cluster State Client.
//!
//! Keeps every kind in one store with a shared, monotonically increasing
//! resource version and a bounded change log, so watches can resume from
//! any recent version. Field selectors are evaluated per watcher: an
//! object that stops matching is delivered as `Deleted`, one that starts
//! matching as `Added`.
//!
//! Also serves as [`Binder`] and [`PodConditionUpdater`], with injectable
//! bind failures for tests and simulations.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use podgrid_types::{
    Binding, KubeObject, Node, PersistentVolume, PersistentVolumeClaim, Pod, PodCondition,
    ReplicaSet, ReplicationController, ResourceEvent, Service, WatchEvent,
};

use crate::binder::{BindError, BindResult, Binder, PodConditionUpdater};
use crate::client::{
    ClientError, ClientResult, FieldSelector, ListResult, ResourceClient, Selectable, WatchStream,
};

/// Changes retained per kind for watch resumption.
pub const LOG_CAPACITY: usize = 4096;

struct Change<T> {
    resource_version: u64,
    old: Option<T>,
    new: Option<T>,
}

struct Watcher<T> {
    selector: FieldSelector,
    tx: mpsc::UnboundedSender<ClientResult<WatchEvent<T>>>,
}

#[doc(hidden)]
pub struct KindStore<T> {
    objects: BTreeMap<String, T>,
    log: VecDeque<Change<T>>,
    /// Oldest version a watch may resume from.
    compacted: u64,
    watchers: Vec<Watcher<T>>,
}

impl<T> Default for KindStore<T> {
    fn default() -> Self {
        Self {
            objects: BTreeMap::new(),
            log: VecDeque::new(),
            compacted: 0,
            watchers: Vec::new(),
        }
    }
}

/// What a watcher with `selector` sees for one change.
fn project<T: Selectable>(selector: &FieldSelector, old: Option<&T>, new: Option<&T>) -> Option<WatchEvent<T>> {
    let was = old.is_some_and(|o| o.matches_fields(selector));
    let is = new.is_some_and(|n| n.matches_fields(selector));
    match (was, is) {
        (false, true) => new.cloned().map(WatchEvent::Added),
        (true, true) => new.cloned().map(WatchEvent::Modified),
        (true, false) => new.or(old).cloned().map(WatchEvent::Deleted),
        (false, false) => None,
    }
}

impl<T: Selectable> KindStore<T> {
    fn record(&mut self, resource_version: u64, old: Option<T>, new: Option<T>) {
        self.watchers.retain(|w| match project(&w.selector, old.as_ref(), new.as_ref()) {
            Some(event) => w.tx.send(Ok(event)).is_ok(),
            None => !w.tx.is_closed(),
        });
        self.log.push_back(Change {
            resource_version,
            old,
            new,
        });
        while self.log.len() > LOG_CAPACITY {
            if let Some(dropped) = self.log.pop_front() {
                self.compacted = dropped.resource_version;
            }
        }
    }

    fn disconnect(&mut self, reason: &str) {
        for w in self.watchers.drain(..) {
            let _ = w.tx.send(Err(ClientError::Disconnected(reason.to_string())));
        }
    }
}

#[doc(hidden)]
#[derive(Default)]
pub struct State {
    resource_version: u64,
    nodes: KindStore<Node>,
    pods: KindStore<Pod>,
    persistent_volumes: KindStore<PersistentVolume>,
    persistent_volume_claims: KindStore<PersistentVolumeClaim>,
    services: KindStore<Service>,
    replication_controllers: KindStore<ReplicationController>,
    replica_sets: KindStore<ReplicaSet>,
    bindings: Vec<Binding>,
    bind_failures: VecDeque<BindError>,
}

/// Kinds [`MemoryClusterClient`] stores.
pub trait Stored: Selectable {
    #[doc(hidden)]
    fn slot(state: &mut State) -> &mut KindStore<Self>;
}

macro_rules! impl_stored {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(impl Stored for $ty {
            fn slot(state: &mut State) -> &mut KindStore<Self> {
                &mut state.$field
            }
        })*
    };
}

impl_stored! {
    Node => nodes,
    Pod => pods,
    PersistentVolume => persistent_volumes,
    PersistentVolumeClaim => persistent_volume_claims,
    Service => services,
    ReplicationController => replication_controllers,
    ReplicaSet => replica_sets,
}

#[derive(Default)]
pub struct MemoryClusterClient {
    state: Mutex<State>,
}

impl MemoryClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace `obj`, stamping a fresh resource version.
    pub fn apply<T: Stored>(&self, mut obj: T) -> T {
        let mut state = self.state.lock();
        state.resource_version += 1;
        let rv = state.resource_version;
        obj.meta_mut().resource_version = rv;
        let store = T::slot(&mut state);
        let old = store.objects.insert(obj.key(), obj.clone());
        store.record(rv, old, Some(obj.clone()));
        obj
    }

    pub fn delete<T: Stored>(&self, key: &str) -> Option<T> {
        let mut state = self.state.lock();
        let old = T::slot(&mut state).objects.remove(key)?;
        state.resource_version += 1;
        let rv = state.resource_version;
        T::slot(&mut state).record(rv, Some(old.clone()), None);
        Some(old)
    }

    pub fn object<T: Stored>(&self, key: &str) -> Option<T> {
        let mut state = self.state.lock();
        T::slot(&mut state).objects.get(key).cloned()
    }

    pub fn objects<T: Stored>(&self) -> Vec<T> {
        let mut state = self.state.lock();
        T::slot(&mut state).objects.values().cloned().collect()
    }

    /// Apply one event of any kind.
    pub fn dispatch(&self, event: ResourceEvent) {
        match event {
            ResourceEvent::Node(e) => self.dispatch_one(e),
            ResourceEvent::Pod(e) => self.dispatch_one(e),
            ResourceEvent::PersistentVolume(e) => self.dispatch_one(e),
            ResourceEvent::PersistentVolumeClaim(e) => self.dispatch_one(e),
            ResourceEvent::Service(e) => self.dispatch_one(e),
            ResourceEvent::ReplicationController(e) => self.dispatch_one(e),
            ResourceEvent::ReplicaSet(e) => self.dispatch_one(e),
        }
    }

    fn dispatch_one<T: Stored>(&self, event: WatchEvent<T>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                self.apply(obj);
            }
            WatchEvent::Deleted(obj) => {
                self.delete::<T>(&obj.key());
            }
        }
    }

    /// End every open watch with a disconnect error.
    pub fn disconnect_watchers(&self) {
        let mut state = self.state.lock();
        let reason = "server closed watch";
        state.nodes.disconnect(reason);
        state.pods.disconnect(reason);
        state.persistent_volumes.disconnect(reason);
        state.persistent_volume_claims.disconnect(reason);
        state.services.disconnect(reason);
        state.replication_controllers.disconnect(reason);
        state.replica_sets.disconnect(reason);
    }

    /// Make the next `bind` call fail with `error`; calls queue up.
    pub fn fail_next_bind(&self, error: BindError) {
        self.state.lock().bind_failures.push_back(error);
    }

    /// Successful bindings, in commit order.
    pub fn bindings(&self) -> Vec<Binding> {
        self.state.lock().bindings.clone()
    }

    pub fn resource_version(&self) -> u64 {
        self.state.lock().resource_version
    }
}

#[async_trait]
impl<T: Stored> ResourceClient<T> for MemoryClusterClient {
    async fn list(&self, selector: &FieldSelector) -> ClientResult<ListResult<T>> {
        let mut state = self.state.lock();
        let resource_version = state.resource_version;
        let items = T::slot(&mut state)
            .objects
            .values()
            .filter(|o| o.matches_fields(selector))
            .cloned()
            .collect();
        Ok(ListResult {
            items,
            resource_version,
        })
    }

    async fn watch(&self, selector: &FieldSelector, resource_version: u64) -> ClientResult<WatchStream<T>> {
        let mut state = self.state.lock();
        let store = T::slot(&mut state);
        if resource_version < store.compacted {
            return Err(ClientError::Expired {
                requested: resource_version,
                oldest: store.compacted,
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for change in store.log.iter().filter(|c| c.resource_version > resource_version) {
            if let Some(event) = project(selector, change.old.as_ref(), change.new.as_ref()) {
                let _ = tx.send(Ok(event));
            }
        }
        store.watchers.push(Watcher {
            selector: selector.clone(),
            tx,
        });
        debug!(kind = %T::KIND, resource_version, "watch opened");
        Ok(rx)
    }

    async fn get(&self, key: &str) -> ClientResult<Option<T>> {
        Ok(self.object(key))
    }
}

#[async_trait]
impl Binder for MemoryClusterClient {
    async fn bind(&self, binding: &Binding) -> BindResult<()> {
        let key = binding.pod_key();
        let mut pod = {
            let mut state = self.state.lock();
            if let Some(err) = state.bind_failures.pop_front() {
                return Err(err);
            }
            state
                .pods
                .objects
                .get(&key)
                .cloned()
                .ok_or_else(|| BindError::PodGone(key.clone()))?
        };
        if !binding.uid.is_empty() && pod.meta.uid != binding.uid {
            return Err(BindError::Conflict {
                pod: key,
                reason: format!("uid {} does not match {}", binding.uid, pod.meta.uid),
            });
        }
        if pod.is_assigned() {
            if pod.spec.node_name == binding.target_node {
                return Ok(());
            }
            return Err(BindError::Conflict {
                pod: key,
                reason: format!("already bound to {}", pod.spec.node_name),
            });
        }
        pod.spec.node_name = binding.target_node.clone();
        self.apply(pod);
        self.state.lock().bindings.push(binding.clone());
        Ok(())
    }
}

#[async_trait]
impl PodConditionUpdater for MemoryClusterClient {
    async fn set_condition(&self, pod: &Pod, condition: &PodCondition) -> ClientResult<()> {
        let key = pod.key();
        let mut stored: Pod = self.object(&key).ok_or(ClientError::NotFound(key))?;
        if stored.status.set_condition(condition.clone()) {
            self.apply(stored);
        }
        Ok(())
    }
}
