//! Cluster State Client capability.
//!
//! Per watched kind the scheduler needs `list`, `watch` from a resource
//! version, and `get`. Pods are additionally filtered by a [`FieldSelector`]
//! so the assigned-pod and unscheduled-pod informers see disjoint sets.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use podgrid_types::{
    KubeObject, Node, PersistentVolume, PersistentVolumeClaim, Pod, ReplicaSet,
    ReplicationController, Service, WatchEvent,
};

use crate::binder::{Binder, PodConditionUpdater};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The watch or connection dropped; callers relist.
    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource version {requested} is too old (oldest {oldest})")]
    Expired { requested: u64, oldest: u64 },

    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Field-level filter applied server-side to list and watch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldSelector {
    #[default]
    Everything,
    /// Pods with a node name that have not terminated.
    AssignedPods,
    /// Pods without a node name, not terminated, claimed by `scheduler_name`.
    UnscheduledPods { scheduler_name: String },
}

/// Objects a [`FieldSelector`] can be evaluated against.
pub trait Selectable: KubeObject {
    fn matches_fields(&self, selector: &FieldSelector) -> bool {
        matches!(selector, FieldSelector::Everything)
    }
}

impl Selectable for Pod {
    fn matches_fields(&self, selector: &FieldSelector) -> bool {
        match selector {
            FieldSelector::Everything => true,
            FieldSelector::AssignedPods => self.is_assigned() && !self.is_terminated(),
            FieldSelector::UnscheduledPods { scheduler_name } => {
                !self.is_assigned() && !self.is_terminated() && self.spec.scheduler_name == *scheduler_name
            }
        }
    }
}

impl Selectable for Node {}
impl Selectable for PersistentVolume {}
impl Selectable for PersistentVolumeClaim {}
impl Selectable for Service {}
impl Selectable for ReplicationController {}
impl Selectable for ReplicaSet {}

#[derive(Debug, Clone)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    /// Version to start the following watch from.
    pub resource_version: u64,
}

/// Events after the requested version; an `Err` item or channel close ends the watch.
pub type WatchStream<T> = mpsc::UnboundedReceiver<ClientResult<WatchEvent<T>>>;

#[async_trait]
pub trait ResourceClient<T: Selectable>: Send + Sync {
    async fn list(&self, selector: &FieldSelector) -> ClientResult<ListResult<T>>;

    async fn watch(&self, selector: &FieldSelector, resource_version: u64) -> ClientResult<WatchStream<T>>;

    async fn get(&self, key: &str) -> ClientResult<Option<T>>;
}

/// Everything the scheduler consumes from the cluster.
pub trait ClusterStateClient:
    ResourceClient<Node>
    + ResourceClient<Pod>
    + ResourceClient<PersistentVolume>
    + ResourceClient<PersistentVolumeClaim>
    + ResourceClient<Service>
    + ResourceClient<ReplicationController>
    + ResourceClient<ReplicaSet>
    + Binder
    + PodConditionUpdater
    + 'static
{
}

impl<C> ClusterStateClient for C where
    C: ResourceClient<Node>
        + ResourceClient<Pod>
        + ResourceClient<PersistentVolume>
        + ResourceClient<PersistentVolumeClaim>
        + ResourceClient<Service>
        + ResourceClient<ReplicationController>
        + ResourceClient<ReplicaSet>
        + Binder
        + PodConditionUpdater
        + 'static
{
}
