//! Object metadata and the common trait implemented by every watched kind.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::{ResourceEvent, WatchEvent};

/// Metadata carried by every cluster object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObjectMeta {
    /// Namespace; empty for cluster-scoped kinds (nodes, persistent volumes).
    pub namespace: String,
    pub name: String,
    /// Identity across recreation of an object with the same name.
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Monotonic per-store version, bumped on every write.
    pub resource_version: u64,
    /// Unix timestamp (seconds) at which deletion was requested.
    pub deletion_timestamp: Option<u64>,
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: format!("{namespace}/{name}"),
            ..Self::default()
        }
    }

    /// Build the store key: `{namespace}/{name}`, or `{name}` when cluster-scoped.
    pub fn key(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

/// The kinds of objects the placement engine watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Node,
    Pod,
    PersistentVolume,
    PersistentVolumeClaim,
    Service,
    ReplicationController,
    ReplicaSet,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Node => "node",
            Self::Pod => "pod",
            Self::PersistentVolume => "persistentvolume",
            Self::PersistentVolumeClaim => "persistentvolumeclaim",
            Self::Service => "service",
            Self::ReplicationController => "replicationcontroller",
            Self::ReplicaSet => "replicaset",
        };
        f.write_str(s)
    }
}

/// Common behaviour of every watched object kind.
///
/// The conversions to and from [`ResourceEvent`] let a single event feed
/// carry every kind while consumers still pattern-match exhaustively.
pub trait KubeObject: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> String {
        self.meta().key()
    }

    fn resource_version(&self) -> u64 {
        self.meta().resource_version
    }

    fn into_resource_event(event: WatchEvent<Self>) -> ResourceEvent;

    fn from_resource_event(event: ResourceEvent) -> Option<WatchEvent<Self>>;
}
