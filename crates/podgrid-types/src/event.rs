//! Watch events.
//!
//! A watch stream for one kind yields [`WatchEvent<T>`]; a feed multiplexing
//! every kind yields [`ResourceEvent`], whose variants are matched
//! exhaustively by consumers.

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::pod::Pod;
use crate::volume::{PersistentVolume, PersistentVolumeClaim};
use crate::workload::{ReplicaSet, ReplicationController, Service};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object")]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => o,
        }
    }

    pub fn into_object(self) -> T {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => o,
        }
    }
}

pub type NodeEvent = WatchEvent<Node>;
pub type PodEvent = WatchEvent<Pod>;
pub type PersistentVolumeEvent = WatchEvent<PersistentVolume>;
pub type PersistentVolumeClaimEvent = WatchEvent<PersistentVolumeClaim>;
pub type ServiceEvent = WatchEvent<Service>;
pub type ReplicationControllerEvent = WatchEvent<ReplicationController>;
pub type ReplicaSetEvent = WatchEvent<ReplicaSet>;

/// One event of any watched kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    Node(NodeEvent),
    Pod(PodEvent),
    PersistentVolume(PersistentVolumeEvent),
    PersistentVolumeClaim(PersistentVolumeClaimEvent),
    Service(ServiceEvent),
    ReplicationController(ReplicationControllerEvent),
    ReplicaSet(ReplicaSetEvent),
}
