//! Fit predicates: boolean filters over `(pod, node)`.
//!
//! A predicate returns the reasons the pod does not fit; an empty list
//! means it fits. Predicates read the `NodeInfo` they are given and never
//! mutate it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use podgrid_cache::{EquivalenceHash, NodeInfo, NodeInfoMap, equivalence_hash};
use podgrid_types::{ContainerPort, Pod, Resource};

pub mod affinity;
pub mod node;
pub mod resources;
pub mod volumes;

pub use affinity::{InterPodAffinity, ServiceAffinity};
pub use node::{NodeConditionCheck, NodeDiskPressure, NodeMemoryPressure, TaintToleration};
pub use resources::{GeneralPredicates, HostName, HostPorts, NodeSelectorMatch, ResourceFit};
pub use volumes::{DiskConflict, MaxVolumeCount, VolumeZone};

/// Why a pod does not fit on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredicateFailureReason {
    InsufficientResource {
        resource: String,
        requested: u64,
        used: u64,
        capacity: u64,
    },
    PodNotMatchHostName,
    PodNotFitsHostPorts,
    NodeSelectorNotMatch,
    DiskConflict,
    VolumeZoneConflict,
    MaxVolumeCountExceeded,
    VolumeClaimNotFound(String),
    VolumeClaimNotBound(String),
    VolumeNotFound(String),
    AffinityRulesNotMatch,
    AntiAffinityRulesNotMatch,
    ExistingPodsAntiAffinityRulesNotMatch,
    TaintsTolerationsNotMatch,
    NodeUnderMemoryPressure,
    NodeUnderDiskPressure,
    NodeNotReady,
    NodeOutOfDisk,
    NodeNetworkUnavailable,
    NodeUnschedulable,
    ServiceAffinityViolated,
    NodeUnknown,
    Extender { extender: String, message: String },
}

impl PredicateFailureReason {
    pub fn insufficient(resource: &str, requested: u64, used: u64, capacity: u64) -> Self {
        Self::InsufficientResource {
            resource: resource.to_string(),
            requested,
            used,
            capacity,
        }
    }
}

impl fmt::Display for PredicateFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientResource { resource, .. } => write!(f, "Insufficient {resource}"),
            Self::PodNotMatchHostName => f.write_str("node(s) didn't match the requested hostname"),
            Self::PodNotFitsHostPorts => {
                f.write_str("node(s) didn't have free ports for the requested pod ports")
            }
            Self::NodeSelectorNotMatch => f.write_str("node(s) didn't match node selector"),
            Self::DiskConflict => f.write_str("node(s) had no available disk"),
            Self::VolumeZoneConflict => f.write_str("node(s) had no available volume zone"),
            Self::MaxVolumeCountExceeded => f.write_str("node(s) exceed max volume count"),
            Self::VolumeClaimNotFound(c) => write!(f, "persistentvolumeclaim {c} not found"),
            Self::VolumeClaimNotBound(c) => write!(f, "persistentvolumeclaim {c} is not bound"),
            Self::VolumeNotFound(v) => write!(f, "persistentvolume {v} not found"),
            Self::AffinityRulesNotMatch => f.write_str("node(s) didn't match pod affinity rules"),
            Self::AntiAffinityRulesNotMatch => {
                f.write_str("node(s) didn't match pod anti-affinity rules")
            }
            Self::ExistingPodsAntiAffinityRulesNotMatch => {
                f.write_str("node(s) didn't satisfy existing pods anti-affinity rules")
            }
            Self::TaintsTolerationsNotMatch => {
                f.write_str("node(s) had taints that the pod didn't tolerate")
            }
            Self::NodeUnderMemoryPressure => f.write_str("node(s) had memory pressure"),
            Self::NodeUnderDiskPressure => f.write_str("node(s) had disk pressure"),
            Self::NodeNotReady => f.write_str("node(s) were not ready"),
            Self::NodeOutOfDisk => f.write_str("node(s) were out of disk space"),
            Self::NodeNetworkUnavailable => f.write_str("node(s) had unavailable network"),
            Self::NodeUnschedulable => f.write_str("node(s) were unschedulable"),
            Self::ServiceAffinityViolated => f.write_str("node(s) didn't match service affinity"),
            Self::NodeUnknown => f.write_str("node(s) not found in cache"),
            Self::Extender { extender, message } => write!(f, "extender {extender}: {message}"),
        }
    }
}

/// Per-pod inputs computed once and shared by every predicate and node.
#[derive(Debug, Clone)]
pub struct PredicateMetadata {
    pub request: Resource,
    pub host_ports: Vec<ContainerPort>,
    pub equivalence_hash: EquivalenceHash,
    /// Every node, for predicates that look beyond the candidate.
    pub node_infos: Arc<NodeInfoMap>,
}

impl PredicateMetadata {
    pub fn new(pod: &Pod, node_infos: Arc<NodeInfoMap>) -> Self {
        Self {
            request: pod.resource_request(),
            host_ports: pod.host_ports(),
            equivalence_hash: equivalence_hash(pod),
            node_infos,
        }
    }
}

pub trait FitPredicate: Send + Sync {
    /// Registry name; also the equivalence cache key.
    fn name(&self) -> &'static str;

    fn check(&self, pod: &Pod, meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason>;
}

/// Shared handle to a predicate.
pub type PredicateRef = Arc<dyn FitPredicate>;

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use podgrid_types::Node;

    pub fn meta_for(pod: &Pod, infos: &[NodeInfo]) -> PredicateMetadata {
        let map: NodeInfoMap = infos
            .iter()
            .filter_map(|i| Some((i.node_name()?.to_string(), i.clone())))
            .collect();
        PredicateMetadata::new(pod, Arc::new(map))
    }

    pub fn node_info(node: Node, pods: Vec<Pod>) -> NodeInfo {
        NodeInfo::with_pods(Some(node), pods)
    }
}
