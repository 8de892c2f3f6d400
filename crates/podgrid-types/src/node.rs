//! Nodes: the machines pods are placed on.

use serde::{Deserialize, Serialize};

use crate::event::{ResourceEvent, WatchEvent};
use crate::meta::{KubeObject, ObjectMeta, ResourceKind};
use crate::pod::ConditionStatus;
use crate::resource::Resource;
use crate::taint::Taint;

/// Set on every node to its own name; the narrowest topology domain.
pub const LABEL_HOSTNAME: &str = "kubernetes.io/hostname";
/// Zone a node runs in; volumes may be pinned to it.
pub const LABEL_ZONE: &str = "failure-domain.beta.kubernetes.io/zone";
/// Region a node runs in.
pub const LABEL_REGION: &str = "failure-domain.beta.kubernetes.io/region";

/// Conditions the predicates consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeConditionType {
    Ready,
    OutOfDisk,
    MemoryPressure,
    DiskPressure,
    NetworkUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCondition {
    pub condition_type: NodeConditionType,
    pub status: ConditionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    /// Cordoned: no new pods, existing ones stay.
    pub unschedulable: bool,
    pub taints: Vec<Taint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStatus {
    pub capacity: Resource,
    /// What pods may request in total; capacity minus system reservations.
    pub allocatable: Resource,
    pub conditions: Vec<NodeCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    /// A ready node with the given allocatable resources.
    pub fn new(name: &str, allocatable: Resource) -> Self {
        let mut meta = ObjectMeta::new("", name);
        meta.labels.insert(LABEL_HOSTNAME.to_string(), name.to_string());
        Self {
            meta,
            spec: NodeSpec::default(),
            status: NodeStatus {
                capacity: allocatable.clone(),
                allocatable,
                conditions: vec![NodeCondition {
                    condition_type: NodeConditionType::Ready,
                    status: ConditionStatus::True,
                }],
            },
        }
    }

    /// Builder: add or overwrite one label.
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.meta.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.spec.taints.push(taint);
        self
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Status of a condition, `None` if the node never reported it.
    pub fn condition(&self, kind: NodeConditionType) -> Option<ConditionStatus> {
        self.status
            .conditions
            .iter()
            .find(|c| c.condition_type == kind)
            .map(|c| c.status)
    }

    /// Insert or replace a condition.
    pub fn set_condition(&mut self, kind: NodeConditionType, status: ConditionStatus) {
        match self
            .status
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == kind)
        {
            Some(c) => c.status = status,
            None => self.status.conditions.push(NodeCondition {
                condition_type: kind,
                status,
            }),
        }
    }

    fn condition_true(&self, kind: NodeConditionType) -> bool {
        self.condition(kind) == Some(ConditionStatus::True)
    }

    /// A missing `Ready` condition counts as not ready.
    pub fn is_ready(&self) -> bool {
        self.condition_true(NodeConditionType::Ready)
    }

    pub fn memory_pressure(&self) -> bool {
        self.condition_true(NodeConditionType::MemoryPressure)
    }

    pub fn disk_pressure(&self) -> bool {
        self.condition_true(NodeConditionType::DiskPressure)
    }

    pub fn out_of_disk(&self) -> bool {
        self.condition_true(NodeConditionType::OutOfDisk)
    }

    pub fn network_unavailable(&self) -> bool {
        self.condition_true(NodeConditionType::NetworkUnavailable)
    }

    /// Ready, not out of disk, network available, and not cordoned.
    pub fn is_schedulable(&self) -> bool {
        self.is_ready() && !self.out_of_disk() && !self.network_unavailable() && !self.spec.unschedulable
    }

    /// Region and zone joined into one key, `None` if neither label is set.
    pub fn zone_key(&self) -> Option<String> {
        let region = self.meta.labels.get(LABEL_REGION);
        let zone = self.meta.labels.get(LABEL_ZONE);
        if region.is_none() && zone.is_none() {
            return None;
        }
        Some(format!(
            "{}:\x00:{}",
            region.map(String::as_str).unwrap_or_default(),
            zone.map(String::as_str).unwrap_or_default()
        ))
    }
}

impl KubeObject for Node {
    const KIND: ResourceKind = ResourceKind::Node;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn into_resource_event(event: WatchEvent<Self>) -> ResourceEvent {
        ResourceEvent::Node(event)
    }

    fn from_resource_event(event: ResourceEvent) -> Option<WatchEvent<Self>> {
        match event {
            ResourceEvent::Node(e) => Some(e),
            _ => None,
        }
    }
}
