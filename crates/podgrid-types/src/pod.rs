//! Pods: the workload units the engine places.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{ResourceEvent, WatchEvent};
use crate::meta::{KubeObject, ObjectMeta, ResourceKind};
use crate::resource::Resource;
use crate::selector::{LabelSelector, Labels, NodeSelector, NodeSelectorTerm};
use crate::taint::Toleration;
use crate::volume::Volume;

/// Scheduler name assumed when a pod does not request one.
pub const DEFAULT_SCHEDULER_NAME: &str = "default-scheduler";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerPort {
    pub container_port: u16,
    /// Zero when the port is not exposed on the host.
    pub host_port: u16,
    pub protocol: Protocol,
    pub host_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Container {
    pub name: String,
    /// Resource requests.
    pub resources: Resource,
    pub ports: Vec<ContainerPort>,
}

// ── Affinity ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferredSchedulingTerm {
    pub weight: i32,
    pub preference: NodeSelectorTerm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAffinity {
    /// `None` means no hard requirement.
    pub required: Option<NodeSelector>,
    pub preferred: Vec<PreferredSchedulingTerm>,
}

/// Co-location rule against pods matched by `label_selector` within a topology domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PodAffinityTerm {
    /// `None` matches no pod.
    pub label_selector: Option<LabelSelector>,
    /// Empty means the namespace of the pod that owns the term.
    pub namespaces: Vec<String>,
    /// Node label key defining the domain; empty expands to the failure domains.
    pub topology_key: String,
}

impl PodAffinityTerm {
    /// Whether `candidate` is selected by this term owned by a pod in `owner_namespace`.
    pub fn selects(&self, owner_namespace: &str, candidate: &Pod) -> bool {
        let namespace_ok = if self.namespaces.is_empty() {
            candidate.meta.namespace == owner_namespace
        } else {
            self.namespaces.contains(&candidate.meta.namespace)
        };
        namespace_ok
            && self
                .label_selector
                .as_ref()
                .is_some_and(|s| s.matches(&candidate.meta.labels))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightedPodAffinityTerm {
    pub weight: i32,
    pub term: PodAffinityTerm,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PodAffinity {
    pub required: Vec<PodAffinityTerm>,
    pub preferred: Vec<WeightedPodAffinityTerm>,
}

impl PodAffinity {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.preferred.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Affinity {
    pub node_affinity: Option<NodeAffinity>,
    pub pod_affinity: Option<PodAffinity>,
    pub pod_anti_affinity: Option<PodAffinity>,
}

// ── Spec / status ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodSpec {
    pub scheduler_name: String,
    /// Empty until the pod is bound (or assumed).
    pub node_name: String,
    pub containers: Vec<Container>,
    pub init_containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub node_selector: Labels,
    pub affinity: Option<Affinity>,
    pub tolerations: Vec<Toleration>,
}

impl Default for PodSpec {
    fn default() -> Self {
        Self {
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            node_name: String::new(),
            containers: Vec::new(),
            init_containers: Vec::new(),
            volumes: Vec::new(),
            node_selector: BTreeMap::new(),
            affinity: None,
            tolerations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodConditionType {
    PodScheduled,
    Ready,
    Initialized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodCondition {
    pub condition_type: PodConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Reason written to `PodScheduled=False` when no node fits.
pub const REASON_UNSCHEDULABLE: &str = "Unschedulable";

impl PodCondition {
    pub fn unschedulable(message: &str) -> Self {
        Self {
            condition_type: PodConditionType::PodScheduled,
            status: ConditionStatus::False,
            reason: REASON_UNSCHEDULABLE.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodStatus {
    pub phase: PodPhase,
    pub conditions: Vec<PodCondition>,
}

impl PodStatus {
    /// Insert or replace the condition of the same type. Returns true if anything changed.
    pub fn set_condition(&mut self, condition: PodCondition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) if *existing == condition => false,
            Some(existing) => {
                *existing = condition;
                true
            }
            None => {
                self.conditions.push(condition);
                true
            }
        }
    }
}

// ── Pod ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

impl Pod {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: PodSpec::default(),
            status: PodStatus::default(),
        }
    }

    /// Add a container requesting the given cpu (millicores) and memory (bytes).
    pub fn with_container(mut self, milli_cpu: u64, memory: u64) -> Self {
        let name = format!("c{}", self.spec.containers.len());
        self.spec.containers.push(Container {
            name,
            resources: Resource::new(milli_cpu, memory),
            ports: Vec::new(),
        });
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.meta.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_node_name(mut self, node: &str) -> Self {
        self.spec.node_name = node.to_string();
        self
    }

    pub fn with_scheduler_name(mut self, name: &str) -> Self {
        self.spec.scheduler_name = name.to_string();
        self
    }

    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.spec.volumes.push(volume);
        self
    }

    pub fn key(&self) -> String {
        self.meta.key()
    }

    pub fn is_assigned(&self) -> bool {
        !self.spec.node_name.is_empty()
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.status.phase, PodPhase::Succeeded | PodPhase::Failed)
    }

    /// Effective request: sum over containers, raised to the largest init container.
    pub fn resource_request(&self) -> Resource {
        let mut total = Resource::default();
        for c in &self.spec.containers {
            total.add(&c.resources);
        }
        for c in &self.spec.init_containers {
            total.set_max(&c.resources);
        }
        total
    }

    /// Request with scoring defaults substituted per container.
    pub fn non_zero_request(&self) -> Resource {
        let mut total = Resource::default();
        for c in &self.spec.containers {
            total.add(&c.resources.non_zero());
        }
        total
    }

    /// Host ports this pod occupies on its node.
    pub fn host_ports(&self) -> Vec<ContainerPort> {
        self.spec
            .containers
            .iter()
            .flat_map(|c| c.ports.iter())
            .filter(|p| p.host_port != 0)
            .cloned()
            .collect()
    }

    pub fn affinity(&self) -> Option<&PodAffinity> {
        self.spec.affinity.as_ref()?.pod_affinity.as_ref()
    }

    pub fn anti_affinity(&self) -> Option<&PodAffinity> {
        self.spec.affinity.as_ref()?.pod_anti_affinity.as_ref()
    }

    pub fn node_affinity(&self) -> Option<&NodeAffinity> {
        self.spec.affinity.as_ref()?.node_affinity.as_ref()
    }

    pub fn has_pod_affinity_constraints(&self) -> bool {
        self.affinity().is_some_and(|a| !a.is_empty())
            || self.anti_affinity().is_some_and(|a| !a.is_empty())
    }
}

impl KubeObject for Pod {
    const KIND: ResourceKind = ResourceKind::Pod;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn into_resource_event(event: WatchEvent<Self>) -> ResourceEvent {
        ResourceEvent::Pod(event)
    }

    fn from_resource_event(event: ResourceEvent) -> Option<WatchEvent<Self>> {
        match event {
            ResourceEvent::Pod(e) => Some(e),
            _ => None,
        }
    }
}

/// A request to commit a placement decision to the cluster state store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub target_node: String,
}

impl Binding {
    pub fn for_pod(pod: &Pod, node: &str) -> Self {
        Self {
            namespace: pod.meta.namespace.clone(),
            name: pod.meta.name.clone(),
            uid: pod.meta.uid.clone(),
            target_node: node.to_string(),
        }
    }

    pub fn pod_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_sums_containers_and_respects_init() {
        let mut pod = Pod::new("default", "web")
            .with_container(500, 1 << 20)
            .with_container(250, 1 << 20);
        assert_eq!(pod.resource_request(), Resource::new(750, 2 << 20));

        pod.spec.init_containers.push(Container {
            name: "init".to_string(),
            resources: Resource::new(2000, 1 << 10),
            ports: Vec::new(),
        });
        assert_eq!(pod.resource_request(), Resource::new(2000, 2 << 20));
    }

    #[test]
    fn non_zero_request_defaults_each_container() {
        let pod = Pod::new("default", "be").with_container(0, 0).with_container(0, 0);
        let r = pod.non_zero_request();
        assert_eq!(r.milli_cpu, 200);
    }

    #[test]
    fn host_ports_skip_unexposed() {
        let mut pod = Pod::new("default", "web").with_container(0, 0);
        pod.spec.containers[0].ports = vec![
            ContainerPort {
                container_port: 80,
                host_port: 8080,
                ..ContainerPort::default()
            },
            ContainerPort {
                container_port: 9090,
                ..ContainerPort::default()
            },
        ];
        let ports = pod.host_ports();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].host_port, 8080);
    }

    #[test]
    fn affinity_term_namespace_defaults_to_owner() {
        let term = PodAffinityTerm {
            label_selector: Some(LabelSelector::from_labels(
                &[("app".to_string(), "db".to_string())].into_iter().collect(),
            )),
            namespaces: Vec::new(),
            topology_key: "zone".to_string(),
        };
        let db = Pod::new("prod", "db-0").with_label("app", "db");
        assert!(term.selects("prod", &db));
        assert!(!term.selects("dev", &db));
    }

    #[test]
    fn set_condition_replaces_same_type() {
        let mut status = PodStatus::default();
        assert!(status.set_condition(PodCondition::unschedulable("no nodes")));
        assert!(!status.set_condition(PodCondition::unschedulable("no nodes")));
        assert!(status.set_condition(PodCondition::unschedulable("still none")));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].message, "still none");
    }

    #[test]
    fn terminated_phases() {
        let mut pod = Pod::new("default", "job");
        assert!(!pod.is_terminated());
        pod.status.phase = PodPhase::Succeeded;
        assert!(pod.is_terminated());
    }
}
