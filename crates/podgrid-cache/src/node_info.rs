//! Per-node aggregate of assigned pods.
//!
//! Totals are maintained incrementally on every add/remove; nothing here
//! rescans the pod list. Cloning a `NodeInfo` copies the pod list shallowly
//! (the pods themselves are shared `Arc`s), which is what predicate
//! evaluation needs when it hypothetically adds a pod.

use std::collections::BTreeMap;
use std::sync::Arc;

use podgrid_types::{ContainerPort, Node, Pod, Protocol, Resource, Taint};

use crate::error::{CacheError, CacheResult};

/// A host port in use on a node: `(host ip, protocol, port)`.
pub type HostPortKey = (String, Protocol, u16);

#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    /// `None` while pods are known for a node whose object has not arrived yet.
    node: Option<Arc<Node>>,
    pods: Vec<Arc<Pod>>,
    pods_with_affinity: Vec<Arc<Pod>>,
    /// Sum of the effective requests of `pods`.
    requested: Resource,
    /// Same, with scoring defaults substituted for empty requests.
    non_zero_requested: Resource,
    /// Host port → number of pods claiming it.
    used_ports: BTreeMap<HostPortKey, usize>,
    /// Bumped on every mutation.
    generation: u64,
}

fn port_key(port: &ContainerPort) -> HostPortKey {
    let ip = if port.host_ip.is_empty() {
        "0.0.0.0".to_string()
    } else {
        port.host_ip.clone()
    };
    (ip, port.protocol, port.host_port)
}

impl NodeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_node(node: Node) -> Self {
        let mut info = Self::new();
        info.set_node(node);
        info
    }

    /// Build from a node and its pods; the only place totals are summed in bulk.
    pub fn with_pods(node: Option<Node>, pods: impl IntoIterator<Item = Pod>) -> Self {
        let mut info = Self::new();
        if let Some(node) = node {
            info.set_node(node);
        }
        for pod in pods {
            info.add_pod(Arc::new(pod));
        }
        info
    }

    pub fn node(&self) -> Option<&Node> {
        self.node.as_deref()
    }

    pub fn node_name(&self) -> Option<&str> {
        self.node.as_ref().map(|n| n.name())
    }

    pub fn set_node(&mut self, node: Node) {
        self.node = Some(Arc::new(node));
        self.generation += 1;
    }

    /// Drop the node object but keep the pods.
    pub fn clear_node(&mut self) {
        self.node = None;
        self.generation += 1;
    }

    pub fn pods(&self) -> &[Arc<Pod>] {
        &self.pods
    }

    /// Pods on this node carrying (anti-)affinity terms.
    pub fn pods_with_affinity(&self) -> &[Arc<Pod>] {
        &self.pods_with_affinity
    }

    pub fn requested(&self) -> &Resource {
        &self.requested
    }

    pub fn non_zero_requested(&self) -> &Resource {
        &self.non_zero_requested
    }

    pub fn allocatable(&self) -> Resource {
        self.node
            .as_ref()
            .map(|n| n.status.allocatable.clone())
            .unwrap_or_default()
    }

    pub fn taints(&self) -> &[Taint] {
        self.node.as_ref().map(|n| n.spec.taints.as_slice()).unwrap_or(&[])
    }

    pub fn used_ports(&self) -> impl Iterator<Item = &HostPortKey> {
        self.used_ports.keys()
    }

    /// Whether `port` collides with a host port already claimed on this node.
    ///
    /// A wildcard host IP on either side collides with every IP.
    pub fn port_in_use(&self, port: &ContainerPort) -> bool {
        let (ip, protocol, number) = port_key(port);
        self.used_ports.keys().any(|(used_ip, used_proto, used_port)| {
            *used_port == number
                && *used_proto == protocol
                && (used_ip == &ip || used_ip == "0.0.0.0" || ip == "0.0.0.0")
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn contains(&self, pod_key: &str) -> bool {
        self.pods.iter().any(|p| p.key() == pod_key)
    }

    pub fn add_pod(&mut self, pod: Arc<Pod>) {
        self.requested.add(&pod.resource_request());
        self.non_zero_requested.add(&pod.non_zero_request());
        self.requested.pods += 1;
        self.non_zero_requested.pods += 1;
        for port in pod.host_ports() {
            *self.used_ports.entry(port_key(&port)).or_insert(0) += 1;
        }
        if pod.has_pod_affinity_constraints() {
            self.pods_with_affinity.push(Arc::clone(&pod));
        }
        self.pods.push(pod);
        self.generation += 1;
    }

    /// Remove the pod with this key, subtracting what was added for it.
    pub fn remove_pod(&mut self, pod_key: &str) -> CacheResult<Arc<Pod>> {
        let idx = self
            .pods
            .iter()
            .position(|p| p.key() == pod_key)
            .ok_or_else(|| CacheError::PodNotFound(pod_key.to_string()))?;
        let pod = self.pods.swap_remove(idx);
        self.pods_with_affinity.retain(|p| p.key() != pod_key);

        self.requested.sub(&pod.resource_request());
        self.non_zero_requested.sub(&pod.non_zero_request());
        self.requested.pods = self.requested.pods.saturating_sub(1);
        self.non_zero_requested.pods = self.non_zero_requested.pods.saturating_sub(1);
        for port in pod.host_ports() {
            let key = port_key(&port);
            if let Some(count) = self.used_ports.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.used_ports.remove(&key);
                }
            }
        }
        self.generation += 1;
        Ok(pod)
    }

    /// No node object and no pods; safe to drop from the cache.
    pub fn is_empty(&self) -> bool {
        self.node.is_none() && self.pods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podgrid_types::Container;

    fn pod_with_port(name: &str, host_port: u16) -> Pod {
        let mut pod = Pod::new("default", name).with_container(100, 1 << 20);
        pod.spec.containers[0].ports.push(ContainerPort {
            container_port: 80,
            host_port,
            ..ContainerPort::default()
        });
        pod
    }

    #[test]
    fn totals_track_add_and_remove() {
        let mut info = NodeInfo::for_node(Node::new("n1", Resource::new(4000, 8 << 30)));
        info.add_pod(Arc::new(Pod::new("default", "a").with_container(1000, 1 << 30)));
        info.add_pod(Arc::new(Pod::new("default", "b").with_container(500, 1 << 29)));

        assert_eq!(info.requested().milli_cpu, 1500);
        assert_eq!(info.requested().memory, (1 << 30) + (1 << 29));
        assert_eq!(info.requested().pods, 2);

        info.remove_pod("default/a").unwrap();
        assert_eq!(info.requested().milli_cpu, 500);
        assert_eq!(info.requested().pods, 1);
        assert_eq!(info.pods().len(), 1);
    }

    #[test]
    fn non_zero_requested_uses_defaults() {
        let mut info = NodeInfo::new();
        info.add_pod(Arc::new(Pod::new("default", "be").with_container(0, 0)));
        assert_eq!(info.requested().milli_cpu, 0);
        assert_eq!(info.non_zero_requested().milli_cpu, 100);
    }

    #[test]
    fn remove_unknown_pod_is_an_error() {
        let mut info = NodeInfo::new();
        assert_eq!(
            info.remove_pod("default/ghost").unwrap_err(),
            CacheError::PodNotFound("default/ghost".to_string())
        );
    }

    #[test]
    fn host_ports_are_reference_counted() {
        let mut info = NodeInfo::new();
        info.add_pod(Arc::new(pod_with_port("a", 8080)));
        info.add_pod(Arc::new(pod_with_port("b", 8080)));

        let probe = ContainerPort {
            host_port: 8080,
            ..ContainerPort::default()
        };
        info.remove_pod("default/a").unwrap();
        assert!(info.port_in_use(&probe));
        info.remove_pod("default/b").unwrap();
        assert!(!info.port_in_use(&probe));
    }

    #[test]
    fn wildcard_ip_collides_with_specific_ip() {
        let mut info = NodeInfo::new();
        info.add_pod(Arc::new(pod_with_port("a", 9000)));
        let probe = ContainerPort {
            host_port: 9000,
            host_ip: "10.0.0.1".to_string(),
            ..ContainerPort::default()
        };
        assert!(info.port_in_use(&probe));
    }

    #[test]
    fn clone_does_not_affect_original() {
        let mut info = NodeInfo::for_node(Node::new("n1", Resource::new(4000, 8 << 30)));
        info.add_pod(Arc::new(Pod::new("default", "a").with_container(1000, 0)));

        let mut hypothetical = info.clone();
        hypothetical.add_pod(Arc::new(Pod::new("default", "b").with_container(1000, 0)));

        assert_eq!(info.pods().len(), 1);
        assert_eq!(info.requested().milli_cpu, 1000);
        assert_eq!(hypothetical.requested().milli_cpu, 2000);
    }

    #[test]
    fn init_container_request_counts() {
        let mut pod = Pod::new("default", "init").with_container(100, 0);
        pod.spec.init_containers.push(Container {
            name: "setup".to_string(),
            resources: Resource::new(3000, 0),
            ports: Vec::new(),
        });
        let info = NodeInfo::with_pods(None, vec![pod]);
        assert_eq!(info.requested().milli_cpu, 3000);
    }
}
