//! Resource, host, port and node-selector predicates.

use podgrid_cache::NodeInfo;
use podgrid_cache::invalidation::names;
use podgrid_types::{Labels, Node, Pod};

use super::{FitPredicate, PredicateFailureReason, PredicateMetadata};

/// Requested resources plus the pod must fit within allocatable.
pub struct ResourceFit;

impl ResourceFit {
    pub(crate) fn reasons(meta: &PredicateMetadata, info: &NodeInfo) -> Vec<PredicateFailureReason> {
        let mut reasons = Vec::new();
        let allocatable = info.allocatable();
        let used = info.requested();

        // Zero allowed pods means the node did not report a limit.
        if allocatable.pods > 0 && used.pods + 1 > allocatable.pods {
            reasons.push(PredicateFailureReason::insufficient("pods", 1, used.pods, allocatable.pods));
        }

        let req = &meta.request;
        if req.is_zero() {
            return reasons;
        }
        let mut check = |name: &str, requested: u64, used: u64, capacity: u64| {
            if requested > 0 && capacity < used.saturating_add(requested) {
                reasons.push(PredicateFailureReason::insufficient(name, requested, used, capacity));
            }
        };
        check("cpu", req.milli_cpu, used.milli_cpu, allocatable.milli_cpu);
        check("memory", req.memory, used.memory, allocatable.memory);
        check("gpu", req.gpu, used.gpu, allocatable.gpu);
        check(
            "ephemeral-storage",
            req.ephemeral_storage,
            used.ephemeral_storage,
            allocatable.ephemeral_storage,
        );
        for (name, amount) in &req.scalar {
            check(
                name,
                *amount,
                used.scalar.get(name).copied().unwrap_or(0),
                allocatable.scalar.get(name).copied().unwrap_or(0),
            );
        }
        reasons
    }
}

impl FitPredicate for ResourceFit {
    fn name(&self) -> &'static str {
        names::POD_FITS_RESOURCES
    }

    fn check(&self, _pod: &Pod, meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason> {
        Self::reasons(meta, node)
    }
}

/// A pod that names a node only fits that node.
pub struct HostName;

impl HostName {
    pub(crate) fn reasons(pod: &Pod, node: &Node) -> Vec<PredicateFailureReason> {
        if pod.spec.node_name.is_empty() || pod.spec.node_name == node.name() {
            Vec::new()
        } else {
            vec![PredicateFailureReason::PodNotMatchHostName]
        }
    }
}

impl FitPredicate for HostName {
    fn name(&self) -> &'static str {
        names::POD_FITS_HOST
    }

    fn check(&self, pod: &Pod, _meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason> {
        match node.node() {
            Some(n) => Self::reasons(pod, n),
            None => vec![PredicateFailureReason::NodeUnknown],
        }
    }
}

/// Requested host ports must be free on the node.
pub struct HostPorts;

impl HostPorts {
    pub(crate) fn reasons(meta: &PredicateMetadata, info: &NodeInfo) -> Vec<PredicateFailureReason> {
        if meta.host_ports.iter().any(|p| info.port_in_use(p)) {
            vec![PredicateFailureReason::PodNotFitsHostPorts]
        } else {
            Vec::new()
        }
    }
}

impl FitPredicate for HostPorts {
    fn name(&self) -> &'static str {
        names::POD_FITS_HOST_PORTS
    }

    fn check(&self, _pod: &Pod, meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason> {
        Self::reasons(meta, node)
    }
}

/// Node selector map and required node affinity must both match the node labels.
pub struct NodeSelectorMatch;

fn selector_map_matches(selector: &Labels, labels: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
}

impl NodeSelectorMatch {
    pub(crate) fn matches(pod: &Pod, node: &Node) -> bool {
        let labels = &node.meta.labels;
        if !selector_map_matches(&pod.spec.node_selector, labels) {
            return false;
        }
        match pod.node_affinity().and_then(|a| a.required.as_ref()) {
            Some(required) => required.matches(labels),
            None => true,
        }
    }

    pub(crate) fn reasons(pod: &Pod, node: &Node) -> Vec<PredicateFailureReason> {
        if Self::matches(pod, node) {
            Vec::new()
        } else {
            vec![PredicateFailureReason::NodeSelectorNotMatch]
        }
    }
}

impl FitPredicate for NodeSelectorMatch {
    fn name(&self) -> &'static str {
        names::MATCH_NODE_SELECTOR
    }

    fn check(&self, pod: &Pod, _meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason> {
        match node.node() {
            Some(n) => Self::reasons(pod, n),
            None => vec![PredicateFailureReason::NodeUnknown],
        }
    }
}

/// Resources, host name, host ports and node selector, reporting every failure.
pub struct GeneralPredicates;

impl FitPredicate for GeneralPredicates {
    fn name(&self) -> &'static str {
        names::GENERAL_PREDICATES
    }

    fn check(&self, pod: &Pod, meta: &PredicateMetadata, info: &NodeInfo) -> Vec<PredicateFailureReason> {
        let Some(node) = info.node() else {
            return vec![PredicateFailureReason::NodeUnknown];
        };
        let mut reasons = ResourceFit::reasons(meta, info);
        reasons.extend(HostName::reasons(pod, node));
        reasons.extend(HostPorts::reasons(meta, info));
        reasons.extend(NodeSelectorMatch::reasons(pod, node));
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicates::testing::{meta_for, node_info};
    use podgrid_types::{
        ContainerPort, NodeAffinity, NodeSelector, NodeSelectorTerm, Resource, SelectorOperator,
        SelectorRequirement,
    };

    fn node(cpu: u64, mem: u64) -> Node {
        Node::new("n1", Resource::new(cpu, mem).with_pods(110))
    }

    #[test]
    fn insufficient_cpu_is_reported() {
        let info = node_info(node(2000, 8 << 30), vec![Pod::new("default", "a").with_container(1500, 0).with_node_name("n1")]);
        let pod = Pod::new("default", "b").with_container(1000, 1 << 30);
        let reasons = ResourceFit.check(&pod, &meta_for(&pod, &[info.clone()]), &info);
        assert_eq!(reasons.len(), 1);
        assert_eq!(reasons[0].to_string(), "Insufficient cpu");
    }

    #[test]
    fn exact_fit_is_allowed() {
        let info = node_info(node(1000, 1 << 30), Vec::new());
        let pod = Pod::new("default", "b").with_container(1000, 1 << 30);
        assert!(ResourceFit.check(&pod, &meta_for(&pod, &[info.clone()]), &info).is_empty());
    }

    #[test]
    fn pod_count_limit() {
        let n = Node::new("n1", Resource::new(4000, 8 << 30).with_pods(1));
        let info = node_info(n, vec![Pod::new("default", "a").with_node_name("n1")]);
        let pod = Pod::new("default", "b");
        let reasons = ResourceFit.check(&pod, &meta_for(&pod, &[info.clone()]), &info);
        assert_eq!(reasons[0].to_string(), "Insufficient pods");
    }

    #[test]
    fn scalar_resources_are_checked() {
        let n = Node::new("n1", Resource::new(4000, 8 << 30).with_scalar("example.com/fpga", 1));
        let info = node_info(n, Vec::new());
        let mut pod = Pod::new("default", "b").with_container(100, 0);
        pod.spec.containers[0].resources = Resource::new(100, 0).with_scalar("example.com/fpga", 2);
        let reasons = ResourceFit.check(&pod, &meta_for(&pod, &[info.clone()]), &info);
        assert_eq!(reasons[0].to_string(), "Insufficient example.com/fpga");
    }

    #[test]
    fn host_port_conflict() {
        let mut existing = Pod::new("default", "a").with_container(0, 0).with_node_name("n1");
        existing.spec.containers[0].ports.push(ContainerPort {
            container_port: 80,
            host_port: 80,
            ..ContainerPort::default()
        });
        let info = node_info(node(4000, 8 << 30), vec![existing.clone()]);
        let mut pod = existing.clone();
        pod.meta.name = "b".to_string();
        pod.spec.node_name.clear();
        let reasons = HostPorts.check(&pod, &meta_for(&pod, &[info.clone()]), &info);
        assert_eq!(reasons, vec![PredicateFailureReason::PodNotFitsHostPorts]);
    }

    #[test]
    fn node_selector_and_required_affinity() {
        let info = node_info(node(4000, 8 << 30).with_label("disk", "ssd"), Vec::new());
        let mut pod = Pod::new("default", "b");
        pod.spec.node_selector.insert("disk".to_string(), "ssd".to_string());
        let meta = meta_for(&pod, &[info.clone()]);
        assert!(NodeSelectorMatch.check(&pod, &meta, &info).is_empty());

        pod.spec.affinity = Some(podgrid_types::Affinity {
            node_affinity: Some(NodeAffinity {
                required: Some(NodeSelector {
                    terms: vec![NodeSelectorTerm {
                        match_expressions: vec![SelectorRequirement::new(
                            "zone",
                            SelectorOperator::In,
                            &["a"],
                        )],
                    }],
                }),
                preferred: Vec::new(),
            }),
            ..Default::default()
        });
        assert_eq!(
            NodeSelectorMatch.check(&pod, &meta, &info),
            vec![PredicateFailureReason::NodeSelectorNotMatch]
        );
    }

    #[test]
    fn general_predicates_collect_all_failures() {
        let info = node_info(node(100, 1 << 20), Vec::new());
        let mut pod = Pod::new("default", "b").with_container(1000, 1 << 30);
        pod.spec.node_selector.insert("disk".to_string(), "ssd".to_string());
        let reasons = GeneralPredicates.check(&pod, &meta_for(&pod, &[info.clone()]), &info);
        assert_eq!(reasons.len(), 3);
    }

    #[test]
    fn placeholder_node_is_unknown() {
        let info = NodeInfo::new();
        let pod = Pod::new("default", "b");
        assert_eq!(
            GeneralPredicates.check(&pod, &meta_for(&pod, &[]), &info),
            vec![PredicateFailureReason::NodeUnknown]
        );
    }
}
