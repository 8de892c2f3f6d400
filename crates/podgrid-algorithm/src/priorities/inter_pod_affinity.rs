//! Preferred inter-pod affinity, plus the implicit reverse of existing pods'
//! affinity terms.
//!
//! For a candidate node, every placed pod in the same topology domain adds:
//! - the weight of each of the incoming pod's preferred affinity terms that selects it;
//! - minus the weight of each preferred anti-affinity term that selects it;
//! - `hard_pod_affinity_weight` for each of its required affinity terms that selects the incoming pod;
//! - the weight of its own preferred (anti-)affinity terms that select the incoming pod.
//!
//! Raw sums may be negative; `reduce` rescales them to `0..=MAX_PRIORITY`.

use std::sync::Arc;

use podgrid_cache::NodeInfo;
use podgrid_types::{Node, Pod, PodAffinityTerm};

use super::{HostPriority, MAX_PRIORITY, PriorityFunction, PriorityMetadata, names};
use crate::topology::share_topology;

pub struct InterPodAffinityPriority {
    hard_pod_affinity_weight: i32,
    failure_domains: Vec<String>,
}

impl InterPodAffinityPriority {
    pub fn new(hard_pod_affinity_weight: i32, failure_domains: Vec<String>) -> Self {
        Self {
            hard_pod_affinity_weight,
            failure_domains,
        }
    }

    fn near(&self, node: &Node, other: &Node, term: &PodAffinityTerm) -> bool {
        share_topology(node, other, &term.topology_key, &self.failure_domains)
    }

    fn contribution(&self, pod: &Pod, node: &Node, existing: &Arc<Pod>, existing_node: &Node) -> i64 {
        let mut score = 0i64;

        if let Some(affinity) = pod.affinity() {
            for w in &affinity.preferred {
                if w.term.selects(&pod.meta.namespace, existing) && self.near(node, existing_node, &w.term) {
                    score += i64::from(w.weight);
                }
            }
        }
        if let Some(anti) = pod.anti_affinity() {
            for w in &anti.preferred {
                if w.term.selects(&pod.meta.namespace, existing) && self.near(node, existing_node, &w.term) {
                    score -= i64::from(w.weight);
                }
            }
        }

        let owner_ns = &existing.meta.namespace;
        if let Some(affinity) = existing.affinity() {
            if self.hard_pod_affinity_weight > 0 {
                for term in &affinity.required {
                    if term.selects(owner_ns, pod) && self.near(node, existing_node, term) {
                        score += i64::from(self.hard_pod_affinity_weight);
                    }
                }
            }
            for w in &affinity.preferred {
                if w.term.selects(owner_ns, pod) && self.near(node, existing_node, &w.term) {
                    score += i64::from(w.weight);
                }
            }
        }
        if let Some(anti) = existing.anti_affinity() {
            for w in &anti.preferred {
                if w.term.selects(owner_ns, pod) && self.near(node, existing_node, &w.term) {
                    score -= i64::from(w.weight);
                }
            }
        }
        score
    }
}

impl PriorityFunction for InterPodAffinityPriority {
    fn name(&self) -> &'static str {
        names::INTER_POD_AFFINITY
    }

    fn map(&self, pod: &Pod, meta: &PriorityMetadata, info: &NodeInfo) -> i64 {
        let Some(node) = info.node() else {
            return 0;
        };
        let pod_has_terms = pod.has_pod_affinity_constraints();
        let mut total = 0;
        for other in meta.node_infos.values() {
            let Some(other_node) = other.node() else {
                continue;
            };
            // Only pods with terms of their own can contribute when the incoming pod has none.
            let candidates = if pod_has_terms {
                other.pods()
            } else {
                other.pods_with_affinity()
            };
            for existing in candidates {
                if existing.key() != pod.key() {
                    total += self.contribution(pod, node, existing, other_node);
                }
            }
        }
        total
    }

    fn reduce(&self, _pod: &Pod, _meta: &PriorityMetadata, scores: &mut [HostPriority]) {
        let max = scores.iter().map(|s| s.score).max().unwrap_or(0).max(0);
        let min = scores.iter().map(|s| s.score).min().unwrap_or(0).min(0);
        let span = max - min;
        for s in scores.iter_mut() {
            s.score = if span > 0 {
                MAX_PRIORITY * (s.score - min) / span
            } else {
                0
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priorities::testing::run;
    use podgrid_cache::Listers;
    use podgrid_types::{
        Affinity, LABEL_ZONE, LabelSelector, PodAffinity, Resource, WeightedPodAffinityTerm,
    };

    fn term(app: &str) -> PodAffinityTerm {
        PodAffinityTerm {
            label_selector: Some(LabelSelector::from_labels(
                &[("app".to_string(), app.to_string())].into_iter().collect(),
            )),
            namespaces: Vec::new(),
            topology_key: LABEL_ZONE.to_string(),
        }
    }

    fn info(name: &str, zone: &str, pods: Vec<Pod>) -> NodeInfo {
        NodeInfo::with_pods(
            Some(Node::new(name, Resource::new(4000, 8 << 30)).with_label(LABEL_ZONE, zone)),
            pods,
        )
    }

    #[test]
    fn preferred_affinity_attracts() {
        let db = Pod::new("default", "db").with_label("app", "db").with_node_name("a");
        let nodes = [info("a", "z1", vec![db]), info("b", "z2", Vec::new())];
        let mut pod = Pod::new("default", "web");
        pod.spec.affinity = Some(Affinity {
            pod_affinity: Some(PodAffinity {
                required: Vec::new(),
                preferred: vec![WeightedPodAffinityTerm { weight: 5, term: term("db") }],
            }),
            ..Default::default()
        });
        assert_eq!(run(&InterPodAffinityPriority::new(1, Vec::new()), &pod, &nodes, &Listers::default()), vec![10, 0]);
    }

    #[test]
    fn preferred_anti_affinity_repels() {
        let web = Pod::new("default", "web-0").with_label("app", "web").with_node_name("a");
        let nodes = [info("a", "z1", vec![web]), info("b", "z2", Vec::new())];
        let mut pod = Pod::new("default", "web-1").with_label("app", "web");
        pod.spec.affinity = Some(Affinity {
            pod_anti_affinity: Some(PodAffinity {
                required: Vec::new(),
                preferred: vec![WeightedPodAffinityTerm { weight: 3, term: term("web") }],
            }),
            ..Default::default()
        });
        assert_eq!(run(&InterPodAffinityPriority::new(1, Vec::new()), &pod, &nodes, &Listers::default()), vec![0, 10]);
    }

    #[test]
    fn existing_required_affinity_is_symmetric() {
        let mut client = Pod::new("default", "client").with_node_name("a");
        client.spec.affinity = Some(Affinity {
            pod_affinity: Some(PodAffinity {
                required: vec![term("server")],
                preferred: Vec::new(),
            }),
            ..Default::default()
        });
        let nodes = [info("a", "z1", vec![client]), info("b", "z2", Vec::new())];
        let server = Pod::new("default", "server").with_label("app", "server");

        assert_eq!(run(&InterPodAffinityPriority::new(10, Vec::new()), &server, &nodes, &Listers::default()), vec![10, 0]);
        assert_eq!(run(&InterPodAffinityPriority::new(0, Vec::new()), &server, &nodes, &Listers::default()), vec![0, 0]);
    }
}
