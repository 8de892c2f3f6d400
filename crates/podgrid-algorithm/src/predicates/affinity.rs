//! Inter-pod affinity and service affinity.
//!
//! Both look past the candidate node: they scan every pod in the snapshot
//! carried by [`PredicateMetadata::node_infos`].

use std::collections::BTreeMap;
use std::sync::Arc;

use podgrid_cache::invalidation::names;
use podgrid_cache::{Listers, NodeInfo};
use podgrid_types::{Node, Pod, PodAffinityTerm, map_selects};

use super::{FitPredicate, PredicateFailureReason, PredicateMetadata};
use crate::topology::share_topology;

/// Required pod affinity / anti-affinity, including the symmetric
/// anti-affinity of pods already running.
pub struct InterPodAffinity {
    failure_domains: Vec<String>,
}

impl InterPodAffinity {
    pub fn new(failure_domains: Vec<String>) -> Self {
        Self { failure_domains }
    }

    /// `(node, pod)` for every placed pod with a known node.
    fn placed<'a>(meta: &'a PredicateMetadata) -> impl Iterator<Item = (&'a Node, &'a Arc<Pod>)> + 'a {
        meta.node_infos
            .values()
            .filter_map(|i| Some((i.node()?, i)))
            .flat_map(|(n, i)| i.pods().iter().map(move |p| (n, p)))
    }

    fn existing_anti_affinity_violated(&self, pod: &Pod, meta: &PredicateMetadata, node: &Node) -> bool {
        meta.node_infos
            .values()
            .filter_map(|i| Some((i.node()?, i)))
            .flat_map(|(n, i)| i.pods_with_affinity().iter().map(move |p| (n, p)))
            .filter(|(_, p)| p.key() != pod.key())
            .any(|(other_node, existing)| {
                existing.anti_affinity().is_some_and(|anti| {
                    anti.required.iter().any(|term| {
                        term.selects(&existing.meta.namespace, pod)
                            && share_topology(node, other_node, &term.topology_key, &self.failure_domains)
                    })
                })
            })
    }

    fn term_satisfied_near(&self, pod: &Pod, term: &PodAffinityTerm, meta: &PredicateMetadata, node: &Node) -> bool {
        Self::placed(meta).any(|(other_node, existing)| {
            existing.key() != pod.key()
                && term.selects(&pod.meta.namespace, existing)
                && share_topology(node, other_node, &term.topology_key, &self.failure_domains)
        })
    }

    fn term_matches_anywhere(pod: &Pod, term: &PodAffinityTerm, meta: &PredicateMetadata) -> bool {
        Self::placed(meta).any(|(_, existing)| existing.key() != pod.key() && term.selects(&pod.meta.namespace, existing))
    }
}

impl FitPredicate for InterPodAffinity {
    fn name(&self) -> &'static str {
        names::MATCH_INTER_POD_AFFINITY
    }

    fn check(&self, pod: &Pod, meta: &PredicateMetadata, info: &NodeInfo) -> Vec<PredicateFailureReason> {
        let Some(node) = info.node() else {
            return vec![PredicateFailureReason::NodeUnknown];
        };

        if self.existing_anti_affinity_violated(pod, meta, node) {
            return vec![PredicateFailureReason::ExistingPodsAntiAffinityRulesNotMatch];
        }

        if let Some(affinity) = pod.affinity() {
            for term in &affinity.required {
                if self.term_satisfied_near(pod, term, meta, node) {
                    continue;
                }
                // The first pod of a self-affine group may go anywhere.
                let first_of_group = !Self::term_matches_anywhere(pod, term, meta)
                    && term.selects(&pod.meta.namespace, pod);
                if !first_of_group {
                    return vec![PredicateFailureReason::AffinityRulesNotMatch];
                }
            }
        }

        if let Some(anti) = pod.anti_affinity() {
            if anti
                .required
                .iter()
                .any(|term| self.term_satisfied_near(pod, term, meta, node))
            {
                return vec![PredicateFailureReason::AntiAffinityRulesNotMatch];
            }
        }
        Vec::new()
    }
}

/// Pods of one service share the values of the configured node labels.
///
/// A label pinned by the pod's node selector wins; otherwise the value
/// is taken from the node of an already placed pod of the same service.
pub struct ServiceAffinity {
    listers: Arc<Listers>,
    labels: Vec<String>,
}

impl ServiceAffinity {
    pub fn new(listers: Arc<Listers>, labels: Vec<String>) -> Self {
        Self { listers, labels }
    }

    fn required_labels(&self, pod: &Pod, meta: &PredicateMetadata) -> BTreeMap<String, String> {
        let mut required: BTreeMap<String, String> = self
            .labels
            .iter()
            .filter_map(|k| Some((k.clone(), pod.spec.node_selector.get(k)?.clone())))
            .collect();
        if required.len() == self.labels.len() {
            return required;
        }

        let services = self.listers.services_for_pod(pod);
        let Some(service) = services.first() else {
            return required;
        };
        let peer_node = meta
            .node_infos
            .values()
            .filter_map(|i| Some((i.node()?, i)))
            .find(|(_, i)| {
                i.pods().iter().any(|p| {
                    p.key() != pod.key()
                        && p.meta.namespace == pod.meta.namespace
                        && map_selects(&service.spec.selector, &p.meta.labels)
                })
            })
            .map(|(n, _)| n);
        if let Some(peer) = peer_node {
            for key in &self.labels {
                if required.contains_key(key) {
                    continue;
                }
                if let Some(v) = peer.meta.labels.get(key) {
                    required.insert(key.clone(), v.clone());
                }
            }
        }
        required
    }
}

impl FitPredicate for ServiceAffinity {
    fn name(&self) -> &'static str {
        names::CHECK_SERVICE_AFFINITY
    }

    fn check(&self, pod: &Pod, meta: &PredicateMetadata, info: &NodeInfo) -> Vec<PredicateFailureReason> {
        let Some(node) = info.node() else {
            return vec![PredicateFailureReason::NodeUnknown];
        };
        let required = self.required_labels(pod, meta);
        let ok = required
            .iter()
            .all(|(k, v)| node.meta.labels.get(k) == Some(v));
        if ok {
            Vec::new()
        } else {
            vec![PredicateFailureReason::ServiceAffinityViolated]
        }
    }
}
