//! Preferred node affinity.

use podgrid_cache::NodeInfo;
use podgrid_types::Pod;

use super::{HostPriority, PriorityFunction, PriorityMetadata, names, normalize};

/// Sum of the weights of matching preferred terms, normalized to the best node.
pub struct NodeAffinityPriority;

impl PriorityFunction for NodeAffinityPriority {
    fn name(&self) -> &'static str {
        names::NODE_AFFINITY
    }

    fn map(&self, pod: &Pod, _meta: &PriorityMetadata, info: &NodeInfo) -> i64 {
        let (Some(affinity), Some(node)) = (pod.node_affinity(), info.node()) else {
            return 0;
        };
        affinity
            .preferred
            .iter()
            .filter(|t| t.weight > 0 && t.preference.matches(&node.meta.labels))
            .map(|t| i64::from(t.weight))
            .sum()
    }

    fn reduce(&self, _pod: &Pod, _meta: &PriorityMetadata, scores: &mut [HostPriority]) {
        normalize(scores, false);
    }
}
