//! Priority functions: rank feasible nodes with a score in `0..=MAX_PRIORITY`.
//!
//! Each function has a per-node `map` and an optional `reduce` over all
//! mapped scores (normalization). The generic scheduler multiplies each
//! result by the configured weight and sums per node.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use podgrid_cache::{Listers, NodeInfo, NodeInfoMap};
use podgrid_types::{LabelSelector, Pod, Resource, TaintEffect, Toleration};

pub mod inter_pod_affinity;
pub mod node_affinity;
pub mod resource_allocation;
pub mod spreading;
pub mod taint_toleration;

pub use inter_pod_affinity::InterPodAffinityPriority;
pub use node_affinity::NodeAffinityPriority;
pub use resource_allocation::{BalancedResourceAllocation, LeastRequested, MostRequested};
pub use spreading::SelectorSpread;
pub use taint_toleration::TaintTolerationPriority;

pub const MAX_PRIORITY: i64 = 10;

/// Registered priority names.
pub mod names {
    pub const LEAST_REQUESTED: &str = "LeastRequestedPriority";
    pub const MOST_REQUESTED: &str = "MostRequestedPriority";
    pub const BALANCED_RESOURCE_ALLOCATION: &str = "BalancedResourceAllocation";
    pub const SELECTOR_SPREAD: &str = "SelectorSpreadPriority";
    pub const NODE_AFFINITY: &str = "NodeAffinityPriority";
    pub const TAINT_TOLERATION: &str = "TaintTolerationPriority";
    pub const INTER_POD_AFFINITY: &str = "InterPodAffinityPriority";
    pub const EQUAL: &str = "EqualPriority";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPriority {
    pub host: String,
    pub score: i64,
}

/// Inputs shared by every priority function for one pod.
#[derive(Debug, Clone)]
pub struct PriorityMetadata {
    pub non_zero_request: Resource,
    /// Selectors of the services, controllers and replica sets owning the pod.
    pub spread_selectors: Vec<LabelSelector>,
    /// Tolerations that apply to `PreferNoSchedule` taints.
    pub prefer_no_schedule_tolerations: Vec<Toleration>,
    pub node_infos: Arc<NodeInfoMap>,
}

impl PriorityMetadata {
    pub fn new(pod: &Pod, node_infos: Arc<NodeInfoMap>, listers: &Listers) -> Self {
        let mut spread_selectors: Vec<LabelSelector> = listers
            .services_for_pod(pod)
            .iter()
            .map(|s| LabelSelector::from_labels(&s.spec.selector))
            .collect();
        spread_selectors.extend(
            listers
                .controllers_for_pod(pod)
                .iter()
                .map(|rc| LabelSelector::from_labels(&rc.spec.selector)),
        );
        spread_selectors.extend(listers.replica_sets_for_pod(pod).into_iter().map(|rs| rs.spec.selector));

        let prefer_no_schedule_tolerations = pod
            .spec
            .tolerations
            .iter()
            .filter(|t| t.effect.is_none_or(|e| e == TaintEffect::PreferNoSchedule))
            .cloned()
            .collect();

        Self {
            non_zero_request: pod.non_zero_request(),
            spread_selectors,
            prefer_no_schedule_tolerations,
            node_infos,
        }
    }
}

pub trait PriorityFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn map(&self, pod: &Pod, meta: &PriorityMetadata, node: &NodeInfo) -> i64;

    /// Normalize mapped scores in place; the default keeps them.
    fn reduce(&self, _pod: &Pod, _meta: &PriorityMetadata, _scores: &mut [HostPriority]) {}
}

/// A priority function with its weight.
#[derive(Clone)]
pub struct PriorityConfig {
    pub function: Arc<dyn PriorityFunction>,
    pub weight: i64,
}

impl std::fmt::Debug for PriorityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityConfig")
            .field("name", &self.function.name())
            .field("weight", &self.weight)
            .finish()
    }
}

/// Every node scores the same.
pub struct EqualPriority;

impl PriorityFunction for EqualPriority {
    fn name(&self) -> &'static str {
        names::EQUAL
    }

    fn map(&self, _pod: &Pod, _meta: &PriorityMetadata, _node: &NodeInfo) -> i64 {
        1
    }
}

/// Scale scores to `0..=MAX_PRIORITY` relative to the highest; `reverse`
/// makes the highest raw score the lowest result.
pub(crate) fn normalize(scores: &mut [HostPriority], reverse: bool) {
    let max = scores.iter().map(|s| s.score).max().unwrap_or(0);
    if max == 0 {
        if reverse {
            for s in scores.iter_mut() {
                s.score = MAX_PRIORITY;
            }
        }
        return;
    }
    for s in scores.iter_mut() {
        let scaled = MAX_PRIORITY * s.score / max;
        s.score = if reverse { MAX_PRIORITY - scaled } else { scaled };
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn hp(score: i64) -> HostPriority {
        HostPriority {
            host: String::new(),
            score,
        }
    }

    #[test]
    fn normalize_scales_to_max() {
        let mut scores = vec![hp(0), hp(5), hp(20)];
        normalize(&mut scores, false);
        assert_eq!(scores.iter().map(|s| s.score).collect::<Vec<_>>(), vec![0, 2, 10]);

        let mut scores = vec![hp(0), hp(5), hp(20)];
        normalize(&mut scores, true);
        assert_eq!(scores.iter().map(|s| s.score).collect::<Vec<_>>(), vec![10, 8, 0]);
    }

    #[test]
    fn normalize_all_zero() {
        let mut scores = vec![hp(0), hp(0)];
        normalize(&mut scores, true);
        assert!(scores.iter().all(|s| s.score == MAX_PRIORITY));
    }

    #[test]
    fn metadata_collects_owner_selectors() {
        let listers = Listers::new();
        listers.services.upsert(podgrid_types::Service::new(
            "default",
            "web",
            [("app".to_string(), "web".to_string())].into_iter().collect(),
        ));
        let pod = Pod::new("default", "web-1").with_label("app", "web");
        let meta = PriorityMetadata::new(&pod, Arc::new(NodeInfoMap::new()), &listers);
        assert_eq!(meta.spread_selectors.len(), 1);
        assert_eq!(meta.non_zero_request.milli_cpu, 0);
    }
}
