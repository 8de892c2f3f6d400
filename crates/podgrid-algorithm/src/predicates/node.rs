//! Predicates on node state: taints, pressure conditions, readiness.

use podgrid_cache::NodeInfo;
use podgrid_cache::invalidation::names;
use podgrid_types::{Pod, TaintEffect, tolerations_tolerate};

use super::{FitPredicate, PredicateFailureReason, PredicateMetadata};

/// Every `NoSchedule` / `NoExecute` taint must be tolerated.
pub struct TaintToleration;

impl FitPredicate for TaintToleration {
    fn name(&self) -> &'static str {
        names::POD_TOLERATES_NODE_TAINTS
    }

    fn check(&self, pod: &Pod, _meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason> {
        let untolerated = node
            .taints()
            .iter()
            .filter(|t| matches!(t.effect, TaintEffect::NoSchedule | TaintEffect::NoExecute))
            .any(|t| !tolerations_tolerate(&pod.spec.tolerations, t));
        if untolerated {
            vec![PredicateFailureReason::TaintsTolerationsNotMatch]
        } else {
            Vec::new()
        }
    }
}

/// Best-effort pods (no requests) stay off nodes under memory pressure.
pub struct NodeMemoryPressure;

impl FitPredicate for NodeMemoryPressure {
    fn name(&self) -> &'static str {
        names::CHECK_NODE_MEMORY_PRESSURE
    }

    fn check(&self, _pod: &Pod, meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason> {
        let pressured = node.node().is_some_and(|n| n.memory_pressure());
        if pressured && meta.request.is_zero() {
            vec![PredicateFailureReason::NodeUnderMemoryPressure]
        } else {
            Vec::new()
        }
    }
}

/// No pod goes to a node under disk pressure.
pub struct NodeDiskPressure;

impl FitPredicate for NodeDiskPressure {
    fn name(&self) -> &'static str {
        names::CHECK_NODE_DISK_PRESSURE
    }

    fn check(&self, _pod: &Pod, _meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason> {
        if node.node().is_some_and(|n| n.disk_pressure()) {
            vec![PredicateFailureReason::NodeUnderDiskPressure]
        } else {
            Vec::new()
        }
    }
}

/// Ready, with disk and network, and not cordoned.
pub struct NodeConditionCheck;

impl FitPredicate for NodeConditionCheck {
    fn name(&self) -> &'static str {
        names::CHECK_NODE_CONDITION
    }

    fn check(&self, _pod: &Pod, _meta: &PredicateMetadata, info: &NodeInfo) -> Vec<PredicateFailureReason> {
        let Some(node) = info.node() else {
            return vec![PredicateFailureReason::NodeUnknown];
        };
        let mut reasons = Vec::new();
        if !node.is_ready() {
            reasons.push(PredicateFailureReason::NodeNotReady);
        }
        if node.out_of_disk() {
            reasons.push(PredicateFailureReason::NodeOutOfDisk);
        }
        if node.network_unavailable() {
            reasons.push(PredicateFailureReason::NodeNetworkUnavailable);
        }
        if node.spec.unschedulable {
            reasons.push(PredicateFailureReason::NodeUnschedulable);
        }
        reasons
    }
}
