//! Soft taints: fewer untolerated `PreferNoSchedule` taints is better.

use podgrid_cache::NodeInfo;
use podgrid_types::{Pod, TaintEffect, tolerations_tolerate};

use super::{HostPriority, PriorityFunction, PriorityMetadata, names, normalize};

pub struct TaintTolerationPriority;

impl PriorityFunction for TaintTolerationPriority {
    fn name(&self) -> &'static str {
        names::TAINT_TOLERATION
    }

    fn map(&self, _pod: &Pod, meta: &PriorityMetadata, node: &NodeInfo) -> i64 {
        node.taints()
            .iter()
            .filter(|t| t.effect == TaintEffect::PreferNoSchedule)
            .filter(|t| !tolerations_tolerate(&meta.prefer_no_schedule_tolerations, t))
            .count() as i64
    }

    fn reduce(&self, _pod: &Pod, _meta: &PriorityMetadata, scores: &mut [HostPriority]) {
        normalize(scores, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priorities::testing::run;
    use podgrid_cache::Listers;
    use podgrid_types::{Node, Resource, Taint, Toleration};

    #[test]
    fn untolerated_soft_taints_lower_the_score() {
        let soft = |k: &str| Taint::new(k, "", TaintEffect::PreferNoSchedule);
        let clean = Node::new("a", Resource::default());
        let one = Node::new("b", Resource::default()).with_taint(soft("x"));
        let two = Node::new("c", Resource::default()).with_taint(soft("x")).with_taint(soft("y"));
        let nodes: Vec<NodeInfo> = [clean, one, two].into_iter().map(NodeInfo::for_node).collect();

        let pod = Pod::new("default", "p");
        assert_eq!(run(&TaintTolerationPriority, &pod, &nodes, &Listers::default()), vec![10, 5, 0]);

        let mut tolerant = pod.clone();
        tolerant.spec.tolerations.push(Toleration::exists("y", None));
        assert_eq!(run(&TaintTolerationPriority, &tolerant, &nodes, &Listers::default()), vec![10, 0, 0]);
    }
}
