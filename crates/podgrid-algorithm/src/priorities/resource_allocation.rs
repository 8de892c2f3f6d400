//! Resource-based priorities over cpu and memory.
//!
//! All three score the node as it would be after placing the pod, using
//! non-zero requests so best-effort pods still count.

use podgrid_cache::NodeInfo;
use podgrid_types::Pod;

use super::{MAX_PRIORITY, PriorityFunction, PriorityMetadata, names};

/// `(requested cpu, requested memory)` after adding the pod, and allocatable.
fn usage(meta: &PriorityMetadata, node: &NodeInfo) -> ((u64, u64), (u64, u64)) {
    let used = node.non_zero_requested();
    let alloc = node.allocatable();
    (
        (
            used.milli_cpu.saturating_add(meta.non_zero_request.milli_cpu),
            used.memory.saturating_add(meta.non_zero_request.memory),
        ),
        (alloc.milli_cpu, alloc.memory),
    )
}

fn unused_score(requested: u64, capacity: u64) -> i64 {
    if capacity == 0 || requested > capacity {
        return 0;
    }
    ((capacity - requested) as u128 * MAX_PRIORITY as u128 / capacity as u128) as i64
}

fn used_score(requested: u64, capacity: u64) -> i64 {
    if capacity == 0 || requested > capacity {
        return 0;
    }
    (requested as u128 * MAX_PRIORITY as u128 / capacity as u128) as i64
}

/// Favors nodes with the most free capacity (spreading).
pub struct LeastRequested;

impl PriorityFunction for LeastRequested {
    fn name(&self) -> &'static str {
        names::LEAST_REQUESTED
    }

    fn map(&self, _pod: &Pod, meta: &PriorityMetadata, node: &NodeInfo) -> i64 {
        let ((cpu, mem), (cpu_cap, mem_cap)) = usage(meta, node);
        (unused_score(cpu, cpu_cap) + unused_score(mem, mem_cap)) / 2
    }
}

/// Favors the fullest nodes (bin packing).
pub struct MostRequested;

impl PriorityFunction for MostRequested {
    fn name(&self) -> &'static str {
        names::MOST_REQUESTED
    }

    fn map(&self, _pod: &Pod, meta: &PriorityMetadata, node: &NodeInfo) -> i64 {
        let ((cpu, mem), (cpu_cap, mem_cap)) = usage(meta, node);
        (used_score(cpu, cpu_cap) + used_score(mem, mem_cap)) / 2
    }
}

/// Favors nodes whose cpu and memory utilisation stay close to each other.
pub struct BalancedResourceAllocation;

impl PriorityFunction for BalancedResourceAllocation {
    fn name(&self) -> &'static str {
        names::BALANCED_RESOURCE_ALLOCATION
    }

    fn map(&self, _pod: &Pod, meta: &PriorityMetadata, node: &NodeInfo) -> i64 {
        let ((cpu, mem), (cpu_cap, mem_cap)) = usage(meta, node);
        if cpu_cap == 0 || mem_cap == 0 {
            return 0;
        }
        let cpu_fraction = cpu as f64 / cpu_cap as f64;
        let mem_fraction = mem as f64 / mem_cap as f64;
        if cpu_fraction >= 1.0 || mem_fraction >= 1.0 {
            return 0;
        }
        let diff = (cpu_fraction - mem_fraction).abs();
        ((1.0 - diff) * MAX_PRIORITY as f64) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priorities::testing::run;
    use podgrid_cache::Listers;
    use podgrid_types::{Node, Resource};

    const GI: u64 = 1 << 30;

    fn info(name: &str, cpu: u64, mem: u64, pods: Vec<Pod>) -> NodeInfo {
        NodeInfo::with_pods(Some(Node::new(name, Resource::new(cpu, mem))), pods)
    }

    #[test]
    fn least_requested_prefers_emptier_node() {
        let busy = Pod::new("default", "busy").with_container(3000, 6 * GI).with_node_name("a");
        let nodes = [info("a", 4000, 8 * GI, vec![busy]), info("b", 4000, 8 * GI, Vec::new())];
        let pod = Pod::new("default", "p").with_container(1000, 2 * GI);
        let scores = run(&LeastRequested, &pod, &nodes, &Listers::default());
        assert_eq!(scores, vec![0, 7]);
    }

    #[test]
    fn most_requested_prefers_fuller_node() {
        let busy = Pod::new("default", "busy").with_container(2000, 4 * GI).with_node_name("a");
        let nodes = [info("a", 4000, 8 * GI, vec![busy]), info("b", 4000, 8 * GI, Vec::new())];
        let pod = Pod::new("default", "p").with_container(1000, 2 * GI);
        let scores = run(&MostRequested, &pod, &nodes, &Listers::default());
        assert_eq!(scores, vec![7, 2]);
    }

    #[test]
    fn balanced_prefers_even_usage() {
        let nodes = [info("a", 4000, 8 * GI, Vec::new()), info("b", 4000, 32 * GI, Vec::new())];
        let pod = Pod::new("default", "p").with_container(2000, 4 * GI);
        let scores = run(&BalancedResourceAllocation, &pod, &nodes, &Listers::default());
        assert_eq!(scores[0], 10);
        assert!(scores[1] < scores[0]);
    }

    #[test]
    fn overcommitted_scores_zero() {
        let nodes = [info("a", 1000, GI, Vec::new())];
        let pod = Pod::new("default", "p").with_container(2000, 2 * GI);
        assert_eq!(run(&LeastRequested, &pod, &nodes, &Listers::default()), vec![0]);
        assert_eq!(run(&BalancedResourceAllocation, &pod, &nodes, &Listers::default()), vec![0]);
    }
}
