//! Which cluster changes invalidate which predicate verdicts.
//!
//! The whole policy lives in [`INVALIDATION_TABLE`]. Event handlers only
//! classify what changed ([`pod_changes`], [`node_changes`], ...) and apply
//! the resulting [`Invalidation`]; adding a predicate means adding rows here.
//! Over-invalidation costs a re-evaluation, under-invalidation is a bug.

use std::collections::BTreeSet;

use podgrid_types::{
    LABEL_REGION, LABEL_ZONE, Node, PersistentVolume, Pod, Service,
};

use crate::equivalence::EquivalenceCache;

/// Registered predicate names.
pub mod names {
    pub const POD_FITS_RESOURCES: &str = "PodFitsResources";
    pub const POD_FITS_HOST: &str = "PodFitsHost";
    pub const POD_FITS_HOST_PORTS: &str = "PodFitsHostPorts";
    pub const MATCH_NODE_SELECTOR: &str = "MatchNodeSelector";
    pub const GENERAL_PREDICATES: &str = "GeneralPredicates";
    pub const NO_DISK_CONFLICT: &str = "NoDiskConflict";
    pub const NO_VOLUME_ZONE_CONFLICT: &str = "NoVolumeZoneConflict";
    pub const MAX_EBS_VOLUME_COUNT: &str = "MaxEBSVolumeCount";
    pub const MAX_GCE_PD_VOLUME_COUNT: &str = "MaxGCEPDVolumeCount";
    pub const MAX_AZURE_DISK_VOLUME_COUNT: &str = "MaxAzureDiskVolumeCount";
    pub const MATCH_INTER_POD_AFFINITY: &str = "MatchInterPodAffinity";
    pub const POD_TOLERATES_NODE_TAINTS: &str = "PodToleratesNodeTaints";
    pub const CHECK_NODE_MEMORY_PRESSURE: &str = "CheckNodeMemoryPressure";
    pub const CHECK_NODE_DISK_PRESSURE: &str = "CheckNodeDiskPressure";
    pub const CHECK_NODE_CONDITION: &str = "CheckNodeCondition";
    pub const CHECK_SERVICE_AFFINITY: &str = "CheckServiceAffinity";
}

use names::*;

/// A classified change observed by an event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    /// A pod appeared on or disappeared from the node.
    PodAddedOrDeleted,
    PodResources,
    PodHostPorts,
    PodVolumes,
    PodLabels,
    NodeAllocatable,
    NodeLabels,
    NodeZoneLabels,
    NodeTaints,
    NodeMemoryPressure,
    NodeDiskPressure,
    /// Ready, out-of-disk, network or unschedulable flag.
    NodeCondition,
    /// Any persistent volume: claims may resolve to it whatever its type.
    PersistentVolume,
    PersistentVolumeClaim,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only the node the change happened on.
    Node,
    /// Every node.
    AllNodes,
}

#[derive(Debug, Clone, Copy)]
pub struct InvalidationRule {
    pub predicate: &'static str,
    pub change: ChangeKind,
    pub scope: Scope,
}

const fn rule(predicate: &'static str, change: ChangeKind, scope: Scope) -> InvalidationRule {
    InvalidationRule {
        predicate,
        change,
        scope,
    }
}

/// Predicate → triggering change → scope.
pub const INVALIDATION_TABLE: &[InvalidationRule] = &[
    rule(GENERAL_PREDICATES, ChangeKind::PodAddedOrDeleted, Scope::Node),
    rule(GENERAL_PREDICATES, ChangeKind::PodResources, Scope::Node),
    rule(GENERAL_PREDICATES, ChangeKind::PodHostPorts, Scope::Node),
    rule(GENERAL_PREDICATES, ChangeKind::NodeAllocatable, Scope::Node),
    rule(GENERAL_PREDICATES, ChangeKind::NodeLabels, Scope::Node),
    rule(POD_FITS_RESOURCES, ChangeKind::PodAddedOrDeleted, Scope::Node),
    rule(POD_FITS_RESOURCES, ChangeKind::PodResources, Scope::Node),
    rule(POD_FITS_RESOURCES, ChangeKind::NodeAllocatable, Scope::Node),
    rule(POD_FITS_HOST_PORTS, ChangeKind::PodAddedOrDeleted, Scope::Node),
    rule(POD_FITS_HOST_PORTS, ChangeKind::PodHostPorts, Scope::Node),
    rule(MATCH_NODE_SELECTOR, ChangeKind::NodeLabels, Scope::Node),
    rule(NO_DISK_CONFLICT, ChangeKind::PodAddedOrDeleted, Scope::Node),
    rule(NO_DISK_CONFLICT, ChangeKind::PodVolumes, Scope::Node),
    rule(NO_VOLUME_ZONE_CONFLICT, ChangeKind::NodeZoneLabels, Scope::Node),
    rule(NO_VOLUME_ZONE_CONFLICT, ChangeKind::PersistentVolume, Scope::AllNodes),
    rule(NO_VOLUME_ZONE_CONFLICT, ChangeKind::PersistentVolumeClaim, Scope::AllNodes),
    rule(MAX_EBS_VOLUME_COUNT, ChangeKind::PodAddedOrDeleted, Scope::Node),
    rule(MAX_EBS_VOLUME_COUNT, ChangeKind::PodVolumes, Scope::Node),
    rule(MAX_EBS_VOLUME_COUNT, ChangeKind::PersistentVolume, Scope::AllNodes),
    rule(MAX_EBS_VOLUME_COUNT, ChangeKind::PersistentVolumeClaim, Scope::AllNodes),
    rule(MAX_GCE_PD_VOLUME_COUNT, ChangeKind::PodAddedOrDeleted, Scope::Node),
    rule(MAX_GCE_PD_VOLUME_COUNT, ChangeKind::PodVolumes, Scope::Node),
    rule(MAX_GCE_PD_VOLUME_COUNT, ChangeKind::PersistentVolume, Scope::AllNodes),
    rule(MAX_GCE_PD_VOLUME_COUNT, ChangeKind::PersistentVolumeClaim, Scope::AllNodes),
    rule(MAX_AZURE_DISK_VOLUME_COUNT, ChangeKind::PodAddedOrDeleted, Scope::Node),
    rule(MAX_AZURE_DISK_VOLUME_COUNT, ChangeKind::PodVolumes, Scope::Node),
    rule(MAX_AZURE_DISK_VOLUME_COUNT, ChangeKind::PersistentVolume, Scope::AllNodes),
    rule(MAX_AZURE_DISK_VOLUME_COUNT, ChangeKind::PersistentVolumeClaim, Scope::AllNodes),
    rule(MATCH_INTER_POD_AFFINITY, ChangeKind::PodAddedOrDeleted, Scope::AllNodes),
    rule(MATCH_INTER_POD_AFFINITY, ChangeKind::PodLabels, Scope::AllNodes),
    rule(MATCH_INTER_POD_AFFINITY, ChangeKind::NodeLabels, Scope::AllNodes),
    rule(POD_TOLERATES_NODE_TAINTS, ChangeKind::NodeTaints, Scope::Node),
    rule(CHECK_NODE_MEMORY_PRESSURE, ChangeKind::NodeMemoryPressure, Scope::Node),
    rule(CHECK_NODE_DISK_PRESSURE, ChangeKind::NodeDiskPressure, Scope::Node),
    rule(CHECK_NODE_CONDITION, ChangeKind::NodeCondition, Scope::Node),
    rule(CHECK_SERVICE_AFFINITY, ChangeKind::Service, Scope::AllNodes),
    rule(CHECK_SERVICE_AFFINITY, ChangeKind::PodAddedOrDeleted, Scope::AllNodes),
    rule(CHECK_SERVICE_AFFINITY, ChangeKind::PodLabels, Scope::AllNodes),
    rule(CHECK_SERVICE_AFFINITY, ChangeKind::NodeLabels, Scope::AllNodes),
];

/// Predicate names to drop, split by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    pub on_node: BTreeSet<&'static str>,
    pub all_nodes: BTreeSet<&'static str>,
}

impl Invalidation {
    /// Resolve a set of changes against the table.
    pub fn for_changes(changes: &[ChangeKind]) -> Self {
        let mut out = Self::default();
        for r in INVALIDATION_TABLE.iter().filter(|r| changes.contains(&r.change)) {
            match r.scope {
                Scope::Node => out.on_node.insert(r.predicate),
                Scope::AllNodes => out.all_nodes.insert(r.predicate),
            };
        }
        // Dropped everywhere already.
        out.on_node.retain(|p| !out.all_nodes.contains(p));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.on_node.is_empty() && self.all_nodes.is_empty()
    }

    /// Apply to `cache`; `node` is required for node-scoped entries.
    pub fn apply<R: Clone>(&self, cache: &EquivalenceCache<R>, node: Option<&str>) {
        if !self.all_nodes.is_empty() {
            let preds: Vec<&str> = self.all_nodes.iter().copied().collect();
            cache.invalidate_predicate_on_all_nodes(&preds);
        }
        if let Some(node) = node {
            let preds: Vec<&str> = self.on_node.iter().copied().collect();
            cache.invalidate_predicate_on_node(node, &preds);
        }
    }
}

// ── Change classification ──────────────────────────────────────────

/// What differs between two versions of a pod that stayed on one node.
pub fn pod_changes(old: &Pod, new: &Pod) -> Vec<ChangeKind> {
    let mut changes = Vec::new();
    if old.spec.node_name != new.spec.node_name {
        changes.push(ChangeKind::PodAddedOrDeleted);
    }
    if old.resource_request() != new.resource_request() {
        changes.push(ChangeKind::PodResources);
    }
    if old.host_ports() != new.host_ports() {
        changes.push(ChangeKind::PodHostPorts);
    }
    if old.spec.volumes != new.spec.volumes {
        changes.push(ChangeKind::PodVolumes);
    }
    if old.meta.labels != new.meta.labels {
        changes.push(ChangeKind::PodLabels);
    }
    changes
}

fn zone_labels(node: &Node) -> (Option<&String>, Option<&String>) {
    (node.meta.labels.get(LABEL_ZONE), node.meta.labels.get(LABEL_REGION))
}

/// What differs between two versions of a node.
pub fn node_changes(old: &Node, new: &Node) -> Vec<ChangeKind> {
    let mut changes = Vec::new();
    if old.status.allocatable != new.status.allocatable {
        changes.push(ChangeKind::NodeAllocatable);
    }
    if old.meta.labels != new.meta.labels {
        changes.push(ChangeKind::NodeLabels);
        if zone_labels(old) != zone_labels(new) {
            changes.push(ChangeKind::NodeZoneLabels);
        }
    }
    if old.spec.taints != new.spec.taints {
        changes.push(ChangeKind::NodeTaints);
    }
    if old.memory_pressure() != new.memory_pressure() {
        changes.push(ChangeKind::NodeMemoryPressure);
    }
    if old.disk_pressure() != new.disk_pressure() {
        changes.push(ChangeKind::NodeDiskPressure);
    }
    if old.is_ready() != new.is_ready()
        || old.out_of_disk() != new.out_of_disk()
        || old.network_unavailable() != new.network_unavailable()
        || old.spec.unschedulable != new.spec.unschedulable
    {
        changes.push(ChangeKind::NodeCondition);
    }
    changes
}

/// Changes implied by a persistent volume being added, updated or deleted.
///
/// Every volume-count predicate is hit regardless of the volume's type: a
/// claim that did not resolve counted as a volume of each type, and a PV of
/// any type can resolve it.
pub fn persistent_volume_changes(_pv: &PersistentVolume) -> Vec<ChangeKind> {
    vec![ChangeKind::PersistentVolume]
}

/// Whether a service update changed anything service affinity reads.
pub fn service_changed(old: &Service, new: &Service) -> bool {
    old.spec.selector != new.spec.selector
}

#[cfg(test)]
mod tests {
    use super::*;
    use podgrid_types::{ConditionStatus, NodeConditionType, Resource, Taint, TaintEffect, VolumeSource};

    fn node() -> Node {
        Node::new("n1", Resource::new(4000, 8 << 30))
    }

    #[test]
    fn every_predicate_has_a_rule() {
        for p in [
            POD_FITS_RESOURCES,
            POD_FITS_HOST_PORTS,
            MATCH_NODE_SELECTOR,
            GENERAL_PREDICATES,
            NO_DISK_CONFLICT,
            NO_VOLUME_ZONE_CONFLICT,
            MAX_EBS_VOLUME_COUNT,
            MAX_GCE_PD_VOLUME_COUNT,
            MAX_AZURE_DISK_VOLUME_COUNT,
            MATCH_INTER_POD_AFFINITY,
            POD_TOLERATES_NODE_TAINTS,
            CHECK_NODE_MEMORY_PRESSURE,
            CHECK_NODE_DISK_PRESSURE,
            CHECK_NODE_CONDITION,
            CHECK_SERVICE_AFFINITY,
        ] {
            assert!(
                INVALIDATION_TABLE.iter().any(|r| r.predicate == p),
                "{p} has no invalidation rule"
            );
        }
    }

    #[test]
    fn pod_add_splits_scopes() {
        let inv = Invalidation::for_changes(&[ChangeKind::PodAddedOrDeleted]);
        assert!(inv.on_node.contains(GENERAL_PREDICATES));
        assert!(inv.on_node.contains(NO_DISK_CONFLICT));
        assert!(inv.all_nodes.contains(MATCH_INTER_POD_AFFINITY));
        assert!(!inv.on_node.contains(MATCH_INTER_POD_AFFINITY));
        assert!(!inv.on_node.contains(POD_TOLERATES_NODE_TAINTS));
    }

    #[test]
    fn node_label_change_hits_selector_and_affinity() {
        let old = node();
        let new = node().with_label("disk", "ssd");
        let changes = node_changes(&old, &new);
        assert_eq!(changes, vec![ChangeKind::NodeLabels]);

        let inv = Invalidation::for_changes(&changes);
        assert!(inv.on_node.contains(MATCH_NODE_SELECTOR));
        assert!(inv.on_node.contains(GENERAL_PREDICATES));
        assert!(inv.all_nodes.contains(MATCH_INTER_POD_AFFINITY));
        assert!(!inv.on_node.contains(NO_VOLUME_ZONE_CONFLICT));
    }

    #[test]
    fn zone_label_change_hits_volume_zone() {
        let new = node().with_label(LABEL_ZONE, "a");
        let changes = node_changes(&node(), &new);
        assert!(changes.contains(&ChangeKind::NodeZoneLabels));
        assert!(Invalidation::for_changes(&changes).on_node.contains(NO_VOLUME_ZONE_CONFLICT));
    }

    #[test]
    fn taint_and_condition_changes() {
        let tainted = node().with_taint(Taint::new("dedicated", "db", TaintEffect::NoSchedule));
        let inv = Invalidation::for_changes(&node_changes(&node(), &tainted));
        assert_eq!(inv.on_node.iter().copied().collect::<Vec<_>>(), vec![POD_TOLERATES_NODE_TAINTS]);

        let mut pressured = node();
        pressured.set_condition(NodeConditionType::MemoryPressure, ConditionStatus::True);
        let inv = Invalidation::for_changes(&node_changes(&node(), &pressured));
        assert_eq!(inv.on_node.iter().copied().collect::<Vec<_>>(), vec![CHECK_NODE_MEMORY_PRESSURE]);

        let mut cordoned = node();
        cordoned.spec.unschedulable = true;
        assert_eq!(node_changes(&node(), &cordoned), vec![ChangeKind::NodeCondition]);
    }

    #[test]
    fn unchanged_update_invalidates_nothing() {
        assert!(node_changes(&node(), &node()).is_empty());
        let pod = Pod::new("default", "a").with_container(100, 0);
        assert!(pod_changes(&pod, &pod.clone()).is_empty());
    }

    #[test]
    fn any_persistent_volume_hits_every_volume_count() {
        let ebs = PersistentVolume::new(
            "pv-1",
            VolumeSource::AwsElasticBlockStore {
                volume_id: "vol-1".to_string(),
                read_only: false,
            },
        );
        let nfs = PersistentVolume::new(
            "pv-2",
            VolumeSource::Nfs {
                server: "files".to_string(),
                path: "/export".to_string(),
            },
        );
        for pv in [ebs, nfs] {
            let inv = Invalidation::for_changes(&persistent_volume_changes(&pv));
            assert!(inv.all_nodes.contains(NO_VOLUME_ZONE_CONFLICT));
            for count in [MAX_EBS_VOLUME_COUNT, MAX_GCE_PD_VOLUME_COUNT, MAX_AZURE_DISK_VOLUME_COUNT] {
                assert!(inv.all_nodes.contains(count), "{} misses {count}", pv.meta.name);
            }
        }
    }

    #[test]
    fn pod_label_change_is_cluster_wide() {
        let old = Pod::new("default", "a").with_label("app", "web");
        let new = Pod::new("default", "a").with_label("app", "db");
        let inv = Invalidation::for_changes(&pod_changes(&old, &new));
        assert!(inv.on_node.is_empty());
        assert!(inv.all_nodes.contains(MATCH_INTER_POD_AFFINITY));
        assert!(inv.all_nodes.contains(CHECK_SERVICE_AFFINITY));
    }

    #[test]
    fn apply_drops_cached_entries() {
        let cache: EquivalenceCache<String> = EquivalenceCache::new();
        let verdict = crate::equivalence::Verdict {
            fit: false,
            reasons: vec!["node(s) didn't match node selector".to_string()],
        };
        cache.store("n1", MATCH_NODE_SELECTOR, 1, verdict.clone());
        cache.store("n1", POD_TOLERATES_NODE_TAINTS, 1, verdict);

        Invalidation::for_changes(&[ChangeKind::NodeLabels]).apply(&cache, Some("n1"));
        assert!(cache.lookup("n1", MATCH_NODE_SELECTOR, 1).is_none());
        assert!(cache.lookup("n1", POD_TOLERATES_NODE_TAINTS, 1).is_some());
    }
}
