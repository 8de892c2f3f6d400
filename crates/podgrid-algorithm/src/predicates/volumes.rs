//! Volume predicates: disk conflicts, volume zones, per-node attach limits.

use std::collections::BTreeSet;
use std::sync::Arc;

use podgrid_cache::invalidation::names;
use podgrid_cache::{Listers, NodeInfo};
use podgrid_types::{CloudVolumeKind, LABEL_REGION, LABEL_ZONE, Pod, VolumeSource};

use super::{FitPredicate, PredicateFailureReason, PredicateMetadata};

/// Default attach limits per cloud volume family.
pub const DEFAULT_MAX_EBS_VOLUMES: usize = 39;
pub const DEFAULT_MAX_GCE_PD_VOLUMES: usize = 16;
pub const DEFAULT_MAX_AZURE_DISK_VOLUMES: usize = 16;

/// Two pods may not mount the same exclusive disk on one node.
pub struct DiskConflict;

fn conflicts(a: &VolumeSource, b: &VolumeSource) -> bool {
    match (a, b) {
        (
            VolumeSource::GcePersistentDisk { pd_name: x, read_only: rx },
            VolumeSource::GcePersistentDisk { pd_name: y, read_only: ry },
        ) => x == y && !(*rx && *ry),
        (
            VolumeSource::AwsElasticBlockStore { volume_id: x, .. },
            VolumeSource::AwsElasticBlockStore { volume_id: y, .. },
        ) => x == y,
        (
            VolumeSource::Rbd { monitors: mx, pool: px, image: ix },
            VolumeSource::Rbd { monitors: my, pool: py, image: iy },
        ) => px == py && ix == iy && mx.iter().any(|m| my.contains(m)),
        (VolumeSource::Iscsi { iqn: x, .. }, VolumeSource::Iscsi { iqn: y, .. }) => x == y,
        _ => false,
    }
}

impl FitPredicate for DiskConflict {
    fn name(&self) -> &'static str {
        names::NO_DISK_CONFLICT
    }

    fn check(&self, pod: &Pod, _meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason> {
        let conflict = pod.spec.volumes.iter().any(|v| {
            node.pods()
                .iter()
                .flat_map(|p| p.spec.volumes.iter())
                .any(|existing| conflicts(&v.source, &existing.source))
        });
        if conflict {
            vec![PredicateFailureReason::DiskConflict]
        } else {
            Vec::new()
        }
    }
}

/// Claimed persistent volumes must live in the node's zone and region.
pub struct VolumeZone {
    listers: Arc<Listers>,
}

impl VolumeZone {
    pub fn new(listers: Arc<Listers>) -> Self {
        Self { listers }
    }
}

impl FitPredicate for VolumeZone {
    fn name(&self) -> &'static str {
        names::NO_VOLUME_ZONE_CONFLICT
    }

    fn check(&self, pod: &Pod, _meta: &PredicateMetadata, info: &NodeInfo) -> Vec<PredicateFailureReason> {
        let Some(node) = info.node() else {
            return vec![PredicateFailureReason::NodeUnknown];
        };
        let node_labels = &node.meta.labels;
        // Nodes without topology labels accept any volume.
        if !node_labels.contains_key(LABEL_ZONE) && !node_labels.contains_key(LABEL_REGION) {
            return Vec::new();
        }

        for claim_name in pod.spec.volumes.iter().filter_map(|v| v.source.claim_name()) {
            let claim_key = format!("{}/{claim_name}", pod.meta.namespace);
            let Some(claim) = self.listers.claim(&pod.meta.namespace, claim_name) else {
                return vec![PredicateFailureReason::VolumeClaimNotFound(claim_key)];
            };
            if claim.spec.volume_name.is_empty() {
                return vec![PredicateFailureReason::VolumeClaimNotBound(claim_key)];
            }
            let Some(pv) = self.listers.volume(&claim.spec.volume_name) else {
                return vec![PredicateFailureReason::VolumeNotFound(claim.spec.volume_name)];
            };
            for key in [LABEL_ZONE, LABEL_REGION] {
                if let Some(want) = pv.meta.labels.get(key) {
                    if node_labels.get(key) != Some(want) {
                        return vec![PredicateFailureReason::VolumeZoneConflict];
                    }
                }
            }
        }
        Vec::new()
    }
}

/// Caps distinct cloud volumes of one family attached to a node.
pub struct MaxVolumeCount {
    kind: CloudVolumeKind,
    max: usize,
    listers: Arc<Listers>,
}

impl MaxVolumeCount {
    pub fn new(kind: CloudVolumeKind, max: usize, listers: Arc<Listers>) -> Self {
        Self { kind, max, listers }
    }

    pub fn with_default_limit(kind: CloudVolumeKind, listers: Arc<Listers>) -> Self {
        let max = match kind {
            CloudVolumeKind::AwsEbs => DEFAULT_MAX_EBS_VOLUMES,
            CloudVolumeKind::GcePd => DEFAULT_MAX_GCE_PD_VOLUMES,
            CloudVolumeKind::AzureDisk => DEFAULT_MAX_AZURE_DISK_VOLUMES,
        };
        Self::new(kind, max, listers)
    }

    /// Distinct volume ids of this family used by `pod`.
    ///
    /// Claims that cannot be resolved count as one unique volume each.
    fn volume_ids(&self, pod: &Pod, out: &mut BTreeSet<String>) {
        for vol in &pod.spec.volumes {
            if let Some((kind, id)) = vol.source.cloud_volume() {
                if kind == self.kind {
                    out.insert(id.to_string());
                }
                continue;
            }
            let Some(claim_name) = vol.source.claim_name() else {
                continue;
            };
            let unresolved = format!("claim:{}/{claim_name}", pod.meta.namespace);
            let pv = self
                .listers
                .claim(&pod.meta.namespace, claim_name)
                .filter(|c| !c.spec.volume_name.is_empty())
                .and_then(|c| self.listers.volume(&c.spec.volume_name));
            match pv {
                Some(pv) => {
                    if let Some((kind, id)) = pv.spec.source.cloud_volume() {
                        if kind == self.kind {
                            out.insert(id.to_string());
                        }
                    }
                }
                None => {
                    out.insert(unresolved);
                }
            }
        }
    }

    fn predicate_name(&self) -> &'static str {
        match self.kind {
            CloudVolumeKind::AwsEbs => names::MAX_EBS_VOLUME_COUNT,
            CloudVolumeKind::GcePd => names::MAX_GCE_PD_VOLUME_COUNT,
            CloudVolumeKind::AzureDisk => names::MAX_AZURE_DISK_VOLUME_COUNT,
        }
    }
}

impl FitPredicate for MaxVolumeCount {
    fn name(&self) -> &'static str {
        self.predicate_name()
    }

    fn check(&self, pod: &Pod, _meta: &PredicateMetadata, node: &NodeInfo) -> Vec<PredicateFailureReason> {
        let mut new_ids = BTreeSet::new();
        self.volume_ids(pod, &mut new_ids);
        if new_ids.is_empty() {
            return Vec::new();
        }

        let mut existing = BTreeSet::new();
        for p in node.pods() {
            self.volume_ids(p, &mut existing);
        }
        let added = new_ids.difference(&existing).count();
        if existing.len() + added > self.max {
            vec![PredicateFailureReason::MaxVolumeCountExceeded]
        } else {
            Vec::new()
        }
    }
}
