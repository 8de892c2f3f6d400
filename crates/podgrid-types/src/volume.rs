//! Volumes, persistent volumes, and persistent volume claims.

use serde::{Deserialize, Serialize};

use crate::event::{ResourceEvent, WatchEvent};
use crate::meta::{KubeObject, ObjectMeta, ResourceKind};

/// Where a volume's data comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VolumeSource {
    EmptyDir,
    HostPath {
        path: String,
    },
    GcePersistentDisk {
        pd_name: String,
        #[serde(default)]
        read_only: bool,
    },
    AwsElasticBlockStore {
        volume_id: String,
        #[serde(default)]
        read_only: bool,
    },
    AzureDisk {
        disk_name: String,
    },
    Rbd {
        monitors: Vec<String>,
        pool: String,
        image: String,
    },
    Iscsi {
        target_portal: String,
        iqn: String,
        lun: u32,
    },
    Nfs {
        server: String,
        path: String,
    },
    PersistentVolumeClaim {
        claim_name: String,
        #[serde(default)]
        read_only: bool,
    },
}

/// Cloud block-storage families with a per-node attach limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudVolumeKind {
    AwsEbs,
    GcePd,
    AzureDisk,
}

impl CloudVolumeKind {
    pub const ALL: [CloudVolumeKind; 3] = [Self::AwsEbs, Self::GcePd, Self::AzureDisk];
}

impl VolumeSource {
    /// Cloud family and unique disk id, for attach-limit counting.
    pub fn cloud_volume(&self) -> Option<(CloudVolumeKind, &str)> {
        match self {
            Self::AwsElasticBlockStore { volume_id, .. } => Some((CloudVolumeKind::AwsEbs, volume_id)),
            Self::GcePersistentDisk { pd_name, .. } => Some((CloudVolumeKind::GcePd, pd_name)),
            Self::AzureDisk { disk_name } => Some((CloudVolumeKind::AzureDisk, disk_name)),
            _ => None,
        }
    }

    pub fn claim_name(&self) -> Option<&str> {
        match self {
            Self::PersistentVolumeClaim { claim_name, .. } => Some(claim_name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub source: VolumeSource,
}

// ── PersistentVolume ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolumeSpec {
    #[serde(flatten)]
    pub source: VolumeSource,
}

/// A cluster-scoped volume; zone/region live in its labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolume {
    #[serde(default)]
    pub meta: ObjectMeta,
    pub spec: PersistentVolumeSpec,
}

impl PersistentVolume {
    pub fn new(name: &str, source: VolumeSource) -> Self {
        Self {
            meta: ObjectMeta::new("", name),
            spec: PersistentVolumeSpec { source },
        }
    }
}

impl KubeObject for PersistentVolume {
    const KIND: ResourceKind = ResourceKind::PersistentVolume;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn into_resource_event(event: WatchEvent<Self>) -> ResourceEvent {
        ResourceEvent::PersistentVolume(event)
    }

    fn from_resource_event(event: ResourceEvent) -> Option<WatchEvent<Self>> {
        match event {
            ResourceEvent::PersistentVolume(e) => Some(e),
            _ => None,
        }
    }
}

// ── PersistentVolumeClaim ──────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentVolumeClaimSpec {
    /// Bound volume name; empty while the claim is pending.
    pub volume_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolumeClaim {
    #[serde(default)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: PersistentVolumeClaimSpec,
}

impl PersistentVolumeClaim {
    pub fn new(namespace: &str, name: &str, volume_name: &str) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: PersistentVolumeClaimSpec {
                volume_name: volume_name.to_string(),
            },
        }
    }
}

impl KubeObject for PersistentVolumeClaim {
    const KIND: ResourceKind = ResourceKind::PersistentVolumeClaim;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }

    fn into_resource_event(event: WatchEvent<Self>) -> ResourceEvent {
        ResourceEvent::PersistentVolumeClaim(event)
    }

    fn from_resource_event(event: ResourceEvent) -> Option<WatchEvent<Self>> {
        match event {
            ResourceEvent::PersistentVolumeClaim(e) => Some(e),
            _ => None,
        }
    }
}
