//! Services and the controllers that own pods; consumed for spreading and
//! service affinity.

use serde::{Deserialize, Serialize};

use crate::event::{ResourceEvent, WatchEvent};
use crate::meta::{KubeObject, ObjectMeta, ResourceKind};
use crate::selector::{LabelSelector, Labels};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSpec {
    pub selector: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationControllerSpec {
    pub selector: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationController {
    #[serde(default)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: ReplicationControllerSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaSetSpec {
    pub selector: LabelSelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSet {
    #[serde(default)]
    pub meta: ObjectMeta,
    #[serde(default)]
    pub spec: ReplicaSetSpec,
}

impl Service {
    pub fn new(namespace: &str, name: &str, selector: Labels) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: ServiceSpec { selector },
        }
    }
}

impl ReplicationController {
    pub fn new(namespace: &str, name: &str, selector: Labels) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: ReplicationControllerSpec { selector },
        }
    }
}

impl ReplicaSet {
    pub fn new(namespace: &str, name: &str, selector: LabelSelector) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            spec: ReplicaSetSpec { selector },
        }
    }
}

macro_rules! impl_kube_object {
    ($ty:ident, $kind:ident) => {
        impl KubeObject for $ty {
            const KIND: ResourceKind = ResourceKind::$kind;

            fn meta(&self) -> &ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.meta
            }

            fn into_resource_event(event: WatchEvent<Self>) -> ResourceEvent {
                ResourceEvent::$kind(event)
            }

            fn from_resource_event(event: ResourceEvent) -> Option<WatchEvent<Self>> {
                match event {
                    ResourceEvent::$kind(e) => Some(e),
                    _ => None,
                }
            }
        }
    };
}

impl_kube_object!(Service, Service);
impl_kube_object!(ReplicationController, ReplicationController);
impl_kube_object!(ReplicaSet, ReplicaSet);
