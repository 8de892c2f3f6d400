//! podgrid-types: the data model shared by every podgrid crate.
//!
//! These types mirror the subset of cluster objects the placement engine
//! consumes: pods, nodes, persistent volumes and claims, services, and the
//! replication controllers / replica sets used for spreading. All types are
//! `serde`-serializable so they can travel over watch streams, extender
//! calls, and simulation fixtures.
//!
//! # Layout
//!
//! ```text
//! meta      ObjectMeta, KubeObject trait, ResourceKind
//! resource  Resource (cpu / memory / gpu / storage / pods / scalar)
//! quantity  "500m", "1Gi" style quantity parsing
//! selector  label selectors and node selector terms
//! taint     taints and tolerations
//! pod       Pod, PodSpec, affinity, conditions
//! node      Node, NodeSpec, NodeStatus, conditions
//! volume    Volume sources, PersistentVolume, PersistentVolumeClaim
//! workload  Service, ReplicationController, ReplicaSet
//! event     WatchEvent<T> and the per-kind ResourceEvent union
//! ```

pub mod event;
pub mod meta;
pub mod node;
pub mod pod;
pub mod quantity;
pub mod resource;
pub mod selector;
pub mod taint;
pub mod volume;
pub mod workload;

pub use event::*;
pub use meta::{KubeObject, ObjectMeta, ResourceKind};
pub use node::*;
pub use pod::*;
pub use quantity::QuantityError;
pub use resource::Resource;
pub use selector::*;
pub use taint::*;
pub use volume::*;
pub use workload::*;
