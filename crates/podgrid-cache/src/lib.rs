//! podgrid-cache: in-memory state the placement loop reads.
//!
//! ```text
//!  watch events ──► ClusterCache ──snapshot──► NodeInfoMap ──► algorithm
//!        │                                                       │
//!        └──► invalidation table ──► EquivalenceCache ◄──lookup/store
//! ```
//!
//! The cluster cache and the equivalence cache are independent locks and
//! are never held together.

pub mod cache;
pub mod equivalence;
pub mod error;
pub mod invalidation;
pub mod listers;
pub mod node_info;

pub use cache::{ClusterCache, NodeInfoMap};
pub use equivalence::{EquivalenceCache, EquivalenceHash, GenerationToken, Verdict, equivalence_hash};
pub use error::{CacheError, CacheResult};
pub use invalidation::{ChangeKind, INVALIDATION_TABLE, Invalidation, Scope};
pub use listers::{Listers, ResourceStore};
pub use node_info::NodeInfo;
