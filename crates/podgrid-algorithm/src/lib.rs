//! podgrid-algorithm: deciding where one pod goes.
//!
//! ```text
//! registry    name → predicate / priority factories, algorithm providers
//! predicates  FitPredicate and the built-in filters
//! priorities  PriorityFunction (map / reduce) and the built-in scorers
//! extender    remote filter / prioritize stages over HTTP
//! generic     GenericScheduler: filter, score, select
//! parallel    bounded per-node fan-out
//! topology    shared topology-domain checks for affinity
//! ```

pub mod error;
pub mod extender;
pub mod generic;
pub mod parallel;
pub mod predicates;
pub mod priorities;
pub mod registry;
pub mod topology;

pub use error::{
    ExtenderError, ExtenderResult, FitError, RegistryError, RegistryResult, ScheduleError,
    ScheduleResult,
};
pub use extender::{ExtenderConfig, ExtenderFilterResult, HttpExtender, SchedulerExtender};
pub use generic::{DEFAULT_PARALLELISM, GenericScheduler, PredicateCache, select_host};
pub use predicates::{FitPredicate, PredicateFailureReason, PredicateMetadata, PredicateRef};
pub use priorities::{HostPriority, MAX_PRIORITY, PriorityConfig, PriorityFunction, PriorityMetadata};
pub use registry::{AlgorithmProvider, DEFAULT_PROVIDER, PluginArgs, Registry};
