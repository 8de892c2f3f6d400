//! podgrid-scheduler: watching the cluster and committing placements.
//!
//! ```text
//! ClusterStateClient ──list/watch──► Reflector ──► handlers ──► ClusterCache
//!                                        │                  └─► EquivalenceCache
//!                                        └─ unscheduled pods ─► SchedulingQueue
//!                                                                   │
//!                        ErrorHandler ◄──failure── Scheduler ◄──pop─┘
//!                     (backoff, requeue)              │
//!                                                     └──bind──► Binder
//! ```

pub mod backoff;
pub mod binder;
pub mod client;
pub mod config;
pub mod error;
pub mod error_handler;
pub mod factory;
pub mod handlers;
pub mod memory;
pub mod queue;
pub mod reflector;
pub mod scheduler;

pub use backoff::{AttemptState, AttemptTracker, PodBackoff};
pub use binder::{BindError, BindResult, Binder, PodConditionUpdater};
pub use client::{ClientError, ClientResult, ClusterStateClient, FieldSelector, ListResult, ResourceClient};
pub use config::{ConfigError, ConfigResult, SchedulerConfig};
pub use error::{HandlerError, HandlerResult, SchedulerError, SchedulerResult};
pub use error_handler::{ErrorHandler, FailureKind};
pub use factory::{ConfigFactory, Informers};
pub use memory::MemoryClusterClient;
pub use queue::SchedulingQueue;
pub use reflector::{EventHandler, Reflector};
pub use scheduler::{ScheduleOutcome, Scheduler};
