//! The scheduling loop: one pod at a time from the queue to a binding.
//!
//! ```text
//! pop ──► schedule ──ok──► assume ──► bind ──ok──► finish_binding
//!            │                          │
//!            └─err─► condition + backoff└─err─► forget + condition + retry
//! ```
//!
//! Decisions are sequential so an assumed pod is always visible to the
//! next decision; only predicate evaluation inside one decision fans out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use podgrid_algorithm::{GenericScheduler, ScheduleError};
use podgrid_cache::ClusterCache;
use podgrid_types::{Binding, Node, Pod, PodCondition};

use crate::backoff::{AttemptState, AttemptTracker};
use crate::binder::BindError;
use crate::client::ClusterStateClient;
use crate::error_handler::{ErrorHandler, FailureKind};
use crate::handlers::Invalidator;
use crate::queue::SchedulingQueue;

/// What one pass of [`Scheduler::schedule_one`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Bound(String),
    /// No node fits; retried with escalating backoff.
    Unschedulable,
    /// A node was chosen but the commit failed; retried without escalation.
    BindFailed,
    /// Already placed, being deleted, or already in the cache.
    Skipped,
}

/// Built by [`crate::factory::ConfigFactory::create`].
pub struct Scheduler<C> {
    pub(crate) algorithm: GenericScheduler,
    pub(crate) client: Arc<C>,
    pub(crate) cache: Arc<ClusterCache>,
    pub(crate) invalidator: Invalidator,
    pub(crate) queue: Arc<SchedulingQueue>,
    pub(crate) error_handler: ErrorHandler<C>,
    pub(crate) attempts: Arc<AttemptTracker>,
    pub(crate) bind_timeout: Duration,
    pub(crate) backoff_gc_interval: Duration,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl<C: ClusterStateClient> Scheduler<C> {
    pub fn algorithm(&self) -> &GenericScheduler {
        &self.algorithm
    }

    /// Consume the queue until shutdown; the backoff sweep runs alongside.
    pub async fn run(&self) {
        info!("scheduling loop started");
        let mut shutdown = self.shutdown.clone();
        let work = async {
            while let Some(pod) = self.queue.pop(&mut shutdown).await {
                self.schedule_one(pod).await;
            }
        };
        tokio::join!(work, self.error_handler.run_gc(self.backoff_gc_interval));
        info!("scheduling loop stopped");
    }

    pub async fn schedule_one(&self, pod: Pod) -> ScheduleOutcome {
        let key = pod.key();
        if pod.meta.deletion_timestamp.is_some() || pod.is_assigned() {
            debug!(pod = %key, "skipping pod that no longer needs scheduling");
            return ScheduleOutcome::Skipped;
        }
        if self.cache.get_pod(&key).is_some() {
            debug!(pod = %key, "skipping pod already in cache");
            return ScheduleOutcome::Skipped;
        }
        self.attempts.set(&key, AttemptState::Scheduling);

        let nodes = self.cache.list_nodes(Node::is_schedulable);
        let host = match self.algorithm.schedule(&pod, &nodes).await {
            Ok(host) => host,
            Err(e) => {
                match &e {
                    ScheduleError::NoNodesAvailable => debug!(pod = %key, "no nodes available"),
                    ScheduleError::Fit(fit) => info!(pod = %key, nodes = fit.num_nodes, error = %fit, "pod does not fit"),
                    ScheduleError::Internal(_) => error!(pod = %key, error = %e, "scheduling failed"),
                }
                self.set_unschedulable(&pod, &e.to_string()).await;
                self.error_handler.handle(&pod, FailureKind::Unschedulable);
                return ScheduleOutcome::Unschedulable;
            }
        };

        let assumed = pod.clone().with_node_name(&host);
        if let Err(e) = self.cache.assume_pod(&assumed) {
            error!(pod = %key, node = %host, error = %e, "assume failed");
            self.error_handler.handle(&pod, FailureKind::BindRace);
            return ScheduleOutcome::BindFailed;
        }
        self.invalidator.pod_added_or_deleted(&host);

        let binding = Binding::for_pod(&pod, &host);
        let result = match tokio::time::timeout(self.bind_timeout, self.client.bind(&binding)).await {
            Ok(result) => result,
            Err(_) => Err(BindError::Timeout { pod: key.clone() }),
        };

        match result {
            Ok(()) => {
                // The confirming watch event may already have landed.
                if let Err(e) = self.cache.finish_binding(&assumed, Instant::now()) {
                    debug!(pod = %key, error = %e, "finish binding skipped");
                }
                self.attempts.set(&key, AttemptState::Bound);
                self.error_handler.backoff().forget(&key);
                info!(pod = %key, node = %host, "pod bound");
                ScheduleOutcome::Bound(host)
            }
            Err(e) => {
                warn!(pod = %key, node = %host, error = %e, "bind failed, rolling back");
                if let Err(fe) = self.cache.forget_pod(&assumed) {
                    error!(pod = %key, error = %fe, "failed to forget assumed pod");
                }
                self.invalidator.pod_added_or_deleted(&host);
                self.set_unschedulable(&pod, &format!("binding rejected: {e}")).await;
                self.error_handler.handle(&pod, FailureKind::BindRace);
                ScheduleOutcome::BindFailed
            }
        }
    }

    async fn set_unschedulable(&self, pod: &Pod, message: &str) {
        let condition = PodCondition::unschedulable(message);
        if let Err(e) = self.client.set_condition(pod, &condition).await {
            warn!(pod = %pod.key(), error = %e, "failed to update pod condition");
        }
    }
}
