//! Failed-attempt handling: back off, re-read, requeue.
//!
//! ```text
//! failure ──► delay (escalating for unschedulable, flat for bind races)
//!         ──► sleep or shutdown
//!         ──► get pod ──► unchanged and still pending? ──► queue
//!                     └─► deleted / bound / terminated  ──► forget
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use podgrid_types::Pod;

use crate::backoff::{AttemptState, AttemptTracker, PodBackoff};
use crate::client::ResourceClient;
use crate::queue::SchedulingQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No candidate nodes, or none passed the predicates.
    Unschedulable,
    /// The decision was sound but committing it lost a race.
    BindRace,
}

pub struct ErrorHandler<C> {
    client: Arc<C>,
    queue: Arc<SchedulingQueue>,
    backoff: Arc<PodBackoff>,
    attempts: Arc<AttemptTracker>,
    shutdown: watch::Receiver<bool>,
}

impl<C> ErrorHandler<C>
where
    C: ResourceClient<Pod> + 'static,
{
    pub fn new(
        client: Arc<C>,
        queue: Arc<SchedulingQueue>,
        backoff: Arc<PodBackoff>,
        attempts: Arc<AttemptTracker>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            queue,
            backoff,
            attempts,
            shutdown,
        }
    }

    pub fn backoff(&self) -> &Arc<PodBackoff> {
        &self.backoff
    }

    /// Schedule a retry of `pod` in the background.
    pub fn handle(&self, pod: &Pod, kind: FailureKind) -> JoinHandle<()> {
        let key = pod.key();
        let now = Instant::now();
        let delay = match kind {
            FailureKind::Unschedulable => self.backoff.next_delay(&key, now),
            FailureKind::BindRace => self.backoff.current_delay(&key, now),
        };
        self.attempts.set(&key, AttemptState::Retrying);
        debug!(pod = %key, ?kind, delay_ms = delay.as_millis() as u64, "retrying after backoff");

        let pod = pod.clone();
        let client = Arc::clone(&self.client);
        let queue = Arc::clone(&self.queue);
        let backoff = Arc::clone(&self.backoff);
        let attempts = Arc::clone(&self.attempts);
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
            requeue(&*client, &queue, &backoff, &attempts, pod).await;
        })
    }

    /// Periodically drop backoff entries for pods that stopped failing.
    pub async fn run_gc(&self, interval: Duration) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let dropped = self.backoff.gc(Instant::now());
                    let pruned = self.attempts.prune_bound();
                    if dropped + pruned > 0 {
                        debug!(dropped, pruned, "backoff sweep");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

async fn requeue<C: ResourceClient<Pod>>(
    client: &C,
    queue: &SchedulingQueue,
    backoff: &PodBackoff,
    attempts: &AttemptTracker,
    pod: Pod,
) {
    let key = pod.key();
    match client.get(&key).await {
        Ok(Some(fresh))
            if fresh.meta.uid == pod.meta.uid
                && !fresh.is_assigned()
                && !fresh.is_terminated()
                && fresh.meta.deletion_timestamp.is_none() =>
        {
            if queue.add_if_not_present(fresh) {
                debug!(pod = %key, "requeued");
            }
        }
        Ok(_) => {
            debug!(pod = %key, "pod no longer pending, dropping retry");
            backoff.forget(&key);
            attempts.forget(&key);
        }
        Err(e) => {
            warn!(pod = %key, error = %e, "failed to re-read pod, requeueing last known copy");
            queue.add_if_not_present(pod);
        }
    }
}
