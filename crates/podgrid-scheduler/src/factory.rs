//! Builds the scheduler from configuration and wires watch events into it.
//!
//! One reflector per watched kind feeds its handler (see [`crate::handlers`]);
//! pods are watched twice, through disjoint field selectors, so that bound
//! pods reach the cache and pending pods reach the queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use podgrid_algorithm::{
    GenericScheduler, HttpExtender, PluginArgs, PredicateCache, Registry, SchedulerExtender,
};
use podgrid_cache::{ClusterCache, EquivalenceCache, Listers};

use crate::backoff::{AttemptTracker, PodBackoff};
use crate::client::{ClusterStateClient, FieldSelector, ResourceClient, Selectable};
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::error_handler::ErrorHandler;
use crate::handlers::{
    AssignedPodHandler, Invalidator, NodeHandler, PersistentVolumeClaimHandler, PersistentVolumeHandler,
    ReplicaSetHandler, ReplicationControllerHandler, ServiceHandler, UnscheduledPodHandler,
};
use crate::queue::SchedulingQueue;
use crate::reflector::{EventHandler, Reflector};
use crate::scheduler::Scheduler;

pub struct ConfigFactory<C> {
    client: Arc<C>,
    config: SchedulerConfig,
    registry: Registry,
    cache: Arc<ClusterCache>,
    ecache: Option<Arc<PredicateCache>>,
    listers: Arc<Listers>,
    queue: Arc<SchedulingQueue>,
    backoff: Arc<PodBackoff>,
    attempts: Arc<AttemptTracker>,
}

impl<C: ClusterStateClient> ConfigFactory<C> {
    /// Validates `config`; an invalid configuration never yields a factory.
    pub fn new(client: Arc<C>, config: SchedulerConfig) -> SchedulerResult<Self> {
        Self::with_registry(client, config, Registry::with_defaults())
    }

    pub fn with_registry(client: Arc<C>, config: SchedulerConfig, registry: Registry) -> SchedulerResult<Self> {
        config.validate()?;
        let ecache = config
            .enable_equivalence_cache
            .then(|| Arc::new(EquivalenceCache::new()));
        Ok(Self {
            client,
            cache: Arc::new(ClusterCache::new(config.assumed_pod_ttl())),
            ecache,
            listers: Listers::new(),
            queue: Arc::new(SchedulingQueue::new()),
            backoff: Arc::new(PodBackoff::new(config.initial_backoff(), config.max_backoff())),
            attempts: Arc::new(AttemptTracker::new()),
            registry,
            config,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ClusterCache> {
        &self.cache
    }

    pub fn equivalence_cache(&self) -> Option<&Arc<PredicateCache>> {
        self.ecache.as_ref()
    }

    pub fn queue(&self) -> &Arc<SchedulingQueue> {
        &self.queue
    }

    pub fn attempts(&self) -> &Arc<AttemptTracker> {
        &self.attempts
    }

    fn invalidator(&self) -> Invalidator {
        Invalidator::new(self.ecache.clone())
    }

    /// Resolve plugins and extenders into a scheduler bound to `shutdown`.
    pub fn create(&self, shutdown: watch::Receiver<bool>) -> SchedulerResult<Scheduler<C>> {
        let args = PluginArgs {
            listers: Arc::clone(&self.listers),
            hard_pod_affinity_symmetric_weight: self.config.hard_pod_affinity_symmetric_weight,
            failure_domains: self.config.failure_domains.clone(),
            service_affinity_labels: self.config.service_affinity_labels.clone(),
        };

        let provider = self.registry.provider(&self.config.algorithm_provider)?;
        let predicate_keys = self
            .config
            .predicate_keys
            .clone()
            .unwrap_or_else(|| provider.predicate_keys.clone());
        let priority_keys = self.config.priority_keys_for(&provider.priority_keys);

        let predicates = self.registry.build_predicates(&predicate_keys, &args)?;
        let priorities = self.registry.build_priorities(&priority_keys, &args)?;

        let mut extenders: Vec<Arc<dyn SchedulerExtender>> = Vec::new();
        for ext in &self.config.extenders {
            extenders.push(Arc::new(HttpExtender::new(ext.clone())?));
        }

        info!(
            provider = %provider.name,
            predicates = predicates.len(),
            priorities = priorities.len(),
            extenders = extenders.len(),
            equivalence_cache = self.ecache.is_some(),
            "scheduling algorithm configured"
        );

        let mut algorithm = GenericScheduler::new(
            Arc::clone(&self.cache),
            predicates,
            priorities,
            Arc::clone(&self.listers),
        )
        .with_extenders(extenders)
        .with_parallelism(self.config.parallelism);
        if let Some(ecache) = &self.ecache {
            algorithm = algorithm.with_equivalence_cache(Arc::clone(ecache));
        }

        let error_handler = ErrorHandler::new(
            Arc::clone(&self.client),
            Arc::clone(&self.queue),
            Arc::clone(&self.backoff),
            Arc::clone(&self.attempts),
            shutdown.clone(),
        );

        Ok(Scheduler {
            algorithm,
            client: Arc::clone(&self.client),
            cache: Arc::clone(&self.cache),
            invalidator: self.invalidator(),
            queue: Arc::clone(&self.queue),
            error_handler,
            attempts: Arc::clone(&self.attempts),
            bind_timeout: self.config.bind_timeout(),
            backoff_gc_interval: self.config.backoff_gc_interval(),
            shutdown,
        })
    }

    /// Start every reflector and the assumed-pod cleanup loop.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Informers {
        let mut informers = Informers::default();
        let inv = self.invalidator();
        let scheduler_name = self.config.scheduler_name.clone();

        self.spawn_reflector(
            &mut informers,
            "nodes",
            FieldSelector::Everything,
            Arc::new(NodeHandler {
                cache: Arc::clone(&self.cache),
                invalidator: inv.clone(),
            }),
            shutdown.clone(),
        );
        self.spawn_reflector(
            &mut informers,
            "assigned-pods",
            FieldSelector::AssignedPods,
            Arc::new(AssignedPodHandler {
                cache: Arc::clone(&self.cache),
                invalidator: inv.clone(),
                queue: Arc::clone(&self.queue),
            }),
            shutdown.clone(),
        );
        self.spawn_reflector(
            &mut informers,
            "unscheduled-pods",
            FieldSelector::UnscheduledPods { scheduler_name },
            Arc::new(UnscheduledPodHandler {
                queue: Arc::clone(&self.queue),
                backoff: Arc::clone(&self.backoff),
                attempts: Arc::clone(&self.attempts),
            }),
            shutdown.clone(),
        );
        self.spawn_reflector(
            &mut informers,
            "persistent-volumes",
            FieldSelector::Everything,
            Arc::new(PersistentVolumeHandler {
                listers: Arc::clone(&self.listers),
                invalidator: inv.clone(),
            }),
            shutdown.clone(),
        );
        self.spawn_reflector(
            &mut informers,
            "persistent-volume-claims",
            FieldSelector::Everything,
            Arc::new(PersistentVolumeClaimHandler {
                listers: Arc::clone(&self.listers),
                invalidator: inv.clone(),
            }),
            shutdown.clone(),
        );
        self.spawn_reflector(
            &mut informers,
            "services",
            FieldSelector::Everything,
            Arc::new(ServiceHandler {
                listers: Arc::clone(&self.listers),
                invalidator: inv.clone(),
            }),
            shutdown.clone(),
        );
        self.spawn_reflector(
            &mut informers,
            "replication-controllers",
            FieldSelector::Everything,
            Arc::new(ReplicationControllerHandler {
                listers: Arc::clone(&self.listers),
            }),
            shutdown.clone(),
        );
        self.spawn_reflector(
            &mut informers,
            "replica-sets",
            FieldSelector::Everything,
            Arc::new(ReplicaSetHandler {
                listers: Arc::clone(&self.listers),
            }),
            shutdown.clone(),
        );

        let cache = Arc::clone(&self.cache);
        let interval = self.config.cleanup_interval();
        let cleanup = tokio::spawn(cleanup_assumed_pods(cache, inv, interval, shutdown));
        informers.handles.push(("assumed-pod-cleanup", cleanup));

        debug!(tasks = informers.handles.len(), "informers started");
        informers
    }

    fn spawn_reflector<T>(
        &self,
        informers: &mut Informers,
        name: &'static str,
        selector: FieldSelector,
        handler: Arc<dyn EventHandler<T>>,
        shutdown: watch::Receiver<bool>,
    ) where
        T: Selectable,
        C: ResourceClient<T>,
    {
        let reflector = Reflector::new(
            name,
            Arc::clone(&self.client),
            selector,
            handler,
            self.config.resync_interval(),
        );
        informers.synced.push((name, reflector.synced()));
        informers.handles.push((name, tokio::spawn(reflector.run(shutdown))));
    }

    /// Run the event wiring until `shutdown` flips, then stop within the grace period.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> SchedulerResult<()> {
        let informers = self.start(shutdown.clone());
        // An error means the sender is gone, which is a stop as well.
        let _ = shutdown.wait_for(|stop| *stop).await;
        informers.join(self.config.shutdown_grace()).await
    }
}

/// Handles to the background tasks started by [`ConfigFactory::start`].
#[derive(Default)]
pub struct Informers {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    synced: Vec<(&'static str, watch::Receiver<bool>)>,
}

impl Informers {
    /// Wait until every reflector has listed once. `false` if stopped first.
    pub async fn wait_for_cache_sync(&mut self, shutdown: &mut watch::Receiver<bool>) -> bool {
        for (name, synced) in &mut self.synced {
            tokio::select! {
                result = synced.wait_for(|s| *s) => {
                    if result.is_err() {
                        warn!(informer = *name, "informer exited before syncing");
                        return false;
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => return false,
            }
        }
        info!(informers = self.synced.len(), "caches synced");
        true
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Await every task; tasks still running after `grace` are aborted.
    pub async fn join(self, grace: Duration) -> SchedulerResult<()> {
        let deadline = tokio::time::Instant::now() + grace;
        let mut stuck = Vec::new();
        for (name, mut handle) in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(SchedulerError::Task(format!("{name}: {e}"))),
                Err(_) => {
                    handle.abort();
                    stuck.push(name);
                }
            }
        }
        if stuck.is_empty() {
            debug!("informers stopped");
            Ok(())
        } else {
            Err(SchedulerError::Task(format!(
                "did not stop within {}ms: {}",
                grace.as_millis(),
                stuck.join(", ")
            )))
        }
    }
}

/// Expire assumed pods whose confirmation never arrived.
async fn cleanup_assumed_pods(
    cache: Arc<ClusterCache>,
    invalidator: Invalidator,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                for pod in cache.cleanup_expired(Instant::now()) {
                    invalidator.pod_added_or_deleted(&pod.spec.node_name);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
