//! Per-kind event handlers: cache mutation first, then invalidation.
//!
//! Mutating before invalidating pairs with the generation token taken by
//! the algorithm before it snapshots: an evaluation that read the old
//! NodeInfo always holds a token the invalidation has already bumped.

use std::sync::Arc;

use tracing::{debug, trace};

use podgrid_algorithm::PredicateCache;
use podgrid_cache::invalidation::{node_changes, persistent_volume_changes, pod_changes, service_changed};
use podgrid_cache::{ChangeKind, ClusterCache, Invalidation, Listers};
use podgrid_types::{
    KubeObject, Node, PersistentVolume, PersistentVolumeClaim, Pod, ReplicaSet, ReplicationController, Service,
};

use crate::backoff::{AttemptTracker, PodBackoff};
use crate::error::{HandlerError, HandlerResult};
use crate::queue::SchedulingQueue;
use crate::reflector::EventHandler;

/// Optional equivalence cache plus the invalidation entry points handlers use.
#[derive(Clone, Default)]
pub struct Invalidator {
    ecache: Option<Arc<PredicateCache>>,
}

impl Invalidator {
    /// `None` turns every call into a no-op.
    pub fn new(ecache: Option<Arc<PredicateCache>>) -> Self {
        Self { ecache }
    }

    /// Resolve `changes` against the invalidation table. Node-scoped rules
    /// need `node`; without it only cluster-wide rules apply.
    pub fn changes(&self, changes: &[ChangeKind], node: Option<&str>) {
        if let Some(ecache) = &self.ecache {
            Invalidation::for_changes(changes).apply(ecache, node);
        }
    }

    /// Drop every verdict for `node`.
    pub fn node(&self, node: &str) {
        if let Some(ecache) = &self.ecache {
            ecache.invalidate_all_for_node(node);
        }
    }

    /// A pod appeared on or left `node`.
    pub fn pod_added_or_deleted(&self, node: &str) {
        self.changes(&[ChangeKind::PodAddedOrDeleted], Some(node));
    }
}

/// Nodes: the node set of the cluster cache.
pub struct NodeHandler {
    pub cache: Arc<ClusterCache>,
    pub invalidator: Invalidator,
}

impl EventHandler<Node> for NodeHandler {
    fn on_add(&self, node: &Node) -> HandlerResult {
        self.cache.add_node(node);
        self.invalidator.node(node.name());
        debug!(node = %node.name(), "node added");
        Ok(())
    }

    fn on_update(&self, old: &Node, new: &Node) -> HandlerResult {
        let changes = node_changes(old, new);
        self.cache.update_node(old, new);
        if !changes.is_empty() {
            trace!(node = %new.name(), ?changes, "node changed");
            self.invalidator.changes(&changes, Some(new.name()));
        }
        Ok(())
    }

    fn on_delete(&self, node: &Node) -> HandlerResult {
        let dropped = self.cache.remove_node(node.name());
        self.invalidator.node(node.name());
        // Losing those pods matters to predicates that look across nodes.
        if !dropped.is_empty() {
            self.invalidator.changes(&[ChangeKind::PodAddedOrDeleted], None);
        }
        debug!(node = %node.name(), pods = dropped.len(), "node deleted");
        Ok(())
    }
}

/// Pods with a node name: the confirmed side of the cache.
pub struct AssignedPodHandler {
    pub cache: Arc<ClusterCache>,
    pub invalidator: Invalidator,
    pub queue: Arc<SchedulingQueue>,
}

impl AssignedPodHandler {
    /// The cache moved the pod off `previous`; that node lost it.
    fn left_node(&self, previous: Option<String>, pod: &Pod) -> bool {
        match previous {
            Some(node) if node != pod.spec.node_name => {
                self.invalidator.pod_added_or_deleted(&node);
                true
            }
            _ => false,
        }
    }
}

impl EventHandler<Pod> for AssignedPodHandler {
    fn on_add(&self, pod: &Pod) -> HandlerResult {
        let previous = self.cache.add_pod(pod)?;
        self.left_node(previous, pod);
        self.invalidator.pod_added_or_deleted(&pod.spec.node_name);
        self.queue.delete(&pod.key());
        Ok(())
    }

    fn on_update(&self, old: &Pod, new: &Pod) -> HandlerResult {
        // The cache decides where the pod was; the event's old copy may disagree.
        let previous = self.cache.update_pod(old, new)?;
        let newly_cached = previous.is_none();
        if self.left_node(previous, new) || newly_cached {
            self.invalidator.pod_added_or_deleted(&new.spec.node_name);
            return Ok(());
        }
        let changes = pod_changes(old, new);
        if !changes.is_empty() {
            self.invalidator.changes(&changes, Some(&new.spec.node_name));
        }
        Ok(())
    }

    fn on_delete(&self, pod: &Pod) -> HandlerResult {
        // Where the cache had it, which may differ from what the event says.
        let node = self
            .cache
            .get_pod(&pod.key())
            .map(|p| p.spec.node_name.clone())
            .unwrap_or_else(|| pod.spec.node_name.clone());
        self.cache.remove_pod(pod)?;
        if !node.is_empty() {
            self.invalidator.pod_added_or_deleted(&node);
        }
        Ok(())
    }
}

/// Pods this instance should place: admission into the queue.
pub struct UnscheduledPodHandler {
    pub queue: Arc<SchedulingQueue>,
    pub backoff: Arc<PodBackoff>,
    pub attempts: Arc<AttemptTracker>,
}

impl EventHandler<Pod> for UnscheduledPodHandler {
    fn on_add(&self, pod: &Pod) -> HandlerResult {
        if pod.meta.deletion_timestamp.is_some() {
            return Err(HandlerError::Rejected {
                kind: "pod",
                key: pod.key(),
                reason: "being deleted".to_string(),
            });
        }
        self.queue.add(pod.clone());
        Ok(())
    }

    fn on_update(&self, _old: &Pod, new: &Pod) -> HandlerResult {
        if new.meta.deletion_timestamp.is_some() {
            self.queue.delete(&new.key());
            return Ok(());
        }
        // A pod waiting out its backoff stays out until the retry fires.
        self.queue.update(new.clone());
        Ok(())
    }

    fn on_delete(&self, pod: &Pod) -> HandlerResult {
        let key = pod.key();
        self.queue.delete(&key);
        // A pod that got bound leaves this watch carrying its node name; its
        // attempt state stays until the bound entries are pruned.
        if !pod.is_assigned() {
            self.backoff.forget(&key);
            self.attempts.forget(&key);
        }
        Ok(())
    }
}

/// Persistent volumes: lister store plus cluster-wide volume invalidation.
pub struct PersistentVolumeHandler {
    pub listers: Arc<Listers>,
    pub invalidator: Invalidator,
}

impl EventHandler<PersistentVolume> for PersistentVolumeHandler {
    fn on_add(&self, pv: &PersistentVolume) -> HandlerResult {
        self.listers.persistent_volumes.upsert(pv.clone());
        self.invalidator.changes(&persistent_volume_changes(pv), None);
        Ok(())
    }

    fn on_update(&self, old: &PersistentVolume, new: &PersistentVolume) -> HandlerResult {
        self.listers.persistent_volumes.upsert(new.clone());
        let mut changes = persistent_volume_changes(old);
        changes.extend(persistent_volume_changes(new));
        self.invalidator.changes(&changes, None);
        Ok(())
    }

    fn on_delete(&self, pv: &PersistentVolume) -> HandlerResult {
        self.listers.persistent_volumes.remove(&pv.key());
        self.invalidator.changes(&persistent_volume_changes(pv), None);
        Ok(())
    }
}

/// Claims: lister store plus cluster-wide volume invalidation.
pub struct PersistentVolumeClaimHandler {
    pub listers: Arc<Listers>,
    pub invalidator: Invalidator,
}

impl EventHandler<PersistentVolumeClaim> for PersistentVolumeClaimHandler {
    fn on_add(&self, pvc: &PersistentVolumeClaim) -> HandlerResult {
        self.listers.persistent_volume_claims.upsert(pvc.clone());
        self.invalidator.changes(&[ChangeKind::PersistentVolumeClaim], None);
        Ok(())
    }

    fn on_update(&self, _old: &PersistentVolumeClaim, new: &PersistentVolumeClaim) -> HandlerResult {
        self.on_add(new)
    }

    fn on_delete(&self, pvc: &PersistentVolumeClaim) -> HandlerResult {
        self.listers.persistent_volume_claims.remove(&pvc.key());
        self.invalidator.changes(&[ChangeKind::PersistentVolumeClaim], None);
        Ok(())
    }
}

/// Services: lister store; selector changes invalidate service affinity.
pub struct ServiceHandler {
    pub listers: Arc<Listers>,
    pub invalidator: Invalidator,
}

impl EventHandler<Service> for ServiceHandler {
    fn on_add(&self, svc: &Service) -> HandlerResult {
        self.listers.services.upsert(svc.clone());
        self.invalidator.changes(&[ChangeKind::Service], None);
        Ok(())
    }

    fn on_update(&self, old: &Service, new: &Service) -> HandlerResult {
        self.listers.services.upsert(new.clone());
        if service_changed(old, new) {
            self.invalidator.changes(&[ChangeKind::Service], None);
        }
        Ok(())
    }

    fn on_delete(&self, svc: &Service) -> HandlerResult {
        self.listers.services.remove(&svc.key());
        self.invalidator.changes(&[ChangeKind::Service], None);
        Ok(())
    }
}

/// Controllers only feed spreading, which is never cached.
pub struct ReplicationControllerHandler {
    pub listers: Arc<Listers>,
}

impl EventHandler<ReplicationController> for ReplicationControllerHandler {
    fn on_add(&self, rc: &ReplicationController) -> HandlerResult {
        self.listers.replication_controllers.upsert(rc.clone());
        Ok(())
    }

    fn on_update(&self, _old: &ReplicationController, new: &ReplicationController) -> HandlerResult {
        self.on_add(new)
    }

    fn on_delete(&self, rc: &ReplicationController) -> HandlerResult {
        self.listers.replication_controllers.remove(&rc.key());
        Ok(())
    }
}

/// Replica sets: lister store only, like replication controllers.
pub struct ReplicaSetHandler {
    pub listers: Arc<Listers>,
}

impl EventHandler<ReplicaSet> for ReplicaSetHandler {
    fn on_add(&self, rs: &ReplicaSet) -> HandlerResult {
        self.listers.replica_sets.upsert(rs.clone());
        Ok(())
    }

    fn on_update(&self, _old: &ReplicaSet, new: &ReplicaSet) -> HandlerResult {
        self.on_add(new)
    }

    fn on_delete(&self, rs: &ReplicaSet) -> HandlerResult {
        self.listers.replica_sets.remove(&rs.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podgrid_algorithm::predicates::MaxVolumeCount;
    use podgrid_algorithm::{FitPredicate, PluginArgs, PredicateFailureReason, PredicateMetadata, PredicateRef, Registry};
    use podgrid_cache::invalidation::names;
    use podgrid_cache::{EquivalenceCache, Verdict, equivalence_hash};
    use crate::backoff::AttemptState;
    use podgrid_types::{CloudVolumeKind, Resource, Volume, VolumeSource};
    use std::time::Duration;

    fn fixture() -> (Arc<ClusterCache>, Arc<PredicateCache>, Invalidator) {
        let cache = Arc::new(ClusterCache::new(Duration::from_secs(30)));
        let ecache = Arc::new(EquivalenceCache::new());
        let inv = Invalidator::new(Some(Arc::clone(&ecache)));
        (cache, ecache, inv)
    }

    fn fits() -> Verdict<PredicateFailureReason> {
        Verdict {
            fit: true,
            reasons: Vec::new(),
        }
    }

    fn node(name: &str) -> Node {
        Node::new(name, Resource::new(4000, 8 << 30))
    }

    #[test]
    fn node_label_change_drops_selector_verdicts() {
        let (cache, ecache, inv) = fixture();
        let h = NodeHandler {
            cache: Arc::clone(&cache),
            invalidator: inv,
        };
        let old = node("n1");
        h.on_add(&old).unwrap();
        ecache.store("n1", names::MATCH_NODE_SELECTOR, 7, fits());
        ecache.store("n1", names::POD_TOLERATES_NODE_TAINTS, 7, fits());

        let new = old.clone().with_label("disk", "ssd");
        h.on_update(&old, &new).unwrap();
        assert!(ecache.lookup("n1", names::MATCH_NODE_SELECTOR, 7).is_none());
        assert!(ecache.lookup("n1", names::POD_TOLERATES_NODE_TAINTS, 7).is_some());
        assert_eq!(cache.node_info("n1").unwrap().node().unwrap().meta.labels["disk"], "ssd");
    }

    #[test]
    fn node_delete_clears_everything_for_node() {
        let (cache, ecache, inv) = fixture();
        let h = NodeHandler {
            cache: Arc::clone(&cache),
            invalidator: inv,
        };
        h.on_add(&node("n1")).unwrap();
        cache.add_pod(&Pod::new("default", "p").with_node_name("n1")).unwrap();
        ecache.store("n1", names::CHECK_NODE_CONDITION, 1, fits());

        h.on_delete(&node("n1")).unwrap();
        h.on_delete(&node("n1")).unwrap();
        assert!(!ecache.contains_node("n1"));
        assert_eq!(cache.pod_count(), 0);
    }

    #[test]
    fn assigned_pod_events_keep_cache_and_queue_consistent() {
        let (cache, ecache, inv) = fixture();
        let queue = Arc::new(SchedulingQueue::new());
        let h = AssignedPodHandler {
            cache: Arc::clone(&cache),
            invalidator: inv,
            queue: Arc::clone(&queue),
        };
        cache.add_node(&node("n1"));
        queue.add(Pod::new("default", "p"));
        ecache.store("n1", names::GENERAL_PREDICATES, 3, fits());

        let bound = Pod::new("default", "p").with_container(500, 1 << 20).with_node_name("n1");
        h.on_add(&bound).unwrap();
        assert!(!queue.contains("default/p"));
        assert!(ecache.lookup("n1", names::GENERAL_PREDICATES, 3).is_none());
        assert_eq!(cache.node_info("n1").unwrap().requested().milli_cpu, 500);

        // Duplicate delivery does not double count.
        h.on_add(&bound).unwrap();
        assert_eq!(cache.node_info("n1").unwrap().requested().milli_cpu, 500);

        h.on_delete(&bound).unwrap();
        h.on_delete(&bound).unwrap();
        assert_eq!(cache.node_info("n1").unwrap().requested().milli_cpu, 0);
    }

    #[test]
    fn unscheduled_pods_enter_and_leave_the_queue() {
        let queue = Arc::new(SchedulingQueue::new());
        let backoff = Arc::new(PodBackoff::new(Duration::from_secs(1), Duration::from_secs(10)));
        let attempts = Arc::new(AttemptTracker::new());
        let h = UnscheduledPodHandler {
            queue: Arc::clone(&queue),
            backoff: Arc::clone(&backoff),
            attempts,
        };
        let pod = Pod::new("default", "p");
        h.on_add(&pod).unwrap();
        assert!(queue.contains("default/p"));

        backoff.next_delay("default/p", std::time::Instant::now());
        h.on_delete(&pod).unwrap();
        assert!(queue.is_empty());
        assert!(backoff.is_empty());

        let mut doomed = Pod::new("default", "q");
        doomed.meta.deletion_timestamp = Some(1);
        assert!(h.on_add(&doomed).is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn volume_and_service_events_update_listers_and_invalidate_everywhere() {
        let (_cache, ecache, inv) = fixture();
        let listers = Listers::new();
        ecache.store("n1", names::NO_VOLUME_ZONE_CONFLICT, 1, fits());
        ecache.store("n2", names::CHECK_SERVICE_AFFINITY, 1, fits());

        let pvc = PersistentVolumeClaimHandler {
            listers: Arc::clone(&listers),
            invalidator: inv.clone(),
        };
        let claim = PersistentVolumeClaim::new("default", "data", "pv-1");
        pvc.on_add(&claim).unwrap();
        assert!(listers.claim("default", "data").is_some());
        assert!(ecache.lookup("n1", names::NO_VOLUME_ZONE_CONFLICT, 1).is_none());

        let svc = ServiceHandler {
            listers: Arc::clone(&listers),
            invalidator: inv,
        };
        let s = Service::new("default", "web", [("app".to_string(), "web".to_string())].into());
        svc.on_add(&s).unwrap();
        assert_eq!(listers.services.len(), 1);
        assert!(ecache.lookup("n2", names::CHECK_SERVICE_AFFINITY, 1).is_none());
        svc.on_delete(&s).unwrap();
        assert!(listers.services.is_empty());
    }

    #[test]
    fn bound_pods_leaving_the_pending_watch_keep_their_attempt_state() {
        let backoff = Arc::new(PodBackoff::new(Duration::from_secs(1), Duration::from_secs(10)));
        let attempts = Arc::new(AttemptTracker::new());
        let h = UnscheduledPodHandler {
            queue: Arc::new(SchedulingQueue::new()),
            backoff,
            attempts: Arc::clone(&attempts),
        };
        attempts.set("default/bound", AttemptState::Bound);
        attempts.set("default/gone", AttemptState::Retrying);

        h.on_delete(&Pod::new("default", "bound").with_node_name("n1")).unwrap();
        h.on_delete(&Pod::new("default", "gone")).unwrap();
        assert_eq!(attempts.get("default/bound"), AttemptState::Bound);
        assert_eq!(attempts.get("default/gone"), AttemptState::Idle);
    }

    fn ebs(id: &str) -> Volume {
        Volume {
            name: id.to_string(),
            source: VolumeSource::AwsElasticBlockStore {
                volume_id: id.to_string(),
                read_only: false,
            },
        }
    }

    fn claim(name: &str) -> Volume {
        Volume {
            name: name.to_string(),
            source: VolumeSource::PersistentVolumeClaim {
                claim_name: name.to_string(),
                read_only: false,
            },
        }
    }

    fn nfs_volume(name: &str) -> PersistentVolume {
        PersistentVolume::new(
            name,
            VolumeSource::Nfs {
                server: "files".to_string(),
                path: format!("/export/{name}"),
            },
        )
    }

    /// Every handler wired to one cache, equivalence cache and predicate set.
    struct Cluster {
        cache: Arc<ClusterCache>,
        ecache: Arc<PredicateCache>,
        predicates: Vec<PredicateRef>,
        nodes: NodeHandler,
        pods: AssignedPodHandler,
        volumes: PersistentVolumeHandler,
        claims: PersistentVolumeClaimHandler,
        services: ServiceHandler,
    }

    impl Cluster {
        fn new() -> Self {
            let (cache, ecache, inv) = fixture();
            let listers = Listers::new();
            let all: Vec<&str> = [
                names::CHECK_NODE_CONDITION,
                names::GENERAL_PREDICATES,
                names::POD_FITS_HOST,
                names::POD_FITS_HOST_PORTS,
                names::MATCH_NODE_SELECTOR,
                names::POD_FITS_RESOURCES,
                names::NO_DISK_CONFLICT,
                names::POD_TOLERATES_NODE_TAINTS,
                names::CHECK_NODE_MEMORY_PRESSURE,
                names::CHECK_NODE_DISK_PRESSURE,
                names::NO_VOLUME_ZONE_CONFLICT,
                names::MAX_GCE_PD_VOLUME_COUNT,
                names::MAX_AZURE_DISK_VOLUME_COUNT,
                names::MATCH_INTER_POD_AFFINITY,
                names::CHECK_SERVICE_AFFINITY,
            ]
            .to_vec();
            let mut predicates = Registry::with_defaults()
                .build_predicates(all.as_slice(), &PluginArgs::new(Arc::clone(&listers)))
                .unwrap();
            // A limit of one makes single volumes decide the verdict.
            predicates.push(Arc::new(MaxVolumeCount::new(CloudVolumeKind::AwsEbs, 1, Arc::clone(&listers))));
            Self {
                nodes: NodeHandler {
                    cache: Arc::clone(&cache),
                    invalidator: inv.clone(),
                },
                pods: AssignedPodHandler {
                    cache: Arc::clone(&cache),
                    invalidator: inv.clone(),
                    queue: Arc::new(SchedulingQueue::new()),
                },
                volumes: PersistentVolumeHandler {
                    listers: Arc::clone(&listers),
                    invalidator: inv.clone(),
                },
                claims: PersistentVolumeClaimHandler {
                    listers: Arc::clone(&listers),
                    invalidator: inv.clone(),
                },
                services: ServiceHandler {
                    listers,
                    invalidator: inv,
                },
                cache,
                ecache,
                predicates,
            }
        }

        /// Evaluate every predicate for every pod on every node and cache it.
        fn fill(&self, pods: &[Pod]) {
            let snapshot = Arc::new(self.cache.snapshot());
            for pod in pods {
                let meta = PredicateMetadata::new(pod, Arc::clone(&snapshot));
                for (node, info) in snapshot.iter().filter(|(_, i)| i.node().is_some()) {
                    for predicate in &self.predicates {
                        let reasons = predicate.check(pod, &meta, info);
                        let verdict = Verdict {
                            fit: reasons.is_empty(),
                            reasons,
                        };
                        self.ecache.store(node, predicate.name(), meta.equivalence_hash, verdict);
                    }
                }
            }
        }

        /// Cache verdicts, apply `event`, then check nothing went stale.
        fn step(&self, pods: &[Pod], what: &str, event: impl FnOnce(&Self)) {
            self.fill(pods);
            event(self);
            self.assert_fresh(pods, what);
        }

        /// Every cached verdict still equals a direct evaluation.
        fn assert_fresh(&self, pods: &[Pod], after: &str) {
            let snapshot = Arc::new(self.cache.snapshot());
            for pod in pods {
                let meta = PredicateMetadata::new(pod, Arc::clone(&snapshot));
                for node in ["n1", "n2"] {
                    for predicate in &self.predicates {
                        let Some(cached) = self.ecache.lookup(node, predicate.name(), equivalence_hash(pod)) else {
                            continue;
                        };
                        let Some(info) = snapshot.get(node).filter(|i| i.node().is_some()) else {
                            panic!("{} kept a verdict for removed node {node} after {after}", predicate.name());
                        };
                        assert_eq!(
                            cached.reasons,
                            predicate.check(pod, &meta, info),
                            "stale {} verdict on {node} for {} after {after}",
                            predicate.name(),
                            pod.key()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn volume_of_any_type_refreshes_attach_limit_verdicts() {
        let c = Cluster::new();
        c.nodes.on_add(&node("n1")).unwrap();
        c.claims.on_add(&PersistentVolumeClaim::new("default", "data", "pv-1")).unwrap();
        c.pods
            .on_add(&Pod::new("default", "db").with_volume(ebs("vol-1")).with_node_name("n1"))
            .unwrap();

        // The claim does not resolve yet, so it counts against the EBS limit.
        let pod = Pod::new("default", "app").with_volume(claim("data"));
        c.fill(std::slice::from_ref(&pod));
        let hash = equivalence_hash(&pod);
        assert!(!c.ecache.lookup("n1", names::MAX_EBS_VOLUME_COUNT, hash).unwrap().fit);

        c.volumes.on_add(&nfs_volume("pv-1")).unwrap();
        assert!(c.ecache.lookup("n1", names::MAX_EBS_VOLUME_COUNT, hash).is_none());
        c.assert_fresh(&[pod], "nfs volume added");
    }

    #[test]
    fn confirmation_on_another_node_refreshes_the_assumed_node() {
        let c = Cluster::new();
        c.nodes.on_add(&node("n1")).unwrap();
        c.nodes.on_add(&node("n2")).unwrap();
        c.cache
            .assume_pod(&Pod::new("default", "p").with_container(3000, 0).with_node_name("n1"))
            .unwrap();

        let next = Pod::new("default", "q").with_container(2000, 0);
        c.fill(std::slice::from_ref(&next));
        let hash = equivalence_hash(&next);
        assert!(!c.ecache.lookup("n1", names::POD_FITS_RESOURCES, hash).unwrap().fit);

        c.pods
            .on_add(&Pod::new("default", "p").with_container(3000, 0).with_node_name("n2"))
            .unwrap();
        assert!(c.cache.node_info("n1").unwrap().pods().is_empty());
        assert!(c.ecache.lookup("n1", names::POD_FITS_RESOURCES, hash).is_none());
        c.assert_fresh(&[next], "pod confirmed on n2");
    }

    #[test]
    fn cached_verdicts_match_direct_evaluation_through_event_sequences() {
        let c = Cluster::new();
        let mut picky = Pod::new("default", "picky").with_container(500, 0);
        picky.spec.node_selector.insert("disk".to_string(), "ssd".to_string());
        let pods = vec![
            Pod::new("default", "plain"),
            Pod::new("default", "big").with_container(2500, 1 << 30),
            Pod::new("default", "claimer").with_volume(claim("data")),
            Pod::new("default", "disk").with_volume(ebs("vol-1")),
            Pod::new("default", "web").with_label("app", "web"),
            picky,
        ];

        c.step(&pods, "nodes added", |c| {
            c.nodes.on_add(&node("n1")).unwrap();
            c.nodes.on_add(&node("n2")).unwrap();
        });
        c.step(&pods, "claim added", |c| {
            c.claims.on_add(&PersistentVolumeClaim::new("default", "data", "pv-1")).unwrap();
        });
        c.step(&pods, "ebs pod bound", |c| {
            c.pods
                .on_add(&Pod::new("default", "db").with_volume(ebs("vol-2")).with_node_name("n1"))
                .unwrap();
        });
        c.step(&pods, "nfs volume added", |c| c.volumes.on_add(&nfs_volume("pv-1")).unwrap());
        c.step(&pods, "pod assumed", |c| {
            c.cache
                .assume_pod(&Pod::new("default", "moving").with_container(2000, 0).with_node_name("n1"))
                .unwrap();
            c.pods.invalidator.pod_added_or_deleted("n1");
        });
        c.step(&pods, "assumed pod confirmed elsewhere", |c| {
            c.pods
                .on_add(&Pod::new("default", "moving").with_container(2000, 0).with_node_name("n2"))
                .unwrap();
        });
        c.step(&pods, "node relabelled", |c| {
            let old = c.cache.node_info("n2").unwrap().node().unwrap().clone();
            c.nodes.on_update(&old, &old.clone().with_label("disk", "ssd")).unwrap();
        });
        c.step(&pods, "pod grew", |c| {
            let old = Pod::new("default", "moving").with_container(2000, 0).with_node_name("n2");
            let new = Pod::new("default", "moving").with_container(3500, 0).with_node_name("n2");
            c.pods.on_update(&old, &new).unwrap();
        });
        c.step(&pods, "service added", |c| {
            let svc = Service::new("default", "web", [("app".to_string(), "web".to_string())].into());
            c.services.on_add(&svc).unwrap();
        });
        c.step(&pods, "volume deleted", |c| c.volumes.on_delete(&nfs_volume("pv-1")).unwrap());
        c.step(&pods, "claim deleted", |c| {
            c.claims.on_delete(&PersistentVolumeClaim::new("default", "data", "pv-1")).unwrap();
        });
        c.step(&pods, "pod deleted", |c| {
            c.pods
                .on_delete(&Pod::new("default", "db").with_volume(ebs("vol-2")).with_node_name("n1"))
                .unwrap();
        });
        c.step(&pods, "node removed", |c| c.nodes.on_delete(&node("n1")).unwrap());
    }
}
