//! Cluster cache: the in-memory mirror of what is bound where.
//!
//! ```text
//!   assume_pod ──► Assumed ──finish_binding──► Assumed(deadline)
//!                    │                              │
//!                 forget_pod                 add_pod │ cleanup_expired
//!                    ▼                              ▼
//!                 (gone)        Confirmed ◄─────────┘──► (gone)
//! ```
//!
//! Every known pod is recorded in exactly one `NodeInfo`. All state sits
//! behind one lock so totals stay consistent; readers get clones.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

use podgrid_types::{Node, Pod};

use crate::error::{CacheError, CacheResult};
use crate::node_info::NodeInfo;

/// Node name → cloned `NodeInfo`, as handed to the algorithm.
pub type NodeInfoMap = HashMap<String, NodeInfo>;

#[derive(Debug)]
struct PodState {
    pod: Arc<Pod>,
    /// Set by `finish_binding`; expiry only applies once binding finished.
    deadline: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: HashMap<String, NodeInfo>,
    pod_states: HashMap<String, PodState>,
    assumed: HashSet<String>,
}

impl Inner {
    fn add_to_node(&mut self, pod: Arc<Pod>) {
        self.nodes
            .entry(pod.spec.node_name.clone())
            .or_default()
            .add_pod(pod);
    }

    fn remove_from_node(&mut self, node: &str, key: &str) -> CacheResult<()> {
        let info = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| CacheError::PodNotFound(key.to_string()))?;
        info.remove_pod(key)?;
        if info.is_empty() {
            self.nodes.remove(node);
        }
        Ok(())
    }

    /// Replace a cached pod with a newer copy, moving it if the node changed.
    /// Returns the node it was recorded on.
    fn replace(&mut self, pod: &Pod) -> CacheResult<String> {
        let key = pod.key();
        let cached_node = self
            .pod_states
            .get(&key)
            .map(|s| s.pod.spec.node_name.clone())
            .ok_or_else(|| CacheError::PodNotFound(key.clone()))?;
        self.remove_from_node(&cached_node, &key)?;
        let pod = Arc::new(pod.clone());
        self.add_to_node(Arc::clone(&pod));
        self.pod_states.insert(key, PodState { pod, deadline: None });
        Ok(cached_node)
    }

    fn add_pod(&mut self, pod: &Pod) -> CacheResult<Option<String>> {
        let key = pod.key();
        if !self.pod_states.contains_key(&key) {
            self.insert_confirmed(pod);
            return Ok(None);
        }
        if self.assumed.remove(&key) {
            let assumed_node = self
                .pod_states
                .get(&key)
                .map(|s| s.pod.spec.node_name.as_str())
                .unwrap_or_default();
            if assumed_node != pod.spec.node_name {
                warn!(
                    pod = %key,
                    assumed = %assumed_node,
                    actual = %pod.spec.node_name,
                    "pod bound to a different node than assumed"
                );
            }
        } else {
            debug!(pod = %key, "duplicate add for confirmed pod");
        }
        self.replace(pod).map(Some)
    }

    fn insert_confirmed(&mut self, pod: &Pod) {
        let pod = Arc::new(pod.clone());
        self.add_to_node(Arc::clone(&pod));
        self.pod_states.insert(pod.key(), PodState { pod, deadline: None });
    }
}

/// The authoritative node → pods mirror, including assumed pods.
#[derive(Debug)]
pub struct ClusterCache {
    ttl: Duration,
    inner: RwLock<Inner>,
}

impl ClusterCache {
    /// `ttl` bounds how long an assumed pod may wait for confirmation after binding.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(Inner::default()),
        }
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Record or refresh a node object. Pods already cached under the name
    /// (observed before their node) are kept.
    pub fn add_node(&self, node: &Node) {
        let mut inner = self.inner.write();
        inner
            .nodes
            .entry(node.name().to_string())
            .or_default()
            .set_node(node.clone());
    }

    /// Same as [`ClusterCache::add_node`] with the new object; pod totals are untouched.
    pub fn update_node(&self, _old: &Node, new: &Node) {
        self.add_node(new);
    }

    /// Drop the node and every pod recorded under it. Returns the dropped pods.
    ///
    /// Unknown names are a no-op.
    pub fn remove_node(&self, name: &str) -> Vec<Arc<Pod>> {
        let mut inner = self.inner.write();
        let Some(info) = inner.nodes.remove(name) else {
            return Vec::new();
        };
        let pods = info.pods().to_vec();
        for pod in &pods {
            let key = pod.key();
            inner.pod_states.remove(&key);
            inner.assumed.remove(&key);
        }
        debug!(node = %name, pods = pods.len(), "node removed from cache");
        pods
    }

    // ── Assumed pods ───────────────────────────────────────────────

    /// Optimistically record `pod` on `pod.spec.node_name`.
    pub fn assume_pod(&self, pod: &Pod) -> CacheResult<()> {
        let key = pod.key();
        if !pod.is_assigned() {
            return Err(CacheError::MissingNodeName(key));
        }
        let mut inner = self.inner.write();
        if inner.pod_states.contains_key(&key) {
            return Err(CacheError::PodAlreadyKnown(key));
        }
        inner.insert_confirmed(pod);
        inner.assumed.insert(key);
        Ok(())
    }

    /// Start the expiry deadline of an assumed pod whose bind call returned.
    pub fn finish_binding(&self, pod: &Pod, now: Instant) -> CacheResult<()> {
        let key = pod.key();
        let mut inner = self.inner.write();
        if !inner.assumed.contains(&key) {
            return Err(CacheError::PodNotAssumed(key));
        }
        if let Some(state) = inner.pod_states.get_mut(&key) {
            state.deadline = Some(now + self.ttl);
        }
        Ok(())
    }

    /// Roll back an assumption (bind failed).
    pub fn forget_pod(&self, pod: &Pod) -> CacheResult<()> {
        let key = pod.key();
        let mut inner = self.inner.write();
        let cached_node = inner
            .pod_states
            .get(&key)
            .map(|s| s.pod.spec.node_name.clone())
            .ok_or_else(|| CacheError::PodNotFound(key.clone()))?;
        if cached_node != pod.spec.node_name {
            return Err(CacheError::NodeMismatch {
                pod: key,
                cached: cached_node,
                requested: pod.spec.node_name.clone(),
            });
        }
        if !inner.assumed.contains(&key) {
            return Err(CacheError::PodNotAssumed(key));
        }
        inner.remove_from_node(&cached_node, &key)?;
        inner.pod_states.remove(&key);
        inner.assumed.remove(&key);
        Ok(())
    }

    // ── Confirmed pod events ───────────────────────────────────────

    /// Record a pod the state store reports as bound.
    ///
    /// Confirms an assumed pod instead of counting it twice; moves it if it
    /// landed on a different node than assumed. A repeated add replaces the
    /// cached copy. Returns the node the pod was recorded on before, if it
    /// was already cached.
    pub fn add_pod(&self, pod: &Pod) -> CacheResult<Option<String>> {
        if !pod.is_assigned() {
            return Err(CacheError::MissingNodeName(pod.key()));
        }
        self.inner.write().add_pod(pod)
    }

    /// Replace a confirmed pod with its newer copy. An unknown or still
    /// assumed pod is treated as an add. Returns the previously cached node.
    pub fn update_pod(&self, _old: &Pod, new: &Pod) -> CacheResult<Option<String>> {
        let key = new.key();
        if !new.is_assigned() {
            return Err(CacheError::MissingNodeName(key));
        }
        let mut inner = self.inner.write();
        if inner.pod_states.contains_key(&key) && !inner.assumed.contains(&key) {
            inner.replace(new).map(Some)
        } else {
            inner.add_pod(new)
        }
    }

    /// Remove the pod from the node the cache recorded it on. Unknown pods are a no-op.
    pub fn remove_pod(&self, pod: &Pod) -> CacheResult<()> {
        let key = pod.key();
        let mut inner = self.inner.write();
        let Some(state) = inner.pod_states.remove(&key) else {
            return Ok(());
        };
        inner.assumed.remove(&key);
        let cached_node = state.pod.spec.node_name.clone();
        if cached_node != pod.spec.node_name && pod.is_assigned() {
            warn!(pod = %key, cached = %cached_node, reported = %pod.spec.node_name, "pod removed from a different node than cached");
        }
        inner.remove_from_node(&cached_node, &key)
    }

    /// Drop assumed pods whose deadline passed. Returns the expired pods.
    pub fn cleanup_expired(&self, now: Instant) -> Vec<Arc<Pod>> {
        let mut inner = self.inner.write();
        let expired: Vec<(String, Arc<Pod>)> = inner
            .assumed
            .iter()
            .filter_map(|key| {
                let state = inner.pod_states.get(key)?;
                match state.deadline {
                    Some(deadline) if deadline <= now => Some((key.clone(), Arc::clone(&state.pod))),
                    _ => None,
                }
            })
            .collect();

        for (key, pod) in &expired {
            warn!(pod = %key, node = %pod.spec.node_name, "assumed pod expired without confirmation");
            inner.assumed.remove(key);
            inner.pod_states.remove(key);
            // Absent only if the node was removed in between.
            let _ = inner.remove_from_node(&pod.spec.node_name, key);
        }
        expired.into_iter().map(|(_, pod)| pod).collect()
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Nodes with a known object for which `predicate` holds.
    pub fn list_nodes(&self, predicate: impl Fn(&Node) -> bool) -> Vec<Node> {
        let inner = self.inner.read();
        let mut nodes: Vec<Node> = inner
            .nodes
            .values()
            .filter_map(|info| info.node())
            .filter(|node| predicate(node))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.name().cmp(b.name()));
        nodes
    }

    /// Clone every `NodeInfo`.
    pub fn snapshot(&self) -> NodeInfoMap {
        self.inner.read().nodes.clone()
    }

    /// Clone of one node's aggregate, including assumed pods.
    pub fn node_info(&self, name: &str) -> Option<NodeInfo> {
        self.inner.read().nodes.get(name).cloned()
    }

    /// The cached copy of a pod, assumed or confirmed, by `namespace/name`.
    pub fn get_pod(&self, key: &str) -> Option<Arc<Pod>> {
        self.inner.read().pod_states.get(key).map(|s| Arc::clone(&s.pod))
    }

    /// Whether the pod is cached but its binding has not been observed yet.
    pub fn is_assumed(&self, key: &str) -> bool {
        self.inner.read().assumed.contains(key)
    }

    pub fn pod_count(&self) -> usize {
        self.inner.read().pod_states.len()
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().nodes.values().filter(|i| i.node().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podgrid_types::Resource;

    fn cache() -> ClusterCache {
        ClusterCache::new(Duration::from_secs(30))
    }

    fn node(name: &str) -> Node {
        Node::new(name, Resource::new(4000, 8 << 30))
    }

    fn pod(name: &str, node: &str, cpu: u64) -> Pod {
        Pod::new("default", name).with_container(cpu, 1 << 30).with_node_name(node)
    }

    fn requested_matches_pods(info: &NodeInfo) -> bool {
        let mut sum = Resource::default();
        for p in info.pods() {
            sum.add(&p.resource_request());
        }
        sum.milli_cpu == info.requested().milli_cpu && sum.memory == info.requested().memory
    }

    #[test]
    fn assume_then_confirm_counts_once() {
        let cache = cache();
        cache.add_node(&node("n1"));
        let p = pod("a", "n1", 1000);

        cache.assume_pod(&p).unwrap();
        cache.finish_binding(&p, Instant::now()).unwrap();
        cache.add_pod(&p).unwrap();
        cache.add_pod(&p).unwrap();

        let info = cache.node_info("n1").unwrap();
        assert_eq!(info.pods().len(), 1);
        assert_eq!(info.requested().milli_cpu, 1000);
        assert!(!cache.is_assumed("default/a"));
    }

    #[test]
    fn assume_requires_node_and_rejects_known() {
        let cache = cache();
        let unbound = Pod::new("default", "x");
        assert!(matches!(cache.assume_pod(&unbound), Err(CacheError::MissingNodeName(_))));

        let p = pod("a", "n1", 100);
        cache.assume_pod(&p).unwrap();
        assert!(matches!(cache.assume_pod(&p), Err(CacheError::PodAlreadyKnown(_))));
    }

    #[test]
    fn forget_rolls_back_assumption() {
        let cache = cache();
        cache.add_node(&node("n1"));
        let p = pod("a", "n1", 1000);
        cache.assume_pod(&p).unwrap();
        cache.forget_pod(&p).unwrap();

        let info = cache.node_info("n1").unwrap();
        assert!(info.pods().is_empty());
        assert_eq!(info.requested().milli_cpu, 0);
        assert_eq!(cache.pod_count(), 0);
    }

    #[test]
    fn forget_confirmed_pod_is_rejected() {
        let cache = cache();
        let p = pod("a", "n1", 100);
        cache.add_pod(&p).unwrap();
        assert!(matches!(cache.forget_pod(&p), Err(CacheError::PodNotAssumed(_))));
    }

    #[test]
    fn confirmed_on_other_node_moves_pod() {
        let cache = cache();
        cache.add_node(&node("n1"));
        cache.add_node(&node("n2"));
        cache.assume_pod(&pod("a", "n1", 500)).unwrap();
        let previous = cache.add_pod(&pod("a", "n2", 500)).unwrap();
        assert_eq!(previous.as_deref(), Some("n1"));

        assert!(cache.node_info("n1").unwrap().pods().is_empty());
        assert_eq!(cache.node_info("n2").unwrap().requested().milli_cpu, 500);
    }

    #[test]
    fn expired_assumptions_are_dropped() {
        let cache = ClusterCache::new(Duration::from_secs(1));
        cache.add_node(&node("n1"));
        let p = pod("a", "n1", 500);
        let start = Instant::now();
        cache.assume_pod(&p).unwrap();

        // Not expiring before binding finished.
        assert!(cache.cleanup_expired(start + Duration::from_secs(10)).is_empty());

        cache.finish_binding(&p, start).unwrap();
        assert!(cache.cleanup_expired(start).is_empty());
        let expired = cache.cleanup_expired(start + Duration::from_secs(2));
        assert_eq!(expired.len(), 1);
        assert_eq!(cache.node_info("n1").unwrap().requested().milli_cpu, 0);
    }

    #[test]
    fn remove_is_idempotent() {
        let cache = cache();
        cache.add_node(&node("n1"));
        let p = pod("a", "n1", 500);
        cache.add_pod(&p).unwrap();

        cache.remove_pod(&p).unwrap();
        cache.remove_pod(&p).unwrap();
        assert_eq!(cache.pod_count(), 0);

        cache.remove_node("n1");
        assert!(cache.remove_node("n1").is_empty());
        assert_eq!(cache.node_count(), 0);
    }

    #[test]
    fn remove_node_drops_its_pods() {
        let cache = cache();
        cache.add_node(&node("n1"));
        let p = pod("a", "n1", 500);
        cache.assume_pod(&p).unwrap();

        let dropped = cache.remove_node("n1");
        assert_eq!(dropped.len(), 1);
        assert!(cache.get_pod("default/a").is_none());
        assert!(!cache.is_assumed("default/a"));
        assert!(cache.snapshot().values().all(|i| !i.contains("default/a")));
    }

    #[test]
    fn update_replaces_request() {
        let cache = cache();
        let old = pod("a", "n1", 500);
        cache.add_pod(&old).unwrap();
        let new = pod("a", "n1", 1500);
        assert_eq!(cache.update_pod(&old, &new).unwrap().as_deref(), Some("n1"));

        let info = cache.node_info("n1").unwrap();
        assert_eq!(info.requested().milli_cpu, 1500);
        assert!(requested_matches_pods(&info));
    }

    #[test]
    fn update_of_unknown_pod_adds_it() {
        let cache = cache();
        let p = pod("a", "n1", 700);
        assert_eq!(cache.update_pod(&p, &p).unwrap(), None);
        assert_eq!(cache.node_info("n1").unwrap().requested().milli_cpu, 700);

        let moved = pod("a", "n2", 700);
        assert_eq!(cache.update_pod(&p, &moved).unwrap().as_deref(), Some("n1"));
        assert!(cache.node_info("n1").is_none());
        assert!(matches!(
            cache.update_pod(&moved, &Pod::new("default", "a")),
            Err(CacheError::MissingNodeName(_))
        ));
    }

    #[test]
    fn out_of_order_events_keep_totals_consistent() {
        let cache = cache();
        let a = pod("a", "n1", 100);
        let b = pod("b", "n1", 200);

        // Pods before their node, duplicate adds, deletes of unknown pods.
        cache.remove_pod(&b).unwrap();
        cache.add_pod(&a).unwrap();
        cache.add_pod(&b).unwrap();
        cache.update_pod(&a, &pod("a", "n1", 300)).unwrap();
        cache.add_pod(&b).unwrap();
        cache.add_node(&node("n1"));
        cache.remove_pod(&a).unwrap();

        let info = cache.node_info("n1").unwrap();
        assert_eq!(info.pods().len(), 1);
        assert_eq!(info.requested().milli_cpu, 200);
        assert!(requested_matches_pods(&info));
    }

    #[test]
    fn list_nodes_filters_and_skips_placeholders() {
        let cache = cache();
        let mut cordoned = node("n2");
        cordoned.spec.unschedulable = true;
        cache.add_node(&node("n1"));
        cache.add_node(&cordoned);
        cache.add_pod(&pod("a", "n3", 100)).unwrap();

        let names: Vec<String> = cache
            .list_nodes(|n| n.is_schedulable())
            .into_iter()
            .map(|n| n.meta.name)
            .collect();
        assert_eq!(names, vec!["n1".to_string()]);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let cache = cache();
        cache.add_node(&node("n1"));
        let snap = cache.snapshot();
        cache.add_pod(&pod("a", "n1", 100)).unwrap();
        assert!(snap["n1"].pods().is_empty());
    }
}
