//! Equivalence cache: memoized predicate verdicts per pod shape.
//!
//! ```text
//! node ──► predicate ──► equivalence hash ──► Verdict { fit, reasons }
//! ```
//!
//! A missing entry is always safe; a present one must be correct. Every
//! invalidation bumps a generation (per node, or a global epoch for
//! cluster-wide invalidations). Writers capture a [`GenerationToken`]
//! before reading cluster state and store through [`EquivalenceCache::store_if_current`],
//! which refuses the write if any invalidation happened in between.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;
use tracing::trace;

use podgrid_types::{Affinity, ContainerPort, Labels, Pod, Resource, Toleration, Volume};

/// Hash of the pod fields predicates look at.
pub type EquivalenceHash = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict<R> {
    pub fit: bool,
    pub reasons: Vec<R>,
}

/// Snapshot of the generation counters relevant to one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationToken {
    epoch: u64,
    node_generation: u64,
}

#[derive(Debug)]
struct NodeEntry<R> {
    predicates: HashMap<String, HashMap<EquivalenceHash, Verdict<R>>>,
}

impl<R> Default for NodeEntry<R> {
    fn default() -> Self {
        Self {
            predicates: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct Inner<R> {
    epoch: u64,
    /// Never pruned, so a removed and re-added node cannot reuse an old generation.
    generations: HashMap<String, u64>,
    nodes: HashMap<String, NodeEntry<R>>,
}

impl<R> Inner<R> {
    fn bump(&mut self, node: &str) {
        *self.generations.entry(node.to_string()).or_insert(0) += 1;
    }

    fn token(&self, node: &str) -> GenerationToken {
        GenerationToken {
            epoch: self.epoch,
            node_generation: self.generations.get(node).copied().unwrap_or(0),
        }
    }
}

#[derive(Debug)]
pub struct EquivalenceCache<R> {
    inner: RwLock<Inner<R>>,
}

impl<R: Clone> Default for EquivalenceCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Clone> EquivalenceCache<R> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                epoch: 0,
                generations: HashMap::new(),
                nodes: HashMap::new(),
            }),
        }
    }

    pub fn lookup(&self, node: &str, predicate: &str, hash: EquivalenceHash) -> Option<Verdict<R>> {
        let inner = self.inner.read();
        inner
            .nodes
            .get(node)?
            .predicates
            .get(predicate)?
            .get(&hash)
            .cloned()
    }

    pub fn token(&self, node: &str) -> GenerationToken {
        self.inner.read().token(node)
    }

    /// Store unconditionally.
    pub fn store(&self, node: &str, predicate: &str, hash: EquivalenceHash, verdict: Verdict<R>) {
        let mut inner = self.inner.write();
        insert(&mut inner, node, predicate, hash, verdict);
    }

    /// Store only if nothing invalidated `node` since `token` was taken.
    pub fn store_if_current(
        &self,
        node: &str,
        predicate: &str,
        hash: EquivalenceHash,
        verdict: Verdict<R>,
        token: GenerationToken,
    ) -> bool {
        let mut inner = self.inner.write();
        if inner.token(node) != token {
            trace!(%node, %predicate, "dropping equivalence write with stale token");
            return false;
        }
        insert(&mut inner, node, predicate, hash, verdict);
        true
    }

    pub fn invalidate_predicate_on_node<S: AsRef<str>>(&self, node: &str, predicates: &[S]) {
        if predicates.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        inner.bump(node);
        if let Some(entry) = inner.nodes.get_mut(node) {
            for p in predicates {
                entry.predicates.remove(p.as_ref());
            }
        }
    }

    pub fn invalidate_predicate_on_all_nodes<S: AsRef<str>>(&self, predicates: &[S]) {
        if predicates.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        inner.epoch += 1;
        for entry in inner.nodes.values_mut() {
            for p in predicates {
                entry.predicates.remove(p.as_ref());
            }
        }
    }

    pub fn invalidate_all_for_node(&self, node: &str) {
        let mut inner = self.inner.write();
        inner.bump(node);
        inner.nodes.remove(node);
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.epoch += 1;
        inner.nodes.clear();
    }

    /// Number of stored verdicts.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .nodes
            .values()
            .flat_map(|e| e.predicates.values())
            .map(HashMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_node(&self, node: &str) -> bool {
        self.inner.read().nodes.contains_key(node)
    }
}

fn insert<R>(inner: &mut Inner<R>, node: &str, predicate: &str, hash: EquivalenceHash, verdict: Verdict<R>) {
    inner
        .nodes
        .entry(node.to_string())
        .or_default()
        .predicates
        .entry(predicate.to_string())
        .or_default()
        .insert(hash, verdict);
}

// ── Equivalence class ──────────────────────────────────────────────

/// The pod fields that can influence a predicate verdict.
#[derive(Hash)]
struct PodShape<'a> {
    namespace: &'a str,
    labels: &'a Labels,
    request: Resource,
    ports: Vec<ContainerPort>,
    volumes: &'a [Volume],
    node_selector: &'a Labels,
    affinity: Option<&'a Affinity>,
    tolerations: &'a [Toleration],
}

/// Compute the equivalence class of `pod`.
///
/// Pods that differ only in name, uid, or status share a class.
pub fn equivalence_hash(pod: &Pod) -> EquivalenceHash {
    let shape = PodShape {
        namespace: &pod.meta.namespace,
        labels: &pod.meta.labels,
        request: pod.resource_request(),
        ports: pod.host_ports(),
        volumes: &pod.spec.volumes,
        node_selector: &pod.spec.node_selector,
        affinity: pod.spec.affinity.as_ref(),
        tolerations: &pod.spec.tolerations,
    };
    let mut hasher = DefaultHasher::new();
    shape.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit() -> Verdict<String> {
        Verdict {
            fit: true,
            reasons: Vec::new(),
        }
    }

    fn no_fit(reason: &str) -> Verdict<String> {
        Verdict {
            fit: false,
            reasons: vec![reason.to_string()],
        }
    }

    #[test]
    fn store_and_lookup() {
        let cache = EquivalenceCache::new();
        cache.store("n1", "PodFitsResources", 7, no_fit("Insufficient cpu"));
        assert_eq!(cache.lookup("n1", "PodFitsResources", 7), Some(no_fit("Insufficient cpu")));
        assert_eq!(cache.lookup("n1", "PodFitsResources", 8), None);
        assert_eq!(cache.lookup("n2", "PodFitsResources", 7), None);
    }

    #[test]
    fn invalidate_on_node_is_scoped() {
        let cache = EquivalenceCache::new();
        cache.store("n1", "A", 1, fit());
        cache.store("n1", "B", 1, fit());
        cache.store("n2", "A", 1, fit());

        cache.invalidate_predicate_on_node("n1", &["A"]);
        assert!(cache.lookup("n1", "A", 1).is_none());
        assert!(cache.lookup("n1", "B", 1).is_some());
        assert!(cache.lookup("n2", "A", 1).is_some());
    }

    #[test]
    fn invalidate_on_all_nodes() {
        let cache = EquivalenceCache::new();
        cache.store("n1", "A", 1, fit());
        cache.store("n2", "A", 1, fit());
        cache.store("n2", "B", 1, fit());

        cache.invalidate_predicate_on_all_nodes(&["A"]);
        assert_eq!(cache.len(), 1);
        assert!(cache.lookup("n2", "B", 1).is_some());
    }

    #[test]
    fn invalidate_all_for_node() {
        let cache = EquivalenceCache::new();
        cache.store("n1", "A", 1, fit());
        cache.store("n1", "B", 2, fit());
        cache.invalidate_all_for_node("n1");
        assert!(!cache.contains_node("n1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn stale_token_write_is_refused() {
        let cache = EquivalenceCache::new();
        let token = cache.token("n1");
        cache.invalidate_predicate_on_node("n1", &["A"]);
        assert!(!cache.store_if_current("n1", "A", 1, fit(), token));
        assert!(cache.lookup("n1", "A", 1).is_none());

        let token = cache.token("n1");
        cache.invalidate_predicate_on_all_nodes(&["B"]);
        assert!(!cache.store_if_current("n1", "A", 1, fit(), token));

        let token = cache.token("n1");
        cache.invalidate_predicate_on_node("n2", &["A"]);
        assert!(cache.store_if_current("n1", "A", 1, fit(), token));
    }

    #[test]
    fn removed_node_does_not_reuse_generation() {
        let cache = EquivalenceCache::new();
        let token = cache.token("n1");
        cache.invalidate_all_for_node("n1");
        assert!(!cache.store_if_current("n1", "A", 1, fit(), token));
    }

    #[test]
    fn hash_ignores_identity_but_not_shape() {
        let a = Pod::new("default", "web-1").with_container(500, 1 << 20).with_label("app", "web");
        let b = Pod::new("default", "web-2").with_container(500, 1 << 20).with_label("app", "web");
        let c = Pod::new("default", "web-3").with_container(600, 1 << 20).with_label("app", "web");
        let d = Pod::new("other", "web-1").with_container(500, 1 << 20).with_label("app", "web");

        assert_eq!(equivalence_hash(&a), equivalence_hash(&b));
        assert_ne!(equivalence_hash(&a), equivalence_hash(&c));
        assert_ne!(equivalence_hash(&a), equivalence_hash(&d));
    }
}
