//! The generic scheduling algorithm: filter, score, select.
//!
//! ```text
//! candidates ──► predicates (parallel, per node, equivalence-cached)
//!            ──► extender filters
//!            ──► priorities map / reduce (parallel) + extender scores
//!            ──► max score, random among ties
//! ```
//!
//! Predicate and priority evaluation run on the blocking pool against one
//! snapshot of the cluster cache; the cache lock is never held while a
//! predicate runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

use podgrid_cache::{
    ClusterCache, EquivalenceCache, GenerationToken, NodeInfo, NodeInfoMap, Listers, Verdict,
};
use podgrid_types::{Node, Pod};

use crate::error::{FitError, ScheduleError, ScheduleResult};
use crate::extender::SchedulerExtender;
use crate::parallel::parallelize;
use crate::predicates::{PredicateFailureReason, PredicateMetadata, PredicateRef};
use crate::priorities::{HostPriority, MAX_PRIORITY, PriorityConfig, PriorityMetadata};

/// Equivalence cache as the algorithm fills it.
pub type PredicateCache = EquivalenceCache<PredicateFailureReason>;

/// Nodes evaluated concurrently when the configuration does not say.
pub const DEFAULT_PARALLELISM: usize = 16;

/// Filter, score and select over one cluster cache.
///
/// Holds no per-pod state; one instance serves every decision of the loop.
pub struct GenericScheduler {
    cache: Arc<ClusterCache>,
    equivalence: Option<Arc<PredicateCache>>,
    predicates: Arc<Vec<PredicateRef>>,
    priorities: Arc<Vec<PriorityConfig>>,
    extenders: Vec<Arc<dyn SchedulerExtender>>,
    listers: Arc<Listers>,
    parallelism: usize,
}

/// Node name → why the pod does not fit there.
type FailedPredicates = BTreeMap<String, Vec<PredicateFailureReason>>;

impl GenericScheduler {
    /// Predicates run in the order given; the registry hands them over canonically sorted.
    pub fn new(
        cache: Arc<ClusterCache>,
        predicates: Vec<PredicateRef>,
        priorities: Vec<PriorityConfig>,
        listers: Arc<Listers>,
    ) -> Self {
        Self {
            cache,
            equivalence: None,
            predicates: Arc::new(predicates),
            priorities: Arc::new(priorities),
            extenders: Vec::new(),
            listers,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Memoize predicate verdicts; without it every predicate runs every time.
    pub fn with_equivalence_cache(mut self, ecache: Arc<PredicateCache>) -> Self {
        self.equivalence = Some(ecache);
        self
    }

    /// Extenders run after the built-in predicates, in the order given.
    pub fn with_extenders(mut self, extenders: Vec<Arc<dyn SchedulerExtender>>) -> Self {
        self.extenders = extenders;
        self
    }

    /// Clamped to at least one worker.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn predicates(&self) -> &[PredicateRef] {
        &self.predicates
    }

    pub fn priorities(&self) -> &[PriorityConfig] {
        &self.priorities
    }

    pub fn equivalence_cache(&self) -> Option<&Arc<PredicateCache>> {
        self.equivalence.as_ref()
    }

    /// Pick a node for `pod` among `candidates`.
    ///
    /// Fails with [`ScheduleError::NoNodesAvailable`] for an empty candidate
    /// set and with [`ScheduleError::Fit`] when no candidate passes; the fit
    /// error carries the reasons for every rejected node.
    pub async fn schedule(&self, pod: &Pod, candidates: &[Node]) -> ScheduleResult<String> {
        if candidates.is_empty() {
            return Err(ScheduleError::NoNodesAvailable);
        }
        let key = pod.key();
        let names: Vec<String> = candidates.iter().map(|n| n.name().to_string()).collect();

        // Tokens first: an invalidation landing after this point makes the
        // snapshot's verdicts unstorable.
        let tokens: Vec<Option<GenerationToken>> = names
            .iter()
            .map(|n| self.equivalence.as_ref().map(|ec| ec.token(n)))
            .collect();
        let snapshot = Arc::new(self.cache.snapshot());

        let (mut feasible, mut failed) = {
            let pod = pod.clone();
            let names = names.clone();
            let snapshot = Arc::clone(&snapshot);
            let predicates = Arc::clone(&self.predicates);
            let ecache = self.equivalence.clone();
            let parallelism = self.parallelism;
            tokio::task::spawn_blocking(move || {
                find_nodes_that_fit(&pod, &names, &tokens, &snapshot, &predicates, ecache.as_deref(), parallelism)
            })
            .await
            .map_err(|e| ScheduleError::Internal(e.to_string()))?
        };
        debug!(pod = %key, feasible = feasible.len(), candidates = names.len(), "predicates evaluated");

        self.run_extender_filters(pod, &snapshot, &mut feasible, &mut failed).await;

        if feasible.is_empty() {
            return Err(FitError {
                pod: key,
                num_nodes: candidates.len(),
                failed_predicates: failed,
            }
            .into());
        }
        if let [only] = feasible.as_slice() {
            return Ok(only.clone());
        }

        let mut scores = {
            let pod = pod.clone();
            let feasible = feasible.clone();
            let snapshot = Arc::clone(&snapshot);
            let priorities = Arc::clone(&self.priorities);
            let listers = Arc::clone(&self.listers);
            let parallelism = self.parallelism;
            tokio::task::spawn_blocking(move || {
                prioritize_nodes(&pod, &feasible, &snapshot, &priorities, &listers, parallelism)
            })
            .await
            .map_err(|e| ScheduleError::Internal(e.to_string()))?
        };

        self.run_extender_priorities(pod, &snapshot, &feasible, &mut scores).await;

        let host = select_host(&scores).ok_or(ScheduleError::NoNodesAvailable)?;
        debug!(pod = %key, node = %host, "selected host");
        Ok(host)
    }

    /// Narrow `feasible` through every filtering extender. An extender error
    /// rejects everything still feasible for this attempt.
    async fn run_extender_filters(
        &self,
        pod: &Pod,
        snapshot: &NodeInfoMap,
        feasible: &mut Vec<String>,
        failed: &mut FailedPredicates,
    ) {
        for ext in &self.extenders {
            if feasible.is_empty() {
                return;
            }
            if !ext.supports_filter() {
                continue;
            }
            let nodes = nodes_for(snapshot, feasible);
            match ext.filter(pod, nodes).await {
                Ok(result) => {
                    let kept: HashSet<&str> = result.nodes.iter().map(|n| n.name()).collect();
                    for name in feasible.iter().filter(|n| !kept.contains(n.as_str())) {
                        let message = result
                            .failed_nodes
                            .get(name)
                            .cloned()
                            .unwrap_or_else(|| "node filtered out".to_string());
                        failed.entry(name.clone()).or_default().push(PredicateFailureReason::Extender {
                            extender: ext.name().to_string(),
                            message,
                        });
                    }
                    feasible.retain(|n| kept.contains(n.as_str()));
                }
                Err(e) => {
                    warn!(extender = ext.name(), pod = %pod.key(), error = %e, "extender filter failed");
                    for name in feasible.drain(..) {
                        failed.entry(name).or_default().push(PredicateFailureReason::Extender {
                            extender: ext.name().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Add each extender's weighted scores. Scores outside `0..=MAX_PRIORITY`
    /// are clamped; a failing extender contributes nothing.
    async fn run_extender_priorities(
        &self,
        pod: &Pod,
        snapshot: &NodeInfoMap,
        feasible: &[String],
        scores: &mut [HostPriority],
    ) {
        for ext in &self.extenders {
            if !ext.supports_prioritize() {
                continue;
            }
            match ext.prioritize(pod, nodes_for(snapshot, feasible)).await {
                Ok(list) => {
                    let by_host: BTreeMap<&str, i64> = list.iter().map(|h| (h.host.as_str(), h.score)).collect();
                    for s in scores.iter_mut() {
                        if let Some(score) = by_host.get(s.host.as_str()) {
                            let weighted = (*score).clamp(0, MAX_PRIORITY).saturating_mul(ext.weight());
                            s.score = s.score.saturating_add(weighted);
                        }
                    }
                }
                // Scores are advisory; ranking proceeds without this extender.
                Err(e) => warn!(extender = ext.name(), pod = %pod.key(), error = %e, "extender prioritize failed"),
            }
        }
    }
}

fn nodes_for(snapshot: &NodeInfoMap, names: &[String]) -> Vec<Node> {
    names
        .iter()
        .filter_map(|n| snapshot.get(n)?.node().cloned())
        .collect()
}

/// Run the predicates for every candidate, consulting and filling the
/// equivalence cache. Verdicts are stored only under the token taken before
/// the snapshot.
fn find_nodes_that_fit(
    pod: &Pod,
    names: &[String],
    tokens: &[Option<GenerationToken>],
    snapshot: &Arc<NodeInfoMap>,
    predicates: &[PredicateRef],
    ecache: Option<&PredicateCache>,
    parallelism: usize,
) -> (Vec<String>, FailedPredicates) {
    let meta = PredicateMetadata::new(pod, Arc::clone(snapshot));

    let verdicts = parallelize(parallelism, names.len(), |i| {
        let name = &names[i];
        let Some(info) = snapshot.get(name).filter(|info| info.node().is_some()) else {
            return vec![PredicateFailureReason::NodeUnknown];
        };
        for predicate in predicates {
            let verdict = match ecache {
                Some(ec) => match ec.lookup(name, predicate.name(), meta.equivalence_hash) {
                    Some(hit) => hit,
                    None => {
                        let fresh = evaluate(predicate, pod, &meta, info);
                        if let Some(token) = tokens.get(i).copied().flatten() {
                            ec.store_if_current(name, predicate.name(), meta.equivalence_hash, fresh.clone(), token);
                        }
                        fresh
                    }
                },
                None => evaluate(predicate, pod, &meta, info),
            };
            if !verdict.fit {
                return verdict.reasons;
            }
        }
        Vec::new()
    });

    let mut feasible = Vec::new();
    let mut failed = BTreeMap::new();
    for (name, reasons) in names.iter().zip(verdicts) {
        if reasons.is_empty() {
            feasible.push(name.clone());
        } else {
            failed.insert(name.clone(), reasons);
        }
    }
    (feasible, failed)
}

fn evaluate(
    predicate: &PredicateRef,
    pod: &Pod,
    meta: &PredicateMetadata,
    info: &NodeInfo,
) -> Verdict<PredicateFailureReason> {
    let reasons = predicate.check(pod, meta, info);
    Verdict {
        fit: reasons.is_empty(),
        reasons,
    }
}

/// Weighted sum of every priority per feasible node, in `feasible` order.
fn prioritize_nodes(
    pod: &Pod,
    feasible: &[String],
    snapshot: &Arc<NodeInfoMap>,
    priorities: &[PriorityConfig],
    listers: &Listers,
    parallelism: usize,
) -> Vec<HostPriority> {
    if priorities.is_empty() {
        return feasible
            .iter()
            .map(|host| HostPriority {
                host: host.clone(),
                score: 1,
            })
            .collect();
    }

    let meta = PriorityMetadata::new(pod, Arc::clone(snapshot), listers);
    let empty = NodeInfo::new();
    let mapped: Vec<Vec<i64>> = parallelize(parallelism, feasible.len(), |i| {
        let info = snapshot.get(&feasible[i]).unwrap_or(&empty);
        priorities.iter().map(|p| p.function.map(pod, &meta, info)).collect()
    });

    let mut totals = vec![0i64; feasible.len()];
    for (j, priority) in priorities.iter().enumerate() {
        let mut scores: Vec<HostPriority> = feasible
            .iter()
            .zip(&mapped)
            .map(|(host, row)| HostPriority {
                host: host.clone(),
                score: row[j],
            })
            .collect();
        priority.function.reduce(pod, &meta, &mut scores);
        for (total, s) in totals.iter_mut().zip(&scores) {
            *total += s.score * priority.weight;
        }
    }

    feasible
        .iter()
        .zip(totals)
        .map(|(host, score)| HostPriority {
            host: host.clone(),
            score,
        })
        .collect()
}

/// Highest score, uniformly random among ties.
pub fn select_host(scores: &[HostPriority]) -> Option<String> {
    let max = scores.iter().map(|s| s.score).max()?;
    let tied: Vec<&HostPriority> = scores.iter().filter(|s| s.score == max).collect();
    let pick = rand::thread_rng().gen_range(0..tied.len());
    Some(tied[pick].host.clone())
}
