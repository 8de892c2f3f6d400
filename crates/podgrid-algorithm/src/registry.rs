//! Named predicate / priority factories and algorithm providers.
//!
//! Configuration refers to plugins by name only; the registry resolves the
//! names into instances built from [`PluginArgs`]. Predicates always come
//! back in [`PREDICATE_ORDERING`] order, whatever order they were listed in.

use std::collections::BTreeMap;
use std::sync::Arc;

use podgrid_cache::Listers;
use podgrid_cache::invalidation::names as pred;
use podgrid_types::{CloudVolumeKind, LABEL_HOSTNAME, LABEL_REGION, LABEL_ZONE};

use crate::error::{RegistryError, RegistryResult};
use crate::predicates::{
    DiskConflict, GeneralPredicates, HostName, HostPorts, InterPodAffinity, MaxVolumeCount,
    NodeConditionCheck, NodeDiskPressure, NodeMemoryPressure, NodeSelectorMatch, PredicateRef,
    ResourceFit, ServiceAffinity, TaintToleration, VolumeZone,
};
use crate::priorities::{
    BalancedResourceAllocation, EqualPriority, InterPodAffinityPriority, LeastRequested,
    MostRequested, NodeAffinityPriority, PriorityConfig, PriorityFunction, SelectorSpread,
    TaintTolerationPriority, names as prio,
};

pub const DEFAULT_PROVIDER: &str = "DefaultProvider";
pub const CLUSTER_AUTOSCALER_PROVIDER: &str = "ClusterAutoscalerProvider";

/// Evaluation order; cheap and most-restrictive checks first.
pub const PREDICATE_ORDERING: &[&str] = &[
    pred::CHECK_NODE_CONDITION,
    pred::GENERAL_PREDICATES,
    pred::POD_FITS_HOST,
    pred::POD_FITS_HOST_PORTS,
    pred::MATCH_NODE_SELECTOR,
    pred::POD_FITS_RESOURCES,
    pred::NO_DISK_CONFLICT,
    pred::POD_TOLERATES_NODE_TAINTS,
    pred::CHECK_NODE_MEMORY_PRESSURE,
    pred::CHECK_NODE_DISK_PRESSURE,
    pred::MAX_EBS_VOLUME_COUNT,
    pred::MAX_GCE_PD_VOLUME_COUNT,
    pred::MAX_AZURE_DISK_VOLUME_COUNT,
    pred::NO_VOLUME_ZONE_CONFLICT,
    pred::CHECK_SERVICE_AFFINITY,
    pred::MATCH_INTER_POD_AFFINITY,
];

/// Label keys used as failure domains when none are configured.
pub fn default_failure_domains() -> Vec<String> {
    vec![
        LABEL_HOSTNAME.to_string(),
        LABEL_ZONE.to_string(),
        LABEL_REGION.to_string(),
    ]
}

/// Construction-time inputs shared by every plugin factory.
#[derive(Debug, Clone)]
pub struct PluginArgs {
    pub listers: Arc<Listers>,
    pub hard_pod_affinity_symmetric_weight: i32,
    pub failure_domains: Vec<String>,
    pub service_affinity_labels: Vec<String>,
}

impl PluginArgs {
    pub fn new(listers: Arc<Listers>) -> Self {
        Self {
            listers,
            hard_pod_affinity_symmetric_weight: 1,
            failure_domains: default_failure_domains(),
            service_affinity_labels: vec![LABEL_ZONE.to_string()],
        }
    }
}

pub type PredicateFactory = fn(&PluginArgs) -> PredicateRef;
pub type PriorityFactory = fn(&PluginArgs) -> Arc<dyn PriorityFunction>;

/// A named bundle of predicate keys and weighted priority keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmProvider {
    pub name: String,
    pub predicate_keys: Vec<String>,
    pub priority_keys: Vec<(String, i64)>,
}

pub struct Registry {
    predicates: BTreeMap<&'static str, PredicateFactory>,
    priorities: BTreeMap<&'static str, PriorityFactory>,
    providers: BTreeMap<String, AlgorithmProvider>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn strings(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn default_predicate_keys() -> Vec<String> {
    strings(&[
        pred::NO_VOLUME_ZONE_CONFLICT,
        pred::MAX_EBS_VOLUME_COUNT,
        pred::MAX_GCE_PD_VOLUME_COUNT,
        pred::MAX_AZURE_DISK_VOLUME_COUNT,
        pred::MATCH_INTER_POD_AFFINITY,
        pred::NO_DISK_CONFLICT,
        pred::GENERAL_PREDICATES,
        pred::POD_TOLERATES_NODE_TAINTS,
        pred::CHECK_NODE_MEMORY_PRESSURE,
        pred::CHECK_NODE_DISK_PRESSURE,
        pred::CHECK_NODE_CONDITION,
    ])
}

fn default_priority_keys(resource_priority: &str) -> Vec<(String, i64)> {
    [
        prio::SELECTOR_SPREAD,
        prio::INTER_POD_AFFINITY,
        resource_priority,
        prio::BALANCED_RESOURCE_ALLOCATION,
        prio::NODE_AFFINITY,
        prio::TAINT_TOLERATION,
    ]
    .iter()
    .map(|k| (k.to_string(), 1))
    .collect()
}

impl Registry {
    /// Empty registry without plugins or providers.
    pub fn empty() -> Self {
        Self {
            predicates: BTreeMap::new(),
            priorities: BTreeMap::new(),
            providers: BTreeMap::new(),
        }
    }

    /// Every built-in plugin plus the default and autoscaler providers.
    pub fn with_defaults() -> Self {
        let mut r = Self::empty();

        r.register_predicate(pred::POD_FITS_RESOURCES, |_: &PluginArgs| -> PredicateRef {
            Arc::new(ResourceFit)
        });
        r.register_predicate(pred::POD_FITS_HOST, |_: &PluginArgs| -> PredicateRef {
            Arc::new(HostName)
        });
        r.register_predicate(pred::POD_FITS_HOST_PORTS, |_: &PluginArgs| -> PredicateRef {
            Arc::new(HostPorts)
        });
        r.register_predicate(pred::MATCH_NODE_SELECTOR, |_: &PluginArgs| -> PredicateRef {
            Arc::new(NodeSelectorMatch)
        });
        r.register_predicate(pred::GENERAL_PREDICATES, |_: &PluginArgs| -> PredicateRef {
            Arc::new(GeneralPredicates)
        });
        r.register_predicate(pred::NO_DISK_CONFLICT, |_: &PluginArgs| -> PredicateRef {
            Arc::new(DiskConflict)
        });
        r.register_predicate(pred::NO_VOLUME_ZONE_CONFLICT, |a: &PluginArgs| -> PredicateRef {
            Arc::new(VolumeZone::new(Arc::clone(&a.listers)))
        });
        r.register_predicate(pred::MAX_EBS_VOLUME_COUNT, |a: &PluginArgs| -> PredicateRef {
            Arc::new(MaxVolumeCount::with_default_limit(CloudVolumeKind::AwsEbs, Arc::clone(&a.listers)))
        });
        r.register_predicate(pred::MAX_GCE_PD_VOLUME_COUNT, |a: &PluginArgs| -> PredicateRef {
            Arc::new(MaxVolumeCount::with_default_limit(CloudVolumeKind::GcePd, Arc::clone(&a.listers)))
        });
        r.register_predicate(pred::MAX_AZURE_DISK_VOLUME_COUNT, |a: &PluginArgs| -> PredicateRef {
            Arc::new(MaxVolumeCount::with_default_limit(CloudVolumeKind::AzureDisk, Arc::clone(&a.listers)))
        });
        r.register_predicate(pred::MATCH_INTER_POD_AFFINITY, |a: &PluginArgs| -> PredicateRef {
            Arc::new(InterPodAffinity::new(a.failure_domains.clone()))
        });
        r.register_predicate(pred::POD_TOLERATES_NODE_TAINTS, |_: &PluginArgs| -> PredicateRef {
            Arc::new(TaintToleration)
        });
        r.register_predicate(pred::CHECK_NODE_MEMORY_PRESSURE, |_: &PluginArgs| -> PredicateRef {
            Arc::new(NodeMemoryPressure)
        });
        r.register_predicate(pred::CHECK_NODE_DISK_PRESSURE, |_: &PluginArgs| -> PredicateRef {
            Arc::new(NodeDiskPressure)
        });
        r.register_predicate(pred::CHECK_NODE_CONDITION, |_: &PluginArgs| -> PredicateRef {
            Arc::new(NodeConditionCheck)
        });
        r.register_predicate(pred::CHECK_SERVICE_AFFINITY, |a: &PluginArgs| -> PredicateRef {
            Arc::new(ServiceAffinity::new(Arc::clone(&a.listers), a.service_affinity_labels.clone()))
        });

        r.register_priority(prio::LEAST_REQUESTED, |_: &PluginArgs| -> Arc<dyn PriorityFunction> {
            Arc::new(LeastRequested)
        });
        r.register_priority(prio::MOST_REQUESTED, |_: &PluginArgs| -> Arc<dyn PriorityFunction> {
            Arc::new(MostRequested)
        });
        r.register_priority(prio::BALANCED_RESOURCE_ALLOCATION, |_: &PluginArgs| -> Arc<dyn PriorityFunction> {
            Arc::new(BalancedResourceAllocation)
        });
        r.register_priority(prio::SELECTOR_SPREAD, |_: &PluginArgs| -> Arc<dyn PriorityFunction> {
            Arc::new(SelectorSpread)
        });
        r.register_priority(prio::NODE_AFFINITY, |_: &PluginArgs| -> Arc<dyn PriorityFunction> {
            Arc::new(NodeAffinityPriority)
        });
        r.register_priority(prio::TAINT_TOLERATION, |_: &PluginArgs| -> Arc<dyn PriorityFunction> {
            Arc::new(TaintTolerationPriority)
        });
        r.register_priority(prio::INTER_POD_AFFINITY, |a: &PluginArgs| -> Arc<dyn PriorityFunction> {
            Arc::new(InterPodAffinityPriority::new(
                a.hard_pod_affinity_symmetric_weight,
                a.failure_domains.clone(),
            ))
        });
        r.register_priority(prio::EQUAL, |_: &PluginArgs| -> Arc<dyn PriorityFunction> {
            Arc::new(EqualPriority)
        });

        r.register_provider(AlgorithmProvider {
            name: DEFAULT_PROVIDER.to_string(),
            predicate_keys: default_predicate_keys(),
            priority_keys: default_priority_keys(prio::LEAST_REQUESTED),
        });
        r.register_provider(AlgorithmProvider {
            name: CLUSTER_AUTOSCALER_PROVIDER.to_string(),
            predicate_keys: default_predicate_keys(),
            priority_keys: default_priority_keys(prio::MOST_REQUESTED),
        });
        r
    }

    pub fn register_predicate(&mut self, name: &'static str, factory: PredicateFactory) {
        self.predicates.insert(name, factory);
    }

    pub fn register_priority(&mut self, name: &'static str, factory: PriorityFactory) {
        self.priorities.insert(name, factory);
    }

    pub fn register_provider(&mut self, provider: AlgorithmProvider) {
        self.providers.insert(provider.name.clone(), provider);
    }

    pub fn provider(&self, name: &str) -> RegistryResult<&AlgorithmProvider> {
        self.providers
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProvider(name.to_string()))
    }

    pub fn has_predicate(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    pub fn has_priority(&self, name: &str) -> bool {
        self.priorities.contains_key(name)
    }

    /// Build predicates for `keys`, deduplicated and in canonical order.
    ///
    /// Registered names missing from the ordering sort last, by name.
    pub fn build_predicates<S: AsRef<str>>(&self, keys: &[S], args: &PluginArgs) -> RegistryResult<Vec<PredicateRef>> {
        let mut resolved: Vec<(&'static str, PredicateFactory)> = Vec::new();
        for key in keys {
            let key = key.as_ref();
            let (name, factory) = self
                .predicates
                .get_key_value(key)
                .ok_or_else(|| RegistryError::UnknownPredicate(key.to_string()))?;
            if !resolved.iter().any(|(n, _)| n == name) {
                resolved.push((name, *factory));
            }
        }
        resolved.sort_by_key(|(name, _)| {
            let rank = PREDICATE_ORDERING
                .iter()
                .position(|p| p == name)
                .unwrap_or(PREDICATE_ORDERING.len());
            (rank, *name)
        });
        Ok(resolved.into_iter().map(|(_, f)| f(args)).collect())
    }

    /// Build weighted priorities; weights must be positive.
    pub fn build_priorities<S: AsRef<str>>(
        &self,
        keys: &[(S, i64)],
        args: &PluginArgs,
    ) -> RegistryResult<Vec<PriorityConfig>> {
        keys.iter()
            .map(|(key, weight)| {
                let key = key.as_ref();
                let factory = self
                    .priorities
                    .get(key)
                    .ok_or_else(|| RegistryError::UnknownPriority(key.to_string()))?;
                if *weight <= 0 {
                    return Err(RegistryError::InvalidWeight {
                        name: key.to_string(),
                        weight: *weight,
                    });
                }
                Ok(PriorityConfig {
                    function: factory(args),
                    weight: *weight,
                })
            })
            .collect()
    }
}
