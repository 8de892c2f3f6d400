//! podgrid.toml scheduler configuration.
//!
//! Every field has a default, so an empty file is a valid configuration.
//! [`SchedulerConfig::validate`] runs at construction time; a config that
//! fails it never reaches the scheduling loop.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use podgrid_algorithm::ExtenderConfig;
use podgrid_algorithm::registry::{DEFAULT_PROVIDER, default_failure_domains};
use podgrid_types::{DEFAULT_SCHEDULER_NAME, LABEL_ZONE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("hard_pod_affinity_symmetric_weight must be in 0..=100, got {0}")]
    SymmetricWeightOutOfRange(i32),

    #[error("failure domain {0:?} is not a qualified label key")]
    UnqualifiedFailureDomain(String),

    #[error("scheduler_name must not be empty")]
    EmptySchedulerName,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("max_backoff_ms ({max}) is below initial_backoff_ms ({initial})")]
    BackoffRange { initial: u64, max: u64 },

    #[error("priority weight for {name} must be positive, got {weight}")]
    PriorityWeight { name: String, weight: i64 },

    #[error("extender {url:?}: {reason}")]
    Extender { url: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// `[prefix/]name`, prefix a DNS subdomain, name 63 characters at most.
static QUALIFIED_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$",
    )
    .ok()
});

/// Whether `key` is a valid label key.
pub fn is_qualified_label_key(key: &str) -> bool {
    let Some(re) = QUALIFIED_NAME.as_ref() else {
        return false;
    };
    if !re.is_match(key) {
        return false;
    }
    match key.split_once('/') {
        Some((prefix, name)) => prefix.len() <= 253 && name.len() <= 63,
        None => key.len() <= 63,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pods whose `scheduler_name` matches are claimed by this instance.
    pub scheduler_name: String,
    /// Implicit weight of the reverse of a required affinity term.
    pub hard_pod_affinity_symmetric_weight: i32,
    /// Label keys treated as topology domains when a term names none.
    pub failure_domains: Vec<String>,
    pub algorithm_provider: String,
    /// Labels `CheckServiceAffinity` keeps equal across a service's pods.
    pub service_affinity_labels: Vec<String>,
    /// Overrides the provider's predicates when set.
    pub predicate_keys: Option<Vec<String>>,
    /// Overrides the provider's priorities when set.
    pub priority_keys: Option<Vec<String>>,
    pub parallelism: usize,
    pub enable_equivalence_cache: bool,
    pub assumed_pod_ttl_secs: u64,
    pub cleanup_interval_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_gc_interval_secs: u64,
    pub bind_timeout_ms: u64,
    /// Delay before relisting after a watch ends.
    pub resync_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    /// Per-key weight overrides; keys missing here keep weight 1 or the provider default.
    pub priority_weights: BTreeMap<String, i64>,
    pub extenders: Vec<ExtenderConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler_name: DEFAULT_SCHEDULER_NAME.to_string(),
            hard_pod_affinity_symmetric_weight: 1,
            failure_domains: default_failure_domains(),
            algorithm_provider: DEFAULT_PROVIDER.to_string(),
            service_affinity_labels: vec![LABEL_ZONE.to_string()],
            predicate_keys: None,
            priority_keys: None,
            parallelism: 16,
            enable_equivalence_cache: true,
            assumed_pod_ttl_secs: 30,
            cleanup_interval_ms: 1000,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            backoff_gc_interval_secs: 60,
            bind_timeout_ms: 10_000,
            resync_interval_ms: 1000,
            shutdown_grace_ms: 5000,
            priority_weights: BTreeMap::new(),
            extenders: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.scheduler_name.is_empty() {
            return Err(ConfigError::EmptySchedulerName);
        }
        if !(0..=100).contains(&self.hard_pod_affinity_symmetric_weight) {
            return Err(ConfigError::SymmetricWeightOutOfRange(
                self.hard_pod_affinity_symmetric_weight,
            ));
        }
        if let Some(bad) = self.failure_domains.iter().find(|k| !is_qualified_label_key(k)) {
            return Err(ConfigError::UnqualifiedFailureDomain(bad.clone()));
        }
        if self.parallelism == 0 {
            return Err(ConfigError::Zero("parallelism"));
        }
        if self.initial_backoff_ms == 0 {
            return Err(ConfigError::Zero("initial_backoff_ms"));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::BackoffRange {
                initial: self.initial_backoff_ms,
                max: self.max_backoff_ms,
            });
        }
        if self.assumed_pod_ttl_secs == 0 {
            return Err(ConfigError::Zero("assumed_pod_ttl_secs"));
        }
        if let Some((name, weight)) = self.priority_weights.iter().find(|(_, w)| **w <= 0) {
            return Err(ConfigError::PriorityWeight {
                name: name.clone(),
                weight: *weight,
            });
        }
        for ext in &self.extenders {
            let reject = |reason: &str| ConfigError::Extender {
                url: ext.url_prefix.clone(),
                reason: reason.to_string(),
            };
            if ext.url_prefix.is_empty() {
                return Err(reject("url_prefix is empty"));
            }
            if ext.filter_verb.is_empty() && ext.prioritize_verb.is_empty() {
                return Err(reject("neither filter_verb nor prioritize_verb is set"));
            }
            if ext.weight <= 0 {
                return Err(reject("weight must be positive"));
            }
        }
        Ok(())
    }

    /// Effective weighted priorities: configured keys (or the provider's),
    /// with `priority_weights` applied on top.
    pub fn priority_keys_for(&self, provider: &[(String, i64)]) -> Vec<(String, i64)> {
        let base: Vec<(String, i64)> = match &self.priority_keys {
            Some(keys) => keys.iter().map(|k| (k.clone(), 1)).collect(),
            None => provider.to_vec(),
        };
        base.into_iter()
            .map(|(k, w)| {
                let weight = self.priority_weights.get(&k).copied().unwrap_or(w);
                (k, weight)
            })
            .collect()
    }

    pub fn assumed_pod_ttl(&self) -> Duration {
        Duration::from_secs(self.assumed_pod_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn backoff_gc_interval(&self) -> Duration {
        Duration::from_secs(self.backoff_gc_interval_secs)
    }

    pub fn bind_timeout(&self) -> Duration {
        Duration::from_millis(self.bind_timeout_ms)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(self.resync_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
