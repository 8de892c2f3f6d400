//! Algorithm error types.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::predicates::PredicateFailureReason;

/// No candidate passed filtering; carries why, per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitError {
    pub pod: String,
    pub num_nodes: usize,
    /// Node name → every reason it was rejected.
    pub failed_predicates: BTreeMap<String, Vec<PredicateFailureReason>>,
}

impl FitError {
    /// Reason message → number of nodes that reported it.
    pub fn reason_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for reasons in self.failed_predicates.values() {
            for r in reasons {
                *counts.entry(r.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl fmt::Display for FitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0/{} nodes are available", self.num_nodes)?;
        let counts = self.reason_counts();
        if counts.is_empty() {
            return f.write_str(".");
        }
        let parts: Vec<String> = counts
            .into_iter()
            .map(|(reason, n)| format!("{n} {reason}"))
            .collect();
        write!(f, ": {}.", parts.join(", "))
    }
}

impl std::error::Error for FitError {}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("no nodes available to schedule pods")]
    NoNodesAvailable,

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error("scheduling task failed: {0}")]
    Internal(String),
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;

#[derive(Debug, Error)]
pub enum ExtenderError {
    #[error("extender {extender} unreachable: {message}")]
    Transport { extender: String, message: String },

    #[error("extender {extender} returned status {status}")]
    Status { extender: String, status: u16 },

    #[error("extender {extender} sent an invalid response: {message}")]
    Decode { extender: String, message: String },

    #[error("extender {extender} reported: {message}")]
    Remote { extender: String, message: String },

    #[error("extender {extender} timed out")]
    Timeout { extender: String },
}

pub type ExtenderResult<T> = Result<T, ExtenderError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown predicate: {0}")]
    UnknownPredicate(String),

    #[error("unknown priority: {0}")]
    UnknownPriority(String),

    #[error("unknown algorithm provider: {0}")]
    UnknownProvider(String),

    #[error("priority {name} has non-positive weight {weight}")]
    InvalidWeight { name: String, weight: i64 },
}

pub type RegistryResult<T> = Result<T, RegistryError>;
