//! Cache error types.

use thiserror::Error;

/// Contract violations reported by the cluster cache.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("pod {0} has no node name")]
    MissingNodeName(String),

    #[error("pod already in cache: {0}")]
    PodAlreadyKnown(String),

    #[error("pod not in cache: {0}")]
    PodNotFound(String),

    #[error("pod {0} is not assumed")]
    PodNotAssumed(String),

    #[error("pod {pod} is cached on node {cached}, not {requested}")]
    NodeMismatch {
        pod: String,
        cached: String,
        requested: String,
    },
}

pub type CacheResult<T> = Result<T, CacheError>;
