//! Scheduler error types.

use thiserror::Error;

use podgrid_algorithm::{RegistryError, ScheduleError};
use podgrid_cache::CacheError;

use crate::binder::BindError;
use crate::client::ClientError;
use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("plugin registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("extender setup failed: {0}")]
    Extender(#[from] podgrid_algorithm::ExtenderError),

    #[error("cluster client error: {0}")]
    Client(#[from] ClientError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("binding failed: {0}")]
    Bind(#[from] BindError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("background task failed: {0}")]
    Task(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Outcome of one event handler invocation; logged, never fatal.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{kind} {key}: {reason}")]
    Rejected {
        kind: &'static str,
        key: String,
        reason: String,
    },
}

pub type HandlerResult = Result<(), HandlerError>;
