//! Commit-side capabilities: binding a pod and writing its status condition.

use async_trait::async_trait;
use thiserror::Error;

use podgrid_types::{Binding, Pod, PodCondition};

use crate::client::{ClientError, ClientResult};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    /// Stale UID, already bound, or a concurrent external write.
    #[error("bind conflict for {pod}: {reason}")]
    Conflict { pod: String, reason: String },

    #[error("pod {0} no longer exists")]
    PodGone(String),

    #[error("bind of {pod} timed out")]
    Timeout { pod: String },

    #[error(transparent)]
    Client(#[from] ClientError),
}

pub type BindResult<T> = Result<T, BindError>;

#[async_trait]
pub trait Binder: Send + Sync {
    /// Commit `binding`; repeating an identical successful bind is a no-op.
    async fn bind(&self, binding: &Binding) -> BindResult<()>;
}

#[async_trait]
pub trait PodConditionUpdater: Send + Sync {
    async fn set_condition(&self, pod: &Pod, condition: &PodCondition) -> ClientResult<()>;
}
