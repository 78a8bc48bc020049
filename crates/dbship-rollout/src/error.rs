//! Error types for rollout orchestration.

use thiserror::Error;

use dbship_core::ServiceError;

/// Result type alias for orchestration operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Why an orchestration run stopped without reaching its goal.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// A remote call failed. `op` names the call.
    #[error("failed to {op}: {source}")]
    Service {
        op: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("release has no files")]
    EmptyRelease,

    #[error("found failed plan checks on {0}")]
    PlanCheckFailed(String),

    #[error("found canceled plan checks on {0}")]
    PlanCheckCanceled(String),

    #[error("found error plan check results on {0}")]
    PlanCheckError(String),

    #[error("found warning plan check results on {0}")]
    PlanCheckWarning(String),

    #[error("found failed tasks in stage {0}")]
    TaskFailed(String),

    #[error("found canceled tasks in stage {0}")]
    TaskCanceled(String),

    #[error("rollout {0} has no more stages to reach the target stage")]
    NoMoreStages(String),

    /// A rollout was polled before its shell was created.
    #[error("rollout has not been created yet")]
    NotCreated,

    #[error("context cancelled")]
    Cancelled,
}

impl RolloutError {
    /// Wrap a service error with the name of the failed call.
    pub fn service(op: &'static str) -> impl FnOnce(ServiceError) -> Self {
        move |source| RolloutError::Service { op, source }
    }

    /// Whether the run was blocked by a plan check or task outcome rather
    /// than by infrastructure or cancellation.
    pub fn is_gate_failure(&self) -> bool {
        matches!(
            self,
            RolloutError::PlanCheckFailed(_)
                | RolloutError::PlanCheckCanceled(_)
                | RolloutError::PlanCheckError(_)
                | RolloutError::PlanCheckWarning(_)
                | RolloutError::TaskFailed(_)
                | RolloutError::TaskCanceled(_)
        )
    }
}
