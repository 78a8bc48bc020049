//! Errors surfaced by a `RolloutService` implementation.

use thiserror::Error;

/// Result type alias for remote service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Message the server returns when `BatchRunTasks` finds existing runs.
const TASK_RUN_CONFLICT: &str =
    "cannot create pending task runs because there are pending/running/done task runs";

/// Errors that can occur while talking to the remote service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Connection, TLS or protocol failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("remote error (code {code}): {message}")]
    Status { code: i32, message: String },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Authentication was rejected or returned no token.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ServiceError {
    /// Whether this is the benign conflict raised when a task already has
    /// pending, running or done runs.
    ///
    /// The server reports it as a plain FAILED_PRECONDITION with no
    /// dedicated code, so the message is the only discriminator.
    pub fn is_task_run_conflict(&self) -> bool {
        match self {
            ServiceError::Status { message, .. } => message.contains(TASK_RUN_CONFLICT),
            _ => false,
        }
    }

    /// Build the conflict error, as a server would report it.
    pub fn task_run_conflict() -> Self {
        ServiceError::Status {
            code: 9,
            message: TASK_RUN_CONFLICT.to_string(),
        }
    }
}
