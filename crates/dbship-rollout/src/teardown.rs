//! Cancellation cleanup: cancel every active task run of a rollout.
//!
//! Runs on an already-aborting path, so it never stops early: each stage
//! gets its own cancel call and all failures are collected.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use dbship_core::{collect_pages, RolloutService, ServiceError};

/// One stage whose task runs could not be cancelled.
#[derive(Debug)]
pub struct StageCancelFailure {
    pub stage: String,
    pub error: ServiceError,
}

impl fmt::Display for StageCancelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to cancel task runs for stage {}: {}", self.stage, self.error)
    }
}

#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("failed to list task runs: {0}")]
    List(#[source] ServiceError),

    #[error("{}", join_failures(.0))]
    Cancel(Vec<StageCancelFailure>),
}

fn join_failures(failures: &[StageCancelFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cancel every RUNNING or PENDING task run under `rollout`.
///
/// Issues one batch cancel per stage that has active runs. Returns the
/// number of runs cancelled.
pub async fn cancel_active_task_runs<S: RolloutService + ?Sized>(
    service: &S,
    rollout: &str,
) -> Result<usize, TeardownError> {
    let parent = format!("{rollout}/stages/-/tasks/-");
    let runs = collect_pages(|token| {
        let parent = parent.as_str();
        async move { service.list_task_runs(parent, &token).await }
    })
    .await
    .map_err(TeardownError::List)?;

    let mut by_stage: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for run in runs.into_iter().filter(|r| r.status.is_active()) {
        by_stage
            .entry(run.stage().to_string())
            .or_default()
            .push(run.name);
    }

    let mut cancelled = 0;
    let mut failures = Vec::new();
    for (stage, task_runs) in by_stage {
        debug!(%stage, runs = task_runs.len(), "cancelling task runs");
        match service
            .batch_cancel_task_runs(&format!("{stage}/tasks/-"), &task_runs)
            .await
        {
            Ok(()) => cancelled += task_runs.len(),
            Err(error) => {
                warn!(%stage, %error, "failed to cancel task runs");
                failures.push(StageCancelFailure { stage, error });
            }
        }
    }

    if failures.is_empty() {
        Ok(cancelled)
    } else {
        Err(TeardownError::Cancel(failures))
    }
}
