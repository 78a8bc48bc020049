//! Plan check gate: blocks the rollout on pre-flight check results.
//!
//! Checks run asynchronously on the server. The gate triggers them when a
//! plan has none yet, then polls the complete listing until no run is
//! RUNNING or a run/result violates the configured `CheckPlanMode`.

use std::time::Duration;

use tracing::{debug, info};

use dbship_core::{
    collect_pages, CheckPlanMode, CheckResultStatus, PlanCheckRun, PlanCheckRunStatus,
    RolloutService,
};

use crate::cancel::CancelSignal;
use crate::error::{RolloutError, RolloutResult};

/// Counts over one complete plan check listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckTally {
    pub failed: usize,
    pub canceled: usize,
    pub running: usize,
    /// ERROR results within DONE runs.
    pub errors: usize,
    /// WARNING results within DONE runs.
    pub warnings: usize,
}

/// What the gate does after one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Wait,
    Fail(GateFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFailure {
    FailedRun,
    CanceledRun,
    ErrorResult,
    WarningResult,
}

impl CheckTally {
    pub fn from_runs(runs: &[PlanCheckRun]) -> Self {
        let mut tally = CheckTally::default();
        for run in runs {
            match run.status {
                PlanCheckRunStatus::Failed => tally.failed += 1,
                PlanCheckRunStatus::Canceled => tally.canceled += 1,
                PlanCheckRunStatus::Running => tally.running += 1,
                PlanCheckRunStatus::Done => {
                    for result in &run.results {
                        match result.status {
                            CheckResultStatus::Error => tally.errors += 1,
                            CheckResultStatus::Warning => tally.warnings += 1,
                            _ => {}
                        }
                    }
                }
                PlanCheckRunStatus::StatusUnspecified => {}
            }
        }
        tally
    }

    /// Apply the gating policy. Failures are checked before RUNNING runs,
    /// so a failure is reported even while other checks are in flight.
    pub fn decide(&self, mode: CheckPlanMode) -> GateDecision {
        if self.failed > 0 {
            GateDecision::Fail(GateFailure::FailedRun)
        } else if self.canceled > 0 {
            GateDecision::Fail(GateFailure::CanceledRun)
        } else if self.errors > 0 {
            GateDecision::Fail(GateFailure::ErrorResult)
        } else if self.warnings > 0 && mode == CheckPlanMode::FailOnWarning {
            GateDecision::Fail(GateFailure::WarningResult)
        } else if self.running == 0 {
            GateDecision::Pass
        } else {
            GateDecision::Wait
        }
    }
}

pub struct PlanCheckGate<'a, S: ?Sized> {
    service: &'a S,
    mode: CheckPlanMode,
    poll_interval: Duration,
}

impl<'a, S: RolloutService + ?Sized> PlanCheckGate<'a, S> {
    pub fn new(service: &'a S, mode: CheckPlanMode, poll_interval: Duration) -> Self {
        Self {
            service,
            mode,
            poll_interval,
        }
    }

    /// Wait until the plan's checks pass under the configured mode.
    pub async fn wait(&self, plan: &str, cancel: &CancelSignal) -> RolloutResult<()> {
        if self.mode == CheckPlanMode::Skip {
            return Ok(());
        }
        info!(%plan, mode = %self.mode, "waiting for plan checks");

        let mut triggered = false;
        loop {
            if cancel.is_cancelled() {
                return Err(RolloutError::Cancelled);
            }

            let runs = collect_pages(|token| async move {
                self.service.list_plan_check_runs(plan, &token).await
            })
            .await
            .map_err(RolloutError::service("list plan check runs"))?;

            if runs.is_empty() {
                if triggered {
                    // The server creates runs synchronously on trigger, so an
                    // empty listing now means no check applies to this plan.
                    info!(%plan, "plan has no checks to wait for");
                    return Ok(());
                }
                info!(%plan, "running plan checks");
                self.service
                    .run_plan_checks(plan)
                    .await
                    .map_err(RolloutError::service("run plan checks"))?;
                triggered = true;
                continue;
            }

            let tally = CheckTally::from_runs(&runs);
            match tally.decide(self.mode) {
                GateDecision::Pass => {
                    info!(%plan, warnings = tally.warnings, "plan checks passed");
                    return Ok(());
                }
                GateDecision::Fail(failure) => return Err(failure.into_error(plan)),
                GateDecision::Wait => {
                    info!(running = tally.running, "waiting for plan checks to complete");
                    debug!(?tally, "plan check tally");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

impl GateFailure {
    fn into_error(self, plan: &str) -> RolloutError {
        let plan = plan.to_string();
        match self {
            GateFailure::FailedRun => RolloutError::PlanCheckFailed(plan),
            GateFailure::CanceledRun => RolloutError::PlanCheckCanceled(plan),
            GateFailure::ErrorResult => RolloutError::PlanCheckError(plan),
            GateFailure::WarningResult => RolloutError::PlanCheckWarning(plan),
        }
    }
}
