//! Rollout driver: advances a server-side rollout stage by stage.
//!
//! The remote service only offers "create the rollout up to environment X",
//! so the driver first previews every stage the plan would produce, then
//! creates an empty rollout to get a durable name, and from there
//! materializes one stage at a time:
//!
//! ```text
//! Preview ─► CreateShell ─► Reconcile ─► Poll(i) ─┬─► Poll(i+1)   stage done
//!                 │                        ▲      ├─► Trigger ─► Wait
//!                 └─► Done                 └──────┴─── Wait       in progress
//!                    (no target / unreachable)      └─► Done      target done
//! ```
//!
//! Every poll re-reads the rollout. Other actors may drive the same rollout
//! concurrently; stage creation is idempotent and duplicate task triggers
//! are tolerated, so concurrent drivers converge.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use dbship_core::{Rollout, RolloutConfig, RolloutService, Stage, StageTarget, TaskStatus};

use crate::cancel::CancelSignal;
use crate::error::{RolloutError, RolloutResult};
use crate::teardown;

/// Driver states. Each has exactly one transition in `RolloutDriver::step`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveState {
    /// Preview every stage the plan would produce.
    Preview,
    /// Create the rollout with zero stages to obtain its name.
    CreateShell,
    /// Catch up with the latest stage an earlier run materialized.
    Reconcile,
    /// Inspect stage `index`, materializing the next stage if needed.
    Poll { index: usize },
    /// Start the NOT_STARTED tasks of stage `index`.
    Trigger {
        index: usize,
        stage: String,
        tasks: Vec<String>,
    },
    /// Sleep, then poll stage `index` again.
    Wait { index: usize },
    Done,
}

/// Aggregate task state of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageProgress {
    /// Every task is DONE or SKIPPED.
    Done,
    Failed,
    Canceled,
    /// Some task is still unspecified, not started, pending or running.
    InProgress { not_started: Vec<String> },
}

impl StageProgress {
    pub fn of(stage: &Stage) -> Self {
        let mut done = true;
        let mut failed = false;
        let mut canceled = false;
        let mut not_started = Vec::new();
        for task in &stage.tasks {
            match task.status {
                TaskStatus::Done | TaskStatus::Skipped => {}
                TaskStatus::Failed => failed = true,
                TaskStatus::Canceled => canceled = true,
                TaskStatus::NotStarted => {
                    not_started.push(task.name.clone());
                    done = false;
                }
                // TODO: surface STATUS_UNSPECIFIED once the server guarantees
                // every materialized task carries a status.
                TaskStatus::StatusUnspecified | TaskStatus::Pending | TaskStatus::Running => {
                    done = false
                }
            }
        }
        if failed {
            StageProgress::Failed
        } else if canceled {
            StageProgress::Canceled
        } else if done {
            StageProgress::Done
        } else {
            StageProgress::InProgress { not_started }
        }
    }
}

pub struct RolloutDriver<'a, S: ?Sized> {
    service: &'a S,
    project: &'a str,
    plan: &'a str,
    target_stage: &'a str,
    rollout_title: &'a str,
    poll_interval: Duration,
    /// Stage environments not yet materialized, in order.
    pending: VecDeque<String>,
    rollout: Option<String>,
}

impl<'a, S: RolloutService + ?Sized> RolloutDriver<'a, S> {
    pub fn new(service: &'a S, config: &'a RolloutConfig, plan: &'a str) -> Self {
        Self {
            service,
            project: &config.project,
            plan,
            target_stage: &config.target_stage,
            rollout_title: &config.rollout_title,
            poll_interval: config.poll_interval,
            pending: VecDeque::new(),
            rollout: None,
        }
    }

    /// Name of the rollout, once created.
    pub fn rollout_name(&self) -> Option<&str> {
        self.rollout.as_deref()
    }

    /// Drive the rollout until the target stage is done.
    ///
    /// When the run fails while `cancel` is set, active task runs of the
    /// rollout are cancelled before returning. Cleanup failures are logged;
    /// the returned error stays the one that ended the run.
    pub async fn drive(&mut self, cancel: &CancelSignal) -> RolloutResult<()> {
        let result = self.run(cancel).await;
        if result.is_err() && cancel.is_cancelled() {
            if let Some(rollout) = self.rollout.as_deref() {
                info!(%rollout, "context cancelled, canceling the rollout");
                match teardown::cancel_active_task_runs(self.service, rollout).await {
                    Ok(cancelled) => info!(%rollout, cancelled, "cancelled active task runs"),
                    Err(e) => error!(%rollout, error = %e, "failed to cancel rollout"),
                }
            }
        }
        result
    }

    async fn run(&mut self, cancel: &CancelSignal) -> RolloutResult<()> {
        let mut state = DriveState::Preview;
        loop {
            // A target reached on the last poll wins over a late cancel.
            if state == DriveState::Done {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(RolloutError::Cancelled);
            }
            debug!(?state, "rollout driver step");
            state = self.step(state).await?;
        }
    }

    /// Run the transition for `state` and return the next state.
    pub async fn step(&mut self, state: DriveState) -> RolloutResult<DriveState> {
        match state {
            DriveState::Preview => self.preview().await,
            DriveState::CreateShell => self.create_shell().await,
            DriveState::Reconcile => self.reconcile().await,
            DriveState::Poll { index } => self.poll(index).await,
            DriveState::Trigger {
                index,
                stage,
                tasks,
            } => self.trigger(index, &stage, &tasks).await,
            DriveState::Wait { index } => {
                tokio::time::sleep(self.poll_interval).await;
                Ok(DriveState::Poll { index })
            }
            DriveState::Done => Ok(DriveState::Done),
        }
    }

    async fn preview(&mut self) -> RolloutResult<DriveState> {
        let preview = self
            .service
            .create_rollout(self.project, &self.shape(), &StageTarget::All, true)
            .await
            .map_err(RolloutError::service("preview rollout"))?;
        self.pending = preview.stages.into_iter().map(|s| s.environment).collect();
        info!(
            stage_count = self.pending.len(),
            stages = ?self.pending,
            "the rollout has the following stages"
        );
        Ok(DriveState::CreateShell)
    }

    async fn create_shell(&mut self) -> RolloutResult<DriveState> {
        let shell = self.create(StageTarget::None).await?;
        info!(rollout = %shell.name, "rollout created");
        let reachable = shell.environments().contains(&self.target_stage)
            || self.pending.iter().any(|env| env == self.target_stage);
        self.rollout = Some(shell.name);

        if self.target_stage.is_empty() {
            info!("no target stage, leaving the rollout unstarted");
            return Ok(DriveState::Done);
        }
        if !reachable {
            info!(
                target_stage = %self.target_stage,
                stages = ?self.pending,
                "target stage is not part of this rollout, nothing to run"
            );
            return Ok(DriveState::Done);
        }
        info!(target_stage = %self.target_stage, "exit after the target stage is completed");
        Ok(DriveState::Reconcile)
    }

    async fn reconcile(&mut self) -> RolloutResult<DriveState> {
        let rollout = self.get().await?;
        if let Some(latest) = rollout.stages.last() {
            if let Some(pos) = self.pending.iter().position(|e| *e == latest.environment) {
                self.pending.drain(..=pos);
                info!(
                    stage = %latest.environment,
                    "resuming rollout from the latest materialized stage"
                );
                self.create(StageTarget::UpTo(latest.environment.clone()))
                    .await?;
            }
        }
        Ok(DriveState::Poll { index: 0 })
    }

    async fn poll(&mut self, index: usize) -> RolloutResult<DriveState> {
        let mut rollout = self.get().await?;
        if index >= rollout.stages.len() {
            let Some(next) = self.pending.pop_front() else {
                return Err(RolloutError::NoMoreStages(rollout.name));
            };
            info!(stage = %next, "advancing rollout to the next stage");
            rollout = self.create(StageTarget::UpTo(next)).await?;
            if index >= rollout.stages.len() {
                return Err(RolloutError::NoMoreStages(rollout.name));
            }
        }

        let stage = &rollout.stages[index];
        match StageProgress::of(stage) {
            StageProgress::Failed => Err(RolloutError::TaskFailed(stage.environment.clone())),
            StageProgress::Canceled => Err(RolloutError::TaskCanceled(stage.environment.clone())),
            StageProgress::Done => {
                info!(stage = %stage.environment, "stage completed");
                if stage.environment == self.target_stage {
                    Ok(DriveState::Done)
                } else {
                    Ok(DriveState::Poll { index: index + 1 })
                }
            }
            StageProgress::InProgress { not_started } if not_started.is_empty() => {
                Ok(DriveState::Wait { index })
            }
            StageProgress::InProgress { not_started } => Ok(DriveState::Trigger {
                index,
                stage: stage.name.clone(),
                tasks: not_started,
            }),
        }
    }

    async fn trigger(
        &mut self,
        index: usize,
        stage: &str,
        tasks: &[String],
    ) -> RolloutResult<DriveState> {
        match self.service.batch_run_tasks(stage, tasks).await {
            Ok(()) => info!(%stage, tasks = tasks.len(), "started stage tasks"),
            Err(e) if e.is_task_run_conflict() => {
                warn!(%stage, error = %e, "tasks already have runs, continuing to poll")
            }
            Err(e) => return Err(RolloutError::service("batch run tasks")(e)),
        }
        Ok(DriveState::Wait { index })
    }

    fn shape(&self) -> Rollout {
        Rollout {
            plan: self.plan.to_string(),
            title: self.rollout_title.to_string(),
            ..Default::default()
        }
    }

    async fn create(&self, target: StageTarget) -> RolloutResult<Rollout> {
        self.service
            .create_rollout(self.project, &self.shape(), &target, false)
            .await
            .map_err(RolloutError::service("create rollout"))
    }

    async fn get(&self) -> RolloutResult<Rollout> {
        let name = self.rollout.as_deref().ok_or(RolloutError::NotCreated)?;
        self.service
            .get_rollout(name)
            .await
            .map_err(RolloutError::service("get rollout"))
    }
}
