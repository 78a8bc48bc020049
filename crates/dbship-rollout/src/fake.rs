//! In-memory `RolloutService` for tests.
//!
//! Simulates just enough of the server: releases keyed by digest, one plan,
//! scripted plan check listings, and one rollout whose stages follow the
//! plan's environments. Every call is recorded in order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use dbship_core::*;

use crate::cancel::CancelHandle;

pub const PROJECT: &str = "projects/hr";
pub const ROLLOUT: &str = "projects/hr/rollouts/1";

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    GetReleaseByDigest(String),
    CreateRelease(String),
    CheckRelease { files: usize, targets: Vec<String> },
    CreatePlan,
    GetPlan(String),
    RunPlanChecks(String),
    ListPlanCheckRuns(String),
    CreateRollout { target: StageTarget, validate_only: bool },
    GetRollout,
    BatchRunTasks { stage: String, tasks: Vec<String> },
    ListTaskRuns(String),
    BatchCancelTaskRuns { parent: String, task_runs: Vec<String> },
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    releases: Vec<Release>,
    check_response: CheckReleaseResponse,
    plan: Option<Plan>,

    /// Listings served to successive check polls; each is a list of pages.
    check_listings: VecDeque<Vec<Vec<PlanCheckRun>>>,
    current_listing: Vec<Vec<PlanCheckRun>>,

    environments: Vec<String>,
    tasks_per_stage: HashMap<String, usize>,
    final_status: HashMap<String, TaskStatus>,
    rollout: Option<Rollout>,
    /// Polls during which triggered tasks still report NOT_STARTED.
    trigger_lag: usize,
    lag_remaining: HashMap<String, usize>,
    triggered: HashSet<String>,
    cancel_after_gets: Option<(usize, CancelHandle)>,
    gets: usize,
    /// Served once by the next `get_rollout`.
    get_failure: Option<ServiceError>,
    /// Non-conflict error every `batch_run_tasks` fails with.
    batch_run_failure: Option<String>,

    task_runs: Vec<TaskRun>,
    failing_cancels: HashSet<String>,
}

pub struct FakeService {
    state: Mutex<State>,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Environments the plan's rollout will have, in order. Every stage
    /// gets two tasks unless overridden.
    pub fn with_environments(self, envs: &[&str]) -> Self {
        {
            let mut state = self.lock();
            state.environments = envs.iter().map(|e| e.to_string()).collect();
            for env in envs {
                state.tasks_per_stage.insert(env.to_string(), 2);
            }
        }
        self
    }

    pub fn with_tasks(self, env: &str, count: usize) -> Self {
        self.lock().tasks_per_stage.insert(env.to_string(), count);
        self
    }

    /// Status triggered tasks of `env` reach on the next poll.
    pub fn with_final_status(self, env: &str, status: TaskStatus) -> Self {
        self.lock().final_status.insert(env.to_string(), status);
        self
    }

    pub fn with_trigger_lag(self, polls: usize) -> Self {
        self.lock().trigger_lag = polls;
        self
    }

    pub fn with_release(self, release: Release) -> Self {
        self.lock().releases.push(release);
        self
    }

    pub fn with_check_response(self, response: CheckReleaseResponse) -> Self {
        self.lock().check_response = response;
        self
    }

    pub fn with_plan(self, plan: Plan) -> Self {
        self.lock().plan = Some(plan);
        self
    }

    /// Queue one check listing (a list of pages) for the next poll.
    pub fn push_check_listing(&self, pages: Vec<Vec<PlanCheckRun>>) {
        self.lock().check_listings.push_back(pages);
    }

    /// Pretend an earlier run already materialized stages up to `env`.
    pub fn materialize_up_to(&self, env: &str) {
        let mut state = self.lock();
        state.materialize(env);
    }

    /// Set the status of every task in the stage for `env`.
    pub fn set_stage_status(&self, env: &str, status: TaskStatus) {
        let mut state = self.lock();
        if let Some(stage) = state
            .rollout
            .as_mut()
            .and_then(|r| r.stages.iter_mut().find(|s| s.environment == env))
        {
            for task in &mut stage.tasks {
                task.status = status;
            }
        }
    }

    pub fn cancel_after_gets(&self, gets: usize, handle: CancelHandle) {
        self.lock().cancel_after_gets = Some((gets, handle));
    }

    pub fn with_task_runs(self, runs: Vec<TaskRun>) -> Self {
        self.lock().task_runs = runs;
        self
    }

    pub fn fail_gets_with(&self, err: ServiceError) {
        self.lock().get_failure = Some(err);
    }

    pub fn fail_batch_runs(self, message: &str) -> Self {
        self.lock().batch_run_failure = Some(message.to_string());
        self
    }

    pub fn fail_cancel_for(&self, stage: &str) {
        self.lock().failing_cancels.insert(stage.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    /// Targets of non-preview `create_rollout` calls, in order.
    pub fn rollout_targets(&self) -> Vec<StageTarget> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::CreateRollout {
                    target,
                    validate_only: false,
                } => Some(target.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn releases(&self) -> Vec<Release> {
        self.lock().releases.clone()
    }

    pub fn rollout(&self) -> Option<Rollout> {
        self.lock().rollout.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl State {
    fn ensure_rollout(&mut self, plan: &str) -> &mut Rollout {
        self.rollout.get_or_insert_with(|| Rollout {
            name: ROLLOUT.to_string(),
            plan: plan.to_string(),
            title: String::new(),
            stages: Vec::new(),
        })
    }

    fn stage_for(&self, env: &str) -> Stage {
        let id = env.trim_start_matches("environments/");
        let name = format!("{ROLLOUT}/stages/{id}");
        let count = self.tasks_per_stage.get(env).copied().unwrap_or(2);
        Stage {
            tasks: (1..=count)
                .map(|k| Task {
                    name: format!("{name}/tasks/{k}"),
                    status: TaskStatus::NotStarted,
                })
                .collect(),
            name,
            environment: env.to_string(),
        }
    }

    fn materialize(&mut self, env: &str) -> bool {
        let Some(pos) = self.environments.iter().position(|e| e == env) else {
            return false;
        };
        let wanted: Vec<Stage> = self.environments[..=pos]
            .iter()
            .map(|e| self.stage_for(e))
            .collect();
        let rollout = self.ensure_rollout("");
        for stage in wanted.into_iter().skip(rollout.stages.len()) {
            rollout.stages.push(stage);
        }
        true
    }

    fn advance_tasks(&mut self) {
        let final_status = self.final_status.clone();
        let mut lag = std::mem::take(&mut self.lag_remaining);
        if let Some(rollout) = self.rollout.as_mut() {
            for stage in &mut rollout.stages {
                for task in &mut stage.tasks {
                    if task.status != TaskStatus::Running {
                        continue;
                    }
                    let remaining = lag.entry(task.name.clone()).or_insert(0);
                    if *remaining > 0 {
                        *remaining -= 1;
                        continue;
                    }
                    task.status = final_status
                        .get(&stage.environment)
                        .copied()
                        .unwrap_or(TaskStatus::Done);
                }
            }
        }
        self.lag_remaining = lag;
    }

    /// Snapshot as reported to clients: lagging tasks still look NOT_STARTED.
    fn reported_rollout(&self) -> Option<Rollout> {
        let mut rollout = self.rollout.clone()?;
        for stage in &mut rollout.stages {
            for task in &mut stage.tasks {
                if self.lag_remaining.get(&task.name).is_some_and(|n| *n > 0) {
                    task.status = TaskStatus::NotStarted;
                }
            }
        }
        Some(rollout)
    }
}

fn not_found(what: &str) -> ServiceError {
    ServiceError::Status {
        code: 5,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl RolloutService for FakeService {
    async fn get_release_by_digest(
        &self,
        _project: &str,
        digest: &str,
    ) -> ServiceResult<Option<Release>> {
        let mut state = self.lock();
        state.calls.push(Call::GetReleaseByDigest(digest.to_string()));
        Ok(state.releases.iter().find(|r| r.digest == digest).cloned())
    }

    async fn create_release(&self, project: &str, release: &Release) -> ServiceResult<Release> {
        let mut state = self.lock();
        state.calls.push(Call::CreateRelease(release.digest.clone()));
        let mut created = release.clone();
        created.name = format!("{project}/releases/{}", state.releases.len() + 1);
        state.releases.push(created.clone());
        Ok(created)
    }

    async fn check_release(
        &self,
        _project: &str,
        files: &[ReleaseFile],
        targets: &[String],
    ) -> ServiceResult<CheckReleaseResponse> {
        let mut state = self.lock();
        state.calls.push(Call::CheckRelease {
            files: files.len(),
            targets: targets.to_vec(),
        });
        Ok(state.check_response.clone())
    }

    async fn create_plan(&self, project: &str, plan: &Plan) -> ServiceResult<Plan> {
        let mut state = self.lock();
        state.calls.push(Call::CreatePlan);
        let mut created = plan.clone();
        created.name = format!("{project}/plans/1");
        state.plan = Some(created.clone());
        Ok(created)
    }

    async fn get_plan(&self, name: &str) -> ServiceResult<Plan> {
        let mut state = self.lock();
        state.calls.push(Call::GetPlan(name.to_string()));
        state
            .plan
            .clone()
            .filter(|p| p.name == name)
            .ok_or_else(|| not_found(name))
    }

    async fn run_plan_checks(&self, plan: &str) -> ServiceResult<Vec<PlanCheckRun>> {
        let mut state = self.lock();
        state.calls.push(Call::RunPlanChecks(plan.to_string()));
        Ok(Vec::new())
    }

    async fn list_plan_check_runs(
        &self,
        plan: &str,
        page_token: &str,
    ) -> ServiceResult<Page<PlanCheckRun>> {
        let mut state = self.lock();
        state.calls.push(Call::ListPlanCheckRuns(page_token.to_string()));
        if plan.is_empty() {
            return Err(not_found("plan"));
        }
        if page_token.is_empty() {
            if let Some(next) = state.check_listings.pop_front() {
                state.current_listing = next;
            }
        }
        let index: usize = page_token.parse().unwrap_or(0);
        let pages = &state.current_listing;
        let items = pages.get(index).cloned().unwrap_or_default();
        let next_page_token = if index + 1 < pages.len() {
            (index + 1).to_string()
        } else {
            String::new()
        };
        Ok(Page {
            items,
            next_page_token,
        })
    }

    async fn create_rollout(
        &self,
        _project: &str,
        rollout: &Rollout,
        target: &StageTarget,
        validate_only: bool,
    ) -> ServiceResult<Rollout> {
        let mut state = self.lock();
        state.calls.push(Call::CreateRollout {
            target: target.clone(),
            validate_only,
        });
        if validate_only {
            let stages = state.environments.iter().map(|e| state.stage_for(e)).collect();
            return Ok(Rollout {
                name: String::new(),
                plan: rollout.plan.clone(),
                title: rollout.title.clone(),
                stages,
            });
        }
        state.ensure_rollout(&rollout.plan);
        if let StageTarget::UpTo(env) = target {
            if !state.materialize(env) {
                return Err(ServiceError::Status {
                    code: 3,
                    message: format!("stage {env} not found in plan"),
                });
            }
        }
        Ok(state.reported_rollout().unwrap_or_default())
    }

    async fn get_rollout(&self, name: &str) -> ServiceResult<Rollout> {
        let mut state = self.lock();
        state.calls.push(Call::GetRollout);
        if let Some(err) = state.get_failure.take() {
            return Err(err);
        }
        state.gets += 1;
        if let Some((after, handle)) = &state.cancel_after_gets {
            if state.gets >= *after {
                handle.cancel();
            }
        }
        state.advance_tasks();
        state
            .reported_rollout()
            .filter(|r| r.name == name)
            .ok_or_else(|| not_found(name))
    }

    async fn batch_run_tasks(&self, stage: &str, tasks: &[String]) -> ServiceResult<()> {
        let mut state = self.lock();
        state.calls.push(Call::BatchRunTasks {
            stage: stage.to_string(),
            tasks: tasks.to_vec(),
        });
        if let Some(message) = &state.batch_run_failure {
            return Err(ServiceError::Status {
                code: 9,
                message: message.clone(),
            });
        }
        if tasks.iter().any(|t| state.triggered.contains(t)) {
            return Err(ServiceError::task_run_conflict());
        }
        let lag = state.trigger_lag;
        for task_name in tasks {
            state.triggered.insert(task_name.clone());
            state.lag_remaining.insert(task_name.clone(), lag);
        }
        if let Some(rollout) = state.rollout.as_mut() {
            for task in rollout
                .stages
                .iter_mut()
                .flat_map(|s| s.tasks.iter_mut())
                .filter(|t| tasks.contains(&t.name))
            {
                task.status = TaskStatus::Running;
            }
        }
        Ok(())
    }

    async fn list_task_runs(&self, parent: &str, page_token: &str) -> ServiceResult<Page<TaskRun>> {
        let mut state = self.lock();
        state.calls.push(Call::ListTaskRuns(parent.to_string()));
        // Serve one run per page to exercise pagination.
        let index: usize = page_token.parse().unwrap_or(0);
        let items: Vec<TaskRun> = state.task_runs.get(index).cloned().into_iter().collect();
        let next_page_token = if index + 1 < state.task_runs.len() {
            (index + 1).to_string()
        } else {
            String::new()
        };
        Ok(Page {
            items,
            next_page_token,
        })
    }

    async fn batch_cancel_task_runs(
        &self,
        parent: &str,
        task_runs: &[String],
    ) -> ServiceResult<()> {
        let mut state = self.lock();
        state.calls.push(Call::BatchCancelTaskRuns {
            parent: parent.to_string(),
            task_runs: task_runs.to_vec(),
        });
        let stage = parent.trim_end_matches("/tasks/-");
        if state.failing_cancels.contains(stage) {
            return Err(ServiceError::Transport(format!("cancel {stage} refused")));
        }
        for run in state.task_runs.iter_mut() {
            if task_runs.contains(&run.name) {
                run.status = TaskRunStatus::Canceled;
            }
        }
        Ok(())
    }
}

/// A plan check run with the given status and result statuses.
pub fn check_run(status: PlanCheckRunStatus, results: &[CheckResultStatus]) -> PlanCheckRun {
    PlanCheckRun {
        name: String::new(),
        status,
        results: results
            .iter()
            .map(|s| PlanCheckResult {
                status: *s,
                ..Default::default()
            })
            .collect(),
    }
}

pub fn task_run(stage: &str, task: u32, status: TaskRunStatus) -> TaskRun {
    TaskRun {
        name: format!("{ROLLOUT}/stages/{stage}/tasks/{task}/taskRuns/1"),
        status,
    }
}
