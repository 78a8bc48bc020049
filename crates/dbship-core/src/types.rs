//! Resource types shared across dbship crates.
//!
//! These mirror the remote service's resources. Field names serialize to
//! camelCase and enum values to their SCREAMING_SNAKE_CASE wire names, so
//! the same types travel over the HTTP client unchanged.

use serde::{Deserialize, Serialize};

// ── Release ────────────────────────────────────────────────────────

/// How a migration file changes the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    #[default]
    Ddl,
    DdlGhost,
    Dml,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Ddl => "DDL",
            ChangeType::DdlGhost => "DDL_GHOST",
            ChangeType::Dml => "DML",
        }
    }
}

/// One versioned migration file in a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFile {
    /// Path relative to the discovery root, `/` separated.
    pub path: String,
    pub version: String,
    pub change_type: ChangeType,
    /// SQL text of the migration.
    pub statement: String,
}

/// Source-control platform a release was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VcsType {
    Github,
    Gitlab,
    Bitbucket,
    AzureDevops,
}

/// Commit a release was cut from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsSource {
    pub vcs_type: VcsType,
    pub url: String,
}

/// Immutable, digest-identified bundle of migration files.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Release {
    /// `projects/{project}/releases/{release}`, empty until created.
    pub name: String,
    pub title: String,
    pub digest: String,
    pub files: Vec<ReleaseFile>,
    pub vcs_source: Option<VcsSource>,
}

// ── Release check ──────────────────────────────────────────────────

/// Position of an advice within a statement, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    pub line: i32,
    pub column: i32,
}

/// One finding of the server's SQL review for a file on a target.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Advice {
    pub status: CheckResultStatus,
    pub code: i32,
    pub title: String,
    pub content: String,
    pub start_position: Option<Position>,
}

/// Review of one release file against one target database.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReleaseCheckResult {
    /// Path of the release file.
    pub file: String,
    pub target: String,
    pub advices: Vec<Advice>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckReleaseResponse {
    pub results: Vec<ReleaseCheckResult>,
}

// ── Plan ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeDatabaseConfig {
    /// Release name the plan applies.
    pub release: String,
    /// `instances/{instance}/databases/{database}` targets.
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanSpec {
    pub id: String,
    pub change_database_config: Option<ChangeDatabaseConfig>,
}

/// A named change specification submitted for execution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plan {
    pub name: String,
    pub title: String,
    pub specs: Vec<PlanSpec>,
}

// ── Plan checks ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanCheckRunStatus {
    #[default]
    StatusUnspecified,
    Running,
    Done,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckResultStatus {
    #[default]
    StatusUnspecified,
    Error,
    Warning,
    Success,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanCheckResult {
    pub status: CheckResultStatus,
    pub title: String,
    pub content: String,
}

/// One asynchronous pre-flight validation pass over a plan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanCheckRun {
    pub name: String,
    pub status: PlanCheckRunStatus,
    pub results: Vec<PlanCheckResult>,
}

// ── Rollout ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    StatusUnspecified,
    NotStarted,
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    /// `projects/{p}/rollouts/{r}/stages/{s}/tasks/{t}`
    pub name: String,
    pub status: TaskStatus,
}

/// One environment's worth of tasks within a rollout.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stage {
    pub name: String,
    /// `environments/{environment}`
    pub environment: String,
    pub tasks: Vec<Task>,
}

/// Server-side execution object tracking the staged application of a plan.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rollout {
    pub name: String,
    pub plan: String,
    pub title: String,
    pub stages: Vec<Stage>,
}

impl Rollout {
    /// Environments of the materialized stages, in order.
    pub fn environments(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.environment.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskRunStatus {
    #[default]
    StatusUnspecified,
    Pending,
    Running,
    Done,
    Failed,
    Canceled,
    Skipped,
}

impl TaskRunStatus {
    /// Runs that can still be cancelled.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskRunStatus::Running | TaskRunStatus::Pending)
    }
}

/// One execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskRun {
    /// `projects/{p}/rollouts/{r}/stages/{s}/tasks/{t}/taskRuns/{id}`
    pub name: String,
    pub status: TaskRunStatus,
}

impl TaskRun {
    /// The owning stage name, i.e. everything before `/tasks/`.
    pub fn stage(&self) -> &str {
        match self.name.find("/tasks/") {
            Some(idx) => &self.name[..idx],
            None => &self.name,
        }
    }
}

// ── Paging ─────────────────────────────────────────────────────────

/// One page of a list call. An empty `next_page_token` ends the listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: String,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: String::new(),
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_page_token.is_empty()
    }
}

/// How far a `create_rollout` call should materialize stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageTarget {
    /// Every pending stage. Only meaningful with `validate_only`.
    All,
    /// No stage; just create (or return) the rollout itself.
    None,
    /// Up to and including the stage for this environment.
    UpTo(String),
}

impl StageTarget {
    /// Wire form of the target: absent, empty, or the environment.
    pub fn as_param(&self) -> Option<&str> {
        match self {
            StageTarget::All => None,
            StageTarget::None => Some(""),
            StageTarget::UpTo(env) => Some(env),
        }
    }
}
