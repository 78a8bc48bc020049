//! Run configuration and the optional `dbship.toml` file.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Interval between polls of plan checks and rollout state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0} is required and cannot be empty")]
    Missing(&'static str),

    #[error("invalid URL {0}: must start with http:// or https://")]
    InvalidUrl(String),

    #[error("invalid project format {0}, must be projects/{{project}}")]
    InvalidProject(String),

    #[error("invalid target format {0}, must be instances/{{instance}}/databases/{{database}}")]
    InvalidTarget(String),

    #[error(
        "invalid check-plan value: {0}. Valid values: SKIP, FAIL_ON_WARNING, FAIL_ON_ERROR"
    )]
    InvalidCheckPlan(String),
}

/// How strictly plan check results gate the rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckPlanMode {
    /// Do not run plan checks.
    #[default]
    Skip,
    /// Fail on any warning or error result.
    FailOnWarning,
    /// Fail on error results only.
    FailOnError,
}

impl FromStr for CheckPlanMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SKIP" => Ok(CheckPlanMode::Skip),
            "FAIL_ON_WARNING" => Ok(CheckPlanMode::FailOnWarning),
            "FAIL_ON_ERROR" => Ok(CheckPlanMode::FailOnError),
            other => Err(ConfigError::InvalidCheckPlan(other.to_string())),
        }
    }
}

impl fmt::Display for CheckPlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckPlanMode::Skip => "SKIP",
            CheckPlanMode::FailOnWarning => "FAIL_ON_WARNING",
            CheckPlanMode::FailOnError => "FAIL_ON_ERROR",
        })
    }
}

/// Everything one orchestration run needs, fixed before the run starts.
#[derive(Debug, Clone)]
pub struct RolloutConfig {
    /// `projects/{project}`
    pub project: String,
    /// `instances/{instance}/databases/{database}` targets.
    pub targets: Vec<String>,
    pub release_title: String,
    pub rollout_title: String,
    pub check_plan: CheckPlanMode,
    /// `environments/{environment}`; empty means create the rollout only.
    pub target_stage: String,
    /// Existing plan to roll out instead of creating a release and plan.
    pub plan: Option<String>,
    pub poll_interval: Duration,
}

impl RolloutConfig {
    /// A config with default titles, checks skipped and no target stage.
    pub fn new(project: &str, targets: Vec<String>) -> Self {
        Self {
            project: project.to_string(),
            targets,
            release_title: String::new(),
            rollout_title: String::new(),
            check_plan: CheckPlanMode::default(),
            target_stage: String::new(),
            plan: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_project(&self.project)?;
        if self.plan.is_none() {
            for target in &self.targets {
                validate_target(target)?;
            }
        }
        Ok(())
    }
}

// ── dbship.toml ────────────────────────────────────────────────────

/// Contents of `dbship.toml`. Every field is optional; command-line
/// flags take precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub rollout: RolloutSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    pub url: Option<String>,
    pub service_account: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolloutSection {
    pub project: Option<String>,
    pub targets: Option<Vec<String>>,
    pub file_pattern: Option<String>,
    pub check_plan: Option<CheckPlanMode>,
    pub target_stage: Option<String>,
    /// Poll interval in seconds.
    pub poll_interval: Option<u64>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FileConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

// ── Validation ─────────────────────────────────────────────────────

/// Canonicalize a server URL: require an http(s) scheme and drop trailing `/`.
pub fn canonical_url(url: &str) -> Result<String, ConfigError> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ConfigError::InvalidUrl(url.to_string()))?;
    if rest.trim_end_matches('/').is_empty() {
        return Err(ConfigError::InvalidUrl(url.to_string()));
    }
    Ok(url.trim_end_matches('/').to_string())
}

pub fn validate_project(project: &str) -> Result<(), ConfigError> {
    match project.strip_prefix("projects/") {
        Some(id) if !id.is_empty() && !id.contains('/') => Ok(()),
        _ => Err(ConfigError::InvalidProject(project.to_string())),
    }
}

pub fn validate_target(target: &str) -> Result<(), ConfigError> {
    let valid = target
        .strip_prefix("instances/")
        .and_then(|rest| rest.split_once("/databases/"))
        .is_some_and(|(instance, database)| !instance.is_empty() && !database.is_empty());
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidTarget(target.to_string()))
    }
}
