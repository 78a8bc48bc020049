use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tracing::{error, info, warn};

use dbship_api::ApiClient;
use dbship_core::config::{canonical_url, ConfigError, DEFAULT_POLL_INTERVAL};
use dbship_core::{files, vcs, CheckPlanMode, FileConfig, RolloutConfig};
use dbship_rollout::{Orchestrator, RolloutError, RunRecord};

#[derive(Args, Debug, Default)]
pub struct RolloutArgs {
    /// Path to a dbship.toml file. Flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Server URL, e.g. https://dbship.example.com
    #[arg(long)]
    pub url: Option<String>,

    /// Service account email.
    #[arg(long)]
    pub service_account: Option<String>,

    /// Service account secret.
    #[arg(long, env = "DBSHIP_SERVICE_ACCOUNT_SECRET", hide_env_values = true)]
    pub service_account_secret: Option<String>,

    /// Project, as projects/{project}.
    #[arg(long)]
    pub project: Option<String>,

    /// Comma-separated databases, as instances/{instance}/databases/{database}.
    #[arg(long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Glob selecting migration files, relative to the working directory.
    #[arg(long)]
    pub file_pattern: Option<String>,

    /// Release title (default: the rollout title).
    #[arg(long)]
    pub release_title: Option<String>,

    /// Plan and rollout title (default: the current time).
    #[arg(long)]
    pub rollout_title: Option<String>,

    /// SKIP, FAIL_ON_WARNING or FAIL_ON_ERROR.
    #[arg(long)]
    pub check_plan: Option<CheckPlanMode>,

    /// Last environment to roll out to, as environments/{environment}.
    /// Empty creates the rollout without running any stage.
    #[arg(long)]
    pub target_stage: Option<String>,

    /// Roll out an existing plan instead of creating a release and plan.
    #[arg(long)]
    pub plan: Option<String>,

    /// Write the names of the created release, plan and rollout as JSON.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Everything a run needs, after merging flags over the config file.
#[derive(Debug)]
pub struct Settings {
    pub url: String,
    pub service_account: String,
    pub secret: String,
    /// Absent when rolling out an existing plan.
    pub file_pattern: Option<String>,
    pub output: Option<PathBuf>,
    pub config: RolloutConfig,
}

impl Settings {
    pub fn resolve(args: RolloutArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let url = args
            .url
            .or(file.server.url)
            .ok_or(ConfigError::Missing("url"))?;
        let service_account = non_empty(args.service_account.or(file.server.service_account))
            .ok_or(ConfigError::Missing("service-account"))?;
        let secret = non_empty(args.service_account_secret)
            .ok_or(ConfigError::Missing("service-account-secret"))?;
        let project = non_empty(args.project.or(file.rollout.project))
            .ok_or(ConfigError::Missing("project"))?;

        let plan = non_empty(args.plan);
        let targets = if args.targets.is_empty() {
            file.rollout.targets.unwrap_or_default()
        } else {
            args.targets
        };
        let file_pattern = non_empty(args.file_pattern.or(file.rollout.file_pattern));
        if plan.is_none() {
            if targets.is_empty() {
                return Err(ConfigError::Missing("targets"));
            }
            if file_pattern.is_none() {
                return Err(ConfigError::Missing("file-pattern"));
            }
        }

        let rollout_title = non_empty(args.rollout_title).unwrap_or_else(|| {
            chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
        });
        let mut config = RolloutConfig::new(&project, targets);
        config.release_title = non_empty(args.release_title).unwrap_or_else(|| rollout_title.clone());
        config.rollout_title = rollout_title;
        config.check_plan = args
            .check_plan
            .or(file.rollout.check_plan)
            .unwrap_or_default();
        config.target_stage = args
            .target_stage
            .or(file.rollout.target_stage)
            .unwrap_or_default();
        config.poll_interval = file
            .rollout
            .poll_interval
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        config.plan = plan;
        config.validate()?;

        Ok(Self {
            url: canonical_url(&url)?,
            service_account,
            secret,
            file_pattern: if config.plan.is_none() { file_pattern } else { None },
            output: args.output,
            config,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

pub async fn rollout(args: RolloutArgs) -> anyhow::Result<()> {
    let file = match &args.config {
        Some(path) => FileConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(args, file)?;

    let release_files = match &settings.file_pattern {
        Some(pattern) => {
            let found = files::discover(Path::new("."), pattern)?;
            info!(count = found.len(), %pattern, "release files found");
            found
        }
        None => Vec::new(),
    };

    let mut client = ApiClient::new(&settings.url)?;
    client
        .login(&settings.service_account, &settings.secret)
        .await
        .with_context(|| format!("failed to log in to {}", settings.url))?;

    let (handle, cancel) = dbship_rollout::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("signal received, cancelling rollout");
        handle.cancel();
    });

    let mut record = RunRecord::default();
    let result = Orchestrator::new(&client, &settings.config)
        .run(&release_files, vcs::detect(), &cancel, &mut record)
        .await;

    if let Some(path) = &settings.output {
        write_output(path, &record)?;
        info!(path = %path.display(), "run record written");
    }
    if let Err(e) = &result {
        error!(error = %e, "{}", failure_summary(e));
    }
    result?;

    info!(
        release = record.release.as_deref().unwrap_or("-"),
        plan = record.plan.as_deref().unwrap_or("-"),
        rollout = record.rollout.as_deref().unwrap_or("-"),
        "rollout finished"
    );
    Ok(())
}

/// Tell policy stops (plan checks, task outcomes) apart from
/// infrastructure failures and cancellation.
fn failure_summary(err: &RolloutError) -> &'static str {
    if err.is_gate_failure() {
        "rollout blocked by policy"
    } else {
        "rollout failed"
    }
}

fn write_output(path: &Path, record: &RunRecord) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
