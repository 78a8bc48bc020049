use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use tracing::info;

use dbship_api::ApiClient;
use dbship_core::config::{canonical_url, validate_project, validate_target, ConfigError};
use dbship_core::{files, FileConfig};
use dbship_rollout::CheckSummary;

#[derive(Args, Debug, Default)]
pub struct CheckArgs {
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
}

#[derive(Debug)]
pub struct CheckSettings {
    pub url: String,
    pub service_account: String,
    pub secret: String,
    pub project: String,
    pub targets: Vec<String>,
    pub file_pattern: String,
}

impl CheckSettings {
    pub fn resolve(args: CheckArgs, file: FileConfig) -> Result<Self, ConfigError> {
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
        let targets = if args.targets.is_empty() {
            file.rollout.targets.unwrap_or_default()
        } else {
            args.targets
        };
        if targets.is_empty() {
            return Err(ConfigError::Missing("targets"));
        }
        let file_pattern = non_empty(args.file_pattern.or(file.rollout.file_pattern))
            .ok_or(ConfigError::Missing("file-pattern"))?;

        validate_project(&project)?;
        for target in &targets {
            validate_target(target)?;
        }

        Ok(Self {
            url: canonical_url(&url)?,
            service_account,
            secret,
            project,
            targets,
            file_pattern,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Fail the command when the review found errors. Warnings only log.
fn verdict(summary: CheckSummary) -> anyhow::Result<()> {
    if summary.errors > 0 {
        anyhow::bail!(
            "release check found {} error(s) and {} warning(s)",
            summary.errors,
            summary.warnings
        );
    }
    Ok(())
}

pub async fn check(args: CheckArgs) -> anyhow::Result<()> {
    let file = match &args.config {
        Some(path) => FileConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => FileConfig::default(),
    };
    let settings = CheckSettings::resolve(args, file)?;

    let release_files = files::discover(Path::new("."), &settings.file_pattern)?;
    info!(count = release_files.len(), pattern = %settings.file_pattern, "release files found");

    let mut client = ApiClient::new(&settings.url)?;
    client
        .login(&settings.service_account, &settings.secret)
        .await
        .with_context(|| format!("failed to log in to {}", settings.url))?;

    let summary = dbship_rollout::check_release(
        &client,
        &settings.project,
        &release_files,
        &settings.targets,
    )
    .await?;
    verdict(summary)
}
