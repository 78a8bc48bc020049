//! Release check: server-side SQL review of release files against the
//! target databases. Nothing is created.

use tracing::{debug, error, info, warn};

use dbship_core::{Advice, CheckReleaseResponse, CheckResultStatus, ReleaseFile, RolloutService};

use crate::error::{RolloutError, RolloutResult};

/// Advice counts of one release check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub errors: usize,
    pub warnings: usize,
}

impl CheckSummary {
    pub fn of(response: &CheckReleaseResponse) -> Self {
        let mut summary = Self::default();
        for advice in response.results.iter().flat_map(|r| &r.advices) {
            match advice.status {
                CheckResultStatus::Error => summary.errors += 1,
                CheckResultStatus::Warning => summary.warnings += 1,
                CheckResultStatus::Success | CheckResultStatus::StatusUnspecified => {}
            }
        }
        summary
    }
}

/// Check `files` against `targets`, logging every advice.
pub async fn check_release<S: RolloutService + ?Sized>(
    service: &S,
    project: &str,
    files: &[ReleaseFile],
    targets: &[String],
) -> RolloutResult<CheckSummary> {
    if files.is_empty() {
        return Err(RolloutError::EmptyRelease);
    }

    let response = service
        .check_release(project, files, targets)
        .await
        .map_err(RolloutError::service("check release"))?;

    for result in &response.results {
        for advice in &result.advices {
            log_advice(&result.file, &result.target, advice);
        }
    }

    let summary = CheckSummary::of(&response);
    info!(
        files = files.len(),
        targets = targets.len(),
        errors = summary.errors,
        warnings = summary.warnings,
        "release check finished"
    );
    Ok(summary)
}

fn log_advice(file: &str, target: &str, advice: &Advice) {
    let line = advice.start_position.map(|p| p.line).unwrap_or_default();
    match advice.status {
        CheckResultStatus::Error => error!(
            %file, %target, line, code = advice.code, title = %advice.title,
            "{}", advice.content
        ),
        CheckResultStatus::Warning => warn!(
            %file, %target, line, code = advice.code, title = %advice.title,
            "{}", advice.content
        ),
        CheckResultStatus::Success | CheckResultStatus::StatusUnspecified => {
            debug!(%file, %target, title = %advice.title, "check passed")
        }
    }
}
