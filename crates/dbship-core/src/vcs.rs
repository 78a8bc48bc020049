//! CI platform detection for release provenance.

use crate::types::{VcsSource, VcsType};

/// Detect the commit being built from the CI environment.
pub fn detect() -> Option<VcsSource> {
    detect_with(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
}

/// Detect provenance using `lookup` to read environment variables.
pub fn detect_with<F>(lookup: F) -> Option<VcsSource>
where
    F: Fn(&str) -> Option<String>,
{
    if lookup("GITHUB_ACTIONS").is_some() {
        let server = lookup("GITHUB_SERVER_URL")?;
        let repo = lookup("GITHUB_REPOSITORY")?;
        let sha = lookup("GITHUB_SHA")?;
        return Some(VcsSource {
            vcs_type: VcsType::Github,
            url: format!("{}/{repo}/commit/{sha}", server.trim_end_matches('/')),
        });
    }
    if lookup("GITLAB_CI").is_some() {
        let project = lookup("CI_PROJECT_URL")?;
        let sha = lookup("CI_COMMIT_SHA")?;
        return Some(VcsSource {
            vcs_type: VcsType::Gitlab,
            url: format!("{}/-/commit/{sha}", project.trim_end_matches('/')),
        });
    }
    if lookup("BITBUCKET_BUILD_NUMBER").is_some() {
        let origin = lookup("BITBUCKET_GIT_HTTP_ORIGIN")?;
        let sha = lookup("BITBUCKET_COMMIT")?;
        return Some(VcsSource {
            vcs_type: VcsType::Bitbucket,
            url: format!("{}/commits/{sha}", origin.trim_end_matches('/')),
        });
    }
    if lookup("TF_BUILD").is_some() {
        let repo = lookup("BUILD_REPOSITORY_URI")?;
        let sha = lookup("BUILD_SOURCEVERSION")?;
        return Some(VcsSource {
            vcs_type: VcsType::AzureDevops,
            url: format!("{}/commit/{sha}", repo.trim_end_matches('/')),
        });
    }
    None
}
