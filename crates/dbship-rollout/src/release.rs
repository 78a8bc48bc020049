//! Release resolution: reuse the release for a digest or create it.

use tracing::info;

use dbship_core::{Release, ReleaseFile, RolloutService, VcsSource};

use crate::error::{RolloutError, RolloutResult};

/// Return the release in `project` whose digest is `digest`, creating it
/// from `files` when none exists.
///
/// At most one release is created per digest, so a run that crashed after
/// this point can be repeated safely.
pub async fn resolve_or_create_release<S: RolloutService + ?Sized>(
    service: &S,
    project: &str,
    files: &[ReleaseFile],
    digest: &str,
    vcs_source: Option<VcsSource>,
    title: &str,
) -> RolloutResult<Release> {
    if files.is_empty() {
        return Err(RolloutError::EmptyRelease);
    }

    if let Some(existing) = service
        .get_release_by_digest(project, digest)
        .await
        .map_err(RolloutError::service("get release by digest"))?
    {
        info!(release = %existing.name, %digest, "reusing release with matching digest");
        return Ok(existing);
    }

    let release = Release {
        name: String::new(),
        title: title.to_string(),
        digest: digest.to_string(),
        files: files.to_vec(),
        vcs_source,
    };
    let created = service
        .create_release(project, &release)
        .await
        .map_err(RolloutError::service("create release"))?;
    info!(release = %created.name, files = files.len(), "release created");
    Ok(created)
}
