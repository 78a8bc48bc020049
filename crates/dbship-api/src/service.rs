//! `RolloutService` over the dbship HTTP API.
//!
//! Resource names map straight onto paths (`/v1/{name}`); actions use the
//! `:verb` suffix. Release file statements travel base64-encoded.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use dbship_core::{
    collect_pages, ChangeType, CheckReleaseResponse, Page, Plan, PlanCheckRun, Release,
    ReleaseFile, Rollout, RolloutService, ServiceError, ServiceResult, StageTarget, TaskRun,
    VcsSource,
};

use crate::client::{ApiClient, Query};

/// Page size requested from list endpoints.
pub const PAGE_SIZE: u32 = 1000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireReleaseFile {
    path: String,
    version: String,
    change_type: ChangeType,
    /// Base64 of the statement bytes.
    statement: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WireRelease {
    name: String,
    title: String,
    digest: String,
    files: Vec<WireReleaseFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vcs_source: Option<VcsSource>,
}

impl From<&Release> for WireRelease {
    fn from(release: &Release) -> Self {
        Self {
            name: release.name.clone(),
            title: release.title.clone(),
            digest: release.digest.clone(),
            files: release
                .files
                .iter()
                .map(|f| WireReleaseFile {
                    path: f.path.clone(),
                    version: f.version.clone(),
                    change_type: f.change_type,
                    statement: STANDARD.encode(f.statement.as_bytes()),
                })
                .collect(),
            vcs_source: release.vcs_source.clone(),
        }
    }
}

impl WireRelease {
    fn into_release(self) -> ServiceResult<Release> {
        let files = self
            .files
            .into_iter()
            .map(|f| {
                let bytes = STANDARD.decode(&f.statement).map_err(|e| {
                    ServiceError::Decode(format!("statement of {}: {e}", f.path))
                })?;
                let statement = String::from_utf8(bytes).map_err(|e| {
                    ServiceError::Decode(format!("statement of {}: {e}", f.path))
                })?;
                Ok(ReleaseFile {
                    path: f.path,
                    version: f.version,
                    change_type: f.change_type,
                    statement,
                })
            })
            .collect::<ServiceResult<Vec<_>>>()?;
        Ok(Release {
            name: self.name,
            title: self.title,
            digest: self.digest,
            files,
            vcs_source: self.vcs_source,
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ListReleasesResponse {
    releases: Vec<WireRelease>,
    next_page_token: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ListPlanCheckRunsResponse {
    plan_check_runs: Vec<PlanCheckRun>,
    next_page_token: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RunPlanChecksResponse {
    plan_check_runs: Vec<PlanCheckRun>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ListTaskRunsResponse {
    task_runs: Vec<TaskRun>,
    next_page_token: String,
}

#[derive(Serialize)]
struct CheckReleaseRequest<'a> {
    release: WireRelease,
    targets: &'a [String],
}

#[derive(Serialize)]
struct BatchRunTasksRequest<'a> {
    tasks: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchCancelTaskRunsRequest<'a> {
    task_runs: &'a [String],
}

#[derive(Serialize)]
struct Empty {}

/// Answer of calls whose body carries nothing we use.
#[derive(Deserialize)]
struct Ignored {}

fn list_query(page_token: &str) -> Query {
    let query = Query::new().push("page_size", PAGE_SIZE.to_string());
    if page_token.is_empty() {
        query
    } else {
        query.push("page_token", page_token)
    }
}

fn rollout_query(target: &StageTarget, validate_only: bool) -> Query {
    let mut query = Query::new();
    if let Some(target) = target.as_param() {
        query = query.push("target", target);
    }
    if validate_only {
        query = query.push("validate_only", "true");
    }
    query
}

#[async_trait]
impl RolloutService for ApiClient {
    async fn get_release_by_digest(
        &self,
        project: &str,
        digest: &str,
    ) -> ServiceResult<Option<Release>> {
        let path = format!("/v1/{project}/releases");
        let releases = collect_pages(|token| {
            let path = path.as_str();
            async move {
                let response: ListReleasesResponse = self.get(path, &list_query(&token)).await?;
                Ok(Page {
                    items: response.releases,
                    next_page_token: response.next_page_token,
                })
            }
        })
        .await?;

        releases
            .into_iter()
            .find(|r| r.digest == digest)
            .map(WireRelease::into_release)
            .transpose()
    }

    async fn create_release(&self, project: &str, release: &Release) -> ServiceResult<Release> {
        let created: WireRelease = self
            .post(
                &format!("/v1/{project}/releases"),
                &Query::new(),
                &WireRelease::from(release),
            )
            .await?;
        created.into_release()
    }

    async fn check_release(
        &self,
        project: &str,
        files: &[ReleaseFile],
        targets: &[String],
    ) -> ServiceResult<CheckReleaseResponse> {
        let release = Release {
            files: files.to_vec(),
            ..Default::default()
        };
        self.post(
            &format!("/v1/{project}/releases:check"),
            &Query::new(),
            &CheckReleaseRequest {
                release: WireRelease::from(&release),
                targets,
            },
        )
        .await
    }

    async fn create_plan(&self, project: &str, plan: &Plan) -> ServiceResult<Plan> {
        self.post(&format!("/v1/{project}/plans"), &Query::new(), plan)
            .await
    }

    async fn get_plan(&self, name: &str) -> ServiceResult<Plan> {
        self.get(&format!("/v1/{name}"), &Query::new()).await
    }

    async fn run_plan_checks(&self, plan: &str) -> ServiceResult<Vec<PlanCheckRun>> {
        let response: RunPlanChecksResponse = self
            .post(&format!("/v1/{plan}:runPlanChecks"), &Query::new(), &Empty {})
            .await?;
        Ok(response.plan_check_runs)
    }

    async fn list_plan_check_runs(
        &self,
        plan: &str,
        page_token: &str,
    ) -> ServiceResult<Page<PlanCheckRun>> {
        let response: ListPlanCheckRunsResponse = self
            .get(&format!("/v1/{plan}/planCheckRuns"), &list_query(page_token))
            .await?;
        Ok(Page {
            items: response.plan_check_runs,
            next_page_token: response.next_page_token,
        })
    }

    async fn create_rollout(
        &self,
        project: &str,
        rollout: &Rollout,
        target: &StageTarget,
        validate_only: bool,
    ) -> ServiceResult<Rollout> {
        self.post(
            &format!("/v1/{project}/rollouts"),
            &rollout_query(target, validate_only),
            rollout,
        )
        .await
    }

    async fn get_rollout(&self, name: &str) -> ServiceResult<Rollout> {
        self.get(&format!("/v1/{name}"), &Query::new()).await
    }

    async fn batch_run_tasks(&self, stage: &str, tasks: &[String]) -> ServiceResult<()> {
        let _: Ignored = self
            .post(
                &format!("/v1/{stage}/tasks:batchRun"),
                &Query::new(),
                &BatchRunTasksRequest { tasks },
            )
            .await?;
        Ok(())
    }

    async fn list_task_runs(&self, parent: &str, page_token: &str) -> ServiceResult<Page<TaskRun>> {
        let response: ListTaskRunsResponse = self
            .get(&format!("/v1/{parent}/taskRuns"), &list_query(page_token))
            .await?;
        Ok(Page {
            items: response.task_runs,
            next_page_token: response.next_page_token,
        })
    }

    async fn batch_cancel_task_runs(
        &self,
        parent: &str,
        task_runs: &[String],
    ) -> ServiceResult<()> {
        let _: Ignored = self
            .post(
                &format!("/v1/{parent}/taskRuns:batchCancel"),
                &Query::new(),
                &BatchCancelTaskRunsRequest { task_runs },
            )
            .await?;
        Ok(())
    }
}
