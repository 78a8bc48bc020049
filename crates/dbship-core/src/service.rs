//! The remote rollout service consumed by the orchestration engine.
//!
//! The service is stateful and authoritative. Callers must not cache
//! anything it returns across polls.

use async_trait::async_trait;

use crate::error::ServiceResult;
use crate::types::*;

#[async_trait]
pub trait RolloutService: Send + Sync {
    /// Find the release in `project` whose digest equals `digest`.
    async fn get_release_by_digest(
        &self,
        project: &str,
        digest: &str,
    ) -> ServiceResult<Option<Release>>;

    async fn create_release(&self, project: &str, release: &Release) -> ServiceResult<Release>;

    /// Review `files` against `targets` without creating anything.
    async fn check_release(
        &self,
        project: &str,
        files: &[ReleaseFile],
        targets: &[String],
    ) -> ServiceResult<CheckReleaseResponse>;

    async fn create_plan(&self, project: &str, plan: &Plan) -> ServiceResult<Plan>;

    async fn get_plan(&self, name: &str) -> ServiceResult<Plan>;

    /// Trigger the plan checks for `plan`.
    async fn run_plan_checks(&self, plan: &str) -> ServiceResult<Vec<PlanCheckRun>>;

    async fn list_plan_check_runs(
        &self,
        plan: &str,
        page_token: &str,
    ) -> ServiceResult<Page<PlanCheckRun>>;

    /// Create (or preview, with `validate_only`) a rollout for `rollout.plan`,
    /// materializing stages as far as `target`.
    async fn create_rollout(
        &self,
        project: &str,
        rollout: &Rollout,
        target: &StageTarget,
        validate_only: bool,
    ) -> ServiceResult<Rollout>;

    async fn get_rollout(&self, name: &str) -> ServiceResult<Rollout>;

    /// Start runs for `tasks` of `stage`.
    async fn batch_run_tasks(&self, stage: &str, tasks: &[String]) -> ServiceResult<()>;

    /// List task runs under `parent`; `-` segments act as wildcards.
    async fn list_task_runs(&self, parent: &str, page_token: &str) -> ServiceResult<Page<TaskRun>>;

    async fn batch_cancel_task_runs(&self, parent: &str, task_runs: &[String])
    -> ServiceResult<()>;
}

/// Drain a paginated list call into one vector.
///
/// `fetch` receives the page token to request and is called until the
/// service returns an empty `next_page_token`.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> ServiceResult<Vec<T>>
where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = ServiceResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut token = String::new();
    loop {
        let page = fetch(token).await?;
        let last = page.is_last();
        token = page.next_page_token;
        items.extend(page.items);
        if last {
            return Ok(items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_pages_follows_tokens() {
        let mut seen = Vec::new();
        let all = collect_pages(|token| {
            seen.push(token.clone());
            async move {
                Ok(match token.as_str() {
                    "" => Page {
                        items: vec![1, 2],
                        next_page_token: "p2".to_string(),
                    },
                    "p2" => Page {
                        items: vec![3],
                        next_page_token: "p3".to_string(),
                    },
                    _ => Page::last(vec![4]),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(all, vec![1, 2, 3, 4]);
        assert_eq!(seen, vec!["", "p2", "p3"]);
    }

    #[tokio::test]
    async fn collect_pages_stops_on_error() {
        let result: ServiceResult<Vec<u32>> = collect_pages(|_| async {
            Err(crate::ServiceError::Transport("connection reset".to_string()))
        })
        .await;
        assert!(result.is_err());
    }
}
