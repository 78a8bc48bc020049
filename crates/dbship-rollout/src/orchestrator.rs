//! Orchestrator: one end-to-end rollout run.
//!
//! Resolves the release, creates the plan (or loads a caller-supplied one),
//! gates on plan checks, then drives the rollout.

use serde::Serialize;
use tracing::info;

use dbship_core::{
    release_digest, ChangeDatabaseConfig, Plan, PlanSpec, ReleaseFile, RolloutConfig,
    RolloutService, VcsSource,
};

use crate::cancel::CancelSignal;
use crate::driver::RolloutDriver;
use crate::error::{RolloutError, RolloutResult};
use crate::gate::PlanCheckGate;
use crate::release::resolve_or_create_release;

/// Names of the resources a run created or used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout: Option<String>,
}

pub struct Orchestrator<'a, S: ?Sized> {
    service: &'a S,
    config: &'a RolloutConfig,
}

impl<'a, S: RolloutService + ?Sized> Orchestrator<'a, S> {
    pub fn new(service: &'a S, config: &'a RolloutConfig) -> Self {
        Self { service, config }
    }

    /// Run the whole flow. `record` is filled in as resources appear, so
    /// it is meaningful even when the run fails part-way.
    pub async fn run(
        &self,
        files: &[ReleaseFile],
        vcs_source: Option<VcsSource>,
        cancel: &CancelSignal,
        record: &mut RunRecord,
    ) -> RolloutResult<()> {
        let plan = match &self.config.plan {
            Some(name) => self
                .service
                .get_plan(name)
                .await
                .map_err(RolloutError::service("get plan"))?,
            None => {
                let digest = release_digest(files);
                let release = resolve_or_create_release(
                    self.service,
                    &self.config.project,
                    files,
                    &digest,
                    vcs_source,
                    &self.config.release_title,
                )
                .await?;
                record.release = Some(release.name.clone());
                self.create_plan(&release.name).await?
            }
        };
        record.plan = Some(plan.name.clone());

        if plan.specs.is_empty() {
            info!(plan = %plan.name, "no change required. exiting...");
            return Ok(());
        }

        PlanCheckGate::new(self.service, self.config.check_plan, self.config.poll_interval)
            .wait(&plan.name, cancel)
            .await?;

        let mut driver = RolloutDriver::new(self.service, self.config, &plan.name);
        let result = driver.drive(cancel).await;
        record.rollout = driver.rollout_name().map(str::to_string);
        result
    }

    async fn create_plan(&self, release: &str) -> RolloutResult<Plan> {
        let plan = Plan {
            name: String::new(),
            title: self.config.rollout_title.clone(),
            specs: vec![PlanSpec {
                id: uuid::Uuid::new_v4().to_string(),
                change_database_config: Some(ChangeDatabaseConfig {
                    release: release.to_string(),
                    targets: self.config.targets.clone(),
                }),
            }],
        };
        let created = self
            .service
            .create_plan(&self.config.project, &plan)
            .await
            .map_err(RolloutError::service("create plan"))?;
        info!(plan = %created.name, "plan created");
        Ok(created)
    }
}
