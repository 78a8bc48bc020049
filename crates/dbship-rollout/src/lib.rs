//! dbship rollout engine.
//!
//! Takes a set of migration files through to a staged rollout: reuses or
//! creates the release, creates the plan, waits on plan checks, then
//! advances the rollout stage by stage up to the configured target.
//!
//! # Components
//!
//! - **`release`**: Digest-keyed release reuse
//! - **`check`**: Release SQL review without creating anything
//! - **`gate`**: Plan check polling and gating policy
//! - **`driver`**: Rollout state machine (materialize, trigger, wait)
//! - **`teardown`**: Cancel active task runs on abort
//! - **`orchestrator`**: One end-to-end run

pub mod cancel;
pub mod check;
pub mod driver;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod release;
pub mod teardown;

#[cfg(test)]
mod fake;

pub use cancel::{channel, CancelHandle, CancelSignal};
pub use check::{check_release, CheckSummary};
pub use driver::{DriveState, RolloutDriver, StageProgress};
pub use error::{RolloutError, RolloutResult};
pub use gate::{CheckTally, GateDecision, GateFailure, PlanCheckGate};
pub use orchestrator::{Orchestrator, RunRecord};
pub use release::resolve_or_create_release;
pub use teardown::{cancel_active_task_runs, StageCancelFailure, TeardownError};
