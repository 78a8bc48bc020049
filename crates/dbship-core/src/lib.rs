//! dbship-core: resource types, release digests, and the remote service
//! contract shared by the dbship crates.

pub mod config;
pub mod digest;
pub mod error;
pub mod files;
pub mod service;
pub mod types;
pub mod vcs;

pub use config::{CheckPlanMode, FileConfig, RolloutConfig};
pub use digest::release_digest;
pub use error::{ServiceError, ServiceResult};
pub use service::{collect_pages, RolloutService};
pub use types::*;
