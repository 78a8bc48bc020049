//! dbship-api: HTTP/JSON client for the dbship server.
//!
//! `ApiClient` logs in with a service account and implements
//! `RolloutService`, so the rollout engine can drive a real server.
//!
//! ```text
//! ApiClient
//!   ├── login() → bearer token
//!   ├── get()/post() → one HTTP/1.1 connection per call (rustls for https)
//!   └── impl RolloutService → /v1/{resource name}[:verb]
//! ```

pub mod client;
pub mod service;

pub use client::{ApiClient, DEFAULT_TIMEOUT, Endpoint, Query, Scheme};
pub use service::PAGE_SIZE;
