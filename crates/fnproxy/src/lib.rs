//! Function sidecar proxy
//!
//! Sits in front of a single function worker process. Invocations from the
//! platform are authenticated against the owning org, enriched with a
//! worker-scoped access token minted through the JWT-bearer flow, and then
//! forwarded to the worker synchronously or in the background. The proxy also
//! launches the worker and restarts it when a health check fails.
//!
//! # Architecture
//!
//! ```text
//! platform ──► pipeline ──► dispatcher ──► worker
//!              (validate,      │  async
//!               mint token)    └──────► callback record
//!
//! health check ──► dispatcher ──► worker
//!                      │ failure
//!                      └──► supervisor restart ──► retry once
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod minter;
pub mod pipeline;
pub mod platform;
pub mod server;
pub mod supervisor;
pub mod telemetry;

pub use config::{Cli, ProxyConfig, WorkerConfig};
pub use context::{InvocationContext, InvocationType, MintedCredential};
pub use dispatcher::{Dispatcher, ReqwestWorkerClient};
pub use error::{Error, Result};
pub use health::HealthChecker;
pub use minter::CredentialMinter;
pub use pipeline::{Pipeline, RequestStep};
pub use platform::{PlatformClient, ReqwestPlatformClient};
pub use server::{router, start_server, AppState};
pub use supervisor::{TokioProcessLauncher, WorkerCommand, WorkerSupervisor};
pub use telemetry::{init_telemetry, LogFormat};
