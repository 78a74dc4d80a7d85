//! Proxy HTTP server
//!
//! # Endpoints
//!
//! - `* /sync/**` - pipeline, then wait for the worker and return its response
//! - `* /async/**` - pipeline, then 201; the result goes to the callback record
//! - `* /healthcheck/**` - worker health check with restart and retry
//! - anything else - 403

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::any;
use axum::Router;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::health::HealthChecker;
use crate::pipeline::Pipeline;

pub use handlers::{async_handler, healthcheck_handler, not_supported_handler, sync_handler};

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Pipeline for `/sync/**`
    pub sync_pipeline: Arc<Pipeline>,
    /// Pipeline for `/async/**`, which also checks the invocation type
    pub async_pipeline: Arc<Pipeline>,
    /// Worker dispatcher
    pub dispatcher: Dispatcher,
    /// Health check runner
    pub health: Arc<HealthChecker>,
}

/// Build the proxy router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sync", any(sync_handler))
        .route("/sync/{*path}", any(sync_handler))
        .route("/async", any(async_handler))
        .route("/async/{*path}", any(async_handler))
        .route("/healthcheck", any(healthcheck_handler))
        .route("/healthcheck/{*path}", any(healthcheck_handler))
        .fallback(not_supported_handler)
        .with_state(state)
}

/// Serve the proxy until the process is stopped
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<(), Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("failed to bind {}: {}", addr, e)))?;

    info!(addr = %addr, "starting function proxy");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Internal(format!("server error: {}", e)))
}
