//! Invocation dispatch to the worker
//!
//! Once the pipeline has enriched an invocation, the [`Dispatcher`] forwards it
//! to the worker's root URL:
//!
//! - **sync**: the worker's status, headers and body go back to the caller
//!   unchanged, including worker error statuses. Only an unreachable worker
//!   becomes a 503.
//! - **async**: the forward runs on its own task that owns the context; the
//!   outcome is written to the invocation's callback record.
//! - **health**: a sync forward carrying the `x-health-check` marker.
//!
//! # Dependency Injection
//!
//! The worker is reached through [`WorkerClient`] and the callback record through
//! [`PlatformClient`], so both sides can be mocked in tests.

mod callback;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{InvocationContext, HEADER_HEALTH_CHECK};
use crate::error::{Error, Result};
use crate::platform::PlatformClient;

pub use callback::{AsyncInvocationOutcome, OutcomeStatus, CALLBACK_OBJECT};

/// Maximum inbound request body size
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Headers owned by each hop, never copied between connections
const HOP_HEADERS: &[&str] = &["host", "content-length", "connection", "transfer-encoding"];

/// Request forwarded to the worker
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    /// Inbound method
    pub method: Method,
    /// Worker URL
    pub url: String,
    /// Outbound headers
    pub headers: HeaderMap,
    /// Inbound body
    pub body: Bytes,
}

/// Response received from the worker
#[derive(Debug, Clone)]
pub struct WorkerResponse {
    /// Worker status
    pub status: StatusCode,
    /// Worker headers
    pub headers: HeaderMap,
    /// Worker body
    pub body: Bytes,
}

impl WorkerResponse {
    /// Convert into a response for the caller, status and body verbatim
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = strip_hop_headers(self.headers);
        response
    }
}

/// Errors reaching the worker
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    /// Connection failed or was reset
    #[error("worker unreachable: {0}")]
    Unreachable(String),

    /// Response body could not be read
    #[error("failed to read worker response: {0}")]
    Body(String),
}

/// HTTP access to the worker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Send one request and buffer the response
    async fn send(
        &self,
        request: WorkerRequest,
    ) -> std::result::Result<WorkerResponse, WorkerError>;
}

/// [`WorkerClient`] over reqwest
#[derive(Clone, Default)]
pub struct ReqwestWorkerClient {
    client: reqwest::Client,
}

impl ReqwestWorkerClient {
    /// Create a client without timeouts; the worker decides how long a call takes
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerClient for ReqwestWorkerClient {
    async fn send(
        &self,
        request: WorkerRequest,
    ) -> std::result::Result<WorkerResponse, WorkerError> {
        let response = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| WorkerError::Unreachable(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| WorkerError::Body(e.to_string()))?;

        Ok(WorkerResponse {
            status,
            headers,
            body,
        })
    }
}

fn strip_hop_headers(mut headers: HeaderMap) -> HeaderMap {
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
    headers
}

/// Forwards invocations to the worker
#[derive(Clone)]
pub struct Dispatcher {
    worker_url: String,
    worker: Arc<dyn WorkerClient>,
    platform: Arc<dyn PlatformClient>,
}

impl Dispatcher {
    /// Create a dispatcher for the worker at `worker_url`
    pub fn new(
        worker_url: impl Into<String>,
        worker: Arc<dyn WorkerClient>,
        platform: Arc<dyn PlatformClient>,
    ) -> Self {
        Self {
            worker_url: worker_url.into(),
            worker,
            platform,
        }
    }

    async fn forward(
        &self,
        ctx: &InvocationContext,
        body: Bytes,
    ) -> std::result::Result<WorkerResponse, WorkerError> {
        let request = WorkerRequest {
            method: ctx.method.clone(),
            url: self.worker_url.clone(),
            headers: strip_hop_headers(ctx.headers.clone()),
            body,
        };

        let started = Instant::now();
        let result = self.worker.send(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => info!(
                request_id = %ctx.request_id,
                status = response.status.as_u16(),
                elapsed_ms,
                "worker responded"
            ),
            Err(e) => warn!(
                request_id = %ctx.request_id,
                elapsed_ms,
                error = %e,
                "worker call failed"
            ),
        }
        result
    }

    /// Forward and wait, returning the worker response verbatim
    pub async fn dispatch_sync(&self, ctx: &InvocationContext, body: Bytes) -> Result<Response> {
        match self.forward(ctx, body).await {
            Ok(response) => Ok(response.into_response()),
            Err(e) => {
                let message = format!("Unable to invoke function: {}", e);
                Err(Error::upstream(&ctx.request_id, message))
            }
        }
    }

    /// Forward on a separate task and record the outcome in the callback record
    ///
    /// The caller is answered before the worker is contacted; the returned
    /// handle only matters to callers that want to observe completion.
    pub fn dispatch_async(&self, ctx: InvocationContext, body: Bytes) -> JoinHandle<()> {
        let dispatcher = self.clone();
        debug!(request_id = %ctx.request_id, "dispatching async invocation");

        tokio::spawn(async move {
            let namespace = ctx.org.as_ref().and_then(|o| o.namespace.clone());
            let outcome = match dispatcher.forward(&ctx, body).await {
                Ok(response) => AsyncInvocationOutcome::from_response(namespace, &response),
                Err(e) => AsyncInvocationOutcome::from_error(namespace, &e),
            };
            let platform = dispatcher.platform.as_ref();
            callback::write_outcome(platform, &ctx, &outcome).await;
        })
    }

    /// Forward a health check and return the worker's answer
    pub async fn dispatch_health(
        &self,
        mut ctx: InvocationContext,
        body: Bytes,
    ) -> std::result::Result<WorkerResponse, WorkerError> {
        ctx.headers
            .insert(HEADER_HEALTH_CHECK, HeaderValue::from_static("true"));
        self.forward(&ctx, body).await
    }
}
