//! Health endpoint with restart-and-retry
//!
//! A health check is a synchronous POST to the worker carrying the
//! `x-health-check` marker. When the worker is unreachable or answers anything
//! other than 200, the worker is restarted once, given a grace period to bind,
//! and checked again. A second failure is reported as 503; there are no further
//! automatic retries.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use tracing::{error, info, warn};

use crate::context::{InvocationContext, HEADER_ORG_ID_18};
use crate::dispatcher::{Dispatcher, WorkerError, WorkerResponse};
use crate::error::{Error, Result};
use crate::supervisor::WorkerSupervisor;

/// Runs health checks and restarts the worker when they fail
pub struct HealthChecker {
    org_id_18: String,
    dispatcher: Dispatcher,
    supervisor: Arc<WorkerSupervisor>,
    restart_grace: Duration,
}

/// Request id for a health check, `healthcheck-<epoch millis>`
pub fn health_request_id() -> String {
    format!("healthcheck-{}", chrono::Utc::now().timestamp_millis())
}

fn failure_reason(result: &std::result::Result<WorkerResponse, WorkerError>) -> Option<String> {
    match result {
        Ok(response) if response.status == StatusCode::OK => None,
        Ok(response) => Some(format!(
            "{}: {}",
            response.status.as_u16(),
            String::from_utf8_lossy(&response.body)
        )),
        Err(e) => Some(e.to_string()),
    }
}

impl HealthChecker {
    /// Create a checker for the org allowed to check the worker
    pub fn new(
        org_id_18: impl Into<String>,
        dispatcher: Dispatcher,
        supervisor: Arc<WorkerSupervisor>,
        restart_grace: Duration,
    ) -> Self {
        Self {
            org_id_18: org_id_18.into(),
            dispatcher,
            supervisor,
            restart_grace,
        }
    }

    async fn ping(
        &self,
        request_id: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> std::result::Result<WorkerResponse, WorkerError> {
        let mut ctx = InvocationContext::new(Method::POST, headers.clone());
        ctx.request_id = request_id.to_string();
        self.dispatcher.dispatch_health(ctx, body).await
    }

    /// Check the worker, restarting it once if the first attempt fails
    pub async fn check(&self, headers: &HeaderMap, body: Bytes) -> Result<Response> {
        let request_id = health_request_id();
        info!(request_id = %request_id, "received health check");

        let org_id = headers.get(HEADER_ORG_ID_18).and_then(|v| v.to_str().ok());
        if org_id != Some(self.org_id_18.as_str()) {
            return Err(Error::invalid(
                &request_id,
                "Unauthorized request",
                StatusCode::GONE,
            ));
        }

        let generation = self.supervisor.generation().await;
        let first = self.ping(&request_id, headers, body.clone()).await;
        let Some(reason) = failure_reason(&first) else {
            return first
                .map(WorkerResponse::into_response)
                .map_err(|e| Error::upstream(&request_id, e.to_string()));
        };

        warn!(
            request_id = %request_id,
            reason = %reason,
            "health check failed, restarting worker"
        );
        if let Err(e) = self.supervisor.restart(generation).await {
            error!(
                request_id = %request_id,
                error = %e,
                "unable to restart worker"
            );
            return Err(Error::upstream(
                &request_id,
                format!("Function restart exception: {}", e),
            ));
        }

        tokio::time::sleep(self.restart_grace).await;
        info!(request_id = %request_id, "retrying health check");

        let retry = self.ping(&request_id, headers, body).await;
        match failure_reason(&retry) {
            None => retry
                .map(WorkerResponse::into_response)
                .map_err(|e| Error::upstream(&request_id, e.to_string())),
            Some(reason) => {
                error!(
                    request_id = %request_id,
                    reason = %reason,
                    "health check failed after restart"
                );
                Err(Error::upstream(
                    &request_id,
                    format!("Function unhealthy after restart: {}", reason),
                ))
            }
        }
    }
}
