//! Session permission set activation

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use tracing::info;

use super::RequestStep;
use crate::context::InvocationContext;
use crate::error::{Error, Result};
use crate::platform::{ActivatePermSetRequest, PlatformClient, PlatformError};

const ACTIVATE_PERM_SET_PATH: &str = "/actions/standard/activateSessionPermSet";

/// Activates the requested session-based permission sets on the minted token
pub struct ActivatePermissionSets {
    platform: Arc<dyn PlatformClient>,
}

impl ActivatePermissionSets {
    /// Create the step
    pub fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl RequestStep for ActivatePermissionSets {
    fn name(&self) -> &'static str {
        "activate-permission-sets"
    }

    fn priority(&self) -> u16 {
        50
    }

    async fn handle(&self, ctx: &mut InvocationContext) -> Result<()> {
        let request_id = ctx.request_id.as_str();
        let token = ctx.minted_credential().ok_or_else(|| {
            Error::unauthorized(
                request_id,
                "Unable to activate session-based Permission Sets: function's token not provided",
            )
        })?;

        let names = &ctx.function()?.permission_sets;
        if names.is_empty() {
            info!(request_id = %request_id, "no session-based permission sets to activate");
            return Ok(());
        }
        let joined = names.join(",");

        let org = ctx.org()?;
        let url = org.data_api_url(&org.org_api_base_url, ACTIVATE_PERM_SET_PATH);
        let request = ActivatePermSetRequest::new(names);

        let results = self
            .platform
            .activate_session_permission_sets(&url, token.expose(), &request)
            .await
            .map_err(|e| {
                let status = match &e {
                    PlatformError::Status { status, .. } => *status,
                    _ => StatusCode::SERVICE_UNAVAILABLE,
                };
                Error::invalid(
                    request_id,
                    format!(
                        "Unable to activate session-based Permission Set(s) {}: {}",
                        joined, e
                    ),
                    status,
                )
            })?;

        let failures: Vec<serde_json::Value> = results
            .iter()
            .filter(|r| !r.is_success)
            .map(|r| r.errors.clone().unwrap_or(serde_json::Value::Null))
            .collect();
        if !failures.is_empty() {
            return Err(Error::invalid(
                request_id,
                format!(
                    "Unable to activate session-based Permission Set(s) {}: {}",
                    joined,
                    serde_json::Value::Array(failures)
                ),
                StatusCode::SERVICE_UNAVAILABLE,
            ));
        }

        info!(
            request_id = %request_id,
            permission_sets = %joined,
            "activated session-based permission sets"
        );
        Ok(())
    }
}
