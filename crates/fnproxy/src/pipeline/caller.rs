//! Caller identity check

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::RequestStep;
use crate::context::InvocationContext;
use crate::error::{Error, Result};
use crate::platform::{userinfo_url, PlatformClient};

/// Confirms the caller's token belongs to the configured org
///
/// The caller's own token is introspected at the org's userinfo endpoint.
pub struct ValidateCaller {
    org_id_18: String,
    platform: Arc<dyn PlatformClient>,
}

impl ValidateCaller {
    /// Create the step for the org allowed to invoke the function
    pub fn new(org_id_18: impl Into<String>, platform: Arc<dyn PlatformClient>) -> Self {
        Self {
            org_id_18: org_id_18.into(),
            platform,
        }
    }
}

#[async_trait]
impl RequestStep for ValidateCaller {
    fn name(&self) -> &'static str {
        "validate-caller"
    }

    fn priority(&self) -> u16 {
        30
    }

    async fn handle(&self, ctx: &mut InvocationContext) -> Result<()> {
        let url = userinfo_url(&ctx.org()?.org_api_base_url);
        let user_info = self
            .platform
            .user_info(&url, ctx.caller_token()?)
            .await
            .map_err(|e| {
                Error::bad_request(
                    &ctx.request_id,
                    format!("Unable to validate request: {}", e),
                )
            })?;

        match user_info.organization_id.as_deref() {
            Some(org_id) if org_id == self.org_id_18 => {
                info!(request_id = %ctx.request_id, "validated caller");
                Ok(())
            }
            other => {
                warn!(
                    request_id = %ctx.request_id,
                    org_id = other.unwrap_or_default(),
                    expected = %self.org_id_18,
                    "unauthorized caller"
                );
                Err(Error::unauthorized(&ctx.request_id, "Unauthorized request"))
            }
        }
    }
}
