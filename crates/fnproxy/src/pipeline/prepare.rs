//! Outbound header assembly

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderValue;

use super::RequestStep;
use crate::context::{encode_header, InvocationContext, HEADER_FUNCTION_CONTEXT};
use crate::error::{Error, Result};

/// Re-encodes the enriched function context and drops the caller's token
pub struct PrepareWorkerRequest;

#[async_trait]
impl RequestStep for PrepareWorkerRequest {
    fn name(&self) -> &'static str {
        "prepare-worker-request"
    }

    fn priority(&self) -> u16 {
        60
    }

    async fn handle(&self, ctx: &mut InvocationContext) -> Result<()> {
        let encoded = encode_header(ctx.function()?)
            .map_err(|e| Error::Internal(format!("unable to encode function context: {}", e)))?;
        let value = HeaderValue::from_str(&encoded)
            .map_err(|e| Error::Internal(format!("invalid function context header: {}", e)))?;

        ctx.headers.insert(HEADER_FUNCTION_CONTEXT, value);
        ctx.headers.remove(AUTHORIZATION);
        Ok(())
    }
}
