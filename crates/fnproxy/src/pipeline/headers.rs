//! Required header validation

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use zeroize::Zeroizing;

use super::RequestStep;
use crate::context::{is_blank, InvocationContext, HEADER_REQUEST_ID};
use crate::error::{Error, Result};

/// CloudEvent headers every invocation must carry
pub const REQUIRED_CLOUD_EVENT_HEADERS: [&str; 5] = [
    "ce-specversion",
    "ce-id",
    "ce-datacontenttype",
    "ce-source",
    "ce-type",
];

/// Why the Authorization header did not yield a bearer token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerTokenError {
    /// No readable Authorization header
    Missing,
    /// A scheme other than `Bearer`
    NotBearer,
    /// `Bearer` with nothing after it
    Empty,
}

impl BearerTokenError {
    /// Message returned to the caller
    pub fn message(self) -> &'static str {
        match self {
            Self::Missing => "Authorization not found",
            Self::NotBearer => "Invalid Authorization",
            Self::Empty => "Authorization accessToken not found",
        }
    }
}

/// Extract a bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> std::result::Result<&str, BearerTokenError> {
    let value = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(BearerTokenError::Missing)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(BearerTokenError::NotBearer)?
        .trim();
    if token.is_empty() {
        return Err(BearerTokenError::Empty);
    }
    Ok(token)
}

/// Checks the request id, caller bearer token and CloudEvent headers
pub struct ValidateHeaders;

#[async_trait]
impl RequestStep for ValidateHeaders {
    fn name(&self) -> &'static str {
        "validate-headers"
    }

    fn priority(&self) -> u16 {
        10
    }

    async fn handle(&self, ctx: &mut InvocationContext) -> Result<()> {
        let request_id = ctx
            .header(HEADER_REQUEST_ID)
            .map(str::trim)
            .unwrap_or_default();
        if request_id.is_empty() {
            return Err(Error::InvalidRequest {
                request_id: None,
                message: format!("{} not found", HEADER_REQUEST_ID),
                status: StatusCode::BAD_REQUEST,
            });
        }
        ctx.request_id = request_id.to_string();

        let token = extract_bearer_token(&ctx.headers)
            .map_err(|e| Error::bad_request(&ctx.request_id, e.message()))?;
        ctx.caller_token = Some(Zeroizing::new(token.to_string()));

        for name in REQUIRED_CLOUD_EVENT_HEADERS {
            if is_blank(ctx.header(name)) {
                return Err(Error::bad_request(
                    &ctx.request_id,
                    format!("{} not found", name),
                ));
            }
        }

        Ok(())
    }
}
