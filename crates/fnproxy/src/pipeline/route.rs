//! Route-specific invocation type check

use async_trait::async_trait;

use super::RequestStep;
use crate::context::{InvocationContext, InvocationType};
use crate::error::{Error, Result};

/// Rejects a context whose declared type does not match the route
///
/// Sits between context validation and the caller check, so a mismatched
/// request is turned away before any platform call.
pub struct RequireInvocationType {
    expected: InvocationType,
}

impl RequireInvocationType {
    /// Accept only contexts declaring `expected`
    pub fn new(expected: InvocationType) -> Self {
        Self { expected }
    }
}

#[async_trait]
impl RequestStep for RequireInvocationType {
    fn name(&self) -> &'static str {
        "require-invocation-type"
    }

    fn priority(&self) -> u16 {
        25
    }

    async fn handle(&self, ctx: &mut InvocationContext) -> Result<()> {
        if ctx.function()?.invocation_type() != Some(self.expected) {
            return Err(Error::bad_request(&ctx.request_id, "Invalid request type"));
        }
        Ok(())
    }
}
