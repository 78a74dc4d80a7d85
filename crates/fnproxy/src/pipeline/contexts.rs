//! Context header parsing

use async_trait::async_trait;

use super::RequestStep;
use crate::context::{
    decode_header, FunctionContext, InvocationContext, OrgContext, HEADER_FUNCTION_CONTEXT,
    HEADER_ORG_CONTEXT,
};
use crate::error::{Error, Result};

/// Decodes and validates `ce-sffncontext` and `ce-sfcontext`
pub struct ValidateContexts;

#[async_trait]
impl RequestStep for ValidateContexts {
    fn name(&self) -> &'static str {
        "validate-contexts"
    }

    fn priority(&self) -> u16 {
        20
    }

    async fn handle(&self, ctx: &mut InvocationContext) -> Result<()> {
        let request_id = ctx.request_id.clone();

        let Some(encoded) = ctx.header(HEADER_FUNCTION_CONTEXT) else {
            let message = format!("{} not found", HEADER_FUNCTION_CONTEXT);
            return Err(Error::bad_request(&request_id, message));
        };
        let function: FunctionContext = decode_header(encoded).map_err(|e| {
            Error::bad_request(
                &request_id,
                format!("Invalid {}: {}", HEADER_FUNCTION_CONTEXT, e),
            )
        })?;
        function.validate(&request_id)?;

        let Some(encoded) = ctx.header(HEADER_ORG_CONTEXT) else {
            let message = format!("{} not found", HEADER_ORG_CONTEXT);
            return Err(Error::bad_request(&request_id, message));
        };
        let org: OrgContext = decode_header(encoded).map_err(|e| {
            Error::bad_request(
                &request_id,
                format!("Invalid {}: {}", HEADER_ORG_CONTEXT, e),
            )
        })?;
        let org = org.validate(&request_id)?;

        ctx.function = Some(function);
        ctx.org = Some(org);
        Ok(())
    }
}
