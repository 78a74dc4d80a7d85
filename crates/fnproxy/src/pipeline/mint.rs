//! Worker credential minting step

use std::sync::Arc;

use async_trait::async_trait;

use super::RequestStep;
use crate::context::InvocationContext;
use crate::error::Result;
use crate::minter::CredentialMinter;

/// Mints the worker token and stores it on the function context
pub struct MintCredential {
    minter: Arc<CredentialMinter>,
}

impl MintCredential {
    /// Create the step around a shared minter
    pub fn new(minter: Arc<CredentialMinter>) -> Self {
        Self { minter }
    }
}

#[async_trait]
impl RequestStep for MintCredential {
    fn name(&self) -> &'static str {
        "mint-credential"
    }

    fn priority(&self) -> u16 {
        40
    }

    async fn handle(&self, ctx: &mut InvocationContext) -> Result<()> {
        let credential = self
            .minter
            .mint(&ctx.request_id, ctx.caller_token()?, ctx.org()?)
            .await?;
        ctx.function_mut()?.access_token = Some(credential);
        Ok(())
    }
}
