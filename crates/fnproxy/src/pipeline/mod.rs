//! Request validation and enrichment pipeline
//!
//! Every invocation runs through an ordered chain of [`RequestStep`]s before
//! it is dispatched to the worker. Steps run strictly by ascending priority;
//! the first failure ends the chain and its status is returned to the caller.
//!
//! # Standard steps
//!
//! | Priority | Step | Failure |
//! |---|---|---|
//! | 10 | [`ValidateHeaders`] | 400 |
//! | 20 | [`ValidateContexts`] | 400 |
//! | 25 | [`RequireInvocationType`] (async route only) | 400 |
//! | 30 | [`ValidateCaller`] | 400 / 401 |
//! | 40 | [`MintCredential`] | 401 |
//! | 50 | [`ActivatePermissionSets`] | platform status, 401, 503 |
//! | 60 | [`PrepareWorkerRequest`] | 500 |

mod caller;
mod contexts;
mod headers;
mod mint;
mod permsets;
mod prepare;
mod route;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::{InvocationContext, InvocationType};
use crate::error::{Error, Result};
use crate::minter::CredentialMinter;
use crate::platform::PlatformClient;

pub use caller::ValidateCaller;
pub use contexts::ValidateContexts;
pub use headers::{
    extract_bearer_token, BearerTokenError, ValidateHeaders, REQUIRED_CLOUD_EVENT_HEADERS,
};
pub use mint::MintCredential;
pub use permsets::ActivatePermissionSets;
pub use prepare::PrepareWorkerRequest;
pub use route::RequireInvocationType;

/// One stage of invocation processing
#[async_trait]
pub trait RequestStep: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Position in the chain; lower runs first
    fn priority(&self) -> u16;

    /// Inspect or enrich the context, or fail the request
    async fn handle(&self, ctx: &mut InvocationContext) -> Result<()>;
}

/// Ordered chain of request steps
pub struct Pipeline {
    steps: Vec<Arc<dyn RequestStep>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|s| (s.priority(), s.name())))
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline, ordering steps by priority
    ///
    /// Two steps with the same priority are a configuration error.
    pub fn new(mut steps: Vec<Arc<dyn RequestStep>>) -> Result<Self> {
        steps.sort_by_key(|s| s.priority());
        if let Some(pair) = steps
            .windows(2)
            .find(|w| w[0].priority() == w[1].priority())
        {
            return Err(Error::Config(format!(
                "steps {} and {} share priority {}",
                pair[0].name(),
                pair[1].name(),
                pair[0].priority()
            )));
        }
        Ok(Self { steps })
    }

    /// Add a step, keeping the priority order and uniqueness rules
    pub fn with_step(self, step: Arc<dyn RequestStep>) -> Result<Self> {
        let mut steps = self.steps;
        steps.push(step);
        Self::new(steps)
    }

    /// The invocation pipeline used by the sync route
    pub fn standard(
        org_id_18: impl Into<String>,
        platform: Arc<dyn PlatformClient>,
        minter: Arc<CredentialMinter>,
    ) -> Result<Self> {
        Self::new(vec![
            Arc::new(ValidateHeaders),
            Arc::new(ValidateContexts),
            Arc::new(ValidateCaller::new(org_id_18, platform.clone())),
            Arc::new(MintCredential::new(minter)),
            Arc::new(ActivatePermissionSets::new(platform)),
            Arc::new(PrepareWorkerRequest),
        ])
    }

    /// The sync pipeline plus a check that the context declares an async type
    pub fn standard_async(
        org_id_18: impl Into<String>,
        platform: Arc<dyn PlatformClient>,
        minter: Arc<CredentialMinter>,
    ) -> Result<Self> {
        Self::standard(org_id_18, platform, minter)?
            .with_step(Arc::new(RequireInvocationType::new(InvocationType::Async)))
    }

    /// Step names in execution order
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run(&self, ctx: &mut InvocationContext) -> Result<()> {
        for step in &self.steps {
            let started = Instant::now();
            let result = step.handle(ctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    debug!(
                        request_id = %ctx.request_id,
                        step = step.name(),
                        elapsed_ms,
                        "step completed"
                    );
                }
                Err(e) => {
                    warn!(
                        request_id = %ctx.request_id,
                        step = step.name(),
                        elapsed_ms,
                        status = e.status().as_u16(),
                        error = %e,
                        "request rejected"
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
