//! Rate-limited idea generation over a pluggable model backend.

use std::future::Future;

use smol_str::SmolStr;

use crate::error::IdeaError;
use crate::parse::{ParsedIdeas, parse_ideas};
use crate::rate_limit::{Allowance, RateLimitConfig, RateLimiter};
use crate::request::IdeaRequest;

/// Something that turns a prompt into model text.
pub trait IdeaBackend {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String, IdeaError>>;
}

/// Backend that always answers with the same text. Used offline and in tests.
#[derive(Clone, Debug, Default)]
pub struct CannedBackend {
    response: String,
}

impl CannedBackend {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl IdeaBackend for CannedBackend {
    async fn complete(&self, _prompt: &str) -> Result<String, IdeaError> {
        Ok(self.response.clone())
    }
}

/// Ideas for one request plus the limiter's view after admitting it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdeaResponse {
    pub ideas: ParsedIdeas,
    pub allowance: Allowance,
}

pub struct IdeaService<B> {
    backend: B,
    limiter: RateLimiter,
}

impl<B: IdeaBackend> IdeaService<B> {
    pub fn new(backend: B, config: RateLimitConfig) -> Self {
        Self {
            backend,
            limiter: RateLimiter::new(config),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn limiter_mut(&mut self) -> &mut RateLimiter {
        &mut self.limiter
    }

    /// Generate three ideas for `request` on behalf of `client`.
    ///
    /// Empty notes are rejected before they count against any limit.
    /// Unusable model output is recovered with fallback ideas; only backend
    /// failures and limit rejections are errors.
    pub async fn generate(
        &mut self,
        client: &str,
        request: &IdeaRequest,
    ) -> Result<IdeaResponse, IdeaError> {
        if request.note_content.trim().is_empty() {
            return Err(IdeaError::EmptyContent);
        }

        let allowance = self.limiter.admit(client)?;
        let client = SmolStr::new(client);
        tracing::debug!(
            %client,
            remaining = allowance.remaining,
            context = request.context_notes.len(),
            "requesting ideas"
        );

        let text = self.backend.complete(&request.prompt()).await.map_err(|e| {
            tracing::warn!(%client, "idea backend failed: {e}");
            e
        })?;
        if text.trim().is_empty() {
            return Err(IdeaError::Backend("empty response".into()));
        }

        Ok(IdeaResponse {
            ideas: parse_ideas(&text, &request.note_content),
            allowance,
        })
    }
}
