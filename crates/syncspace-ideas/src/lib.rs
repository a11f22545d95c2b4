//! AI brainstorming for SyncSpace canvases.
//!
//! - [`IdeaRequest`]: payload built from a note and a little canvas context
//! - [`parse_ideas`]: model text to exactly three ideas, with a fallback
//! - [`apply_ideas`]: children placed around the parent in one transaction
//! - [`RateLimiter`]: per-client windows and daily caps
//! - [`IdeaService`]: limits, backend call and parsing together

mod error;
mod expand;
mod parse;
mod rate_limit;
mod request;
mod service;

pub use error::{DailyLimitReason, IdeaError};
pub use expand::{Branch, apply_ideas, branch_layout};
pub use parse::{IDEA_COUNT, ParsedIdeas, fallback_ideas, parse_ideas};
pub use rate_limit::{Allowance, RateLimitConfig, RateLimiter};
pub use request::{IdeaRequest, MAX_CONTEXT_NOTES};
pub use service::{CannedBackend, IdeaBackend, IdeaResponse, IdeaService};
