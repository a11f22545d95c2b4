//! Error types for idea generation.

use serde::Serialize;
use thiserror::Error;

/// Which daily cap rejected a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DailyLimitReason {
    /// This client used up its own daily allowance.
    UserDailyLimit,
    /// Too many distinct clients already used the feature today.
    GlobalUserLimit,
}

impl DailyLimitReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::UserDailyLimit => {
                "You've reached your daily AI usage limit. Please try again tomorrow."
            }
            Self::GlobalUserLimit => {
                "Daily user limit reached. AI feature is temporarily unavailable. Please try again tomorrow."
            }
        }
    }
}

/// Errors surfaced to the user as a transient notification.
///
/// None of these touch the canvas document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdeaError {
    /// Per-client window exhausted.
    #[error("Too many requests. Please try again in {retry_after}s.")]
    RateLimited { retry_after: u64 },

    #[error("{}", .reason.message())]
    DailyLimit { reason: DailyLimitReason },

    /// The model call failed or returned nothing.
    #[error("failed to generate ideas: {0}")]
    Backend(String),

    #[error("Type something in the note first, then ask for ideas!")]
    EmptyContent,
}

impl IdeaError {
    /// Whether retrying later could succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Backend(_))
    }
}
