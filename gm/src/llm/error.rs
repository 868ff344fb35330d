//! Model call failures
//!
//! Analysis, chat and planning calls all fail through `LlmError`. Services
//! wrap it in `AppError::Upstream`, which shows the user only
//! [`LlmError::user_message`].

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    /// 429 after the provider retries were used up
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The reply was empty, not the JSON a prompt asked for, or a cut-off
    /// embedded-JSON reply
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The gateway deadline passed
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// What a user may be told; provider details stay in the logs
    pub fn user_message(&self) -> &'static str {
        match self {
            LlmError::RateLimited { .. } => "The AI service is busy right now. Please try again in a minute.",
            LlmError::Timeout(_) => "The AI service took too long to answer. Please try again.",
            LlmError::InvalidResponse(_) | LlmError::Json(_) => {
                "The AI service returned an answer we could not use. Please try again."
            }
            LlmError::ApiError { .. } | LlmError::Network(_) => {
                "The AI service is temporarily unavailable. Please try again."
            }
        }
    }
}
