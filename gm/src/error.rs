//! Application error taxonomy
//!
//! Every service operation returns `AppError`. Domain and validation failures
//! keep their own variants so callers can tell 404 from 403 from 409 from 500.

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::domain::TransitionError;
use crate::llm::LlmError;
use crate::state::StateError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Model call failed: {0}")]
    Upstream(#[from] LlmError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wire shape of an error, as in the `error` SSE event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl AppError {
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }

    pub fn internal(e: impl std::fmt::Display) -> Self {
        AppError::Internal(e.to_string())
    }

    /// HTTP-like status code
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::Unauthorized => 401,
            AppError::Forbidden(_) => 403,
            AppError::Conflict(_) => 409,
            AppError::Validation(_) => 400,
            AppError::Upstream(_) => 502,
            AppError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::Validation(_) => "validation_error",
            AppError::Upstream(_) => "llm_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show a user; never includes upstream or internal details
    pub fn public_message(&self) -> String {
        match self {
            AppError::Upstream(e) => e.user_message().to_string(),
            AppError::Internal(_) => "An internal error occurred.".to_string(),
            other => other.to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.public_message(),
        }
    }
}

impl From<StateError> for AppError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(what) => AppError::NotFound(what),
            StateError::InvalidTransition(msg) => AppError::Conflict(msg),
            other => {
                warn!(error = %other, "AppError::from: state failure");
                AppError::Internal(other.to_string())
            }
        }
    }
}

impl From<TransitionError> for AppError {
    fn from(e: TransitionError) -> Self {
        AppError::Conflict(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_codes_are_distinct_per_class() {
        assert_eq!(AppError::not_found("Roadmap rm-1").status_code(), 404);
        assert_eq!(AppError::Unauthorized.status_code(), 401);
        assert_eq!(AppError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(AppError::Conflict("x".into()).status_code(), 409);
        assert_eq!(AppError::Validation("x".into()).status_code(), 400);
        assert_eq!(AppError::internal("boom").status_code(), 500);
    }

    #[test]
    fn test_upstream_message_is_generic() {
        let err = AppError::from(LlmError::ApiError {
            status: 500,
            message: "secret stack trace".to_string(),
        });
        assert_eq!(err.status_code(), 502);
        assert_eq!(err.code(), "llm_error");
        assert!(!err.public_message().contains("secret"));

        let err = AppError::from(LlmError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.body().code, "llm_error");
        assert!(err.body().message.contains("too long"));
    }

    #[test]
    fn test_state_errors_map_to_taxonomy() {
        assert_eq!(AppError::from(StateError::NotFound("x".into())).status_code(), 404);
        assert_eq!(AppError::from(StateError::InvalidTransition("x".into())).status_code(), 409);
        let internal = AppError::from(StateError::StoreError("disk full".into()));
        assert_eq!(internal.status_code(), 500);
        assert!(!internal.public_message().contains("disk"));
    }

    #[test]
    fn test_domain_message_is_kept() {
        let err = AppError::not_found("CheckIn ci-1");
        assert_eq!(err.public_message(), "CheckIn ci-1 not found");
    }
}
