//! Provider HTTP calls with exponential backoff

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use tracing::{debug, warn};

use super::LlmError;

/// Retries after the first attempt
pub(crate) const MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubled for each later one
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Used when a 429 carries no usable `retry-after`
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504 | 529)
}

/// Delay before retry number `attempt`, counting from 1
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1)))
}

fn retry_after(response: &Response) -> Duration {
    let secs = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs(secs)
}

/// Send the request from `build` until it succeeds or fails for good
///
/// Network errors and transient statuses are retried. A 429 that outlasts
/// the retries is reported as `RateLimited`; any other failure status as
/// `ApiError` with the response body.
pub(crate) async fn send_with_retry(provider: &str, build: impl Fn() -> RequestBuilder) -> Result<Response, LlmError> {
    let mut last_error = None;
    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let delay = backoff(attempt);
            warn!(%provider, attempt, backoff_ms = delay.as_millis() as u64, "Retrying model call after transient error");
            tokio::time::sleep(delay).await;
        }

        let response = match build().send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(%provider, attempt, error = %e, "send_with_retry: network error");
                last_error = Some(LlmError::Network(e));
                continue;
            }
        };

        let status = response.status().as_u16();
        if response.status().is_success() {
            debug!(%provider, attempt, "send_with_retry: success");
            return Ok(response);
        }
        if status == 429 && attempt == MAX_RETRIES {
            debug!(%provider, "send_with_retry: rate limited, retries exhausted");
            return Err(LlmError::RateLimited {
                retry_after: retry_after(&response),
            });
        }

        let message = response.text().await.unwrap_or_default();
        if !is_retryable_status(status) {
            debug!(%provider, status, "send_with_retry: permanent API error");
            return Err(LlmError::ApiError { status, message });
        }
        debug!(%provider, attempt, status, "send_with_retry: transient API error");
        last_error = Some(LlmError::ApiError { status, message });
    }

    Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("Max retries exceeded".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504, 529] {
            assert!(is_retryable_status(status), "{status} should be retryable");
        }
        for status in [400, 401, 403, 404] {
            assert!(!is_retryable_status(status));
        }
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
    }
}
