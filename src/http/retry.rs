//! Opt-in retry policy for network operations.

use log::{debug, warn};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use super::HttpError;

/// How many times an operation is attempted, and how long to wait between
/// attempts. The default performs a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, failures surface immediately.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub const fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Client errors (4xx) and undecodable bodies will not improve on retry;
/// timeouts, connection failures and 5xx responses might.
pub fn is_retryable(error: &HttpError) -> bool {
    match error {
        HttpError::Status { status, .. } => !status.is_client_error(),
        HttpError::Decode { .. } => false,
        HttpError::Timeout { .. } | HttpError::Transport { .. } => true,
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's attempts are exhausted. The last error is returned.
pub async fn with_retry<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    retryable: P,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !retryable(&e) {
                    debug!("{}: non-retryable error: {}", operation_name, e);
                    return Err(e);
                }

                if attempt >= max_attempts {
                    return Err(e);
                }

                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                    operation_name,
                    attempt,
                    max_attempts,
                    e,
                    policy.delay.as_millis()
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
        }
    }
}
