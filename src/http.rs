// HTTP retry plumbing: blocking ureq for source downloads, async reqwest for the embedding client

use anyhow::{Result, anyhow};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Upper bound on attempts accepted from configuration
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Retry behaviour for idempotent requests: server and transport errors are retried with
/// exponential backoff, client errors fail immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    #[inline]
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before the attempt following `attempt` (1-based)
    #[inline]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(EXPONENTIAL_BACKOFF_BASE.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Build a blocking agent with a global timeout
#[inline]
pub fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Run `request_fn` until it succeeds, a non-retryable error occurs or attempts run out
#[inline]
pub fn call_with_retry<F>(policy: &RetryPolicy, target: &str, mut request_fn: F) -> Result<String>
where
    F: FnMut() -> Result<String, ureq::Error>,
{
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        debug!("HTTP request attempt {}/{}", attempt, policy.attempts);

        match request_fn() {
            Ok(response_text) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response_text);
            }
            Err(error) => {
                let should_retry = match &error {
                    ureq::Error::StatusCode(status) => {
                        if *status >= 500 {
                            warn!(
                                "Server error (status {}), attempt {}/{}",
                                status, attempt, policy.attempts
                            );
                            true
                        } else {
                            warn!("Client error (status {}), not retrying", status);
                            return Err(anyhow!("Client error: HTTP {}", status));
                        }
                    }
                    ureq::Error::ConnectionFailed
                    | ureq::Error::HostNotFound
                    | ureq::Error::Timeout(_)
                    | ureq::Error::Io(_) => {
                        warn!(
                            "Transport error: {}, attempt {}/{}",
                            error, attempt, policy.attempts
                        );
                        true
                    }
                    _ => {
                        warn!("Non-retryable error: {}", error);
                        false
                    }
                };

                if !should_retry {
                    return Err(anyhow!("Non-retryable error: {}", error));
                }

                last_error = Some(anyhow!("Request error: {}", error));

                if attempt < policy.attempts {
                    let delay = policy.delay_after(attempt);
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for request to {}", target);

    Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
}

/// Async counterpart of [`call_with_retry`] for reqwest requests.
///
/// Backoff uses the tokio timer, so dropping the returned future aborts both the in-flight
/// request and any pending retry.
#[inline]
pub async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    mut request_fn: F,
) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = reqwest::Result<reqwest::Response>>,
{
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        debug!("HTTP request attempt {}/{}", attempt, policy.attempts);

        let failure = match request_fn().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    warn!(
                        "Failed to read response body: {}, attempt {}/{}",
                        error, attempt, policy.attempts
                    );
                    anyhow!("Request error: {}", error)
                }
            },
            Ok(response) => {
                let status = response.status().as_u16();
                if status < 500 {
                    warn!("Client error (status {}), not retrying", status);
                    return Err(anyhow!("Client error: HTTP {}", status));
                }
                warn!(
                    "Server error (status {}), attempt {}/{}",
                    status, attempt, policy.attempts
                );
                anyhow!("Server error: HTTP {}", status)
            }
            Err(error) if error.is_builder() => {
                warn!("Non-retryable error: {}", error);
                return Err(anyhow!("Non-retryable error: {}", error));
            }
            Err(error) => {
                warn!(
                    "Transport error: {}, attempt {}/{}",
                    error, attempt, policy.attempts
                );
                anyhow!("Request error: {}", error)
            }
        };

        last_error = Some(failure);

        if attempt < policy.attempts {
            let delay = policy.delay_after(attempt);
            debug!("Waiting {:?} before retry", delay);
            tokio::time::sleep(delay).await;
        }
    }

    error!("All retry attempts failed for request to {}", target);

    Err(last_error.unwrap_or_else(|| anyhow!("Request failed after retries")))
}
