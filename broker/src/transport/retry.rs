use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use super::{HttpRequest, HttpResponse, HttpTransport};
use crate::common::{BrokerError, BrokerResult, RetryConfig};

/// Bounded exponential backoff for server errors and dropped connections
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    retryable_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
        retryable_statuses: Vec<u16>,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            backoff_multiplier: backoff_multiplier.max(1.0),
            retryable_statuses,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay before the attempt following attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.backoff_multiplier,
            config.retryable_statuses.clone(),
        )
    }
}

/// Wraps a transport and replays requests per a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: HttpTransport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for RetryingTransport<T> {
    async fn send(&self, request: HttpRequest) -> BrokerResult<HttpResponse> {
        let target = request.target();
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.inner.send(request.clone()).await {
                Ok(response) if self.policy.is_retryable_status(response.status.as_u16()) => {
                    if attempt >= max_attempts {
                        return Err(BrokerError::Transport {
                            endpoint: target,
                            status: Some(response.status.as_u16()),
                            attempts: attempt,
                            retryable: false,
                            message: format!(
                                "server answered {} on all {} attempts",
                                response.status, attempt
                            ),
                        });
                    }
                    warn!(
                        "{} returned {} (attempt {}/{}), retrying",
                        target, response.status, attempt, max_attempts
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Request to {} failed (attempt {}/{}): {}, retrying",
                        target, attempt, max_attempts, e
                    );
                }
                Err(e) => return Err(e.with_attempts(attempt).into_final()),
            }

            sleep(self.policy.delay_after(attempt)).await;
        }
    }
}
