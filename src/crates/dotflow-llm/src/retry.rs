//! Retry wrapper for model clients.
//!
//! Wraps any [`ModelClient`] and retries retryable failures (rate limits,
//! 5xx, transport) with exponential backoff and jitter. Non-retryable
//! failures (auth, context length, content filter) surface immediately.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use dotflow_core::cancel::CancellationToken;
use dotflow_core::llm::{GenerateRequest, GenerateResponse, ModelClient, ModelError, ModelResult};

/// Backoff configuration for retried model calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: usize,
    /// Initial interval between attempts in seconds.
    pub initial_interval: f64,
    /// Multiplier applied to the interval after each attempt.
    pub backoff_factor: f64,
    /// Interval cap in seconds.
    pub max_interval: f64,
    /// Whether to randomize each delay by 0.5x to 1.5x.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 30.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-indexed).
    pub fn delay(&self, attempt: usize) -> Duration {
        let base = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_interval);
        let final_delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };
        Duration::from_secs_f64(final_delay)
    }
}

/// A [`ModelClient`] that retries its inner client's failures.
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> RetryingClient<C> {
    /// Wrap `inner` with the default policy.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
        }
    }

    /// Wrap `inner` with a custom policy.
    pub fn with_policy(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C: ModelClient> ModelClient for RetryingClient<C> {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: GenerateRequest,
    ) -> ModelResult<GenerateResponse> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(cancel, request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt + 1 < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(attempt = attempt + 1, ?delay, error = %e, "retrying model call");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
