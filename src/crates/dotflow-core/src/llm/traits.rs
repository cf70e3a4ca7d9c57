//! The [`ModelClient`] trait and transport error classification.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::types::{GenerateRequest, GenerateResponse, StreamEvent};
use crate::cancel::CancellationToken;

/// Result type for model operations.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// Errors surfaced by model clients.
///
/// Classification drives the retry wrapper: [`ModelError::is_retryable`]
/// errors are retried with backoff, the rest surface immediately.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Provider rate limit hit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Provider-side failure (5xx).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Network-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Request timed out.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Credentials missing or rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Conversation exceeds the model's context window.
    #[error("context length exceeded: {0}")]
    ContextLength(String),

    /// Provider refused the content.
    #[error("content filtered: {0}")]
    ContentFilter(String),

    /// Request was malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Response could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The cancel token fired mid-call.
    #[error("model call cancelled")]
    Cancelled,

    /// No client registered for the requested provider.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl ModelError {
    /// True when a retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::ServiceUnavailable(_) | Self::Transport(_) | Self::Timeout(_)
        )
    }
}

/// A pluggable language-model backend.
///
/// `complete` is the blocking call used by the agent loop and the `prompt`
/// handler. `stream` has a default implementation that completes the call
/// and emits a single terminal event, so adapters only implement it when
/// the provider offers true streaming.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run one generation to completion.
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: GenerateRequest,
    ) -> ModelResult<GenerateResponse>;

    /// Run one generation, delivering events as they arrive.
    async fn stream(
        &self,
        cancel: &CancellationToken,
        request: GenerateRequest,
    ) -> ModelResult<mpsc::Receiver<StreamEvent>> {
        let response = self.complete(cancel, request).await?;
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.send(StreamEvent::Completed(response)).await;
        Ok(rx)
    }
}

impl std::fmt::Debug for dyn ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ModelClient")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ModelError::RateLimited("429".into()).is_retryable());
        assert!(ModelError::ServiceUnavailable("503".into()).is_retryable());
        assert!(ModelError::Transport("reset".into()).is_retryable());
        assert!(ModelError::Timeout("30s".into()).is_retryable());

        assert!(!ModelError::Auth("bad key".into()).is_retryable());
        assert!(!ModelError::ContextLength("too long".into()).is_retryable());
        assert!(!ModelError::ContentFilter("refused".into()).is_retryable());
        assert!(!ModelError::InvalidRequest("bad".into()).is_retryable());
        assert!(!ModelError::Cancelled.is_retryable());
    }
}
