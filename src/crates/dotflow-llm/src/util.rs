//! Shared provider plumbing.

use dotflow_core::llm::ModelError;

/// Map an HTTP error status and body to a classified model error.
///
/// Bodies are passed through in the message for operator diagnostics; they
/// come from the provider, never from local credentials.
pub fn classify_status(status: u16, body: &str) -> ModelError {
    match status {
        401 | 403 => ModelError::Auth(format!("status {}", status)),
        429 => ModelError::RateLimited(truncate(body)),
        408 => ModelError::Timeout(truncate(body)),
        400 if body.contains("context") && body.contains("length") => {
            ModelError::ContextLength(truncate(body))
        }
        400 if body.contains("content_filter") || body.contains("content policy") => {
            ModelError::ContentFilter(truncate(body))
        }
        400..=499 => ModelError::InvalidRequest(format!("status {}: {}", status, truncate(body))),
        _ => ModelError::ServiceUnavailable(format!("status {}: {}", status, truncate(body))),
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 400;
    if body.chars().count() <= LIMIT {
        body.to_string()
    } else {
        let head: String = body.chars().take(LIMIT).collect();
        format!("{}...", head)
    }
}
