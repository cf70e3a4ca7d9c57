//! HTTP request handler.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{parse_duration, Control, Handler};
use crate::cancel::CancellationToken;
use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::Node;
use crate::template;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Perform one HTTP request and store the response in state.
///
/// Attributes: `url` (template), `method`, `body` (template), `headers`
/// (template rendering to a JSON object), `timeout`, `fail_non2xx`,
/// `response_key`, `status_key`.
pub struct HttpHandler {
    client: reqwest::Client,
}

impl HttpHandler {
    /// Create the handler with a shared HTTP client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for HttpHandler {
    async fn handle(&self, cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let snapshot = ctx.snapshot();
        let url = template::render(node.attr_or("url", ""), &snapshot)?;
        let method = node.attr_or("method", "GET").to_uppercase();
        let timeout = match node.attr("timeout") {
            Some(t) => parse_duration(t).map_err(|e| PipelineError::handler(&node.id, e))?,
            None => DEFAULT_TIMEOUT,
        };

        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| PipelineError::handler(&node.id, format!("invalid method '{}'", method)))?;
        let mut request = self.client.request(method, &url).timeout(timeout);

        if let Some(headers) = node.attr("headers") {
            let rendered = template::render(headers, &snapshot)?;
            let parsed: Value = serde_json::from_str(&rendered).map_err(|e| {
                PipelineError::handler(&node.id, format!("headers must be a JSON object: {}", e))
            })?;
            let Value::Object(map) = parsed else {
                return Err(PipelineError::handler(
                    &node.id,
                    "headers must be a JSON object",
                ));
            };
            for (name, value) in map {
                let value = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                request = request.header(name, value);
            }
        }

        if let Some(body) = node.attr("body") {
            request = request.body(template::render(body, &snapshot)?);
        }

        let response = tokio::select! {
            result = request.send() => result.map_err(|e| {
                PipelineError::handler(&node.id, format!("request to {} failed: {}", url, e))
            })?,
            _ = cancel.cancelled() => {
                return Err(PipelineError::Cancelled { node: node.id.clone() });
            }
        };

        let status = response.status().as_u16();
        let body = tokio::select! {
            result = response.text() => result.map_err(|e| {
                PipelineError::handler(&node.id, format!("reading response body: {}", e))
            })?,
            _ = cancel.cancelled() => {
                return Err(PipelineError::Cancelled { node: node.id.clone() });
            }
        };

        ctx.set(node.attr_or("response_key", "http_response"), Value::String(body));
        ctx.set(
            node.attr_or("status_key", "http_status"),
            Value::String(status.to_string()),
        );

        if node.attr_bool("fail_non2xx", false) && !(200..300).contains(&status) {
            return Err(PipelineError::handler(
                &node.id,
                format!("request to {} returned status {}", url, status),
            ));
        }
        Ok(Control::Next)
    }
}
