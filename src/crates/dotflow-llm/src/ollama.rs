//! Ollama local-server adapter. No credentials involved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dotflow_core::cancel::CancellationToken;
use dotflow_core::llm::{
    ChatRole, ContentBlock, GenerateRequest, GenerateResponse, ModelClient, ModelError,
    ModelResult, StopReason, Usage,
};

use crate::config::ProviderConfig;
use crate::util::classify_status;

/// Default base URL of a local Ollama server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Client for a local Ollama server's chat API.
#[derive(Clone)]
pub struct OllamaClient {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a client from connection settings.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: GenerateRequest,
    ) -> ModelResult<GenerateResponse> {
        let url = format!("{}/api/chat", self.config.base_url);

        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system".into(),
                content: system.clone(),
            });
        }
        for message in &request.messages {
            let role = match message.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            // Ollama's chat shape is text-only; tool results flatten into
            // the message text.
            let mut content = String::new();
            for block in &message.blocks {
                match block {
                    ContentBlock::Text { text } => content.push_str(text),
                    ContentBlock::ToolResult {
                        content: result, ..
                    } => {
                        content.push_str("[tool result] ");
                        content.push_str(result);
                    }
                    ContentBlock::ToolUse { name, input, .. } => {
                        content.push_str(&format!("[tool call] {} {}", name, input));
                    }
                }
            }
            messages.push(WireMessage {
                role: role.into(),
                content,
            });
        }

        let body = WireRequest {
            model: request.model.clone(),
            messages,
            stream: false,
            tools: request
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect(),
        };

        let send = self.client.post(&url).json(&body).send();
        let response = tokio::select! {
            result = send => result.map_err(|e| ModelError::Transport(e.to_string()))?,
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &text));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let mut blocks = Vec::new();
        if !wire.message.content.is_empty() {
            blocks.push(ContentBlock::Text {
                text: wire.message.content,
            });
        }
        for call in wire.message.tool_calls {
            // Ollama does not assign call ids; mint one so results can be
            // correlated the same way as the remote providers.
            blocks.push(ContentBlock::ToolUse {
                id: format!("ollama_{}", uuid::Uuid::new_v4()),
                name: call.function.name,
                input: call.function.arguments,
            });
        }

        let stop_reason = if blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
        {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };

        Ok(GenerateResponse {
            blocks,
            stop_reason,
            usage: Usage {
                input_tokens: wire.prompt_eval_count,
                output_tokens: wire.eval_count,
            },
        })
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct WireResponse {
    message: WireResponseMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}
