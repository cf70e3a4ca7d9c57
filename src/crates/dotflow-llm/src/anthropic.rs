//! Anthropic messages-API adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dotflow_core::cancel::CancellationToken;
use dotflow_core::llm::{
    ChatMessage, ChatRole, ContentBlock, GenerateRequest, GenerateResponse, ModelClient,
    ModelError, ModelResult, StopReason, Usage,
};

use crate::config::ProviderConfig;
use crate::util::classify_status;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Client for the Anthropic messages API.
#[derive(Clone)]
pub struct AnthropicClient {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a client from connection settings.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Split conversation messages into the system string and wire messages.
    fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<WireMessage>) {
        let mut system = None::<String>;
        let mut wire = Vec::new();
        for message in messages {
            match message.role {
                ChatRole::System => {
                    let text = message.text();
                    system = Some(match system {
                        Some(existing) => format!("{}\n\n{}", existing, text),
                        None => text,
                    });
                }
                ChatRole::User | ChatRole::Assistant => {
                    wire.push(WireMessage {
                        role: if message.role == ChatRole::User {
                            "user"
                        } else {
                            "assistant"
                        },
                        content: message.blocks.iter().map(wire_block).collect(),
                    });
                }
            }
        }
        (system, wire)
    }
}

fn wire_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
        ContentBlock::ToolUse { id, name, input } => {
            serde_json::json!({"type": "tool_use", "id": id, "name": name, "input": input})
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error,
        }),
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: GenerateRequest,
    ) -> ModelResult<GenerateResponse> {
        let url = format!("{}/v1/messages", self.config.base_url);
        let (converted_system, messages) = Self::convert_messages(&request.messages);
        let system = request.system.clone().or(converted_system);

        let body = WireRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect(),
        };

        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send();

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

        let blocks = wire
            .content
            .into_iter()
            .filter_map(|block| match block.kind.as_str() {
                "text" => Some(ContentBlock::Text {
                    text: block.text.unwrap_or_default(),
                }),
                "tool_use" => Some(ContentBlock::ToolUse {
                    id: block.id.unwrap_or_default(),
                    name: block.name.unwrap_or_default(),
                    input: block.input.unwrap_or(Value::Null),
                }),
                _ => None,
            })
            .collect();

        let stop_reason = match wire.stop_reason.as_deref() {
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };

        Ok(GenerateResponse {
            blocks,
            stop_reason,
            usage: Usage {
                input_tokens: wire.usage.input_tokens,
                output_tokens: wire.usage.output_tokens,
            },
        })
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}
