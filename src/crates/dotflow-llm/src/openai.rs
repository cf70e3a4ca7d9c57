//! OpenAI chat-completions adapter.

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

/// Client for the OpenAI chat completions API.
#[derive(Clone)]
pub struct OpenAiClient {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a client from connection settings.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Flatten conversation messages into chat-completions entries.
    ///
    /// Tool invocations become `tool_calls` on the assistant entry; each
    /// tool result becomes its own `tool`-role entry.
    fn convert_messages(system: Option<&str>, messages: &[ChatMessage]) -> Vec<WireMessage> {
        let mut wire = Vec::new();
        if let Some(system) = system {
            wire.push(WireMessage {
                role: "system".into(),
                content: Some(system.to_string()),
                tool_calls: Vec::new(),
                tool_call_id: None,
            });
        }
        for message in messages {
            match message.role {
                ChatRole::System => wire.push(WireMessage {
                    role: "system".into(),
                    content: Some(message.text()),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                }),
                ChatRole::Assistant => {
                    let tool_calls: Vec<WireToolCall> = message
                        .blocks
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::ToolUse { id, name, input } => Some(WireToolCall {
                                id: id.clone(),
                                kind: "function".into(),
                                function: WireFunction {
                                    name: name.clone(),
                                    arguments: input.to_string(),
                                },
                            }),
                            _ => None,
                        })
                        .collect();
                    let text = message.text();
                    wire.push(WireMessage {
                        role: "assistant".into(),
                        content: if text.is_empty() { None } else { Some(text) },
                        tool_calls,
                        tool_call_id: None,
                    });
                }
                ChatRole::User => {
                    let mut plain = String::new();
                    for block in &message.blocks {
                        match block {
                            ContentBlock::Text { text } => plain.push_str(text),
                            ContentBlock::ToolResult {
                                tool_use_id,
                                content,
                                ..
                            } => wire.push(WireMessage {
                                role: "tool".into(),
                                content: Some(content.clone()),
                                tool_calls: Vec::new(),
                                tool_call_id: Some(tool_use_id.clone()),
                            }),
                            ContentBlock::ToolUse { .. } => {}
                        }
                    }
                    if !plain.is_empty() {
                        wire.push(WireMessage {
                            role: "user".into(),
                            content: Some(plain),
                            tool_calls: Vec::new(),
                            tool_call_id: None,
                        });
                    }
                }
            }
        }
        wire
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: GenerateRequest,
    ) -> ModelResult<GenerateResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = WireRequest {
            model: request.model.clone(),
            messages: Self::convert_messages(request.system.as_deref(), &request.messages),
            max_tokens: request.max_tokens,
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

        let send = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
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
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("response has no choices".into()))?;

        let mut blocks = Vec::new();
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            blocks.push(ContentBlock::Text { text });
        }
        for call in choice.message.tool_calls {
            let input: Value =
                serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            blocks.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }

        let stop_reason = match choice.finish_reason.as_deref() {
            Some("tool_calls") => StopReason::ToolUse,
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        };

        Ok(GenerateResponse {
            blocks,
            stop_reason,
            usage: Usage {
                input_tokens: wire.usage.prompt_tokens,
                output_tokens: wire.usage.completion_tokens,
            },
        })
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_results_become_tool_role_entries() {
        let messages = vec![ChatMessage {
            role: ChatRole::User,
            blocks: vec![ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "output".into(),
                is_error: false,
            }],
        }];
        let wire = OpenAiClient::convert_messages(None, &messages);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "tool");
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_assistant_tool_use_becomes_tool_calls() {
        let messages = vec![ChatMessage {
            role: ChatRole::Assistant,
            blocks: vec![ContentBlock::ToolUse {
                id: "t1".into(),
                name: "search".into(),
                input: json!({"pattern": "x"}),
            }],
        }];
        let wire = OpenAiClient::convert_messages(Some("sys"), &messages);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].tool_calls.len(), 1);
        assert_eq!(wire[1].tool_calls[0].function.name, "search");
    }
}
