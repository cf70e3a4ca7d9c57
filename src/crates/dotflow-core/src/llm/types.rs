//! Request and response types shared by all model clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// The model asking for a tool to be run.
    ToolUse {
        /// Provider-assigned invocation id.
        id: String,
        /// Tool name.
        name: String,
        /// Raw JSON input as the model produced it.
        input: Value,
    },
    /// The outcome of a tool invocation, reported back to the model.
    ToolResult {
        /// Id of the invocation this result answers.
        tool_use_id: String,
        /// Textual output or error message.
        content: String,
        /// True when `content` is an error message.
        is_error: bool,
    },
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author.
    pub role: ChatRole,
    /// Ordered content blocks.
    pub blocks: Vec<ContentBlock>,
}

impl ChatMessage {
    /// A user message with a single text block.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// An assistant message with a single text block.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// A user message carrying tool results.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: ChatRole::User,
            blocks,
        }
    }

    /// All text blocks concatenated.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool invocations in this message, in order.
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.blocks
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
            .collect()
    }
}

/// A tool made available to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name the model calls it by.
    pub name: String,
    /// What the tool does, for the model's benefit.
    pub description: String,
    /// JSON-schema-shaped description of the input.
    pub input_schema: Value,
}

/// One generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Model identifier, e.g. `claude-sonnet-4-5`.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<ChatMessage>,
    /// System prompt, when set.
    pub system: Option<String>,
    /// Tools the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Per-turn output token budget.
    pub max_tokens: Option<u32>,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the assistant turn.
    EndTurn,
    /// The model wants tools executed.
    ToolUse,
    /// The token budget was exhausted.
    MaxTokens,
}

/// Token accounting for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the request.
    pub input_tokens: u64,
    /// Tokens produced in the response.
    pub output_tokens: u64,
}

/// One generation response.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Content blocks produced by the model.
    pub blocks: Vec<ContentBlock>,
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// Token usage, when the provider reports it.
    pub usage: Usage,
}

impl GenerateResponse {
    /// All text blocks concatenated.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// All tool invocations, in order.
    pub fn tool_uses(&self) -> Vec<&ContentBlock> {
        self.blocks
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
            .collect()
    }

    /// Convert into an assistant message for appending to a session.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            role: ChatRole::Assistant,
            blocks: self.blocks,
        }
    }
}

/// Events emitted by a streaming generation.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A fragment of assistant text.
    TextDelta(String),
    /// The final assembled response.
    Completed(GenerateResponse),
}
