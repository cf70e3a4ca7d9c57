//! The tool-using agent loop.
//!
//! Drives a multi-turn exchange between a model client and a tool registry
//! until the model returns an assistant message with no tool invocations,
//! producing a final text output. The loop is bounded by a turn cap, and a
//! [`LoopDetector`] steers the model away from repeating identical tool
//! calls instead of executing them again.
//!
//! Tool failures never abort the loop; they flow back to the model as
//! error-flagged results, and the model decides how to proceed.

use thiserror::Error;
use tracing::{debug, warn};

use dotflow_core::cancel::CancellationToken;
use dotflow_core::llm::{
    ChatMessage, ContentBlock, GenerateRequest, ModelClient, ModelError,
};

use crate::events::{AgentEvent, EventSink};
use crate::loop_detector::{LoopDetector, STEERING_MESSAGE};
use crate::session::Session;
use crate::tools::ToolRegistry;

/// Default turn cap.
pub const DEFAULT_MAX_TURNS: usize = 50;

/// Failures surfaced by the agent loop.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The loop exceeded its configured turn cap.
    #[error("agent exceeded the maximum of {turns} turns")]
    MaxTurns {
        /// The configured cap.
        turns: usize,
    },

    /// The model client failed.
    #[error("model call failed: {0}")]
    Model(#[from] ModelError),

    /// The run was cancelled.
    #[error("agent loop cancelled")]
    Cancelled,
}

/// Agent loop configuration.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Model id sent with every request.
    pub model: String,
    /// System prompt carried by the session.
    pub system_prompt: Option<String>,
    /// Per-turn output token budget.
    pub max_tokens: Option<u32>,
    /// Turn cap; zero uses [`DEFAULT_MAX_TURNS`].
    pub max_turns: usize,
    /// Progress event sink.
    pub events: EventSink,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: None,
            max_tokens: None,
            max_turns: DEFAULT_MAX_TURNS,
            events: EventSink::disabled(),
        }
    }
}

/// The final product of a completed agent loop.
#[derive(Debug)]
pub struct AgentOutcome {
    /// The closing assistant text.
    pub text: String,
    /// The full conversation, for inspection or reuse.
    pub session: Session,
    /// Model turns taken.
    pub turns: usize,
}

/// Run the agent loop over `instruction` to completion.
pub async fn run_agent(
    cancel: &CancellationToken,
    client: &dyn ModelClient,
    tools: &ToolRegistry,
    instruction: &str,
    options: AgentOptions,
) -> Result<AgentOutcome, AgentError> {
    let max_turns = if options.max_turns == 0 {
        DEFAULT_MAX_TURNS
    } else {
        options.max_turns
    };
    let mut session = Session::new(instruction, options.system_prompt.clone());
    let mut detector = LoopDetector::default();
    let mut turns = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        session.truncate();
        options.events.emit(AgentEvent::LlmTurn { turn: turns + 1 });

        let request = GenerateRequest {
            model: options.model.clone(),
            messages: session.messages().to_vec(),
            system: session.system_prompt().map(str::to_string),
            tools: tools.definitions(),
            max_tokens: options.max_tokens,
        };

        let response = match client.complete(cancel, request).await {
            Ok(response) => response,
            Err(e) => {
                options.events.emit(AgentEvent::Error {
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };

        let text = response.text();
        let tool_uses: Vec<(String, String, serde_json::Value)> = response
            .tool_uses()
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect();
        session.push(response.into_message());

        if tool_uses.is_empty() {
            let turns = turns + 1;
            options.events.emit(AgentEvent::Complete { turns });
            debug!(turns, "agent loop complete");
            return Ok(AgentOutcome {
                text,
                session,
                turns,
            });
        }

        let mut results = Vec::with_capacity(tool_uses.len());
        for (id, name, input) in tool_uses {
            if detector.record(&name, &input) {
                warn!(tool = %name, "repeated tool call steered");
                options.events.emit(AgentEvent::Steering { name: name.clone() });
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: STEERING_MESSAGE.to_string(),
                    is_error: true,
                });
                continue;
            }

            let Some(tool) = tools.get(&name) else {
                options.events.emit(AgentEvent::ToolResult {
                    name: name.clone(),
                    is_error: true,
                });
                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: format!("tool '{}' not found", name),
                    is_error: true,
                });
                continue;
            };

            options.events.emit(AgentEvent::ToolCall {
                name: name.clone(),
                input: input.to_string(),
            });
            let (content, is_error) = match tool.execute(cancel, input).await {
                Ok(output) => (output, false),
                Err(e) => (e.to_string(), true),
            };
            options.events.emit(AgentEvent::ToolResult {
                name,
                is_error,
            });
            results.push(ContentBlock::ToolResult {
                tool_use_id: id,
                content,
                is_error,
            });
        }

        session.push(ChatMessage::tool_results(results));

        turns += 1;
        if turns > max_turns {
            options.events.emit(AgentEvent::Error {
                message: format!("exceeded {} turns", max_turns),
            });
            return Err(AgentError::MaxTurns { turns: max_turns });
        }
    }
}
