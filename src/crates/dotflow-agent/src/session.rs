//! Agent conversation sessions.
//!
//! A session is the ordered message history of one agent loop plus its
//! immutable system prompt. Long sessions are truncated head-and-tail: the
//! first messages (including the seed instruction) always survive, the
//! middle collapses into a single placeholder, and the most recent
//! messages are kept verbatim.

use dotflow_core::llm::{ChatMessage, ChatRole};

/// Messages always kept from the front of the session.
pub const TRUNCATE_HEAD: usize = 2;

/// Messages always kept from the back of the session.
pub const TRUNCATE_TAIL: usize = 10;

/// Slack above head + tail before truncation kicks in.
pub const TRUNCATE_PADDING: usize = 5;

/// One agent loop's conversation history.
#[derive(Debug, Clone)]
pub struct Session {
    /// System prompt sent with every request; never part of `messages`.
    system_prompt: Option<String>,
    /// Ordered conversation messages.
    messages: Vec<ChatMessage>,
}

impl Session {
    /// Start a session from the seed instruction.
    pub fn new(instruction: impl Into<String>, system_prompt: Option<String>) -> Self {
        Self {
            system_prompt,
            messages: vec![ChatMessage::user(instruction)],
        }
    }

    /// The immutable system prompt.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// The conversation so far.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Append a message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Number of messages in the session.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when the session has no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Collapse the middle of an over-long session.
    ///
    /// When the session exceeds `head + tail + padding` messages, the
    /// first [`TRUNCATE_HEAD`] and last [`TRUNCATE_TAIL`] are kept and the
    /// middle becomes one user-role placeholder naming the omitted count.
    /// The seed instruction is in the head, so it is never dropped.
    pub fn truncate(&mut self) {
        let limit = TRUNCATE_HEAD + TRUNCATE_TAIL + TRUNCATE_PADDING;
        if self.messages.len() <= limit {
            return;
        }

        let omitted = self.messages.len() - TRUNCATE_HEAD - TRUNCATE_TAIL;
        let placeholder = ChatMessage {
            role: ChatRole::User,
            blocks: vec![dotflow_core::llm::ContentBlock::Text {
                text: format!("[{} earlier messages omitted]", omitted),
            }],
        };

        let tail_start = self.messages.len() - TRUNCATE_TAIL;
        let mut kept = Vec::with_capacity(TRUNCATE_HEAD + 1 + TRUNCATE_TAIL);
        kept.extend_from_slice(&self.messages[..TRUNCATE_HEAD]);
        kept.push(placeholder);
        kept.extend_from_slice(&self.messages[tail_start..]);
        self.messages = kept;
    }
}
