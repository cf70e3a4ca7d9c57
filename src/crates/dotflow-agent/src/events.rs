//! Agent progress events.
//!
//! Observers receive best-effort notifications over a bounded channel.
//! Emission never blocks the loop: when the buffer is full the event is
//! dropped, so a stalled consumer cannot deadlock agent progress. Tests
//! and UIs must treat the stream as lossy and key off terminal outcomes.

use tokio::sync::mpsc;

/// Suggested buffer size for event channels.
pub const EVENT_BUFFER: usize = 256;

/// What the agent loop is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// A model turn is starting.
    LlmTurn {
        /// 1-based turn number.
        turn: usize,
    },
    /// A tool is about to run.
    ToolCall {
        /// Tool name.
        name: String,
        /// Raw input JSON, rendered to text.
        input: String,
    },
    /// A tool finished.
    ToolResult {
        /// Tool name.
        name: String,
        /// True when the result carries an error.
        is_error: bool,
    },
    /// A repeated call was replaced with steering.
    Steering {
        /// Tool name that was steered away from.
        name: String,
    },
    /// The loop hit an error it is surfacing.
    Error {
        /// Error description.
        message: String,
    },
    /// The loop finished with a final text output.
    Complete {
        /// Number of model turns taken.
        turns: usize,
    },
}

/// Non-blocking event emitter; `None` sink drops everything.
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::Sender<AgentEvent>>,
}

impl EventSink {
    /// A sink that discards all events.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A sink over a channel sender.
    pub fn new(sender: mpsc::Sender<AgentEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Create a sink plus its receiver with the default buffer.
    pub fn channel() -> (Self, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (Self::new(tx), rx)
    }

    /// Emit without blocking; full buffers drop the event.
    pub fn emit(&self, event: AgentEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.try_send(event);
        }
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field("enabled", &self.sender.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(AgentEvent::LlmTurn { turn: 1 });
        sink.emit(AgentEvent::Complete { turns: 1 });
        assert_eq!(rx.recv().await, Some(AgentEvent::LlmTurn { turn: 1 }));
        assert_eq!(rx.recv().await, Some(AgentEvent::Complete { turns: 1 }));
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = EventSink::new(tx);
        sink.emit(AgentEvent::LlmTurn { turn: 1 });
        // Buffer is full; this must not block and must not panic.
        sink.emit(AgentEvent::LlmTurn { turn: 2 });
        assert_eq!(rx.recv().await, Some(AgentEvent::LlmTurn { turn: 1 }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disabled_sink_is_a_no_op() {
        EventSink::disabled().emit(AgentEvent::Complete { turns: 0 });
    }
}
