//! # dotflow-agent
//!
//! The tool-using agent layer for dotflow pipelines: conversation
//! sessions with head-and-tail truncation, the bounded agent loop with
//! repeated-call steering, the progress event stream, the default tool
//! suite (workdir-confined file I/O, search, patch, shell), and the
//! model-backed node handlers (`codergen`, `prompt`, `map`) registered on
//! top of the core handler registry.

pub mod agent;
pub mod events;
pub mod handlers;
pub mod loop_detector;
pub mod session;
pub mod tools;

pub use agent::{run_agent, AgentError, AgentOptions, AgentOutcome, DEFAULT_MAX_TURNS};
pub use events::{AgentEvent, EventSink};
pub use handlers::{register_model_handlers, ModelBinding};
pub use loop_detector::{LoopDetector, DEFAULT_THRESHOLD, STEERING_MESSAGE};
pub use session::Session;
pub use tools::{default_tools, AgentTool, ToolError, ToolRegistry};
