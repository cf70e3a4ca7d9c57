//! Node handlers
//!
//! A handler is the unit of behavior behind a node kind. The engine looks
//! the handler up by kind, calls [`Handler::handle`] with the cancel token,
//! the node, and the shared state, and routes on the returned [`Control`]:
//!
//! - [`Control::Next`]: continue the walk through edge selection
//! - [`Control::Exit`]: terminate the pipeline normally
//!
//! `Control` is a first-class outcome rather than a sentinel error value,
//! so normal termination can never be hidden by error wrapping.
//!
//! The registry is process-wide, cheaply cloneable, and established at
//! startup; nothing mutates it during a walk.

mod basic;
mod exec;
mod fs;
mod http;
mod human;
mod include;
mod json;
mod text;

pub use basic::{
    AssertHandler, BarrierHandler, EnvHandler, ExitHandler, SetHandler, SleepHandler,
    StartHandler, SwitchHandler,
};
pub use exec::{load_items, run_shell, ExecHandler, ForEachHandler, ShellOutput};
pub use fs::{ReadFileHandler, WriteFileHandler};
pub use http::HttpHandler;
pub use human::{LineReader, StdinLineReader, WaitHumanHandler};
pub use include::IncludeHandler;
pub use json::{JsonDecodeHandler, JsonExtractHandler, JsonPackHandler};
pub use text::{RegexHandler, SplitHandler, StringTransformHandler};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::cancel::CancellationToken;
use crate::context::Context;
use crate::error::Result;
use crate::graph::{Node, NodeKind};

/// What the engine should do after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Continue the walk; select the next node from outgoing edges.
    Next,
    /// Terminate the pipeline normally.
    Exit,
}

/// A unit of node behavior.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute this handler for `node` against the shared state.
    ///
    /// Long-running handlers must observe `cancel` at their own I/O
    /// points; the engine only checks between nodes.
    async fn handle(
        &self,
        cancel: &CancellationToken,
        node: &Node,
        ctx: &Context,
    ) -> Result<Control>;
}

/// Kind-to-handler lookup shared by the engine and nested executions.
///
/// Clones share the underlying table, so a handler registered after a
/// clone (the `include` handler registers itself this way) is visible
/// through every clone.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a kind, replacing any previous registration.
    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .expect("registry lock poisoned")
            .insert(kind.into(), handler);
    }

    /// Look up the handler for a kind.
    pub fn resolve(&self, kind: &NodeKind) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .expect("registry lock poisoned")
            .get(kind.as_str())
            .cloned()
    }

    /// Registered kind names, for diagnostics.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .handlers
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Settings shared by handlers that touch the host system.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Base directory for file handlers and default working directory for
    /// shell execution.
    pub workdir: PathBuf,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
        }
    }
}

/// Build a registry with every built-in handler registered.
///
/// The model-backed kinds (`codergen`, `prompt`, `map`) are not built in;
/// the agent layer registers those on top of this registry.
pub fn default_registry(config: HandlerConfig) -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    let config = Arc::new(config);

    registry.register("start", Arc::new(StartHandler));
    registry.register("exit", Arc::new(ExitHandler));
    registry.register("set", Arc::new(SetHandler));
    registry.register("assert", Arc::new(AssertHandler));
    registry.register("sleep", Arc::new(SleepHandler));
    registry.register("switch", Arc::new(SwitchHandler));
    registry.register("env", Arc::new(EnvHandler));
    registry.register("fan_out", Arc::new(BarrierHandler));
    registry.register("fan_in", Arc::new(BarrierHandler));
    registry.register("http", Arc::new(HttpHandler::new()));
    registry.register("read_file", Arc::new(ReadFileHandler::new(config.clone())));
    registry.register("write_file", Arc::new(WriteFileHandler::new(config.clone())));
    registry.register("json_extract", Arc::new(JsonExtractHandler));
    registry.register("json_decode", Arc::new(JsonDecodeHandler));
    registry.register("json_pack", Arc::new(JsonPackHandler));
    registry.register("split", Arc::new(SplitHandler));
    registry.register("regex", Arc::new(RegexHandler));
    registry.register("string_transform", Arc::new(StringTransformHandler));
    registry.register("exec", Arc::new(ExecHandler::new(config.clone())));
    registry.register("for_each", Arc::new(ForEachHandler::new(config.clone())));
    registry.register(
        "wait.human",
        Arc::new(WaitHumanHandler::new(Arc::new(StdinLineReader))),
    );
    // Registered last so the handler's registry clone includes everything
    // above plus itself, letting included graphs nest further includes.
    registry.register("include", Arc::new(IncludeHandler::new(registry.clone())));

    registry
}

/// Parse a duration attribute: a number with an optional `ms`, `s`, `m`,
/// or `h` suffix. A bare number is seconds.
///
/// The error is a bare message; callers attach their node id.
pub fn parse_duration(text: &str) -> std::result::Result<Duration, String> {
    let text = text.trim();
    let (number, unit): (&str, &str) = match text.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => (&text[..idx], &text[idx..]),
        None => (text, "s"),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{}'", text))?;
    let seconds = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(format!("invalid duration unit '{}'", unit)),
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("invalid duration '{}'", text));
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("0.5").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("5 parsecs").is_err());
        assert!(parse_duration("-3s").is_err());
    }

    #[test]
    fn test_registry_clones_share_table() {
        let registry = HandlerRegistry::new();
        let clone = registry.clone();
        registry.register("exit", Arc::new(ExitHandler));
        assert!(clone.resolve(&NodeKind::Exit).is_some());
    }

    #[test]
    fn test_default_registry_covers_builtins() {
        let registry = default_registry(HandlerConfig::default());
        for kind in [
            "start", "exit", "set", "assert", "sleep", "switch", "env", "http", "read_file",
            "write_file", "json_extract", "json_decode", "json_pack", "split", "regex",
            "string_transform", "exec", "for_each", "wait.human", "include", "fan_out", "fan_in",
        ] {
            assert!(
                registry.resolve(&NodeKind::parse(kind)).is_some(),
                "missing handler for {kind}"
            );
        }
    }
}
