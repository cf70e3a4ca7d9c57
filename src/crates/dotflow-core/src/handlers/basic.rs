//! Small built-in handlers: lifecycle markers, state writes, assertions,
//! delays, routing markers, and environment reads.

use async_trait::async_trait;
use serde_json::Value;

use super::{parse_duration, Control, Handler};
use crate::cancel::CancellationToken;
use crate::condition;
use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::Node;
use crate::template;

/// Entry marker. Seeds the state and records the start time.
pub struct StartHandler;

#[async_trait]
impl Handler for StartHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        // A CLI-provided seed wins over the node attribute.
        if let Some(seed) = node.attr("seed") {
            if ctx.get("seed").is_none() {
                ctx.set("seed", Value::String(seed.to_string()));
            }
        }
        ctx.set(
            "start_time",
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        Ok(Control::Next)
    }
}

/// Terminal marker. Records the exit time and ends the walk.
pub struct ExitHandler;

#[async_trait]
impl Handler for ExitHandler {
    async fn handle(&self, _cancel: &CancellationToken, _node: &Node, ctx: &Context) -> Result<Control> {
        ctx.set("exit_time", Value::String(chrono::Utc::now().to_rfc3339()));
        Ok(Control::Exit)
    }
}

/// Set a state key from a rendered template.
pub struct SetHandler;

#[async_trait]
impl Handler for SetHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let key = node.attr_or("key", "");
        let rendered = template::render(node.attr_or("value", ""), &ctx.snapshot())?;
        ctx.set(key, Value::String(rendered));
        Ok(Control::Next)
    }
}

/// Fail the run when a condition over the state is false.
pub struct AssertHandler;

#[async_trait]
impl Handler for AssertHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let expr = node.attr_or("expr", "");
        if condition::evaluate(expr, &ctx.snapshot())? {
            return Ok(Control::Next);
        }
        let message = node
            .attr("message")
            .map(str::to_string)
            .unwrap_or_else(|| format!("assertion failed: {}", expr));
        Err(PipelineError::handler(&node.id, message))
    }
}

/// Block for a duration, waking early on cancellation.
pub struct SleepHandler;

#[async_trait]
impl Handler for SleepHandler {
    async fn handle(&self, cancel: &CancellationToken, node: &Node, _ctx: &Context) -> Result<Control> {
        let duration = parse_duration(node.attr_or("duration", ""))
            .map_err(|e| PipelineError::handler(&node.id, e))?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(Control::Next),
            _ = cancel.cancelled() => Err(PipelineError::Cancelled {
                node: node.id.clone(),
            }),
        }
    }
}

/// Value-routed branch point. The handler itself does nothing; the engine
/// applies the switch routing rule when selecting the next edge.
pub struct SwitchHandler;

#[async_trait]
impl Handler for SwitchHandler {
    async fn handle(&self, _cancel: &CancellationToken, _node: &Node, _ctx: &Context) -> Result<Control> {
        Ok(Control::Next)
    }
}

/// Engine-coordinated marker for `fan_out` and `fan_in`. The fan-in acts
/// as a no-op barrier executed after the branch merge; the fan-out is
/// intercepted by the engine before dispatch.
pub struct BarrierHandler;

#[async_trait]
impl Handler for BarrierHandler {
    async fn handle(&self, _cancel: &CancellationToken, _node: &Node, _ctx: &Context) -> Result<Control> {
        Ok(Control::Next)
    }
}

/// Copy an OS environment variable into state.
pub struct EnvHandler;

#[async_trait]
impl Handler for EnvHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let key = node.attr_or("key", "");
        let from = node.attr_or("from", "");
        let value = match std::env::var(from) {
            Ok(v) => v,
            Err(_) => match node.attr("default") {
                Some(d) => d.to_string(),
                None if node.attr_bool("required", false) => {
                    return Err(PipelineError::handler(
                        &node.id,
                        format!("required environment variable '{}' is not set", from),
                    ))
                }
                None => String::new(),
            },
        };
        ctx.set(key, Value::String(value));
        Ok(Control::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn node(id: &str, pairs: &[(&str, &str)]) -> Node {
        let attrs: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Node::new(id, attrs)
    }

    #[tokio::test]
    async fn test_start_seeds_and_stamps() {
        let ctx = Context::new();
        let n = node("s", &[("type", "start"), ("seed", "build the thing")]);
        let control = StartHandler
            .handle(&CancellationToken::new(), &n, &ctx)
            .await
            .unwrap();
        assert_eq!(control, Control::Next);
        assert_eq!(ctx.get_string("seed"), "build the thing");
        assert!(!ctx.get_string("start_time").is_empty());
    }

    #[tokio::test]
    async fn test_start_does_not_clobber_cli_seed() {
        let ctx = Context::new();
        ctx.set("seed", json!("from the command line"));
        let n = node("s", &[("type", "start"), ("seed", "from the graph")]);
        StartHandler
            .handle(&CancellationToken::new(), &n, &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.get_string("seed"), "from the command line");
    }

    #[tokio::test]
    async fn test_exit_returns_exit_control() {
        let ctx = Context::new();
        let n = node("e", &[("type", "exit")]);
        let control = ExitHandler
            .handle(&CancellationToken::new(), &n, &ctx)
            .await
            .unwrap();
        assert_eq!(control, Control::Exit);
        assert!(!ctx.get_string("exit_time").is_empty());
    }

    #[tokio::test]
    async fn test_set_renders_template() {
        let ctx = Context::new();
        ctx.set("name", json!("world"));
        let n = node("a", &[("type", "set"), ("key", "greeting"), ("value", "hi {{.name}}")]);
        SetHandler
            .handle(&CancellationToken::new(), &n, &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.get_string("greeting"), "hi world");
    }

    #[tokio::test]
    async fn test_assert_pass_and_fail() {
        let ctx = Context::new();
        ctx.set("status", json!("ok"));

        let passing = node("a", &[("type", "assert"), ("expr", "status == 'ok'")]);
        assert!(AssertHandler
            .handle(&CancellationToken::new(), &passing, &ctx)
            .await
            .is_ok());

        let failing = node(
            "a",
            &[("type", "assert"), ("expr", "status == 'bad'"), ("message", "wrong status")],
        );
        let err = AssertHandler
            .handle(&CancellationToken::new(), &failing, &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("wrong status"));
    }

    #[tokio::test]
    async fn test_sleep_observes_cancellation() {
        let ctx = Context::new();
        let n = node("z", &[("type", "sleep"), ("duration", "30s")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = SleepHandler.handle(&cancel, &n, &ctx).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_env_default_and_required() {
        let ctx = Context::new();
        let with_default = node(
            "v",
            &[("type", "env"), ("key", "k"), ("from", "DOTFLOW_TEST_UNSET_VAR"), ("default", "fallback")],
        );
        EnvHandler
            .handle(&CancellationToken::new(), &with_default, &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.get_string("k"), "fallback");

        let required = node(
            "v",
            &[("type", "env"), ("key", "k"), ("from", "DOTFLOW_TEST_UNSET_VAR"), ("required", "true")],
        );
        assert!(EnvHandler
            .handle(&CancellationToken::new(), &required, &ctx)
            .await
            .is_err());
    }
}
