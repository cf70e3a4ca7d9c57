//! String shaping handlers: split, regex capture, chained transforms.

use async_trait::async_trait;
use serde_json::Value;

use super::{Control, Handler};
use crate::cancel::CancellationToken;
use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::Node;

/// Split a string into a JSON array of parts.
pub struct SplitHandler;

#[async_trait]
impl Handler for SplitHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let source = ctx.get_string(node.attr_or("source", ""));
        let sep = node.attr_or("sep", ",");
        let trim = node.attr_bool("trim", true);

        let parts: Vec<Value> = source
            .split(sep)
            .map(|p| if trim { p.trim() } else { p })
            .map(|p| Value::String(p.to_string()))
            .collect();
        ctx.set(node.attr_or("key", ""), Value::Array(parts));
        Ok(Control::Next)
    }
}

/// Match a pattern against a state value, capturing into another key.
pub struct RegexHandler;

#[async_trait]
impl Handler for RegexHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let pattern = node.attr_or("pattern", "");
        let re = regex::Regex::new(pattern).map_err(|e| {
            PipelineError::handler(&node.id, format!("invalid pattern '{}': {}", pattern, e))
        })?;
        let source = ctx.get_string(node.attr_or("source", ""));
        let key = node.attr_or("key", "");

        match re.captures(&source) {
            Some(caps) => {
                let group = node.attr_usize("group", 0);
                let text = caps.get(group).map(|m| m.as_str()).ok_or_else(|| {
                    PipelineError::handler(
                        &node.id,
                        format!("pattern has no capture group {}", group),
                    )
                })?;
                ctx.set(key, Value::String(text.to_string()));
            }
            // The no_match attribute is the fallback value written when
            // nothing matches; without it, no match is a failure.
            None => match node.attr("no_match") {
                Some(fallback) => ctx.set(key, Value::String(fallback.to_string())),
                None => {
                    return Err(PipelineError::handler(
                        &node.id,
                        format!("pattern '{}' did not match", pattern),
                    ))
                }
            },
        }
        Ok(Control::Next)
    }
}

/// Apply a comma-separated chain of string operations.
pub struct StringTransformHandler;

#[async_trait]
impl Handler for StringTransformHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let mut text = ctx.get_string(node.attr_or("source", ""));
        for op in node.attr_or("ops", "").split(',') {
            text = match op.trim() {
                "trim" => text.trim().to_string(),
                "upper" => text.to_uppercase(),
                "lower" => text.to_lowercase(),
                "replace" => {
                    let old = node.attr_or("old", "");
                    if old.is_empty() {
                        return Err(PipelineError::handler(
                            &node.id,
                            "replace op requires an 'old' attribute",
                        ));
                    }
                    text.replace(old, node.attr_or("new", ""))
                }
                other => {
                    return Err(PipelineError::handler(
                        &node.id,
                        format!("unknown string op '{}'", other),
                    ))
                }
            };
        }
        ctx.set(node.attr_or("key", ""), Value::String(text));
        Ok(Control::Next)
    }
}
