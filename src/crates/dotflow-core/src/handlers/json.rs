//! JSON shaping handlers: extract a path, explode an object, pack keys.

use async_trait::async_trait;
use serde_json::Value;

use super::{Control, Handler};
use crate::cancel::CancellationToken;
use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::Node;

/// Fetch the `source` key and parse it as JSON when it holds a string.
fn source_value(node: &Node, ctx: &Context) -> Result<Value> {
    let source = node.attr_or("source", "");
    let value = ctx.get(source).ok_or_else(|| {
        PipelineError::handler(&node.id, format!("source key '{}' is not set", source))
    })?;
    match value {
        Value::String(text) => serde_json::from_str(&text).map_err(|e| {
            PipelineError::handler(&node.id, format!("source key '{}' is not JSON: {}", source, e))
        }),
        other => Ok(other),
    }
}

/// Resolve a dot path with numeric array indices against a JSON value.
fn walk_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Extract one value from a JSON document in state.
pub struct JsonExtractHandler;

#[async_trait]
impl Handler for JsonExtractHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let root = source_value(node, ctx)?;
        let path = node.attr_or("path", "");
        let key = node.attr_or("key", "");

        match walk_path(&root, path) {
            Some(value) => ctx.set(key, value.clone()),
            None => match node.attr("default") {
                Some(default) => ctx.set(key, Value::String(default.to_string())),
                None => {
                    return Err(PipelineError::handler(
                        &node.id,
                        format!("path '{}' not found in source", path),
                    ))
                }
            },
        }
        Ok(Control::Next)
    }
}

/// Explode a top-level JSON object into one state key per field.
///
/// String fields land directly; everything else is re-serialized to its
/// compact JSON text. A non-object source fails.
pub struct JsonDecodeHandler;

#[async_trait]
impl Handler for JsonDecodeHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let root = source_value(node, ctx)?;
        let Value::Object(map) = root else {
            return Err(PipelineError::handler(
                &node.id,
                "source is not a JSON object",
            ));
        };
        let prefix = node.attr_or("prefix", "");
        for (field, value) in map {
            let rendered = match value {
                Value::String(s) => s,
                other => serde_json::to_string(&other)?,
            };
            ctx.set(format!("{}{}", prefix, field), Value::String(rendered));
        }
        Ok(Control::Next)
    }
}

/// Pack a list of state keys into a JSON object string.
pub struct JsonPackHandler;

#[async_trait]
impl Handler for JsonPackHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let output = node.attr_or("output", "");
        let mut object = serde_json::Map::new();
        for key in node.attr_or("keys", "").split(',') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            object.insert(key.to_string(), Value::String(ctx.get_string(key)));
        }
        let packed = serde_json::to_string(&Value::Object(object))?;
        ctx.set(output, Value::String(packed));
        Ok(Control::Next)
    }
}
