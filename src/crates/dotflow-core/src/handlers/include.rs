//! Graph inclusion handler.
//!
//! Parses, validates, styles, and executes another graph file against the
//! *same* state store. The included run never checkpoints; the outer walk's
//! checkpoint after the include node covers it.

use async_trait::async_trait;

use super::{Control, Handler, HandlerRegistry};
use crate::cancel::CancellationToken;
use crate::context::Context;
use crate::engine::Engine;
use crate::error::{PipelineError, Result};
use crate::graph::Node;
use crate::{dot, style, template, validate};

/// Run another pipeline file in place, sharing this run's state.
pub struct IncludeHandler {
    registry: HandlerRegistry,
}

impl IncludeHandler {
    /// Create the handler with the registry included graphs resolve
    /// their handlers from.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Handler for IncludeHandler {
    async fn handle(&self, cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let path = template::render(node.attr_or("path", ""), &ctx.snapshot())?;
        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| PipelineError::handler(&node.id, format!("read {}: {}", path, e)))?;

        let mut graph = dot::parse(&source)
            .map_err(|e| PipelineError::handler(&node.id, format!("parse {}: {}", path, e)))?;
        validate::validate_strict(&graph)
            .map_err(|e| PipelineError::handler(&node.id, format!("validate {}: {}", path, e)))?;
        style::apply_styles(&mut graph);

        Engine::new(graph, self.registry.clone(), ctx.clone())
            .execute(cancel, None)
            .await
            .map_err(|e| {
                // Cancellation keeps its kind so the outer walk stops too.
                if e.is_cancelled() {
                    e
                } else {
                    PipelineError::handler(&node.id, format!("included graph {}: {}", path, e))
                }
            })?;
        Ok(Control::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{default_registry, HandlerConfig};
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
    async fn test_include_shares_state() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner.dot");
        std::fs::write(
            &inner,
            r#"digraph inner {
                s [type=start];
                mark [type=set, key=included, value="yes {{.outer}}"];
                e [type=exit];
                s -> mark; mark -> e;
            }"#,
        )
        .unwrap();

        let ctx = Context::new();
        ctx.set("outer", json!("visible"));
        let registry = default_registry(HandlerConfig::default());
        let n = node(
            "inc",
            &[("type", "include"), ("path", inner.to_str().unwrap())],
        );
        IncludeHandler::new(registry)
            .handle(&CancellationToken::new(), &n, &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.get_string("included"), "yes visible");
    }

    #[tokio::test]
    async fn test_include_invalid_graph_fails() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("broken.dot");
        std::fs::write(&inner, "digraph { lonely [type=set, key=k]; }").unwrap();

        let ctx = Context::new();
        let registry = default_registry(HandlerConfig::default());
        let n = node(
            "inc",
            &[("type", "include"), ("path", inner.to_str().unwrap())],
        );
        let err = IncludeHandler::new(registry)
            .handle(&CancellationToken::new(), &n, &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("validate"));
    }

    #[tokio::test]
    async fn test_include_missing_file_fails() {
        let ctx = Context::new();
        let registry = default_registry(HandlerConfig::default());
        let n = node("inc", &[("type", "include"), ("path", "/no/such/file.dot")]);
        assert!(IncludeHandler::new(registry)
            .handle(&CancellationToken::new(), &n, &ctx)
            .await
            .is_err());
    }
}
