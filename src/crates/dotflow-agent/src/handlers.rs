//! Model-backed node handlers: `codergen`, `prompt`, and `map`.
//!
//! These sit on top of the core handler registry; the pipeline binary
//! registers them with a model client and a tool suite via
//! [`register_model_handlers`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;

use dotflow_core::cancel::CancellationToken;
use dotflow_core::context::Context;
use dotflow_core::error::{PipelineError, Result};
use dotflow_core::graph::Node;
use dotflow_core::handlers::{Control, Handler, HandlerRegistry};
use dotflow_core::llm::{ChatMessage, ContentBlock, GenerateRequest, ModelClient};
use dotflow_core::template;

use crate::agent::{run_agent, AgentOptions};
use crate::tools::ToolRegistry;

/// Shared wiring for the model-backed handlers.
#[derive(Clone)]
pub struct ModelBinding {
    /// The client every model call goes through.
    pub client: Arc<dyn ModelClient>,
    /// Tools offered to agent loops.
    pub tools: ToolRegistry,
    /// Model used when a node has no `model` attribute.
    pub default_model: String,
}

impl ModelBinding {
    fn model_for(&self, node: &Node) -> Result<String> {
        let model = node.attr_or("model", &self.default_model);
        if model.is_empty() {
            return Err(PipelineError::handler(
                &node.id,
                "no model configured; set a model attribute, stylesheet rule, or default",
            ));
        }
        Ok(model.to_string())
    }

    fn agent_options(&self, node: &Node, model: String) -> AgentOptions {
        AgentOptions {
            model,
            system_prompt: node.attr("system_prompt").map(str::to_string),
            max_tokens: node.attr("max_tokens").and_then(|v| v.parse().ok()),
            max_turns: node.attr_usize("max_turns", 0),
            ..AgentOptions::default()
        }
    }
}

/// Run a tool-using agent loop over the node's prompt.
///
/// Stores the final text under both `last_output` and `<node id>_output`.
pub struct CodergenHandler {
    binding: ModelBinding,
}

impl CodergenHandler {
    /// Create the handler over shared model wiring.
    pub fn new(binding: ModelBinding) -> Self {
        Self { binding }
    }
}

#[async_trait]
impl Handler for CodergenHandler {
    async fn handle(&self, cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let snapshot = ctx.snapshot();
        let instruction = match node.attr("prompt") {
            Some(prompt) => template::render(prompt, &snapshot)?,
            None => ctx.get_string("seed"),
        };
        if instruction.is_empty() {
            return Err(PipelineError::handler(
                &node.id,
                "no prompt attribute and no seed in state",
            ));
        }

        let model = self.binding.model_for(node)?;
        let options = self.binding.agent_options(node, model);
        let outcome = run_agent(
            cancel,
            self.binding.client.as_ref(),
            &self.binding.tools,
            &instruction,
            options,
        )
        .await
        .map_err(|e| PipelineError::handler(&node.id, e.to_string()))?;

        ctx.set("last_output", Value::String(outcome.text.clone()));
        ctx.set(format!("{}_output", node.id), Value::String(outcome.text));
        Ok(Control::Next)
    }
}

/// Single-turn model call, no tools.
///
/// Stores the first text block of the response under `key`.
pub struct PromptHandler {
    binding: ModelBinding,
}

impl PromptHandler {
    /// Create the handler over shared model wiring.
    pub fn new(binding: ModelBinding) -> Self {
        Self { binding }
    }
}

#[async_trait]
impl Handler for PromptHandler {
    async fn handle(&self, cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let prompt = template::render(node.attr_or("prompt", ""), &ctx.snapshot())?;
        let model = self.binding.model_for(node)?;

        let request = GenerateRequest {
            model,
            messages: vec![ChatMessage::user(prompt)],
            system: node.attr("system").map(str::to_string),
            tools: Vec::new(),
            max_tokens: node.attr("max_tokens").and_then(|v| v.parse().ok()),
        };
        let response = self
            .binding
            .client
            .complete(cancel, request)
            .await
            .map_err(|e| PipelineError::handler(&node.id, e.to_string()))?;

        let first_text = response
            .blocks
            .iter()
            .find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default();
        ctx.set(node.attr_or("key", "prompt_output"), Value::String(first_text));
        Ok(Control::Next)
    }
}

/// Concurrent per-item agent loops over a JSON array in state.
///
/// Each item is exposed to the prompt template under `item_key`; results
/// collect into a JSON array under `results_key` in item order.
pub struct MapHandler {
    binding: ModelBinding,
}

impl MapHandler {
    /// Create the handler over shared model wiring.
    pub fn new(binding: ModelBinding) -> Self {
        Self { binding }
    }
}

#[async_trait]
impl Handler for MapHandler {
    async fn handle(&self, cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let items = dotflow_core::handlers::load_items(node, ctx)?;
        let item_key = node.attr_or("item_key", "item").to_string();
        let prompt_template = node.attr_or("prompt", "").to_string();
        let model = self.binding.model_for(node)?;
        // Default concurrency is unbounded: one worker per item.
        let concurrency = node.attr_usize("concurrency", items.len().max(1));
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let base_snapshot = ctx.snapshot();

        let mut tasks = Vec::with_capacity(items.len());
        for item in items {
            let binding = self.binding.clone();
            let options = self.binding.agent_options(node, model.clone());
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let mut snapshot = base_snapshot.clone();
            let item_key = item_key.clone();
            let prompt_template = prompt_template.clone();
            let node_id = node.id.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| PipelineError::handler(&node_id, "semaphore closed"))?;
                snapshot.insert(item_key, item);
                let instruction = template::render(&prompt_template, &snapshot)?;
                let outcome = run_agent(
                    &cancel,
                    binding.client.as_ref(),
                    &binding.tools,
                    &instruction,
                    options,
                )
                .await
                .map_err(|e| PipelineError::handler(&node_id, e.to_string()))?;
                Ok::<String, PipelineError>(outcome.text)
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        let mut failures = Vec::new();
        for (index, joined) in join_all(tasks).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(text)) => results.push(Value::String(text)),
                Ok(Err(e)) => failures.push(format!("item {}: {}", index, e)),
                Err(join_err) => failures.push(format!("item {} panicked: {}", index, join_err)),
            }
        }
        if !failures.is_empty() {
            return Err(PipelineError::handler(
                &node.id,
                format!("{} item(s) failed: {}", failures.len(), failures.join("; ")),
            ));
        }

        ctx.set(node.attr_or("results_key", "results"), Value::Array(results));
        Ok(Control::Next)
    }
}

/// Register `codergen`, `prompt`, and `map` over a model binding.
pub fn register_model_handlers(registry: &HandlerRegistry, binding: ModelBinding) {
    registry.register("codergen", Arc::new(CodergenHandler::new(binding.clone())));
    registry.register("prompt", Arc::new(PromptHandler::new(binding.clone())));
    registry.register("map", Arc::new(MapHandler::new(binding)));
}
