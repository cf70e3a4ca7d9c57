//! The model-backed handlers running inside a full engine walk.

use std::sync::Arc;

use async_trait::async_trait;

use dotflow_agent::handlers::{register_model_handlers, ModelBinding};
use dotflow_agent::tools::default_tools;
use dotflow_core::cancel::CancellationToken;
use dotflow_core::context::Context;
use dotflow_core::engine::Engine;
use dotflow_core::handlers::{default_registry, HandlerConfig};
use dotflow_core::llm::{
    ContentBlock, GenerateRequest, GenerateResponse, ModelClient, ModelResult, StopReason, Usage,
};
use dotflow_core::{dot, validate};
use serde_json::json;

/// Echoes the last user text back, prefixed, so prompts are observable.
struct EchoClient;

#[async_trait]
impl ModelClient for EchoClient {
    async fn complete(
        &self,
        _cancel: &CancellationToken,
        request: GenerateRequest,
    ) -> ModelResult<GenerateResponse> {
        let last = request
            .messages
            .last()
            .map(|m| m.text())
            .unwrap_or_default();
        Ok(GenerateResponse {
            blocks: vec![ContentBlock::Text {
                text: format!("echo[{}]: {}", request.model, last),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }
}

fn binding(workdir: &std::path::Path) -> ModelBinding {
    ModelBinding {
        client: Arc::new(EchoClient),
        tools: default_tools(workdir),
        default_model: "default-model".to_string(),
    }
}

async fn run(source: &str, ctx: Context) {
    let dir = tempfile::tempdir().unwrap();
    let mut graph = dot::parse(source).unwrap();
    validate::validate_strict(&graph).unwrap();
    dotflow_core::style::apply_styles(&mut graph);
    let registry = default_registry(HandlerConfig::default());
    register_model_handlers(&registry, binding(dir.path()));
    Engine::new(graph, registry, ctx)
        .execute(&CancellationToken::new(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn codergen_writes_last_output_and_node_output() {
    let source = r#"
        digraph {
            s [type=start, seed="build a parser"];
            gen [type=codergen];
            e [type=exit];
            s -> gen; gen -> e;
        }
    "#;
    let ctx = Context::new();
    run(source, ctx.clone()).await;

    let output = ctx.get_string("last_output");
    assert!(output.contains("build a parser"));
    assert_eq!(ctx.get_string("gen_output"), output);
}

#[tokio::test]
async fn codergen_prompt_template_overrides_seed() {
    let source = r#"
        digraph {
            s [type=start, seed=unused];
            gen [type=codergen, prompt="work on {{.target}}"];
            e [type=exit];
            s -> gen; gen -> e;
        }
    "#;
    let ctx = Context::new();
    ctx.set("target", json!("the lexer"));
    run(source, ctx.clone()).await;
    assert!(ctx.get_string("last_output").contains("work on the lexer"));
}

#[tokio::test]
async fn stylesheet_model_reaches_the_request() {
    let source = r#"
        digraph {
            model_stylesheet="type[codergen] { model: styled-model }";
            s [type=start, seed=go];
            gen [type=codergen];
            e [type=exit];
            s -> gen; gen -> e;
        }
    "#;
    let ctx = Context::new();
    run(source, ctx.clone()).await;
    assert!(ctx.get_string("last_output").contains("echo[styled-model]"));
}

#[tokio::test]
async fn prompt_handler_sets_key() {
    let source = r#"
        digraph {
            s [type=start];
            ask [type=prompt, prompt="summarize {{.subject}}", key=summary];
            e [type=exit];
            s -> ask; ask -> e;
        }
    "#;
    let ctx = Context::new();
    ctx.set("subject", json!("the report"));
    run(source, ctx.clone()).await;
    assert!(ctx
        .get_string("summary")
        .contains("summarize the report"));
}

#[tokio::test]
async fn map_collects_results_in_item_order() {
    let source = r#"
        digraph {
            s [type=start];
            fan [type=map, items=targets, item_key=target, prompt="handle {{.target}}", results_key=outputs, concurrency="2"];
            e [type=exit];
            s -> fan; fan -> e;
        }
    "#;
    let ctx = Context::new();
    ctx.set("targets", json!(["one", "two", "three"]));
    run(source, ctx.clone()).await;

    let outputs = ctx.get("outputs").unwrap();
    let outputs = outputs.as_array().unwrap();
    assert_eq!(outputs.len(), 3);
    assert!(outputs[0].as_str().unwrap().contains("handle one"));
    assert!(outputs[1].as_str().unwrap().contains("handle two"));
    assert!(outputs[2].as_str().unwrap().contains("handle three"));
}
