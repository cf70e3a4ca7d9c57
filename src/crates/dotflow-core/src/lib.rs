//! # dotflow-core
//!
//! Core runtime for DOT-described agentic pipelines: the graph model and
//! its permissive DOT reader, the structural validator, the style
//! applicator, the guard-expression evaluator, the shared state store with
//! JSON checkpoints, the handler registry with the built-in leaf handlers,
//! and the execution engine with its parallel fan-out/fan-in region.
//!
//! The model-backed node kinds (`codergen`, `prompt`, `map`) are not in
//! this crate; they are registered on top of [`handlers::default_registry`]
//! by the agent layer. This crate defines only the [`llm::ModelClient`]
//! abstraction those layers build on, so the core never links a provider.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use dotflow_core::{
//!     cancel::CancellationToken,
//!     context::Context,
//!     engine::Engine,
//!     handlers::{default_registry, HandlerConfig},
//!     style,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = std::fs::read_to_string("pipeline.dot")?;
//! let mut graph = dotflow_core::dot::parse(&source)?;
//! dotflow_core::validate::validate_strict(&graph)?;
//! style::apply_styles(&mut graph);
//!
//! let registry = default_registry(HandlerConfig::default());
//! let engine = Engine::new(graph, registry, Context::new());
//! engine.execute(&CancellationToken::new(), None).await?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod dot;
pub mod engine;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod llm;
pub mod style;
pub mod template;
pub mod validate;

pub use cancel::CancellationToken;
pub use checkpoint::Checkpoint;
pub use context::Context;
pub use engine::Engine;
pub use error::{LintError, PipelineError, Result};
pub use graph::{Edge, Graph, Node, NodeKind};
pub use handlers::{Control, Handler, HandlerConfig, HandlerRegistry};
