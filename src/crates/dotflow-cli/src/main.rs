//! # dotflow
//!
//! Command line front-end for DOT-described agentic pipelines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use dotflow_agent::{default_tools, register_model_handlers, ModelBinding};
use dotflow_core::cancel::CancellationToken;
use dotflow_core::context::{value_to_string, Context};
use dotflow_core::engine::Engine;
use dotflow_core::handlers::{default_registry, parse_duration, HandlerConfig, HandlerRegistry};
use dotflow_core::llm::{
    GenerateRequest, GenerateResponse, ModelClient, ModelError, ModelResult,
};
use dotflow_core::{dot, style, validate, Graph};

const DEFAULT_MODEL_SPEC: &str = "anthropic:claude-sonnet-4-5";

#[derive(Parser)]
#[command(name = "dotflow")]
#[command(about = "Run agentic pipelines described in the DOT graph language", long_about = None)]
struct Cli {
    /// Log verbosity: trace, debug, info, warn, error.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphFormat {
    Text,
    Dot,
}

#[derive(clap::Args, Clone)]
struct RunFlags {
    /// Working directory for file handlers and agent tools.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Default model as provider:name for codergen, prompt, and map nodes.
    #[arg(long)]
    model: Option<String>,

    /// Checkpoint file written after every completed node.
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Write the final state snapshot as JSON to this path.
    #[arg(long)]
    output_context: Option<PathBuf>,

    /// Seed string injected into state under the `seed` key.
    #[arg(long)]
    seed: Option<String>,

    /// Total wall-clock deadline, e.g. 90s or 10m.
    #[arg(long)]
    timeout: Option<String>,

    /// Initial state key, as key=value. Repeatable.
    #[arg(long = "var")]
    vars: Vec<String>,

    /// JSON object file of initial state keys; values are stringified.
    #[arg(long)]
    var_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, validate, apply styles, and run a pipeline from start.
    Run {
        /// Pipeline graph in DOT format.
        graph: PathBuf,

        #[command(flatten)]
        flags: RunFlags,
    },

    /// Parse and validate; print diagnostics one per line.
    Lint {
        /// Pipeline graph in DOT format.
        graph: PathBuf,
    },

    /// Load a checkpoint and resume a pipeline from its last node.
    Resume {
        /// Pipeline graph in DOT format.
        graph: PathBuf,

        /// Checkpoint file from a previous run.
        checkpoint_file: PathBuf,

        #[command(flatten)]
        flags: RunFlags,
    },

    /// Print a readable summary or a canonical DOT round-trip.
    Graph {
        /// Pipeline graph in DOT format.
        graph: PathBuf,

        /// Output format.
        #[arg(long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },

    /// Print build identity.
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let result = runtime.block_on(dispatch(cli.command));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("warn"))
        .expect("filter");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn dispatch(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { graph, flags } => run(&graph, flags, None).await,
        Commands::Resume {
            graph,
            checkpoint_file,
            flags,
        } => run(&graph, flags, Some(checkpoint_file)).await,
        Commands::Lint { graph } => lint(&graph),
        Commands::Graph { graph, format } => inspect(&graph, format),
        Commands::Version => {
            println!("dotflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_graph(path: &Path) -> anyhow::Result<Graph> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut graph = dot::parse(&source).with_context(|| format!("parsing {}", path.display()))?;
    validate::validate_strict(&graph)?;
    style::apply_styles(&mut graph);
    Ok(graph)
}

fn lint(path: &Path) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let graph = dot::parse(&source).with_context(|| format!("parsing {}", path.display()))?;
    let lints = validate::validate(&graph);
    if lints.is_empty() {
        println!("{}: ok", path.display());
        return Ok(());
    }
    for lint in &lints {
        println!("{}", lint);
    }
    bail!("{} problem(s) found", lints.len());
}

fn inspect(path: &Path, format: GraphFormat) -> anyhow::Result<()> {
    let graph = load_graph(path)?;
    match format {
        GraphFormat::Dot => print!("{}", graph.to_dot()),
        GraphFormat::Text => {
            let name = if graph.name.is_empty() {
                "(unnamed)"
            } else {
                &graph.name
            };
            println!("graph {}", name);
            println!("nodes ({}):", graph.nodes.len());
            for node in graph.nodes.values() {
                let extras: Vec<String> = node
                    .attrs
                    .iter()
                    .filter(|(k, _)| k.as_str() != "type")
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                if extras.is_empty() {
                    println!("  {} [{}]", node.id, node.kind);
                } else {
                    println!("  {} [{}] {}", node.id, node.kind, extras.join(" "));
                }
            }
            println!("edges ({}):", graph.edges.len());
            for edge in &graph.edges {
                if edge.guard.is_empty() {
                    println!("  {} -> {}", edge.from, edge.to);
                } else {
                    println!("  {} -> {} [{}]", edge.from, edge.to, edge.guard);
                }
            }
        }
    }
    Ok(())
}

/// Build the initial state from seed flags, var flags, and a var file.
fn build_context(flags: &RunFlags) -> anyhow::Result<Context> {
    let mut values: HashMap<String, Value> = HashMap::new();

    if let Some(var_file) = &flags.var_file {
        let body = std::fs::read_to_string(var_file)
            .with_context(|| format!("reading {}", var_file.display()))?;
        let parsed: Value = serde_json::from_str(&body)
            .with_context(|| format!("parsing {}", var_file.display()))?;
        let Value::Object(map) = parsed else {
            bail!(
                "{}: var file must be a JSON object at the top level",
                var_file.display()
            );
        };
        for (key, value) in map {
            values.insert(key, Value::String(value_to_string(&value)));
        }
    }

    for var in &flags.vars {
        let Some((key, value)) = var.split_once('=') else {
            bail!("--var '{}' is not key=value", var);
        };
        values.insert(key.to_string(), Value::String(value.to_string()));
    }

    if let Some(seed) = &flags.seed {
        values.insert("seed".to_string(), Value::String(seed.clone()));
    }

    Ok(Context::from_map(values))
}

/// A client that reports why no real client could be built.
///
/// Registered when credentials are missing so pipelines without model
/// nodes still run, while model nodes fail with the underlying cause.
struct UnconfiguredClient {
    reason: String,
}

#[async_trait::async_trait]
impl ModelClient for UnconfiguredClient {
    async fn complete(
        &self,
        _cancel: &CancellationToken,
        _request: GenerateRequest,
    ) -> ModelResult<GenerateResponse> {
        Err(ModelError::Auth(self.reason.clone()))
    }
}

fn build_registry(flags: &RunFlags) -> HandlerRegistry {
    let registry = default_registry(HandlerConfig {
        workdir: flags.workdir.clone(),
    });

    let spec = flags.model.as_deref().unwrap_or(DEFAULT_MODEL_SPEC);
    let (client, default_model): (Arc<dyn ModelClient>, String) =
        match dotflow_llm::client_for_spec(spec) {
            Ok((client, model)) => (client, model),
            Err(e) => {
                tracing::warn!(spec, error = %e, "model client unavailable");
                (
                    Arc::new(UnconfiguredClient {
                        reason: e.to_string(),
                    }),
                    spec.to_string(),
                )
            }
        };

    register_model_handlers(
        &registry,
        ModelBinding {
            client,
            tools: default_tools(&flags.workdir),
            default_model,
        },
    );
    registry
}

async fn run(
    graph_path: &Path,
    flags: RunFlags,
    resume_checkpoint: Option<PathBuf>,
) -> anyhow::Result<()> {
    let graph = load_graph(graph_path)?;

    // On resume, the checkpoint supplies the state and the overrides are
    // merged on top.
    let (context, resume_from) = match &resume_checkpoint {
        Some(checkpoint_file) => {
            let (context, last_node) = Context::load_checkpoint(checkpoint_file)?;
            context.merge(build_context(&flags)?.snapshot());
            (context, Some(last_node))
        }
        None => (build_context(&flags)?, None),
    };

    let registry = build_registry(&flags);
    let cancel = CancellationToken::new();

    if let Some(timeout) = &flags.timeout {
        let deadline = parse_duration(timeout)
            .map_err(|e| anyhow::anyhow!("--timeout: {}", e))?;
        cancel.cancel_after(deadline);
    }
    spawn_signal_handler(cancel.clone());

    let mut engine = Engine::new(graph, registry, context.clone());
    if let Some(path) = flags.checkpoint.clone().or(resume_checkpoint) {
        engine = engine.with_checkpoint_path(path);
    }

    let result = engine.execute(&cancel, resume_from.as_deref()).await;

    if let Some(output_path) = &flags.output_context {
        let snapshot = context.snapshot();
        let body = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(output_path, body)
            .with_context(|| format!("writing {}", output_path.display()))?;
    }

    result?;
    println!("pipeline completed at node {}", context.get_string("last_node"));
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::warn!("signal received, cancelling run");
        cancel.cancel();
    });
}
