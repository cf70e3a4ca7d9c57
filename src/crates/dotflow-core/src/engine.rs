//! Pipeline execution engine
//!
//! The engine walks a validated graph from its `start` node, dispatching
//! each node to its registered handler and selecting the next node from
//! outgoing edges. It owns the checkpoint discipline and the cycle bound.
//!
//! # Execution model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Sequential walk                                        │
//! │                                                         │
//! │  1. observe cancellation                                │
//! │  2. count the visit against the cycle bound             │
//! │  3. fan_out?  → run the parallel region, resume at the  │
//! │                 located fan_in                          │
//! │  4. dispatch the handler                                │
//! │       Control::Exit  → record last_node, checkpoint,    │
//! │                        done                             │
//! │       error          → wrap with the node id, abort     │
//! │  5. checkpoint                                          │
//! │  6. select the next edge (declared order, first match)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! A parallel region spawns one worker per outgoing edge of the fan-out
//! node. Each worker runs the same walk over a deep-cloned state store and
//! stops when it reaches a `fan_in` node, which it does not execute. The
//! region joins all workers, fails on any branch error with an aggregated
//! message, and otherwise merges each branch snapshot into the parent
//! store last-write-wins. Branch merge order is unspecified; pipeline
//! authors partition the key space.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use serde_json::Value;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::condition;
use crate::context::Context;
use crate::error::{LintError, PipelineError, Result};
use crate::graph::{Graph, Node, NodeKind};
use crate::handlers::{Control, HandlerRegistry};

/// Default per-node visit bound protecting against guard-expression loops.
pub const DEFAULT_MAX_VISITS: usize = 50;

/// Executes a graph against a state store.
pub struct Engine {
    graph: Arc<Graph>,
    registry: HandlerRegistry,
    context: Context,
    checkpoint_path: Option<PathBuf>,
    max_visits: usize,
}

impl Engine {
    /// Create an engine over a graph, handler registry, and state store.
    pub fn new(graph: Graph, registry: HandlerRegistry, context: Context) -> Self {
        Self {
            graph: Arc::new(graph),
            registry,
            context,
            checkpoint_path: None,
            max_visits: DEFAULT_MAX_VISITS,
        }
    }

    /// Write a checkpoint to `path` after every completed node.
    pub fn with_checkpoint_path(mut self, path: PathBuf) -> Self {
        self.checkpoint_path = Some(path);
        self
    }

    /// Override the per-node visit bound.
    pub fn with_max_visits(mut self, max_visits: usize) -> Self {
        self.max_visits = max_visits;
        self
    }

    /// The state store this engine runs against.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Run the pipeline.
    ///
    /// With `resume_from` set (the resume path), the walk begins at that
    /// node instead of the unique `start` node.
    pub async fn execute(&self, cancel: &CancellationToken, resume_from: Option<&str>) -> Result<()> {
        let start_id = match resume_from.filter(|id| !id.is_empty()) {
            Some(id) => {
                self.graph.node(id).ok_or_else(|| {
                    PipelineError::Validation(vec![LintError::graph(format!(
                        "resume node '{}' does not exist",
                        id
                    ))])
                })?;
                id.to_string()
            }
            None => self
                .graph
                .sole_node_of_kind(&NodeKind::Start)
                .map(|n| n.id.clone())
                .ok_or_else(|| {
                    PipelineError::Validation(vec![LintError::graph(
                        "graph has no unique start node",
                    )])
                })?,
        };

        info!(start = %start_id, "pipeline starting");
        let walk = Walk {
            graph: self.graph.clone(),
            registry: self.registry.clone(),
            max_visits: self.max_visits,
        };
        walk.run(
            cancel.clone(),
            self.context.clone(),
            start_id,
            WalkMode::Outer {
                checkpoint_path: self.checkpoint_path.clone(),
            },
        )
        .await
    }
}

/// How a walk terminates and whether it checkpoints.
#[derive(Clone)]
enum WalkMode {
    /// The top-level walk: checkpoints when configured, runs to exit.
    Outer { checkpoint_path: Option<PathBuf> },
    /// A parallel branch: no checkpoints, stops on reaching a fan-in
    /// without executing it.
    Branch,
}

/// Shared immutable pieces of a walk, cheap to clone into branch tasks.
#[derive(Clone)]
struct Walk {
    graph: Arc<Graph>,
    registry: HandlerRegistry,
    max_visits: usize,
}

impl Walk {
    /// Drive the walk from `start_id` until exit, branch stop, or error.
    ///
    /// Boxed because parallel regions recurse: branch walks may contain
    /// further fan-outs.
    fn run(
        &self,
        cancel: CancellationToken,
        ctx: Context,
        start_id: String,
        mode: WalkMode,
    ) -> BoxFuture<'static, Result<()>> {
        let walk = self.clone();
        Box::pin(async move {
            let mut visits: HashMap<String, usize> = HashMap::new();
            let mut current = start_id;

            loop {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled { node: current });
                }

                let visit_count = visits.entry(current.clone()).or_insert(0);
                *visit_count += 1;
                if *visit_count > walk.max_visits {
                    return Err(PipelineError::CycleLimit {
                        node: current,
                        limit: walk.max_visits,
                    });
                }

                let node = walk
                    .graph
                    .node(&current)
                    .ok_or_else(|| {
                        PipelineError::handler(&current, "node does not exist in the graph")
                    })?
                    .clone();

                // Branch stop: arrival at a fan-in ends the branch without
                // executing it; the outer walk runs the barrier after the
                // merge.
                if matches!(mode, WalkMode::Branch) && node.kind == NodeKind::FanIn {
                    return Ok(());
                }

                if node.kind == NodeKind::FanOut {
                    let fan_in = walk.run_parallel_region(&cancel, &ctx, &node).await?;
                    debug!(node = %node.id, fan_in = %fan_in, "parallel region merged");
                    current = fan_in;
                    continue;
                }

                debug!(node = %node.id, kind = %node.kind, "executing node");
                let handler = walk.registry.resolve(&node.kind).ok_or_else(|| {
                    PipelineError::handler(
                        &node.id,
                        format!("no handler registered for kind '{}'", node.kind),
                    )
                })?;

                match handler.handle(&cancel, &node, &ctx).await {
                    Ok(Control::Exit) => {
                        ctx.set("last_node", Value::String(node.id.clone()));
                        if let WalkMode::Outer {
                            checkpoint_path: Some(path),
                        } = &mode
                        {
                            ctx.save_checkpoint(path, &node.id)?;
                        }
                        info!(node = %node.id, "pipeline finished");
                        return Ok(());
                    }
                    Ok(Control::Next) => {}
                    Err(e) => return Err(attach_node(e, &node.id)),
                }

                if let WalkMode::Outer {
                    checkpoint_path: Some(path),
                } = &mode
                {
                    ctx.save_checkpoint(path, &node.id)?;
                }

                match select_next(&walk.graph, &node, &ctx)? {
                    Some(next) => current = next,
                    None => {
                        // No outgoing edges: implicit exit.
                        ctx.set("last_node", Value::String(node.id.clone()));
                        if let WalkMode::Outer {
                            checkpoint_path: Some(path),
                        } = &mode
                        {
                            ctx.save_checkpoint(path, &node.id)?;
                        }
                        info!(node = %node.id, "pipeline finished (implicit exit)");
                        return Ok(());
                    }
                }
            }
        })
    }

    /// Execute the parallel region opened by `fan_out`, returning the id of
    /// the fan-in node the outer walk resumes at.
    async fn run_parallel_region(
        &self,
        cancel: &CancellationToken,
        ctx: &Context,
        fan_out: &Node,
    ) -> Result<String> {
        let fan_in = self.graph.find_fan_in(&fan_out.id).ok_or_else(|| {
            PipelineError::handler(&fan_out.id, "fan_out has no reachable fan_in")
        })?;

        let edges = self.graph.outgoing(&fan_out.id);
        if edges.is_empty() {
            return Err(PipelineError::handler(
                &fan_out.id,
                "fan_out has no outgoing edges",
            ));
        }

        let mut handles = Vec::with_capacity(edges.len());
        for edge in &edges {
            let branch_ctx = ctx.deep_clone();
            let branch_walk = self.clone();
            let branch_cancel = cancel.clone();
            let target = edge.to.clone();
            handles.push(tokio::spawn(async move {
                let snapshot_ctx = branch_ctx.clone();
                branch_walk
                    .run(branch_cancel, branch_ctx, target.clone(), WalkMode::Branch)
                    .await
                    .map(|_| snapshot_ctx.snapshot())
                    .map_err(|e| (target, e))
            }));
        }

        let mut snapshots: Vec<HashMap<String, Value>> = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(snapshot)) => snapshots.push(snapshot),
                Ok(Err((target, e))) => failures.push(format!("branch '{}': {}", target, e)),
                Err(join_err) => failures.push(format!("branch task panicked: {}", join_err)),
            }
        }

        if !failures.is_empty() {
            return Err(PipelineError::handler(
                &fan_out.id,
                format!(
                    "{} of {} branches failed: {}",
                    failures.len(),
                    edges.len(),
                    failures.join("; ")
                ),
            ));
        }

        for snapshot in snapshots {
            ctx.merge(snapshot);
        }
        Ok(fan_in)
    }
}

/// Wrap a handler failure with the node that surfaced it, preserving
/// cancellation and checkpoint kinds.
fn attach_node(error: PipelineError, node_id: &str) -> PipelineError {
    match error {
        e @ (PipelineError::Cancelled { .. }
        | PipelineError::Handler { .. }
        | PipelineError::Checkpoint(_)
        | PipelineError::CycleLimit { .. }) => e,
        other => PipelineError::handler(node_id, other.to_string()),
    }
}

/// Select the next node from `node`'s outgoing edges.
///
/// Edges are considered in declared order; the first unconditional edge or
/// satisfied guard wins. At a `switch` node the guard literal is instead
/// compared for equality against the configured key's value, falling back
/// to the first `""`, `"_"`, or `"default"` edge.
fn select_next(graph: &Graph, node: &Node, ctx: &Context) -> Result<Option<String>> {
    let edges = graph.outgoing(&node.id);
    if edges.is_empty() {
        return Ok(None);
    }

    if node.kind == NodeKind::Switch {
        let value = ctx.get_string(node.attr_or("key", ""));
        for edge in &edges {
            if edge.guard == value {
                return Ok(Some(edge.to.clone()));
            }
        }
        for edge in &edges {
            if edge.is_unconditional() || edge.guard == "default" {
                return Ok(Some(edge.to.clone()));
            }
        }
        return Err(PipelineError::Routing {
            node: node.id.clone(),
            detail: Some(format!("no branch matched switch value '{}'", value)),
        });
    }

    let snapshot = ctx.snapshot();
    for edge in &edges {
        if edge.is_unconditional() || condition::evaluate(&edge.guard, &snapshot)? {
            return Ok(Some(edge.to.clone()));
        }
    }
    Err(PipelineError::routing(&node.id))
}
