//! Structural graph validation
//!
//! [`validate`] is a pure function over a parsed graph returning *every*
//! defect found, not just the first; `lint` output depends on seeing the
//! full list in one pass. [`validate_strict`] collapses a non-empty list
//! into a single [`PipelineError::Validation`] for callers that just want
//! to refuse to run.

use crate::error::{LintError, PipelineError, Result};
use crate::graph::{Graph, NodeKind};

/// Attributes that must be present and non-empty, per node kind.
fn required_attrs(kind: &NodeKind) -> &'static [&'static str] {
    match kind {
        NodeKind::Set => &["key"],
        NodeKind::Http => &["url"],
        NodeKind::Assert => &["expr"],
        NodeKind::Sleep => &["duration"],
        NodeKind::Switch => &["key"],
        NodeKind::Env => &["key", "from"],
        NodeKind::ReadFile => &["key", "path"],
        NodeKind::WriteFile => &["path", "content"],
        NodeKind::JsonExtract => &["source", "path", "key"],
        NodeKind::JsonDecode => &["source"],
        NodeKind::JsonPack => &["keys", "output"],
        NodeKind::Split => &["source", "key"],
        NodeKind::Regex => &["source", "pattern", "key"],
        NodeKind::StringTransform => &["source", "ops", "key"],
        NodeKind::Exec => &["cmd"],
        NodeKind::ForEach => &["items", "item_key", "cmd"],
        NodeKind::Map => &["items", "item_key", "prompt"],
        NodeKind::Prompt => &["prompt", "key"],
        NodeKind::Include => &["path"],
        _ => &[],
    }
}

/// Check a graph against all structural invariants.
///
/// Returns the complete list of defects; empty means the graph is valid.
pub fn validate(graph: &Graph) -> Vec<LintError> {
    let mut lints = Vec::new();

    // Exactly one start, exactly one exit.
    let starts: Vec<&str> = nodes_of_kind(graph, &NodeKind::Start);
    let exits: Vec<&str> = nodes_of_kind(graph, &NodeKind::Exit);
    match starts.len() {
        0 => lints.push(LintError::graph("graph has no start node")),
        1 => {}
        n => lints.push(LintError::graph(format!(
            "graph has {} start nodes ({}), expected exactly one",
            n,
            starts.join(", ")
        ))),
    }
    match exits.len() {
        0 => lints.push(LintError::graph("graph has no exit node")),
        1 => {}
        n => lints.push(LintError::graph(format!(
            "graph has {} exit nodes ({}), expected exactly one",
            n,
            exits.join(", ")
        ))),
    }

    // Every edge endpoint names a known node.
    for edge in &graph.edges {
        if graph.node(&edge.from).is_none() {
            lints.push(LintError::graph(format!(
                "edge {} -> {} references unknown source node '{}'",
                edge.from, edge.to, edge.from
            )));
        }
        if graph.node(&edge.to).is_none() {
            lints.push(LintError::graph(format!(
                "edge {} -> {} references unknown target node '{}'",
                edge.from, edge.to, edge.to
            )));
        }
    }

    // Every node except start is reachable from start.
    if let [start] = starts.as_slice() {
        let reachable = graph.reachable_from(start);
        for node in graph.nodes.values() {
            if node.id != *start && !reachable.contains(&node.id) {
                lints.push(LintError::node(
                    &node.id,
                    "unreachable from the start node",
                ));
            }
        }
    }

    // Every fan-out can reach a fan-in.
    for node in graph.nodes.values() {
        if node.kind == NodeKind::FanOut && graph.find_fan_in(&node.id).is_none() {
            lints.push(LintError::node(
                &node.id,
                "fan_out has no reachable fan_in",
            ));
        }
    }

    // Required attributes are present and non-empty.
    for node in graph.nodes.values() {
        for attr in required_attrs(&node.kind) {
            match node.attr(attr) {
                Some(v) if !v.is_empty() => {}
                _ => lints.push(LintError::node(
                    &node.id,
                    format!("{} node requires attribute '{}'", node.kind, attr),
                )),
            }
        }
    }

    lints
}

/// Validate and fail with a single aggregated error when defects exist.
pub fn validate_strict(graph: &Graph) -> Result<()> {
    let lints = validate(graph);
    if lints.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Validation(lints))
    }
}

fn nodes_of_kind<'a>(graph: &'a Graph, kind: &NodeKind) -> Vec<&'a str> {
    graph
        .nodes
        .values()
        .filter(|n| &n.kind == kind)
        .map(|n| n.id.as_str())
        .collect()
}
