//! Core graph data structures
//!
//! This module defines the parsed, immutable representation of a pipeline:
//!
//! - **Nodes**: units of work, each typed by a handler kind
//! - **Edges**: directed connections, optionally guarded by a condition
//! - **Graph**: unique-keyed node map plus an *ordered* edge list
//!
//! # Graph Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                   Graph                          │
//! │                                                  │
//! │   start ──────► plan ──────► build ──────► exit  │
//! │                  │                          ▲    │
//! │                  │ label="status != 'ok'"   │    │
//! │                  ▼                          │    │
//! │                retry ───────────────────────┘    │
//! │                                                  │
//! │   stylesheet: type[codergen] { model: opus }     │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Edge declaration order is semantically significant: the engine evaluates
//! guards in the order edges appear in the source, and the first match wins.
//! The edge list is therefore a `Vec`, never a map.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Guard literals treated as unconditional.
const UNCONDITIONAL_GUARDS: [&str; 2] = ["", "_"];

/// The handler kind assigned to a node.
///
/// Known kinds map to built-in handlers; anything else is preserved as
/// [`NodeKind::Custom`] so external registries can supply handlers for
/// vocabulary this crate does not know about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Entry marker; seeds the state and records the start time.
    Start,
    /// Terminal marker; records the exit time and ends the walk.
    Exit,
    /// Tool-using model agent over the working directory.
    Codergen,
    /// Single-turn model call.
    Prompt,
    /// Concurrent per-item agent loops over a JSON array.
    Map,
    /// HTTP request.
    Http,
    /// Set a state key from a template.
    Set,
    /// Fail the run when a condition is false.
    Assert,
    /// Cancellable delay.
    Sleep,
    /// Value-routed branch point.
    Switch,
    /// Read an OS environment variable into state.
    Env,
    /// Read a file into state.
    ReadFile,
    /// Write state content to a file.
    WriteFile,
    /// Extract a dot-path value from a JSON document in state.
    JsonExtract,
    /// Explode a top-level JSON object into state keys.
    JsonDecode,
    /// Pack state keys into a JSON object.
    JsonPack,
    /// Split a string into a JSON array.
    Split,
    /// Regex match/capture into state.
    Regex,
    /// Chained string operations.
    StringTransform,
    /// Shell command execution.
    Exec,
    /// Sequential shell execution over a JSON array.
    ForEach,
    /// Prompt a human on the terminal.
    WaitHuman,
    /// Parse and run another graph against the same state.
    Include,
    /// Opens a parallel region; one branch per outgoing edge.
    FanOut,
    /// Barrier closing a parallel region.
    FanIn,
    /// Any kind this crate has no built-in handler for.
    Custom(String),
}

impl NodeKind {
    /// Parse a `type` attribute value into a kind.
    pub fn parse(s: &str) -> Self {
        match s {
            "start" => Self::Start,
            "exit" => Self::Exit,
            "codergen" => Self::Codergen,
            "prompt" => Self::Prompt,
            "map" => Self::Map,
            "http" => Self::Http,
            "set" => Self::Set,
            "assert" => Self::Assert,
            "sleep" => Self::Sleep,
            "switch" => Self::Switch,
            "env" => Self::Env,
            "read_file" => Self::ReadFile,
            "write_file" => Self::WriteFile,
            "json_extract" => Self::JsonExtract,
            "json_decode" => Self::JsonDecode,
            "json_pack" => Self::JsonPack,
            "split" => Self::Split,
            "regex" => Self::Regex,
            "string_transform" => Self::StringTransform,
            "exec" => Self::Exec,
            "for_each" => Self::ForEach,
            "wait.human" => Self::WaitHuman,
            "include" => Self::Include,
            "fan_out" => Self::FanOut,
            "fan_in" => Self::FanIn,
            other => Self::Custom(other.to_string()),
        }
    }

    /// The canonical `type` attribute string for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Exit => "exit",
            Self::Codergen => "codergen",
            Self::Prompt => "prompt",
            Self::Map => "map",
            Self::Http => "http",
            Self::Set => "set",
            Self::Assert => "assert",
            Self::Sleep => "sleep",
            Self::Switch => "switch",
            Self::Env => "env",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::JsonExtract => "json_extract",
            Self::JsonDecode => "json_decode",
            Self::JsonPack => "json_pack",
            Self::Split => "split",
            Self::Regex => "regex",
            Self::StringTransform => "string_transform",
            Self::Exec => "exec",
            Self::ForEach => "for_each",
            Self::WaitHuman => "wait.human",
            Self::Include => "include",
            Self::FanOut => "fan_out",
            Self::FanIn => "fan_in",
            Self::Custom(s) => s,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work in the graph.
///
/// Created by the parser and read-only during execution, with one
/// exception: the style applicator may write `attrs["model"]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within the graph.
    pub id: String,
    /// Handler kind, derived from the `type` attribute.
    pub kind: NodeKind,
    /// All DOT attributes, preserved verbatim (including `type`).
    pub attrs: BTreeMap<String, String>,
}

impl Node {
    /// Create a node with the given id and attributes.
    ///
    /// A missing `type` attribute defaults the kind to `codergen`.
    pub fn new(id: impl Into<String>, attrs: BTreeMap<String, String>) -> Self {
        let kind = attrs
            .get("type")
            .map(|t| NodeKind::parse(t))
            .unwrap_or(NodeKind::Codergen);
        Self {
            id: id.into(),
            kind,
            attrs,
        }
    }

    /// Look up an attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Look up an attribute, falling back to a default.
    pub fn attr_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.attr(name).unwrap_or(default)
    }

    /// Parse a boolean attribute; absent or unparsable yields `default`.
    pub fn attr_bool(&self, name: &str, default: bool) -> bool {
        match self.attr(name) {
            Some(v) => matches!(v, "true" | "1" | "yes"),
            None => default,
        }
    }

    /// Parse a numeric attribute; absent or unparsable yields `default`.
    pub fn attr_usize(&self, name: &str, default: usize) -> usize {
        self.attr(name)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

/// A directed connection between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Guard expression from the edge `label`; empty or `"_"` means
    /// unconditional.
    pub guard: String,
}

impl Edge {
    /// True if this edge is taken without evaluating a condition.
    pub fn is_unconditional(&self) -> bool {
        UNCONDITIONAL_GUARDS.contains(&self.guard.as_str())
    }
}

/// Immutable parsed representation of a pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    /// Graph name from the `digraph` header, if any.
    pub name: String,
    /// Nodes keyed by id.
    pub nodes: BTreeMap<String, Node>,
    /// Edges in declaration order.
    pub edges: Vec<Edge>,
    /// Parsed `model_stylesheet` graph attribute, if present.
    pub stylesheet: Option<crate::style::Stylesheet>,
}

impl Graph {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing(&self, id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == id).collect()
    }

    /// The unique node of a given kind, if exactly one exists.
    pub fn sole_node_of_kind(&self, kind: &NodeKind) -> Option<&Node> {
        let mut found = self.nodes.values().filter(|n| &n.kind == kind);
        let first = found.next()?;
        if found.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Node ids reachable from `from` by directed walk, including `from`.
    pub fn reachable_from(&self, from: &str) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for edge in self.outgoing(&current) {
                if !visited.contains(&edge.to) {
                    queue.push_back(edge.to.clone());
                }
            }
        }
        visited
    }

    /// Find the nearest `fan_in` node reachable from `from` by breadth-first
    /// walk over outgoing edges. First match wins; edge declaration order
    /// determines the visit order, so the result is stable across runs.
    pub fn find_fan_in(&self, from: &str) -> Option<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if current != from {
                if let Some(node) = self.node(&current) {
                    if node.kind == NodeKind::FanIn {
                        return Some(current);
                    }
                }
            }
            for edge in self.outgoing(&current) {
                if !visited.contains(&edge.to) {
                    queue.push_back(edge.to.clone());
                }
            }
        }
        None
    }

    /// Render the graph back to canonical DOT.
    ///
    /// The output parses back to the same node set, kinds, attributes, and
    /// edge sequence (guards included), which is what the `graph --format
    /// dot` subcommand prints.
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let name = if self.name.is_empty() {
            "pipeline"
        } else {
            &self.name
        };
        out.push_str(&format!("digraph {} {{\n", name));
        for node in self.nodes.values() {
            let attrs = node
                .attrs
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, escape_attr(v)))
                .collect::<Vec<_>>()
                .join(", ");
            if attrs.is_empty() {
                out.push_str(&format!("  {};\n", node.id));
            } else {
                out.push_str(&format!("  {} [{}];\n", node.id, attrs));
            }
        }
        for edge in &self.edges {
            if edge.guard.is_empty() {
                out.push_str(&format!("  {} -> {};\n", edge.from, edge.to));
            } else {
                out.push_str(&format!(
                    "  {} -> {} [label=\"{}\"];\n",
                    edge.from,
                    edge.to,
                    escape_attr(&edge.guard)
                ));
            }
        }
        out.push_str("}\n");
        out
    }
}

fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: &str) -> Node {
        let mut attrs = BTreeMap::new();
        attrs.insert("type".to_string(), kind.to_string());
        Node::new(id, attrs)
    }

    fn graph_of(nodes: Vec<Node>, edges: Vec<(&str, &str)>) -> Graph {
        let mut g = Graph::default();
        for n in nodes {
            g.nodes.insert(n.id.clone(), n);
        }
        for (from, to) in edges {
            g.edges.push(Edge {
                from: from.to_string(),
                to: to.to_string(),
                guard: String::new(),
            });
        }
        g
    }

    #[test]
    fn test_kind_round_trip() {
        for s in [
            "start", "exit", "codergen", "http", "switch", "fan_out", "fan_in", "wait.human",
        ] {
            assert_eq!(NodeKind::parse(s).as_str(), s);
        }
        assert_eq!(NodeKind::parse("bespoke").as_str(), "bespoke");
    }

    #[test]
    fn test_missing_type_defaults_to_codergen() {
        let n = Node::new("a", BTreeMap::new());
        assert_eq!(n.kind, NodeKind::Codergen);
    }

    #[test]
    fn test_unconditional_guards() {
        let mut e = Edge {
            from: "a".into(),
            to: "b".into(),
            guard: String::new(),
        };
        assert!(e.is_unconditional());
        e.guard = "_".to_string();
        assert!(e.is_unconditional());
        e.guard = "x == 'y'".to_string();
        assert!(!e.is_unconditional());
    }

    #[test]
    fn test_outgoing_preserves_order() {
        let g = graph_of(
            vec![node("a", "start"), node("b", "set"), node("c", "exit")],
            vec![("a", "c"), ("a", "b")],
        );
        let out: Vec<&str> = g.outgoing("a").iter().map(|e| e.to.as_str()).collect();
        assert_eq!(out, vec!["c", "b"]);
    }

    #[test]
    fn test_reachable_from() {
        let g = graph_of(
            vec![
                node("a", "start"),
                node("b", "set"),
                node("c", "exit"),
                node("orphan", "set"),
            ],
            vec![("a", "b"), ("b", "c")],
        );
        let reach = g.reachable_from("a");
        assert!(reach.contains("c"));
        assert!(!reach.contains("orphan"));
    }

    #[test]
    fn test_find_fan_in_nearest() {
        let g = graph_of(
            vec![
                node("fork", "fan_out"),
                node("a", "set"),
                node("b", "set"),
                node("join", "fan_in"),
            ],
            vec![("fork", "a"), ("fork", "b"), ("a", "join"), ("b", "join")],
        );
        assert_eq!(g.find_fan_in("fork"), Some("join".to_string()));
        assert_eq!(g.find_fan_in("join"), None);
    }

    #[test]
    fn test_to_dot_round_trip_shape() {
        let mut g = graph_of(
            vec![node("s", "start"), node("e", "exit")],
            vec![("s", "e")],
        );
        g.edges[0].guard = "ok == 'yes'".to_string();
        let text = g.to_dot();
        assert!(text.contains("s -> e [label=\"ok == 'yes'\"]"));
        assert!(text.contains("type=\"start\""));
    }
}
