//! Model style sheets
//!
//! A style sheet is an ordered list of rules carried in the graph-level
//! `model_stylesheet` attribute, in a CSS-like syntax:
//!
//! ```text
//! * { model: haiku }
//! type[codergen] { model: sonnet }
//! id[final_review] { model: opus }
//! ```
//!
//! Applying a sheet rewrites `attrs["model"]` on every matching node, rule
//! by rule in declaration order, so later rules overwrite earlier ones.
//! Only the `model` property is recognized; other properties parse but are
//! ignored. Application is idempotent.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::graph::Graph;

/// What a rule matches against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selector {
    /// Every node.
    All,
    /// Nodes whose kind string equals the argument.
    Kind(String),
    /// The node with the given id.
    Id(String),
}

impl Selector {
    fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text == "*" {
            return Ok(Self::All);
        }
        if let Some(arg) = bracket_arg(text, "type") {
            return Ok(Self::Kind(arg));
        }
        if let Some(arg) = bracket_arg(text, "id") {
            return Ok(Self::Id(arg));
        }
        Err(PipelineError::Parse(format!(
            "invalid stylesheet selector '{}'",
            text
        )))
    }
}

/// Extract `name[arg]` when `text` has that shape.
fn bracket_arg(text: &str, name: &str) -> Option<String> {
    let rest = text.strip_prefix(name)?;
    let rest = rest.strip_prefix('[')?;
    let arg = rest.strip_suffix(']')?;
    Some(arg.trim().to_string())
}

/// One selector with its model assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRule {
    /// What this rule matches.
    pub selector: Selector,
    /// The model to assign to matching nodes.
    pub model: String,
}

/// An ordered list of style rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stylesheet {
    /// Rules in declaration order.
    pub rules: Vec<StyleRule>,
}

impl Stylesheet {
    /// Parse stylesheet text into rules.
    ///
    /// Rules with no `model` property parse successfully and are dropped,
    /// since no other property has any effect.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Vec::new();
        let mut rest = text.trim();
        while !rest.is_empty() {
            let open = rest.find('{').ok_or_else(|| {
                PipelineError::Parse(format!("stylesheet rule missing '{{' near '{}'", rest))
            })?;
            let close = rest[open..].find('}').map(|i| open + i).ok_or_else(|| {
                PipelineError::Parse(format!("stylesheet rule missing '}}' near '{}'", rest))
            })?;

            let selector = Selector::parse(&rest[..open])?;
            let body = &rest[open + 1..close];
            if let Some(model) = parse_model_property(body) {
                rules.push(StyleRule { selector, model });
            }

            rest = rest[close + 1..].trim_start();
        }
        Ok(Self { rules })
    }

    /// Rewrite `attrs["model"]` on every node matched by a rule.
    pub fn apply(&self, graph: &mut Graph) {
        for rule in &self.rules {
            for node in graph.nodes.values_mut() {
                let matched = match &rule.selector {
                    Selector::All => true,
                    Selector::Kind(kind) => node.kind.as_str() == kind,
                    Selector::Id(id) => &node.id == id,
                };
                if matched {
                    node.attrs
                        .insert("model".to_string(), rule.model.clone());
                }
            }
        }
    }
}

fn parse_model_property(body: &str) -> Option<String> {
    for decl in body.split(';') {
        let Some((prop, value)) = decl.split_once(':') else {
            continue;
        };
        if prop.trim() == "model" {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Apply a graph's own stylesheet, when it has one.
pub fn apply_styles(graph: &mut Graph) {
    if let Some(sheet) = graph.stylesheet.clone() {
        sheet.apply(graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot;

    const GRAPH: &str = r#"
        digraph {
            s [type=start];
            gen [type=codergen, prompt="p"];
            check [type=codergen, prompt="q"];
            e [type=exit];
            s -> gen; gen -> check; check -> e;
        }
    "#;

    #[test]
    fn test_parse_rules_in_order() {
        let sheet =
            Stylesheet::parse("* { model: haiku } type[codergen] { model: sonnet }").unwrap();
        assert_eq!(sheet.rules.len(), 2);
        assert_eq!(sheet.rules[0].selector, Selector::All);
        assert_eq!(sheet.rules[0].model, "haiku");
        assert_eq!(sheet.rules[1].selector, Selector::Kind("codergen".into()));
    }

    #[test]
    fn test_later_rules_overwrite() {
        let mut graph = dot::parse(GRAPH).unwrap();
        let sheet = Stylesheet::parse(
            "* { model: haiku } type[codergen] { model: sonnet } id[check] { model: opus }",
        )
        .unwrap();
        sheet.apply(&mut graph);
        assert_eq!(graph.node("s").unwrap().attr("model"), Some("haiku"));
        assert_eq!(graph.node("gen").unwrap().attr("model"), Some("sonnet"));
        assert_eq!(graph.node("check").unwrap().attr("model"), Some("opus"));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut graph = dot::parse(GRAPH).unwrap();
        let sheet = Stylesheet::parse("type[codergen] { model: sonnet }").unwrap();
        sheet.apply(&mut graph);
        let once: Vec<_> = graph
            .nodes
            .values()
            .map(|n| n.attrs.clone())
            .collect();
        sheet.apply(&mut graph);
        let twice: Vec<_> = graph
            .nodes
            .values()
            .map(|n| n.attrs.clone())
            .collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_property_ignored() {
        let sheet = Stylesheet::parse("* { color: red; model: haiku }").unwrap();
        assert_eq!(sheet.rules.len(), 1);
        assert_eq!(sheet.rules[0].model, "haiku");

        let no_model = Stylesheet::parse("* { color: red }").unwrap();
        assert!(no_model.rules.is_empty());
    }

    #[test]
    fn test_bad_selector_rejected() {
        assert!(Stylesheet::parse("kind(codergen) { model: x }").is_err());
    }
}
