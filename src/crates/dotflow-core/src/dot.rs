//! Permissive DOT reader
//!
//! Parses the subset of the DOT language the runtime cares about and stays
//! deliberately forgiving about the rest:
//!
//! - any attribute name is accepted on any node or edge and preserved
//!   verbatim in `attrs` (the runtime reads `type`, handlers read the rest);
//! - the edge `label` attribute is lifted into the edge guard;
//! - a node with no `type` attribute defaults to kind `codergen`;
//! - the graph-level `model_stylesheet` attribute is parsed into the
//!   graph's style sheet;
//! - `//`, `#`, and `/* */` comments are skipped;
//! - edge chains (`a -> b -> c`) expand to one edge per hop.
//!
//! Edge declaration order is preserved exactly; it drives edge selection at
//! runtime, so edges are collected into a `Vec` in order of encounter.
//!
//! Nodes are declared by node statements (`id [attrs]` or a bare `id;`).
//! Edge endpoints do not implicitly declare nodes; dangling endpoints are
//! the validator's concern, not the parser's.

use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::graph::{Edge, Graph, Node, NodeKind};
use crate::style::Stylesheet;

/// Parse DOT source text into a [`Graph`].
pub fn parse(source: &str) -> Result<Graph> {
    Parser::new(source).parse()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Quoted(String),
    Arrow,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Equals,
    Comma,
    Semi,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("'{}'", s),
            Token::Quoted(s) => format!("\"{}\"", s),
            Token::Arrow => "'->'".to_string(),
            Token::LBrace => "'{'".to_string(),
            Token::RBrace => "'}'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Equals => "'='".to_string(),
            Token::Comma => "','".to_string(),
            Token::Semi => "';'".to_string(),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            tokens: tokenize(source),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &Token) -> Result<()> {
        match self.next() {
            Some(ref tok) if tok == want => Ok(()),
            Some(tok) => Err(PipelineError::Parse(format!(
                "expected {}, found {}",
                want.describe(),
                tok.describe()
            ))),
            None => Err(PipelineError::Parse(format!(
                "expected {}, found end of input",
                want.describe()
            ))),
        }
    }

    /// Read an identifier or quoted string as a plain value.
    fn expect_value(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(s)) | Some(Token::Quoted(s)) => Ok(s),
            Some(tok) => Err(PipelineError::Parse(format!(
                "expected a name or value, found {}",
                tok.describe()
            ))),
            None => Err(PipelineError::Parse(
                "expected a name or value, found end of input".to_string(),
            )),
        }
    }

    fn parse(&mut self) -> Result<Graph> {
        let mut graph = Graph::default();

        // Optional `digraph [name] {` header. Headerless input is accepted
        // as a bare statement list.
        let mut has_brace = false;
        if matches!(self.peek(), Some(Token::Ident(s)) if s == "digraph" || s == "graph") {
            self.next();
            if let Some(Token::Ident(_)) | Some(Token::Quoted(_)) = self.peek() {
                graph.name = self.expect_value()?;
            }
            self.expect(&Token::LBrace)?;
            has_brace = true;
        }

        let mut closed = false;
        loop {
            match self.peek() {
                None => break,
                Some(Token::RBrace) => {
                    self.next();
                    closed = true;
                    break;
                }
                Some(Token::Semi) => {
                    self.next();
                    continue;
                }
                _ => {}
            }
            self.statement(&mut graph)?;
        }

        if has_brace && !closed {
            return Err(PipelineError::Parse("unterminated graph body".to_string()));
        }

        Ok(graph)
    }

    fn statement(&mut self, graph: &mut Graph) -> Result<()> {
        let name = self.expect_value()?;

        match self.peek() {
            // Graph-level attribute: `name = value`.
            Some(Token::Equals) => {
                self.next();
                let value = self.expect_value()?;
                if name == "model_stylesheet" {
                    graph.stylesheet = Some(Stylesheet::parse(&value)?);
                }
                Ok(())
            }

            // Edge statement, possibly chained: `a -> b -> c [attrs]`.
            Some(Token::Arrow) => {
                let mut chain = vec![name];
                while matches!(self.peek(), Some(Token::Arrow)) {
                    self.next();
                    chain.push(self.expect_value()?);
                }
                let attrs = if matches!(self.peek(), Some(Token::LBracket)) {
                    self.attr_list()?
                } else {
                    BTreeMap::new()
                };
                let guard = attrs.get("label").cloned().unwrap_or_default();
                for pair in chain.windows(2) {
                    graph.edges.push(Edge {
                        from: pair[0].clone(),
                        to: pair[1].clone(),
                        guard: guard.clone(),
                    });
                }
                Ok(())
            }

            // Node statement with an attribute list.
            Some(Token::LBracket) => {
                let attrs = self.attr_list()?;
                // `graph`, `node`, and `edge` default-attribute statements:
                // lift model_stylesheet from the graph defaults, ignore the
                // rest rather than rejecting them.
                if name == "graph" {
                    if let Some(sheet) = attrs.get("model_stylesheet") {
                        graph.stylesheet = Some(Stylesheet::parse(sheet)?);
                    }
                    return Ok(());
                }
                if name == "node" || name == "edge" {
                    return Ok(());
                }
                self.declare_node(graph, name, attrs);
                Ok(())
            }

            // Bare node statement: `id;`
            _ => {
                self.declare_node(graph, name, BTreeMap::new());
                Ok(())
            }
        }
    }

    /// Declare a node, merging attributes when the id was seen before
    /// (later declarations win per attribute) and re-deriving the kind.
    fn declare_node(&self, graph: &mut Graph, id: String, attrs: BTreeMap<String, String>) {
        match graph.nodes.get_mut(&id) {
            Some(existing) => {
                for (k, v) in attrs {
                    existing.attrs.insert(k, v);
                }
                if let Some(t) = existing.attrs.get("type") {
                    existing.kind = NodeKind::parse(t);
                }
            }
            None => {
                graph.nodes.insert(id.clone(), Node::new(id, attrs));
            }
        }
    }

    fn attr_list(&mut self) -> Result<BTreeMap<String, String>> {
        self.expect(&Token::LBracket)?;
        let mut attrs = BTreeMap::new();
        loop {
            match self.peek() {
                Some(Token::RBracket) => {
                    self.next();
                    break;
                }
                Some(Token::Comma) | Some(Token::Semi) => {
                    self.next();
                }
                None => {
                    return Err(PipelineError::Parse(
                        "unterminated attribute list".to_string(),
                    ))
                }
                _ => {
                    let key = self.expect_value()?;
                    self.expect(&Token::Equals)?;
                    let value = self.expect_value()?;
                    attrs.insert(key, value);
                }
            }
        }
        Ok(attrs)
    }
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '#' => i = skip_line(&chars, i),
            '/' if chars.get(i + 1) == Some(&'/') => i = skip_line(&chars, i),
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            '-' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::Arrow);
                i += 2;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Equals);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semi);
                i += 1;
            }
            '"' => {
                let mut value = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '"' {
                    if chars[i] == '\\' && i + 1 < chars.len() {
                        // Unescape \" and \\; pass anything else through.
                        let next = chars[i + 1];
                        if next == '"' || next == '\\' {
                            value.push(next);
                            i += 2;
                            continue;
                        }
                    }
                    value.push(chars[i]);
                    i += 1;
                }
                i += 1; // closing quote
                tokens.push(Token::Quoted(value));
            }
            _ => {
                let mut ident = String::new();
                while i < chars.len() {
                    let c = chars[i];
                    if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' {
                        // `->` never reaches here: the arrow arm above
                        // consumes it before the identifier arm runs.
                        if c == '-' && chars.get(i + 1) == Some(&'>') {
                            break;
                        }
                        ident.push(c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                if ident.is_empty() {
                    // Unknown punctuation: skip rather than fail, this
                    // parser is permissive by contract.
                    i += 1;
                } else {
                    tokens.push(Token::Ident(ident));
                }
            }
        }
    }

    tokens
}

fn skip_line(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i] != '\n' {
        i += 1;
    }
    i
}
