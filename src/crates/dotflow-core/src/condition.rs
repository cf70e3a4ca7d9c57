//! Edge guard expressions
//!
//! A small boolean language evaluated against a state snapshot:
//!
//! ```text
//! expr  ::= or
//! or    ::= and ("||" and)*
//! and   ::= atom ("&&" atom)*
//! atom  ::= "!" atom
//!         | "(" expr ")"
//!         | key ("==" | "!=") value
//!         | key
//! key   ::= [A-Za-z0-9_.]+
//! value ::= '...' | "..." | key
//! ```
//!
//! Comparisons are over the *string rendering* of the value stored at the
//! key; a missing key renders as the empty string. A bare key is truthy
//! when it exists and renders non-empty. There is no arithmetic and there
//! are no function calls; the evaluator is pure over the snapshot.

use std::collections::HashMap;

use serde_json::Value;

use crate::context::value_to_string;
use crate::error::{PipelineError, Result};

/// Evaluate a guard expression against a snapshot.
///
/// Empty and `"_"` guards are the engine's concern (they bypass evaluation
/// entirely); passing one here is a parse error.
pub fn evaluate(expr: &str, snapshot: &HashMap<String, Value>) -> Result<bool> {
    let mut parser = CondParser {
        chars: expr.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    let result = parser.or_expr(snapshot).map_err(|reason| {
        PipelineError::Condition {
            expr: expr.to_string(),
            reason,
        }
    })?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(PipelineError::Condition {
            expr: expr.to_string(),
            reason: format!("unexpected trailing input at offset {}", parser.pos),
        });
    }
    Ok(result)
}

struct CondParser {
    chars: Vec<char>,
    pos: usize,
}

impl CondParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, want: &str) -> bool {
        let len = want.chars().count();
        let slice: String = self.chars[self.pos..].iter().take(len).collect();
        if slice == want {
            self.pos += len;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self, snap: &HashMap<String, Value>) -> std::result::Result<bool, String> {
        let mut left = self.and_expr(snap)?;
        loop {
            self.skip_ws();
            if self.eat("||") {
                self.skip_ws();
                let right = self.and_expr(snap)?;
                left = left || right;
            } else {
                return Ok(left);
            }
        }
    }

    fn and_expr(&mut self, snap: &HashMap<String, Value>) -> std::result::Result<bool, String> {
        let mut left = self.atom(snap)?;
        loop {
            self.skip_ws();
            if self.eat("&&") {
                self.skip_ws();
                let right = self.atom(snap)?;
                left = left && right;
            } else {
                return Ok(left);
            }
        }
    }

    fn atom(&mut self, snap: &HashMap<String, Value>) -> std::result::Result<bool, String> {
        self.skip_ws();
        match self.peek() {
            Some('!') => {
                self.pos += 1;
                Ok(!self.atom(snap)?)
            }
            Some('(') => {
                self.pos += 1;
                let inner = self.or_expr(snap)?;
                self.skip_ws();
                if self.peek() != Some(')') {
                    return Err("expected ')'".to_string());
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(c) if is_key_char(c) => {
                let key = self.key()?;
                self.skip_ws();
                if self.eat("==") {
                    self.skip_ws();
                    let value = self.value()?;
                    Ok(lookup(snap, &key) == value)
                } else if self.eat("!=") {
                    self.skip_ws();
                    let value = self.value()?;
                    Ok(lookup(snap, &key) != value)
                } else {
                    // Bare key: present and non-empty.
                    Ok(!lookup(snap, &key).is_empty())
                }
            }
            Some(c) => Err(format!("unexpected character '{}'", c)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn key(&mut self) -> std::result::Result<String, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_key_char(c)) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err("expected a key".to_string());
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn value(&mut self) -> std::result::Result<String, String> {
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some() && self.peek() != Some(quote) {
                    self.pos += 1;
                }
                if self.peek() != Some(quote) {
                    return Err(format!("unterminated {} literal", quote));
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(text)
            }
            _ => self.key(),
        }
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Render the value at `key`, treating absent keys as empty.
fn lookup(snap: &HashMap<String, Value>, key: &str) -> String {
    snap.get(key).map(value_to_string).unwrap_or_default()
}
