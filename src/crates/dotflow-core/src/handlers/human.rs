//! Human input handler.
//!
//! Reads a line from the operator, optionally validated against a fixed
//! option list. Input comes through the [`LineReader`] seam so tests (and
//! embedders without a terminal) can script responses.

use std::io::{BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Control, Handler};
use crate::cancel::CancellationToken;
use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::Node;
use crate::template;

/// Source of operator input lines.
pub trait LineReader: Send + Sync {
    /// Show `prompt` and read one line, without the trailing newline.
    fn read_line(&self, prompt: &str) -> std::io::Result<String>;
}

/// Terminal-backed reader: prompt to stderr, line from stdin.
pub struct StdinLineReader;

impl LineReader for StdinLineReader {
    fn read_line(&self, prompt: &str) -> std::io::Result<String> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{} ", prompt)?;
        stderr.flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Ask the operator a question and store the answer.
///
/// With an `options` list, accepts either the 1-based index or the
/// case-insensitive option text, re-prompting until the input is valid;
/// the stored value is always the canonical option text.
pub struct WaitHumanHandler {
    reader: Arc<dyn LineReader>,
}

impl WaitHumanHandler {
    /// Create the handler over an input source.
    pub fn new(reader: Arc<dyn LineReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl Handler for WaitHumanHandler {
    async fn handle(&self, cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let prompt = template::render(node.attr_or("prompt", "Continue?"), &ctx.snapshot())?;
        let key = node.attr_or("key", "answer");
        let options: Vec<String> = node
            .attr("options")
            .map(|o| {
                o.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let display = if options.is_empty() {
            prompt.clone()
        } else {
            format!("{} [{}]", prompt, options.join("/"))
        };

        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled {
                    node: node.id.clone(),
                });
            }

            let reader = self.reader.clone();
            let display = display.clone();
            // Blocking terminal read off the async runtime.
            let line = tokio::task::spawn_blocking(move || reader.read_line(&display))
                .await
                .map_err(|e| PipelineError::handler(&node.id, format!("input task failed: {e}")))?
                .map_err(|e| PipelineError::handler(&node.id, format!("reading input: {e}")))?;

            if options.is_empty() {
                ctx.set(key, Value::String(line));
                return Ok(Control::Next);
            }

            let answer = line.trim();
            let chosen = answer
                .parse::<usize>()
                .ok()
                .and_then(|idx| idx.checked_sub(1))
                .and_then(|idx| options.get(idx))
                .or_else(|| options.iter().find(|o| o.eq_ignore_ascii_case(answer)));

            match chosen {
                Some(option) => {
                    ctx.set(key, Value::String(option.clone()));
                    return Ok(Control::Next);
                }
                None => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn node(id: &str, pairs: &[(&str, &str)]) -> Node {
        let attrs: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Node::new(id, attrs)
    }

    struct ScriptedReader {
        lines: Mutex<Vec<String>>,
    }

    impl ScriptedReader {
        fn new(lines: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                lines: Mutex::new(lines.iter().rev().map(|s| s.to_string()).collect()),
            })
        }
    }

    impl LineReader for ScriptedReader {
        fn read_line(&self, _prompt: &str) -> std::io::Result<String> {
            Ok(self.lines.lock().unwrap().pop().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_free_text_answer() {
        let ctx = Context::new();
        let n = node("h", &[("type", "wait.human"), ("prompt", "Name?"), ("key", "name")]);
        WaitHumanHandler::new(ScriptedReader::new(&["Ada"]))
            .handle(&CancellationToken::new(), &n, &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.get_string("name"), "Ada");
    }

    #[tokio::test]
    async fn test_option_by_index_and_text() {
        let ctx = Context::new();
        let n = node(
            "h",
            &[("type", "wait.human"), ("options", "approve, reject"), ("key", "decision")],
        );
        let handler = WaitHumanHandler::new(ScriptedReader::new(&["2"]));
        handler.handle(&CancellationToken::new(), &n, &ctx).await.unwrap();
        assert_eq!(ctx.get_string("decision"), "reject");

        let handler = WaitHumanHandler::new(ScriptedReader::new(&["APPROVE"]));
        handler.handle(&CancellationToken::new(), &n, &ctx).await.unwrap();
        assert_eq!(ctx.get_string("decision"), "approve");
    }

    #[tokio::test]
    async fn test_invalid_input_reprompts() {
        let ctx = Context::new();
        let n = node(
            "h",
            &[("type", "wait.human"), ("options", "yes, no"), ("key", "ok")],
        );
        WaitHumanHandler::new(ScriptedReader::new(&["maybe", "7", "no"]))
            .handle(&CancellationToken::new(), &n, &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.get_string("ok"), "no");
    }
}
