//! Shell execution handlers.
//!
//! Commands run under `sh -c` in a working directory, with captured output,
//! optional wall-clock timeout, and kill-on-cancel. `for_each` is the
//! sequential iteration form over a JSON array in state.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::{parse_duration, Control, Handler, HandlerConfig};
use crate::cancel::CancellationToken;
use crate::context::{value_to_string, Context};
use crate::error::{PipelineError, Result};
use crate::graph::Node;
use crate::template;

/// Captured output of a completed shell command.
pub struct ShellOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code; -1 when terminated by signal.
    pub exit_code: i32,
}

/// Run `sh -c <cmd>`, capturing output, honoring cancel and timeout.
pub async fn run_shell(
    cancel: &CancellationToken,
    node_id: &str,
    cmd: &str,
    workdir: &Path,
    timeout: Option<Duration>,
) -> Result<ShellOutput> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipelineError::handler(node_id, format!("spawn '{}': {}", cmd, e)))?;

    let mut stdout_pipe = child.stdout.take().expect("stdout piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let timeout_sleep = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            // No timeout configured: never resolve this branch.
            None => std::future::pending().await,
        }
    };

    let status = tokio::select! {
        status = child.wait() => {
            status.map_err(|e| PipelineError::handler(node_id, format!("wait '{}': {}", cmd, e)))?
        }
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(PipelineError::Cancelled { node: node_id.to_string() });
        }
        _ = timeout_sleep => {
            let _ = child.kill().await;
            return Err(PipelineError::handler(
                node_id,
                format!("command timed out after {:?}: {}", timeout.unwrap_or_default(), cmd),
            ));
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

    Ok(ShellOutput {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(-1),
    })
}

fn resolve_workdir(config: &HandlerConfig, node: &Node) -> PathBuf {
    match node.attr("workdir") {
        Some(dir) if !dir.is_empty() => {
            let path = PathBuf::from(dir);
            if path.is_absolute() {
                path
            } else {
                config.workdir.join(path)
            }
        }
        _ => config.workdir.clone(),
    }
}

fn node_timeout(node: &Node) -> std::result::Result<Option<Duration>, String> {
    match node.attr("timeout") {
        Some(t) => Ok(Some(parse_duration(t)?)),
        None => Ok(None),
    }
}

/// Run one shell command and store its outputs in state.
pub struct ExecHandler {
    config: Arc<HandlerConfig>,
}

impl ExecHandler {
    /// Create the handler with shared execution settings.
    pub fn new(config: Arc<HandlerConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Handler for ExecHandler {
    async fn handle(&self, cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let snapshot = ctx.snapshot();
        let cmd = template::render(node.attr_or("cmd", ""), &snapshot)?;
        let workdir = resolve_workdir(&self.config, node);
        let timeout = node_timeout(node).map_err(|e| PipelineError::handler(&node.id, e))?;

        let output = run_shell(cancel, &node.id, &cmd, &workdir, timeout).await?;

        ctx.set(node.attr_or("stdout_key", "stdout"), Value::String(output.stdout.clone()));
        ctx.set(node.attr_or("stderr_key", "stderr"), Value::String(output.stderr.clone()));
        ctx.set(
            node.attr_or("exit_code_key", "exit_code"),
            Value::String(output.exit_code.to_string()),
        );

        if output.exit_code != 0 && node.attr_bool("fail_on_error", true) {
            return Err(PipelineError::handler(
                &node.id,
                format!(
                    "command exited with status {}: {}",
                    output.exit_code,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(Control::Next)
    }
}

/// Run a shell command once per element of a JSON array, sequentially.
pub struct ForEachHandler {
    config: Arc<HandlerConfig>,
}

impl ForEachHandler {
    /// Create the handler with shared execution settings.
    pub fn new(config: Arc<HandlerConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Handler for ForEachHandler {
    async fn handle(&self, cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let items = load_items(node, ctx)?;
        let item_key = node.attr_or("item_key", "item");
        let workdir = resolve_workdir(&self.config, node);
        let timeout = node_timeout(node).map_err(|e| PipelineError::handler(&node.id, e))?;
        let fail_on_error = node.attr_bool("fail_on_error", true);

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            ctx.set(item_key, item.clone());
            let cmd = template::render(node.attr_or("cmd", ""), &ctx.snapshot())?;
            let output = run_shell(cancel, &node.id, &cmd, &workdir, timeout).await?;
            if output.exit_code != 0 && fail_on_error {
                return Err(PipelineError::handler(
                    &node.id,
                    format!(
                        "command for item '{}' exited with status {}: {}",
                        value_to_string(&item),
                        output.exit_code,
                        output.stderr.trim()
                    ),
                ));
            }
            results.push(Value::String(output.stdout));
        }

        ctx.set(node.attr_or("results_key", "results"), Value::Array(results));
        Ok(Control::Next)
    }
}

/// Read the `items` key as a JSON array, parsing string values.
///
/// Shared by the iteration handlers (`for_each` here, `map` in the agent
/// layer).
pub fn load_items(node: &Node, ctx: &Context) -> Result<Vec<Value>> {
    let items_key = node.attr_or("items", "");
    let value = ctx.get(items_key).ok_or_else(|| {
        PipelineError::handler(&node.id, format!("items key '{}' is not set", items_key))
    })?;
    let value = match value {
        Value::String(text) => serde_json::from_str(&text).map_err(|e| {
            PipelineError::handler(
                &node.id,
                format!("items key '{}' is not a JSON array: {}", items_key, e),
            )
        })?,
        other => other,
    };
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(PipelineError::handler(
            &node.id,
            format!("items key '{}' is not a JSON array", items_key),
        )),
    }
}
