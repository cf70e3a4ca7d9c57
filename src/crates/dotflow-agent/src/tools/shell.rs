//! Shell execution tool.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{require_str, AgentTool, ToolError, ToolResult};
use dotflow_core::cancel::CancellationToken;
use dotflow_core::handlers::run_shell;
use dotflow_core::PipelineError;

/// Default per-call wall-clock timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a shell command in the working directory.
///
/// Output is standard output, followed by a labelled tail of standard
/// error when non-empty. Non-zero exit reports as an error carrying the
/// captured output so the model can read the failure.
pub struct RunCommandTool {
    workdir: PathBuf,
}

impl RunCommandTool {
    /// Create the tool running in `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl AgentTool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the working directory and return its output. \
         Commands are killed after the timeout (default 30 seconds)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Shell command to run with sh -c"},
                "timeout_secs": {"type": "integer", "description": "Wall-clock timeout in seconds"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, cancel: &CancellationToken, input: Value) -> ToolResult {
        let command = require_str(&input, "command")?;
        let timeout = input
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let output = run_shell(cancel, "run_command", command, &self.workdir, Some(timeout))
            .await
            .map_err(|e| match e {
                PipelineError::Cancelled { .. } => ToolError::Cancelled,
                other => ToolError::CommandFailed(other.to_string()),
            })?;

        let mut text = output.stdout.clone();
        if !output.stderr.trim().is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str("--- stderr ---\n");
            text.push_str(output.stderr.trim_end());
        }

        if output.exit_code != 0 {
            return Err(ToolError::CommandFailed(format!(
                "command exited with status {}:\n{}",
                output.exit_code, text
            )));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> (tempfile::TempDir, RunCommandTool) {
        let dir = tempfile::tempdir().unwrap();
        let wd = dir.path().canonicalize().unwrap();
        (dir, RunCommandTool::new(wd))
    }

    #[tokio::test]
    async fn test_stdout_returned() {
        let (_guard, tool) = tool();
        let out = tool
            .execute(&CancellationToken::new(), json!({"command": "printf hello"}))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_stderr_tail_labelled() {
        let (_guard, tool) = tool();
        let out = tool
            .execute(
                &CancellationToken::new(),
                json!({"command": "printf out; printf warn >&2"}),
            )
            .await
            .unwrap();
        assert!(out.starts_with("out"));
        assert!(out.contains("--- stderr ---"));
        assert!(out.contains("warn"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error_with_output() {
        let (_guard, tool) = tool();
        let err = tool
            .execute(
                &CancellationToken::new(),
                json!({"command": "printf partial; exit 2"}),
            )
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("status 2"));
        assert!(text.contains("partial"));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let (_guard, tool) = tool();
        let err = tool
            .execute(
                &CancellationToken::new(),
                json!({"command": "sleep 5", "timeout_secs": 1}),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let (_guard, tool) = tool();
        let out = tool
            .execute(
                &CancellationToken::new(),
                json!({"command": "touch marker && ls"}),
            )
            .await
            .unwrap();
        assert!(out.contains("marker"));
    }
}
