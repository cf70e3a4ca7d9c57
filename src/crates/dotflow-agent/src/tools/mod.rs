//! The agent tool suite.
//!
//! Tools are the side-effecting operations a model may invoke from the
//! agent loop: file I/O under a working directory, directory listing,
//! text search, single-occurrence patching, and shell execution. Each
//! tool describes its input with a JSON-schema-shaped object so it can be
//! offered to the model as a tool definition.
//!
//! Every path-taking tool resolves its path against the configured
//! working directory and refuses anything that escapes it. The check runs
//! before any filesystem access.

mod fs;
mod shell;

pub use fs::{ListDirTool, PatchTool, ReadFileTool, SearchTool, WriteFileTool};
pub use shell::RunCommandTool;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use dotflow_core::cancel::CancellationToken;
use dotflow_core::llm::ToolDefinition;

/// Result type for tool execution.
pub type ToolResult = std::result::Result<String, ToolError>;

/// Failures a tool can report.
///
/// Inside the agent loop these never abort the run; they become
/// error-flagged tool results the model can react to.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Input JSON did not match the tool's expected shape.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The path resolves outside the working directory.
    #[error("path '{0}' escapes the working directory")]
    PathEscape(String),

    /// Filesystem operation failed.
    #[error("{0}")]
    Io(String),

    /// Command failed; the message carries the captured output.
    #[error("{0}")]
    CommandFailed(String),

    /// The run was cancelled mid-execution.
    #[error("tool execution cancelled")]
    Cancelled,
}

/// A named, schema-described operation callable from the agent loop.
#[async_trait]
pub trait AgentTool: Send + Sync {
    /// Name the model invokes this tool by.
    fn name(&self) -> &str;

    /// Description offered to the model.
    fn description(&self) -> &str;

    /// JSON-schema-shaped input description.
    fn input_schema(&self) -> Value;

    /// Execute with the raw JSON input from the model.
    async fn execute(&self, cancel: &CancellationToken, input: Value) -> ToolResult;

    /// This tool as a model-facing definition.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Name-to-tool lookup handed to the agent loop.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name.
    pub fn register(&mut self, tool: Arc<dyn AgentTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look a tool up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions for every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

/// Build the default tool suite over a working directory.
pub fn default_tools(workdir: impl Into<PathBuf>) -> ToolRegistry {
    let workdir = normalize_workdir(workdir.into());
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool::new(workdir.clone())));
    registry.register(Arc::new(WriteFileTool::new(workdir.clone())));
    registry.register(Arc::new(ListDirTool::new(workdir.clone())));
    registry.register(Arc::new(SearchTool::new(workdir.clone())));
    registry.register(Arc::new(PatchTool::new(workdir.clone())));
    registry.register(Arc::new(RunCommandTool::new(workdir)));
    registry
}

fn normalize_workdir(workdir: PathBuf) -> PathBuf {
    workdir.canonicalize().unwrap_or(workdir)
}

/// Resolve `input` against `workdir`, rejecting escapes.
///
/// The path is normalized lexically (`.` dropped, `..` popped) and the
/// result must be the working directory or strictly below it. Runs before
/// any filesystem access, so nonexistent targets are checked too.
pub(crate) fn resolve_path(workdir: &Path, input: &str) -> Result<PathBuf, ToolError> {
    if input.is_empty() {
        return Err(ToolError::InvalidInput("path must not be empty".into()));
    }
    let raw = Path::new(input);
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        workdir.join(raw)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ToolError::PathEscape(input.to_string()));
                }
            }
            other => normalized.push(other),
        }
    }

    if normalized.starts_with(workdir) {
        Ok(normalized)
    } else {
        Err(ToolError::PathEscape(input.to_string()))
    }
}

/// Pull a required string field out of tool input.
pub(crate) fn require_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing string field '{}'", field)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_inside_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().canonicalize().unwrap();
        let resolved = resolve_path(&workdir, "src/main.rs").unwrap();
        assert!(resolved.starts_with(&workdir));
        assert!(resolved.ends_with("src/main.rs"));
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().canonicalize().unwrap();
        assert!(matches!(
            resolve_path(&workdir, "../outside.txt"),
            Err(ToolError::PathEscape(_))
        ));
        assert!(matches!(
            resolve_path(&workdir, "a/../../outside.txt"),
            Err(ToolError::PathEscape(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_foreign_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().canonicalize().unwrap();
        assert!(matches!(
            resolve_path(&workdir, "/etc/passwd"),
            Err(ToolError::PathEscape(_))
        ));
    }

    #[test]
    fn test_resolve_accepts_absolute_inside() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().canonicalize().unwrap();
        let inside = workdir.join("notes.txt");
        let resolved = resolve_path(&workdir, inside.to_str().unwrap()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn test_resolve_normalizes_dot_segments() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().canonicalize().unwrap();
        let resolved = resolve_path(&workdir, "a/./b/../c.txt").unwrap();
        assert_eq!(resolved, workdir.join("a/c.txt"));
    }

    #[test]
    fn test_default_tools_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = default_tools(dir.path());
        for name in [
            "read_file",
            "write_file",
            "list_dir",
            "search",
            "patch",
            "run_command",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
        assert_eq!(registry.definitions().len(), 6);
    }
}
