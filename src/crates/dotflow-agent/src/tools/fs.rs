//! Filesystem tools: read, write, list, search, patch.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{require_str, resolve_path, AgentTool, ToolError, ToolResult};
use dotflow_core::cancel::CancellationToken;

/// Upper bound on search hits reported back to the model.
const SEARCH_MATCH_LIMIT: usize = 100;

/// Read a file's contents.
pub struct ReadFileTool {
    workdir: PathBuf,
}

impl ReadFileTool {
    /// Create the tool confined to `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl AgentTool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file and return its contents. The path is relative to the working directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to read"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, _cancel: &CancellationToken, input: Value) -> ToolResult {
        let path = resolve_path(&self.workdir, require_str(&input, "path")?)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Io(format!("read {}: {}", path.display(), e)))
    }
}

/// Create or overwrite a file.
pub struct WriteFileTool {
    workdir: PathBuf,
}

impl WriteFileTool {
    /// Create the tool confined to `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl AgentTool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it and any parent directories. \
         Overwrites existing content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path to write"},
                "content": {"type": "string", "description": "Full file content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, _cancel: &CancellationToken, input: Value) -> ToolResult {
        let path = resolve_path(&self.workdir, require_str(&input, "path")?)?;
        let content = require_str(&input, "content")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Io(format!("mkdir {}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::Io(format!("write {}: {}", path.display(), e)))?;
        Ok(format!("wrote {} bytes to {}", content.len(), path.display()))
    }
}

/// List a directory's entries.
pub struct ListDirTool {
    workdir: PathBuf,
}

impl ListDirTool {
    /// Create the tool confined to `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl AgentTool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list, '.' for the working directory"}
            }
        })
    }

    async fn execute(&self, _cancel: &CancellationToken, input: Value) -> ToolResult {
        let path = input.get("path").and_then(Value::as_str).unwrap_or(".");
        let path = resolve_path(&self.workdir, path)?;

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::Io(format!("list {}: {}", path.display(), e)))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::Io(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();
        Ok(entries.join("\n"))
    }
}

/// Search file contents for a regex pattern.
pub struct SearchTool {
    workdir: PathBuf,
}

impl SearchTool {
    /// Create the tool confined to `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }

    fn collect_files(&self, root: &std::path::Path, out: &mut Vec<PathBuf>) {
        let Ok(reader) = std::fs::read_dir(root) else {
            return;
        };
        let mut entries: Vec<_> = reader.flatten().collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name();
            // Skip dotfiles and build output.
            if name.to_string_lossy().starts_with('.') || name == "target" {
                continue;
            }
            let path = entry.path();
            match entry.file_type() {
                Ok(t) if t.is_dir() => self.collect_files(&path, out),
                Ok(t) if t.is_file() => out.push(path),
                _ => {}
            }
        }
    }
}

#[async_trait]
impl AgentTool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search files under a directory for a regex pattern. \
         Returns 'path:line: text' matches."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regular expression to search for"},
                "path": {"type": "string", "description": "Directory to search, '.' for the working directory"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, _cancel: &CancellationToken, input: Value) -> ToolResult {
        let pattern = require_str(&input, "pattern")?;
        let re = regex::Regex::new(pattern)
            .map_err(|e| ToolError::InvalidInput(format!("invalid pattern: {}", e)))?;
        let root = input.get("path").and_then(Value::as_str).unwrap_or(".");
        let root = resolve_path(&self.workdir, root)?;

        let mut files = Vec::new();
        self.collect_files(&root, &mut files);

        let mut matches = Vec::new();
        'outer: for file in files {
            let Ok(contents) = std::fs::read_to_string(&file) else {
                continue; // binary or unreadable
            };
            let shown = file
                .strip_prefix(&self.workdir)
                .unwrap_or(&file)
                .display()
                .to_string();
            for (idx, line) in contents.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(format!("{}:{}: {}", shown, idx + 1, line.trim_end()));
                    if matches.len() >= SEARCH_MATCH_LIMIT {
                        matches.push(format!("... truncated at {} matches", SEARCH_MATCH_LIMIT));
                        break 'outer;
                    }
                }
            }
        }

        if matches.is_empty() {
            Ok("no matches".to_string())
        } else {
            Ok(matches.join("\n"))
        }
    }
}

/// Replace exactly one occurrence of a text span in a file.
pub struct PatchTool {
    workdir: PathBuf,
}

impl PatchTool {
    /// Create the tool confined to `workdir`.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }
}

#[async_trait]
impl AgentTool for PatchTool {
    fn name(&self) -> &str {
        "patch"
    }

    fn description(&self) -> &str {
        "Replace one occurrence of old_text with new_text in a file. \
         Fails when old_text is absent or ambiguous."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to patch"},
                "old_text": {"type": "string", "description": "Exact text to replace; must occur exactly once"},
                "new_text": {"type": "string", "description": "Replacement text"}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, _cancel: &CancellationToken, input: Value) -> ToolResult {
        let path = resolve_path(&self.workdir, require_str(&input, "path")?)?;
        let old_text = require_str(&input, "old_text")?;
        let new_text = require_str(&input, "new_text")?;
        if old_text.is_empty() {
            return Err(ToolError::InvalidInput("old_text must not be empty".into()));
        }

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Io(format!("read {}: {}", path.display(), e)))?;

        match contents.matches(old_text).count() {
            0 => Err(ToolError::InvalidInput(
                "old_text not found in file".to_string(),
            )),
            1 => {
                let patched = contents.replacen(old_text, new_text, 1);
                tokio::fs::write(&path, patched)
                    .await
                    .map_err(|e| ToolError::Io(format!("write {}: {}", path.display(), e)))?;
                Ok(format!("patched {}", path.display()))
            }
            n => Err(ToolError::InvalidInput(format!(
                "old_text occurs {} times; provide a longer unique span",
                n
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workdir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().canonicalize().unwrap();
        (dir, path)
    }

    #[tokio::test]
    async fn test_read_and_write_round_trip() {
        let (_guard, wd) = workdir();
        let cancel = CancellationToken::new();

        WriteFileTool::new(wd.clone())
            .execute(&cancel, json!({"path": "notes/a.txt", "content": "hello"}))
            .await
            .unwrap();
        let read = ReadFileTool::new(wd)
            .execute(&cancel, json!({"path": "notes/a.txt"}))
            .await
            .unwrap();
        assert_eq!(read, "hello");
    }

    #[tokio::test]
    async fn test_read_rejects_escape_before_io() {
        let (_guard, wd) = workdir();
        let err = ReadFileTool::new(wd)
            .execute(&CancellationToken::new(), json!({"path": "../../etc/hosts"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PathEscape(_)));
    }

    #[tokio::test]
    async fn test_list_dir_marks_directories() {
        let (_guard, wd) = workdir();
        std::fs::create_dir(wd.join("sub")).unwrap();
        std::fs::write(wd.join("file.txt"), "x").unwrap();
        let listing = ListDirTool::new(wd)
            .execute(&CancellationToken::new(), json!({}))
            .await
            .unwrap();
        assert_eq!(listing, "file.txt\nsub/");
    }

    #[tokio::test]
    async fn test_search_reports_file_and_line() {
        let (_guard, wd) = workdir();
        std::fs::write(wd.join("code.rs"), "fn main() {}\nfn helper() {}\n").unwrap();
        let result = SearchTool::new(wd)
            .execute(
                &CancellationToken::new(),
                json!({"pattern": r"fn \w+elper"}),
            )
            .await
            .unwrap();
        assert_eq!(result, "code.rs:2: fn helper() {}");
    }

    #[tokio::test]
    async fn test_search_no_matches() {
        let (_guard, wd) = workdir();
        std::fs::write(wd.join("code.rs"), "fn main() {}\n").unwrap();
        let result = SearchTool::new(wd)
            .execute(&CancellationToken::new(), json!({"pattern": "nothing"}))
            .await
            .unwrap();
        assert_eq!(result, "no matches");
    }

    #[tokio::test]
    async fn test_patch_single_occurrence() {
        let (_guard, wd) = workdir();
        std::fs::write(wd.join("f.txt"), "alpha beta gamma").unwrap();
        PatchTool::new(wd.clone())
            .execute(
                &CancellationToken::new(),
                json!({"path": "f.txt", "old_text": "beta", "new_text": "delta"}),
            )
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(wd.join("f.txt")).unwrap(),
            "alpha delta gamma"
        );
    }

    #[tokio::test]
    async fn test_patch_rejects_missing_and_ambiguous() {
        let (_guard, wd) = workdir();
        std::fs::write(wd.join("f.txt"), "dup dup").unwrap();
        let tool = PatchTool::new(wd);

        let missing = tool
            .execute(
                &CancellationToken::new(),
                json!({"path": "f.txt", "old_text": "absent", "new_text": "x"}),
            )
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("not found"));

        let ambiguous = tool
            .execute(
                &CancellationToken::new(),
                json!({"path": "f.txt", "old_text": "dup", "new_text": "x"}),
            )
            .await
            .unwrap_err();
        assert!(ambiguous.to_string().contains("2 times"));
    }
}
