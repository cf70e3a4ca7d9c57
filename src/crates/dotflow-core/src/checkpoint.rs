//! Resumable run checkpoints
//!
//! A checkpoint is a JSON object with exactly two top-level fields:
//! `last_node_id` (the last completed node) and `data` (the state
//! snapshot). The engine writes one after every completed node in the
//! outer walk; `resume` loads it and re-enters the walk at
//! `last_node_id`'s successor path.
//!
//! Writes go through a temp file in the target directory followed by a
//! rename, so a reader never observes a torn checkpoint. Files are created
//! with mode 0600 on unix; state can contain anything a handler put there.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};

/// A persisted `(last node, state)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Id of the last node that completed before this checkpoint.
    pub last_node_id: String,
    /// Snapshot of the state store.
    pub data: HashMap<String, Value>,
}

impl Checkpoint {
    /// Write this checkpoint to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| PipelineError::Checkpoint(format!("serialize failed: {e}")))?;

        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            fs::create_dir_all(dir)
                .map_err(|e| PipelineError::Checkpoint(format!("create {dir:?}: {e}")))?;
        }

        let tmp = path.with_extension("tmp");
        {
            let mut file = open_private(&tmp)
                .map_err(|e| PipelineError::Checkpoint(format!("open {tmp:?}: {e}")))?;
            file.write_all(&body)
                .and_then(|_| file.sync_all())
                .map_err(|e| PipelineError::Checkpoint(format!("write {tmp:?}: {e}")))?;
        }
        fs::rename(&tmp, path)
            .map_err(|e| PipelineError::Checkpoint(format!("rename to {path:?}: {e}")))
    }

    /// Load a checkpoint from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let body = fs::read(path)
            .map_err(|e| PipelineError::Checkpoint(format!("read {path:?}: {e}")))?;
        serde_json::from_slice(&body)
            .map_err(|e| PipelineError::Checkpoint(format!("malformed checkpoint {path:?}: {e}")))
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        let ctx = Context::new();
        ctx.set("x", json!("1"));
        ctx.set("nested", json!({"a": [1, 2, 3]}));
        ctx.set("flag", json!(true));
        ctx.save_checkpoint(&path, "node_b").unwrap();

        let (restored, last) = Context::load_checkpoint(&path).unwrap();
        assert_eq!(last, "node_b");
        assert_eq!(restored.snapshot(), ctx.snapshot());
    }

    #[test]
    fn test_save_then_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");

        let ctx = Context::new();
        ctx.set("step", json!(1));
        ctx.save_checkpoint(&path, "a").unwrap();
        ctx.set("step", json!(2));
        ctx.save_checkpoint(&path, "b").unwrap();

        let (restored, last) = Context::load_checkpoint(&path).unwrap();
        assert_eq!(last, "b");
        assert_eq!(restored.get_string("step"), "2");
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/run.json");
        Context::new().save_checkpoint(&path, "a").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_malformed_checkpoint_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"not json").unwrap();
        let err = Context::load_checkpoint(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Checkpoint(_)));
    }

    #[test]
    fn test_missing_file_rejected() {
        let err = Context::load_checkpoint(Path::new("/nonexistent/cp.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Checkpoint(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        Context::new().save_checkpoint(&path, "a").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
