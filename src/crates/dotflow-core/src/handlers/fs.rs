//! File handlers: read a file into state, write state out to a file.
//!
//! Relative paths resolve against the configured working directory so that
//! `--workdir` moves the whole pipeline's file surface in one place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{Control, Handler, HandlerConfig};
use crate::cancel::CancellationToken;
use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::Node;
use crate::template;

fn resolve(workdir: &Path, rendered: &str) -> PathBuf {
    let path = Path::new(rendered);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}

/// Read a file's contents into a state key.
pub struct ReadFileHandler {
    config: Arc<HandlerConfig>,
}

impl ReadFileHandler {
    /// Create the handler with shared filesystem settings.
    pub fn new(config: Arc<HandlerConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Handler for ReadFileHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let key = node.attr_or("key", "");
        let rendered = template::render(node.attr_or("path", ""), &ctx.snapshot())?;
        let path = resolve(&self.config.workdir, &rendered);

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                ctx.set(key, Value::String(contents));
                Ok(Control::Next)
            }
            Err(_) if !node.attr_bool("required", true) => {
                ctx.set(key, Value::String(String::new()));
                Ok(Control::Next)
            }
            Err(e) => Err(PipelineError::handler(
                &node.id,
                format!("read {}: {}", path.display(), e),
            )),
        }
    }
}

/// Write rendered content to a file, creating parent directories.
pub struct WriteFileHandler {
    config: Arc<HandlerConfig>,
}

impl WriteFileHandler {
    /// Create the handler with shared filesystem settings.
    pub fn new(config: Arc<HandlerConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Handler for WriteFileHandler {
    async fn handle(&self, _cancel: &CancellationToken, node: &Node, ctx: &Context) -> Result<Control> {
        let snapshot = ctx.snapshot();
        let rendered_path = template::render(node.attr_or("path", ""), &snapshot)?;
        let content = template::render(node.attr_or("content", ""), &snapshot)?;
        let path = resolve(&self.config.workdir, &rendered_path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PipelineError::handler(&node.id, format!("mkdir {}: {}", parent.display(), e))
            })?;
        }

        let result = if node.attr_bool("append", false) {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| {
                    PipelineError::handler(&node.id, format!("open {}: {}", path.display(), e))
                })?;
            file.write_all(content.as_bytes()).await
        } else {
            tokio::fs::write(&path, &content).await
        };
        result.map_err(|e| {
            PipelineError::handler(&node.id, format!("write {}: {}", path.display(), e))
        })?;

        #[cfg(unix)]
        if let Some(mode) = node.attr("mode") {
            use std::os::unix::fs::PermissionsExt;
            let bits = u32::from_str_radix(mode, 8).map_err(|_| {
                PipelineError::handler(&node.id, format!("invalid file mode '{}'", mode))
            })?;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(bits))
                .await
                .map_err(|e| {
                    PipelineError::handler(&node.id, format!("chmod {}: {}", path.display(), e))
                })?;
        }

        Ok(Control::Next)
    }
}
