//! Attribute templates
//!
//! Handler attributes marked as templates render `{{.key}}` placeholders
//! against the current state snapshot. The language is substitution only:
//! top-level keys, no pipelines, no conditionals. Unknown keys render as
//! the empty string, matching common templating defaults; a malformed
//! placeholder is a handler-level failure.

use std::collections::HashMap;

use serde_json::Value;

use crate::context::value_to_string;
use crate::error::{PipelineError, Result};

/// Render `{{.key}}` placeholders in `template` from `snapshot`.
pub fn render(template: &str, snapshot: &HashMap<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let close = after_open.find("}}").ok_or_else(|| {
            PipelineError::Template(format!(
                "unterminated placeholder in template '{}'",
                template
            ))
        })?;

        let inner = after_open[..close].trim();
        let key = inner.strip_prefix('.').ok_or_else(|| {
            PipelineError::Template(format!(
                "placeholder '{{{{{}}}}}' must reference a key as {{{{.key}}}}",
                inner
            ))
        })?;
        if key.is_empty() {
            return Err(PipelineError::Template(
                "placeholder references an empty key".to_string(),
            ));
        }

        if let Some(value) = snapshot.get(key) {
            out.push_str(&value_to_string(value));
        }

        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    Ok(out)
}
