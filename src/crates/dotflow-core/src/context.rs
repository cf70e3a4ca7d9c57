//! Shared pipeline state
//!
//! [`Context`] is the one durably shared mutable resource in a run: a
//! thread-safe mapping from string keys to JSON values. Handlers read and
//! write it; guards and templates evaluate against point-in-time
//! [`Context::snapshot`]s; parallel branches run on [`Context::deep_clone`]s
//! merged back with last-write-wins semantics.
//!
//! Values are permissive: strings, booleans, numbers, arrays, objects, and
//! null all flow through, with string coercion at read sites via
//! [`value_to_string`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::checkpoint::Checkpoint;
use crate::error::Result;

/// Render a state value as a string.
///
/// Strings pass through, null renders empty, scalars use their JSON text,
/// and containers re-serialize to compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Thread-safe key-value state shared across a pipeline run.
#[derive(Clone, Default)]
pub struct Context {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded from an existing map.
    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self {
            values: Arc::new(RwLock::new(values)),
        }
    }

    /// Set a key.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values
            .write()
            .expect("context lock poisoned")
            .insert(key.into(), value);
    }

    /// Get a value and whether it was present.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .expect("context lock poisoned")
            .get(key)
            .cloned()
    }

    /// Get the string rendering of a key; absent keys render empty.
    pub fn get_string(&self, key: &str) -> String {
        self.get(key)
            .map(|v| value_to_string(&v))
            .unwrap_or_default()
    }

    /// Take an independent point-in-time copy of all values.
    ///
    /// The returned map shares no mutable state with the live context.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values
            .read()
            .expect("context lock poisoned")
            .clone()
    }

    /// Merge a map into this context, last write wins per key.
    pub fn merge(&self, other: HashMap<String, Value>) {
        let mut values = self.values.write().expect("context lock poisoned");
        for (k, v) in other {
            values.insert(k, v);
        }
    }

    /// Create a fully independent copy of this context.
    ///
    /// Used for parallel branches, whose writes only reach the parent at
    /// merge time.
    pub fn deep_clone(&self) -> Self {
        Self::from_map(self.snapshot())
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.values.read().expect("context lock poisoned").len()
    }

    /// True if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist the current state and `last_node_id` to `path`.
    pub fn save_checkpoint(&self, path: &Path, last_node_id: &str) -> Result<()> {
        Checkpoint {
            last_node_id: last_node_id.to_string(),
            data: self.snapshot(),
        }
        .save(path)
    }

    /// Load a checkpoint, returning the restored context and the id of the
    /// last completed node.
    pub fn load_checkpoint(path: &Path) -> Result<(Self, String)> {
        let checkpoint = Checkpoint::load(path)?;
        Ok((Self::from_map(checkpoint.data), checkpoint.last_node_id))
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get() {
        let ctx = Context::new();
        ctx.set("k", json!("v"));
        assert_eq!(ctx.get("k"), Some(json!("v")));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn test_get_string_coercion() {
        let ctx = Context::new();
        ctx.set("s", json!("text"));
        ctx.set("n", json!(7));
        ctx.set("b", json!(false));
        ctx.set("nul", Value::Null);
        ctx.set("arr", json!([1, 2]));
        assert_eq!(ctx.get_string("s"), "text");
        assert_eq!(ctx.get_string("n"), "7");
        assert_eq!(ctx.get_string("b"), "false");
        assert_eq!(ctx.get_string("nul"), "");
        assert_eq!(ctx.get_string("arr"), "[1,2]");
        assert_eq!(ctx.get_string("absent"), "");
    }

    #[test]
    fn test_snapshot_is_independent() {
        let ctx = Context::new();
        ctx.set("k", json!("before"));
        let snap = ctx.snapshot();
        ctx.set("k", json!("after"));
        assert_eq!(snap.get("k"), Some(&json!("before")));
    }

    #[test]
    fn test_merge_last_write_wins() {
        let ctx = Context::new();
        ctx.set("a", json!("old"));
        let mut incoming = HashMap::new();
        incoming.insert("a".to_string(), json!("new"));
        incoming.insert("b".to_string(), json!("added"));
        ctx.merge(incoming);
        assert_eq!(ctx.get_string("a"), "new");
        assert_eq!(ctx.get_string("b"), "added");
    }

    #[test]
    fn test_deep_clone_isolated() {
        let parent = Context::new();
        parent.set("shared", json!("parent"));
        let branch = parent.deep_clone();
        branch.set("shared", json!("branch"));
        branch.set("only_branch", json!("x"));
        assert_eq!(parent.get_string("shared"), "parent");
        assert_eq!(parent.get("only_branch"), None);
    }

    #[test]
    fn test_concurrent_access() {
        let ctx = Context::new();
        let mut handles = Vec::new();
        for i in 0..8 {
            let ctx = ctx.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..100 {
                    ctx.set(format!("k{}_{}", i, j), json!(j));
                    let _ = ctx.snapshot();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ctx.len(), 800);
    }
}
