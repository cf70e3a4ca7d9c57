//! Repeated tool-call detection.
//!
//! The agent loop records every tool invocation as a fingerprint of the
//! tool name plus a sha256 over the input's canonical JSON bytes
//! (serde_json serializes object keys sorted, so logically equal inputs
//! fingerprint identically). When the same fingerprint reaches the
//! threshold, the call is not executed; the model gets a steering message
//! instead.

use std::collections::HashMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Default trigger threshold.
pub const DEFAULT_THRESHOLD: usize = 3;

/// The message injected in place of a repeated tool call's output.
pub const STEERING_MESSAGE: &str = "You have repeated the same tool call with identical input \
several times. That call is not being executed again. Try a different approach, different \
input, or a different tool.";

/// Counts identical tool invocations and flags repetition.
#[derive(Debug)]
pub struct LoopDetector {
    threshold: usize,
    counts: HashMap<(String, [u8; 32]), usize>,
}

impl LoopDetector {
    /// Create a detector; a threshold of zero or less uses the default.
    pub fn new(threshold: isize) -> Self {
        let threshold = if threshold <= 0 {
            DEFAULT_THRESHOLD
        } else {
            threshold as usize
        };
        Self {
            threshold,
            counts: HashMap::new(),
        }
    }

    /// Record an invocation; true means steering should replace execution.
    pub fn record(&mut self, tool: &str, input: &Value) -> bool {
        let fingerprint = fingerprint(input);
        let count = self
            .counts
            .entry((tool.to_string(), fingerprint))
            .or_insert(0);
        *count += 1;
        *count >= self.threshold
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(0)
    }
}

fn fingerprint(input: &Value) -> [u8; 32] {
    let canonical = serde_json::to_string(input).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_triggers_on_threshold() {
        let mut detector = LoopDetector::default();
        let input = json!({"path": "src/main.rs"});
        assert!(!detector.record("read_file", &input));
        assert!(!detector.record("read_file", &input));
        assert!(detector.record("read_file", &input));
        // Stays triggered afterwards.
        assert!(detector.record("read_file", &input));
    }

    #[test]
    fn test_distinct_inputs_do_not_trigger() {
        let mut detector = LoopDetector::default();
        for i in 0..10 {
            assert!(!detector.record("read_file", &json!({"path": format!("f{}.rs", i)})));
        }
    }

    #[test]
    fn test_distinct_tools_count_separately() {
        let mut detector = LoopDetector::default();
        let input = json!({"path": "x"});
        detector.record("read_file", &input);
        detector.record("read_file", &input);
        assert!(!detector.record("write_file", &input));
    }

    #[test]
    fn test_interleaving_does_not_reset() {
        let mut detector = LoopDetector::default();
        let repeated = json!({"q": "same"});
        assert!(!detector.record("search", &repeated));
        assert!(!detector.record("search", &json!({"q": "other"})));
        assert!(!detector.record("search", &repeated));
        assert!(detector.record("search", &repeated));
    }

    #[test]
    fn test_non_positive_threshold_uses_default() {
        let mut detector = LoopDetector::new(-4);
        let input = json!({});
        assert!(!detector.record("t", &input));
        assert!(!detector.record("t", &input));
        assert!(detector.record("t", &input));
    }

    #[test]
    fn test_custom_threshold() {
        let mut detector = LoopDetector::new(1);
        assert!(detector.record("t", &json!({})));
    }
}
