//! Snapshot of an executor's configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Constructed, `start` not yet called.
    Uninitialized,
    Running,
    /// Completed; further events are ignored.
    Final,
    /// Stopped by an engine invariant error.
    Halted,
}

/// Owned snapshot handed out by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Active atomic states, in document order.
    pub states: Vec<String>,
    /// Every active state including ancestors, in document order.
    pub active: Vec<String>,
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Completion data reported by an exit, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_data: Option<Value>,
    pub phase: Phase,
}

impl Status {
    pub(crate) fn uninitialized() -> Self {
        Self {
            states: Vec::new(),
            active: Vec::new(),
            is_final: false,
            done_data: None,
            phase: Phase::Uninitialized,
        }
    }

    /// True if `id` is in the active configuration.
    pub fn is_active(&self, id: &str) -> bool {
        self.active.iter().any(|s| s == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize() {
        let status = Status {
            states: vec!["b".into()],
            active: vec!["a".into(), "b".into()],
            is_final: false,
            done_data: None,
            phase: Phase::Running,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"states": ["b"], "active": ["a", "b"], "final": false, "phase": "running"})
        );
        assert!(status.is_active("a"));
        assert!(!status.is_active("c"));
    }
}
