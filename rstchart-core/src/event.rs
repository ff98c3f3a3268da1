//! Events and event-name patterns.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Event raised internally when executable content fails under the skip policy.
pub const ERROR_EXECUTION: &str = "error.execution";

/// Prefix of the completion event raised when a compound or parallel state finishes.
pub const DONE_STATE_PREFIX: &str = "done.state.";

/// An event submitted to, or raised inside, an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, dot-separated (`call.connected`).
    pub name: String,

    /// Optional payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: None,
        }
    }

    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data: Some(data),
        }
    }

    /// The value exposed to expressions as `_event`.
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "data": self.data.clone().unwrap_or(Value::Null),
        })
    }
}

impl From<&str> for Event {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Event {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// A transition's event descriptor list.
///
/// Descriptors are space separated. A descriptor matches an event name that
/// equals it or that extends it by further dot-separated tokens; `*` (or a
/// bare `.*`) matches everything and a trailing `.*` is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventPattern {
    descriptors: Vec<String>,
}

impl EventPattern {
    /// Parses a pattern. Returns `Ok(None)` for a blank pattern and the
    /// offending descriptor if one names no event at all (`.` or `..`).
    pub fn parse(s: &str) -> Result<Option<Self>, String> {
        let descriptors = s
            .split_whitespace()
            .map(|raw| {
                if raw == ".*" {
                    return Ok("*".to_string());
                }
                let d = raw.strip_suffix(".*").unwrap_or(raw).trim_end_matches('.');
                if d.is_empty() {
                    Err(raw.to_string())
                } else {
                    Ok(d.to_string())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        if descriptors.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Self { descriptors }))
        }
    }

    /// Returns true if the event name matches any descriptor.
    pub fn matches(&self, name: &str) -> bool {
        self.descriptors.iter().any(|d| {
            d == "*"
                || name == d
                || name
                    .strip_prefix(d.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    pub fn descriptors(&self) -> &[String] {
        &self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> EventPattern {
        EventPattern::parse(s).unwrap().unwrap()
    }

    #[test]
    fn test_exact_match() {
        let p = pattern("go");
        assert!(p.matches("go"));
        assert!(!p.matches("gone"));
        assert!(!p.matches("stop"));
    }

    #[test]
    fn test_prefix_match() {
        let p = pattern("error");
        assert!(p.matches("error"));
        assert!(p.matches("error.execution"));
        assert!(!p.matches("errors"));

        let p = pattern("done.state.*");
        assert!(p.matches("done.state.main"));
        assert!(!p.matches("done"));
    }

    #[test]
    fn test_wildcard_and_lists() {
        let p = pattern("*");
        assert!(p.matches("anything.at.all"));

        let p = pattern("hangup  cancel");
        assert!(p.matches("hangup"));
        assert!(p.matches("cancel.user"));
        assert!(!p.matches("answer"));
    }

    #[test]
    fn test_blank_pattern() {
        assert_eq!(EventPattern::parse(""), Ok(None));
        assert_eq!(EventPattern::parse("   "), Ok(None));
    }

    #[test]
    fn test_dot_star_is_wildcard() {
        let p = pattern(".*");
        assert!(p.matches("go"));
        assert!(p.matches("error.execution"));
        assert_eq!(p.descriptors(), ["*"]);
    }

    #[test]
    fn test_pattern_without_descriptor() {
        assert_eq!(EventPattern::parse("."), Err(".".to_string()));
        assert_eq!(EventPattern::parse("go .."), Err("..".to_string()));
    }

    #[test]
    fn test_event_value() {
        let e = Event::with_data("call.ring", json!({"from": "100"}));
        assert_eq!(
            e.to_value(),
            json!({"name": "call.ring", "data": {"from": "100"}})
        );
        assert_eq!(Event::new("x").to_value()["data"], Value::Null);
    }
}
