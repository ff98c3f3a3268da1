//! Variable store for a running chart.

use crate::error::ExpressionError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the variable holding the event currently being processed.
pub const EVENT_VARIABLE: &str = "_event";

/// The live data model of one executor.
///
/// Variables are top-level members of a JSON object. Dotted paths
/// (`order.customer.name`) address nested members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataModel {
    vars: Map<String, Value>,
}

impl DataModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a data model from the document's initial variables.
    pub fn from_map(vars: Map<String, Value>) -> Self {
        Self { vars }
    }

    /// Returns true if the top-level variable has been declared.
    pub fn is_declared(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Looks up a top-level variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Resolves a dotted path.
    ///
    /// The first segment must be a declared variable; missing nested
    /// members resolve to `null`.
    pub fn lookup(&self, path: &str) -> Result<Value, ExpressionError> {
        let mut parts = path.split('.');
        let head = parts.next().unwrap_or_default();
        let mut current = self
            .vars
            .get(head)
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: head.to_string(),
            })?;

        for part in parts {
            match current {
                Value::Object(map) => {
                    current = map.get(part).unwrap_or(&Value::Null);
                }
                _ => return Ok(Value::Null),
            }
        }

        Ok(current.clone())
    }

    /// Declares or overwrites a top-level variable.
    pub fn declare(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Assigns to a dotted location.
    ///
    /// The top-level variable must already be declared. Intermediate
    /// members that are missing or not objects are replaced by objects.
    pub fn assign(&mut self, location: &str, value: Value) -> Result<(), ExpressionError> {
        let mut parts = location.split('.');
        let head = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();

        let slot = self
            .vars
            .get_mut(head)
            .ok_or_else(|| ExpressionError::UndefinedVariable {
                name: head.to_string(),
            })?;

        assign_path(slot, &rest, value);
        Ok(())
    }

    /// Returns the whole store as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.vars.clone())
    }

    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

fn assign_path(target: &mut Value, path: &[&str], value: Value) {
    match path.split_first() {
        None => *target = value,
        Some((head, rest)) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(map) = target {
                let child = map.entry(head.to_string()).or_insert(Value::Null);
                assign_path(child, rest, value);
            }
        }
    }
}
