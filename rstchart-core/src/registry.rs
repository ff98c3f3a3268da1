//! Registry of host-supplied custom actions.
//!
//! Custom actions are addressed by `(namespace, local name)`. Each entry
//! carries an [`ActionType`], a tagged factory that builds one action
//! instance per occurrence in a chart document by deserializing the
//! element's attributes:
//!
//! ```
//! use rstchart_core::{Action, ActionContext, ActionError, ActionRegistry};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Hello {
//!     #[serde(default)]
//!     name: String,
//! }
//!
//! impl Action for Hello {
//!     fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
//!         ctx.log("hello", &format!("Hello {}", self.name));
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = ActionRegistry::new();
//! registry
//!     .register_action::<Hello>("http://my.custom-actions.domain/CUSTOM", "hello")
//!     .unwrap();
//! assert!(registry
//!     .resolve("http://my.custom-actions.domain/CUSTOM", "hello")
//!     .is_some());
//! ```

use crate::action::Action;
use crate::error::RegistrationError;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

type Constructor = fn(&Map<String, Value>) -> Result<Box<dyn Action>, String>;

/// Descriptor of a custom action implementation.
#[derive(Clone, Copy)]
pub struct ActionType {
    type_name: &'static str,
    construct: Constructor,
}

impl ActionType {
    /// Describes the action type `A`, built from its element attributes.
    pub fn of<A>() -> Self
    where
        A: Action + DeserializeOwned + 'static,
    {
        Self {
            type_name: std::any::type_name::<A>(),
            construct: construct::<A>,
        }
    }

    /// Rust type name of the implementation.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Builds one instance from element attributes.
    pub fn instantiate(&self, attributes: &Map<String, Value>) -> Result<Box<dyn Action>, String> {
        (self.construct)(attributes)
    }
}

impl std::fmt::Debug for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionType")
            .field("type_name", &self.type_name)
            .finish()
    }
}

fn construct<A>(attributes: &Map<String, Value>) -> Result<Box<dyn Action>, String>
where
    A: Action + DeserializeOwned + 'static,
{
    let parsed = serde_json::from_value::<A>(Value::Object(attributes.clone())).or_else(|e| {
        // Unit structs only deserialize from null.
        if attributes.is_empty() {
            serde_json::from_value::<A>(Value::Null).map_err(|_| e)
        } else {
            Err(e)
        }
    });
    parsed
        .map(|a| Box::new(a) as Box<dyn Action>)
        .map_err(|e| e.to_string())
}

/// A validated registration.
#[derive(Debug, Clone)]
pub struct CustomActionRecord {
    pub namespace: String,
    pub local_name: String,
    pub action_type: ActionType,
}

/// Mapping of `(namespace, local name)` to custom action implementations.
///
/// Built once per host configuration, then shared read-only (usually as
/// `Arc<ActionRegistry>`) by every model built against it.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    entries: HashMap<(String, String), Arc<CustomActionRecord>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation.
    ///
    /// `implementation` is taken as `dyn Any` so hosts that discover
    /// implementations dynamically can pass them through unchanged; only an
    /// [`ActionType`] is accepted. Checks run in order (namespace, local
    /// name, implementation) and the first failure is returned with nothing
    /// registered. A later registration under the same key replaces the
    /// earlier one.
    pub fn register(
        &mut self,
        namespace: &str,
        local_name: &str,
        implementation: Arc<dyn Any + Send + Sync>,
    ) -> Result<Arc<CustomActionRecord>, RegistrationError> {
        if namespace.trim().is_empty() {
            return Err(RegistrationError::BlankNamespace);
        }
        if local_name.trim().is_empty() {
            return Err(RegistrationError::BlankLocalName {
                namespace: namespace.to_string(),
            });
        }
        let action_type = implementation
            .downcast_ref::<ActionType>()
            .copied()
            .ok_or_else(|| RegistrationError::NotAnAction {
                namespace: namespace.to_string(),
                local_name: local_name.to_string(),
            })?;

        let record = Arc::new(CustomActionRecord {
            namespace: namespace.to_string(),
            local_name: local_name.to_string(),
            action_type,
        });

        let key = (namespace.to_string(), local_name.to_string());
        if let Some(previous) = self.entries.insert(key, record.clone()) {
            tracing::debug!(
                "custom action {}:{} re-registered ({} replaced by {})",
                namespace,
                local_name,
                previous.action_type.type_name(),
                action_type.type_name()
            );
        }

        Ok(record)
    }

    /// Registers the action type `A`.
    pub fn register_action<A>(
        &mut self,
        namespace: &str,
        local_name: &str,
    ) -> Result<Arc<CustomActionRecord>, RegistrationError>
    where
        A: Action + DeserializeOwned + 'static,
    {
        self.register(namespace, local_name, Arc::new(ActionType::of::<A>()))
    }

    /// Looks up a registration.
    pub fn resolve(&self, namespace: &str, local_name: &str) -> Option<Arc<CustomActionRecord>> {
        self.entries
            .get(&(namespace.to_string(), local_name.to_string()))
            .cloned()
    }

    /// Iterates over all registrations, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &Arc<CustomActionRecord>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
