//! Chart document types.
//!
//! Charts are described with a JSON (or YAML) DSL:
//!
//! ```json
//! {
//!   "name": "call",
//!   "initial": "idle",
//!   "datamodel": {"attempts": 0},
//!   "states": [
//!     {"id": "idle", "transitions": [{"event": "ring", "target": "ringing"}]},
//!     {"id": "ringing",
//!      "on_entry": [{"type": "assign", "location": "attempts", "expr": "attempts + 1"}],
//!      "transitions": [
//!        {"event": "answer", "target": "talking"},
//!        {"event": "timeout", "cond": "attempts < 3", "target": "ringing"},
//!        {"event": "timeout", "target": "done"}
//!      ]},
//!     {"id": "talking", "transitions": [{"event": "hangup", "target": "done"}]},
//!     {"id": "done", "final": true}
//!   ]
//! }
//! ```
//!
//! A child entry of the form `{"exit": {"expr": ..., "namelist": ...}}` is the
//! shorthand for an anonymous final state reporting completion data.
//!
//! A state with `"src": "path"` takes its children from another document,
//! resolved relative to the including file by [`ChartDocument::from_file`].
//!
//! These types are the input of [`Model::build`](crate::model::Model::build);
//! hosts with their own document format construct them directly.

use crate::error::ModelBuildError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// A whole chart document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartDocument {
    /// Chart name, used in diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Initial top-level state; defaults to the first one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,

    /// Initial data model variables.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub datamodel: Map<String, Value>,

    /// Top-level states.
    #[serde(default)]
    pub states: Vec<ChildDef>,
}

impl ChartDocument {
    /// Parses a document from a JSON value.
    pub fn from_json(json: &Value) -> Result<Self, ModelBuildError> {
        Ok(serde_json::from_value(json.clone())?)
    }

    /// Parses a document from JSON text.
    pub fn from_json_str(s: &str) -> Result<Self, ModelBuildError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parses a document from YAML text.
    pub fn from_yaml_str(s: &str) -> Result<Self, ModelBuildError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Reads a document from disk; `.yaml`/`.yml` files are read as YAML,
    /// everything else as JSON. States with a `src` are filled in from the
    /// referenced documents.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelBuildError> {
        Self::load(path.as_ref(), &mut Vec::new())
    }

    /// Loads `path` and its includes; `stack` holds the files being loaded.
    fn load(path: &Path, stack: &mut Vec<PathBuf>) -> Result<Self, ModelBuildError> {
        let canonical = path.canonicalize().map_err(|e| ModelBuildError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        if stack.contains(&canonical) {
            return Err(ModelBuildError::IncludeCycle {
                path: path.display().to_string(),
            });
        }

        let mut doc = Self::read(path)?;
        stack.push(canonical);
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let mut included = Map::new();
        for child in &mut doc.states {
            include_sources(child, base, stack, &mut included)?;
        }
        stack.pop();

        for (name, value) in included {
            doc.datamodel.entry(name).or_insert(value);
        }
        Ok(doc)
    }

    fn read(path: &Path) -> Result<Self, ModelBuildError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelBuildError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Returns the document as JSON.
    pub fn to_json(&self) -> Result<Value, ModelBuildError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Replaces every `src` below `child` with the referenced document's states.
/// The included initial state applies when the including state names none;
/// included data model variables never override the including document.
fn include_sources(
    child: &mut ChildDef,
    base: &Path,
    stack: &mut Vec<PathBuf>,
    datamodel: &mut Map<String, Value>,
) -> Result<(), ModelBuildError> {
    let ChildDef::State(state) = child else {
        return Ok(());
    };
    let own = state.states.len();
    if let Some(src) = state.src.take() {
        tracing::debug!(state = %state.id, src = %src, "including document");
        let fragment = ChartDocument::load(&base.join(&src), stack)?;
        if state.initial.is_none() {
            state.initial = fragment.initial;
        }
        state.states.extend(fragment.states);
        for (name, value) in fragment.datamodel {
            datamodel.entry(name).or_insert(value);
        }
    }
    // Included states were resolved against their own directory.
    for c in &mut state.states[..own] {
        include_sources(c, base, stack, datamodel)?;
    }
    Ok(())
}

/// A child of a state (or of the document): a state or the exit shorthand.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChildDef {
    Exit { exit: ExitDef },
    State(StateDef),
}

impl<'de> Deserialize<'de> for ChildDef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        match fields.remove("exit") {
            Some(exit) if fields.is_empty() => Ok(ChildDef::Exit {
                exit: serde_json::from_value(exit).map_err(D::Error::custom)?,
            }),
            Some(_) => {
                let others: Vec<&str> = fields.keys().map(String::as_str).collect();
                Err(D::Error::custom(format!(
                    "exit shorthand cannot have other fields (found: {})",
                    others.join(", ")
                )))
            }
            None => serde_json::from_value(Value::Object(fields))
                .map(ChildDef::State)
                .map_err(D::Error::custom),
        }
    }
}

impl From<StateDef> for ChildDef {
    fn from(state: StateDef) -> Self {
        ChildDef::State(state)
    }
}

impl From<ExitDef> for ChildDef {
    fn from(exit: ExitDef) -> Self {
        ChildDef::Exit { exit }
    }
}

/// A state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    pub id: String,

    /// Initial child (must be a descendant); defaults to the first child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,

    /// All children are active at once.
    #[serde(default, skip_serializing_if = "is_false")]
    pub parallel: bool,

    /// Completion state.
    #[serde(default, rename = "final", skip_serializing_if = "is_false")]
    pub is_final: bool,

    /// Document whose states are appended to this state's children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_entry: Vec<ActionDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_exit: Vec<ActionDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<ChildDef>,
}

impl StateDef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn final_state(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_final: true,
            ..Default::default()
        }
    }

    pub fn with_child(mut self, child: impl Into<ChildDef>) -> Self {
        self.states.push(child.into());
        self
    }

    pub fn with_transition(mut self, transition: TransitionDef) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_on_entry(mut self, action: ActionDef) -> Self {
        self.on_entry.push(action);
        self
    }

    pub fn with_on_exit(mut self, action: ActionDef) -> Self {
        self.on_exit.push(action);
        self
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Whether a transition leaves its source state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// Exits and re-enters the source when targeting one of its descendants.
    #[default]
    External,
    /// Stays in the source when targeting one of its descendants.
    Internal,
}

/// A transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
    /// Event pattern; absent for an eventless transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Guard condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cond: Option<String>,

    /// Target state; absent for a targetless transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "is_external")]
    pub kind: TransitionKind,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionDef>,
}

fn is_external(kind: &TransitionKind) -> bool {
    *kind == TransitionKind::External
}

impl TransitionDef {
    /// A transition on `event` to `target`.
    pub fn on(event: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            target: Some(target.into()),
            ..Default::default()
        }
    }

    /// An eventless transition to `target`.
    pub fn always(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Default::default()
        }
    }

    pub fn when(mut self, cond: impl Into<String>) -> Self {
        self.cond = Some(cond.into());
        self
    }

    pub fn with_action(mut self, action: ActionDef) -> Self {
        self.actions.push(action);
        self
    }
}

/// The exit shorthand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExitDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,

    /// Whitespace separated data model variable names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namelist: Option<String>,
}

/// Executable content as written in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDef {
    Log {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<String>,
    },
    Assign {
        location: String,
        expr: String,
    },
    Raise {
        event: String,
    },
    Send {
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expr: Option<String>,
    },
    If {
        cond: String,
        #[serde(default)]
        actions: Vec<ActionDef>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        otherwise: Vec<ActionDef>,
    },
    Custom {
        namespace: String,
        name: String,
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        attributes: Map<String, Value>,
    },
}

impl ActionDef {
    pub fn custom(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ActionDef::Custom {
            namespace: namespace.into(),
            name: name.into(),
            attributes: Map::new(),
        }
    }

    pub fn raise(event: impl Into<String>) -> Self {
        ActionDef::Raise {
            event: event.into(),
        }
    }

    pub fn assign(location: impl Into<String>, expr: impl Into<String>) -> Self {
        ActionDef::Assign {
            location: location.into(),
            expr: expr.into(),
        }
    }
}
