//! Validated, immutable chart model.
//!
//! States live in an arena in document pre-order: index order is document
//! order, and every ancestor sits before its descendants. Parent and child
//! links are indices, so the model has no ownership cycles and can be shared
//! read-only across executors.

use crate::action::Executable;
use crate::document::{ActionDef, ChartDocument, ChildDef, StateDef, TransitionDef, TransitionKind};
use crate::error::ModelBuildError;
use crate::event::EventPattern;
use crate::registry::ActionRegistry;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Stable address of a state in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateIdx(usize);

impl StateIdx {
    /// The synthetic root that owns the document's top-level states.
    pub const ROOT: StateIdx = StateIdx(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Address of a transition: its source state and declaration position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionRef {
    pub source: StateIdx,
    pub position: usize,
}

/// Structural kind of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Atomic,
    Compound,
    Parallel,
    Final,
}

/// A state in the arena.
#[derive(Debug)]
pub struct StateNode {
    pub id: String,
    pub kind: StateKind,
    pub parent: Option<StateIdx>,
    pub children: Vec<StateIdx>,
    /// Default entry target of a compound state.
    pub initial: Option<StateIdx>,
    /// True for the final state generated from an exit shorthand.
    pub anonymous: bool,
    pub on_entry: Vec<Executable>,
    pub on_exit: Vec<Executable>,
    pub transitions: Vec<Transition>,
}

impl StateNode {
    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, StateKind::Atomic | StateKind::Final)
    }

    pub fn is_final(&self) -> bool {
        self.kind == StateKind::Final
    }

    pub fn is_parallel(&self) -> bool {
        self.kind == StateKind::Parallel
    }

    pub fn is_compound(&self) -> bool {
        self.kind == StateKind::Compound
    }
}

/// A transition owned by its source state.
#[derive(Debug)]
pub struct Transition {
    pub source: StateIdx,
    pub event: Option<EventPattern>,
    pub cond: Option<String>,
    pub target: Option<StateIdx>,
    pub kind: TransitionKind,
    pub actions: Vec<Executable>,
}

impl Transition {
    pub fn is_eventless(&self) -> bool {
        self.event.is_none()
    }
}

/// A validated chart.
#[derive(Debug)]
pub struct Model {
    name: String,
    states: Vec<StateNode>,
    index: HashMap<String, StateIdx>,
    datamodel: Map<String, Value>,
    checksum: String,
}

impl Model {
    /// Parses a document from JSON and builds it.
    pub fn from_json(json: &Value, registry: &ActionRegistry) -> Result<Self, ModelBuildError> {
        let doc = ChartDocument::from_json(json)?;
        Self::build(&doc, registry)
    }

    /// Validates a document and builds the executable model, resolving
    /// custom actions against `registry` and desugaring exit shorthands.
    pub fn build(doc: &ChartDocument, registry: &ActionRegistry) -> Result<Self, ModelBuildError> {
        let name = doc.name.clone().unwrap_or_else(|| "chart".to_string());

        if doc.states.is_empty() {
            return Err(ModelBuildError::InvalidState {
                state: name,
                reason: "chart has no states".to_string(),
            });
        }

        let mut builder = Builder {
            registry,
            states: Vec::new(),
            index: HashMap::new(),
            pending_initial: Vec::new(),
            pending_transitions: Vec::new(),
            named: HashSet::new(),
            exits: 0,
        };
        for child in &doc.states {
            collect_ids(child, &mut builder.named);
        }

        builder.states.push(StateNode {
            id: name.clone(),
            kind: StateKind::Compound,
            parent: None,
            children: Vec::new(),
            initial: None,
            anonymous: false,
            on_entry: Vec::new(),
            on_exit: Vec::new(),
            transitions: Vec::new(),
        });
        if let Some(initial) = &doc.initial {
            builder.pending_initial.push((StateIdx::ROOT, initial.clone()));
        }
        for child in &doc.states {
            builder.add_child(StateIdx::ROOT, child)?;
        }
        builder.resolve()?;

        let json_bytes = serde_json::to_vec(doc)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        tracing::debug!(
            "built chart '{}': {} states, checksum {}",
            name,
            builder.states.len() - 1,
            checksum
        );

        Ok(Self {
            name,
            states: builder.states,
            index: builder.index,
            datamodel: doc.datamodel.clone(),
            checksum,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// CRC32C of the canonical JSON form of the source document.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Initial data model variables.
    pub fn datamodel(&self) -> &Map<String, Value> {
        &self.datamodel
    }

    pub fn state(&self, idx: StateIdx) -> &StateNode {
        &self.states[idx.0]
    }

    pub fn transition(&self, t: TransitionRef) -> &Transition {
        &self.states[t.source.0].transitions[t.position]
    }

    /// Looks up a state by identifier.
    pub fn find(&self, id: &str) -> Option<StateIdx> {
        self.index.get(id).copied()
    }

    /// Number of states, excluding the root.
    pub fn len(&self) -> usize {
        self.states.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All states except the root, in document order.
    pub fn states(&self) -> impl Iterator<Item = (StateIdx, &StateNode)> {
        self.states
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, s)| (StateIdx(i), s))
    }

    /// Proper ancestors of `idx`, innermost first, ending with the root.
    pub fn ancestors(&self, idx: StateIdx) -> impl Iterator<Item = StateIdx> + '_ {
        std::iter::successors(self.state(idx).parent, move |p| self.state(*p).parent)
    }

    /// True if `a` is a proper descendant of `b`.
    pub fn is_descendant(&self, a: StateIdx, b: StateIdx) -> bool {
        self.ancestors(a).any(|p| p == b)
    }

    /// Least common compound ancestor of the given states.
    pub fn lcca(&self, states: &[StateIdx]) -> StateIdx {
        let Some((&head, tail)) = states.split_first() else {
            return StateIdx::ROOT;
        };
        self.ancestors(head)
            .filter(|a| self.state(*a).is_compound())
            .find(|a| tail.iter().all(|s| self.is_descendant(*s, *a)))
            .unwrap_or(StateIdx::ROOT)
    }
}

struct Builder<'a> {
    registry: &'a ActionRegistry,
    states: Vec<StateNode>,
    index: HashMap<String, StateIdx>,
    pending_initial: Vec<(StateIdx, String)>,
    pending_transitions: Vec<(StateIdx, &'a TransitionDef)>,
    /// Identifiers written in the document; generated exit ids avoid them.
    named: HashSet<&'a str>,
    exits: usize,
}

fn collect_ids<'a>(child: &'a ChildDef, ids: &mut HashSet<&'a str>) {
    if let ChildDef::State(def) = child {
        ids.insert(def.id.as_str());
        for c in &def.states {
            collect_ids(c, ids);
        }
    }
}

impl<'a> Builder<'a> {
    fn add_child(&mut self, parent: StateIdx, child: &'a ChildDef) -> Result<StateIdx, ModelBuildError> {
        let idx = match child {
            ChildDef::State(def) => self.add_state(parent, def)?,
            ChildDef::Exit { exit } => {
                let id = loop {
                    let id = format!("_exit.{}", self.exits);
                    self.exits += 1;
                    if !self.named.contains(id.as_str()) {
                        break id;
                    }
                };
                let namelist = exit
                    .namelist
                    .as_deref()
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                let report = Executable::ExitReport {
                    expr: exit.expr.clone(),
                    namelist,
                };
                self.push(parent, id, StateKind::Final, true, vec![report], Vec::new())?
            }
        };
        self.states[parent.0].children.push(idx);
        Ok(idx)
    }

    fn add_state(&mut self, parent: StateIdx, def: &'a StateDef) -> Result<StateIdx, ModelBuildError> {
        if let Some(src) = &def.src {
            return Err(ModelBuildError::UnresolvedSource {
                state: def.id.clone(),
                src: src.clone(),
            });
        }
        let invalid = |reason: &str| ModelBuildError::InvalidState {
            state: def.id.clone(),
            reason: reason.to_string(),
        };

        let kind = if def.is_final {
            if def.parallel {
                return Err(invalid("a final state cannot be parallel"));
            }
            if !def.states.is_empty() {
                return Err(invalid("a final state cannot have children"));
            }
            if !def.transitions.is_empty() {
                return Err(invalid("a final state cannot have transitions"));
            }
            StateKind::Final
        } else if def.parallel {
            if def.states.is_empty() {
                return Err(invalid("a parallel state needs children"));
            }
            if def.initial.is_some() {
                return Err(invalid("a parallel state cannot name an initial child"));
            }
            StateKind::Parallel
        } else if def.states.is_empty() {
            if let Some(initial) = &def.initial {
                return Err(ModelBuildError::InvalidInitial {
                    state: def.id.clone(),
                    initial: initial.clone(),
                });
            }
            StateKind::Atomic
        } else {
            StateKind::Compound
        };

        let on_entry = self.build_actions(&def.on_entry)?;
        let on_exit = self.build_actions(&def.on_exit)?;
        let idx = self.push(parent, def.id.clone(), kind, false, on_entry, on_exit)?;

        if let Some(initial) = &def.initial {
            self.pending_initial.push((idx, initial.clone()));
        }
        for t in &def.transitions {
            self.pending_transitions.push((idx, t));
        }
        for child in &def.states {
            self.add_child(idx, child)?;
        }
        Ok(idx)
    }

    fn push(
        &mut self,
        parent: StateIdx,
        id: String,
        kind: StateKind,
        anonymous: bool,
        on_entry: Vec<Executable>,
        on_exit: Vec<Executable>,
    ) -> Result<StateIdx, ModelBuildError> {
        if id.trim().is_empty() {
            return Err(ModelBuildError::BlankStateId);
        }
        let idx = StateIdx(self.states.len());
        if self.index.insert(id.clone(), idx).is_some() {
            return Err(ModelBuildError::DuplicateStateId { id });
        }

        self.states.push(StateNode {
            id,
            kind,
            parent: Some(parent),
            children: Vec::new(),
            initial: None,
            anonymous,
            on_entry,
            on_exit,
            transitions: Vec::new(),
        });
        Ok(idx)
    }

    fn resolve(&mut self) -> Result<(), ModelBuildError> {
        let is_descendant = |states: &[StateNode], a: StateIdx, b: StateIdx| {
            let mut current = states[a.0].parent;
            while let Some(p) = current {
                if p == b {
                    return true;
                }
                current = states[p.0].parent;
            }
            false
        };

        for (idx, initial) in std::mem::take(&mut self.pending_initial) {
            let target = self
                .index
                .get(&initial)
                .copied()
                .filter(|t| is_descendant(&self.states, *t, idx))
                .ok_or_else(|| ModelBuildError::InvalidInitial {
                    state: self.states[idx.0].id.clone(),
                    initial: initial.clone(),
                })?;
            self.states[idx.0].initial = Some(target);
        }

        for node in self.states.iter_mut() {
            if node.kind == StateKind::Compound && node.initial.is_none() {
                node.initial = node.children.first().copied();
            }
        }

        for (idx, def) in std::mem::take(&mut self.pending_transitions) {
            let target = match &def.target {
                Some(id) => Some(self.index.get(id).copied().ok_or_else(|| {
                    ModelBuildError::UnknownTarget {
                        state: self.states[idx.0].id.clone(),
                        target: id.clone(),
                    }
                })?),
                None => None,
            };
            let event = match def.event.as_deref() {
                Some(pattern) => EventPattern::parse(pattern).map_err(|_| {
                    ModelBuildError::InvalidEvent {
                        state: self.states[idx.0].id.clone(),
                        event: pattern.to_string(),
                    }
                })?,
                None => None,
            };
            let transition = Transition {
                source: idx,
                event,
                cond: def.cond.clone(),
                target,
                kind: def.kind,
                actions: self.build_actions(&def.actions)?,
            };
            self.states[idx.0].transitions.push(transition);
        }

        Ok(())
    }

    fn build_actions(&self, defs: &[ActionDef]) -> Result<Vec<Executable>, ModelBuildError> {
        defs.iter().map(|def| self.build_action(def)).collect()
    }

    fn build_action(&self, def: &ActionDef) -> Result<Executable, ModelBuildError> {
        Ok(match def {
            ActionDef::Log { label, expr } => Executable::Log {
                label: label.clone(),
                expr: expr.clone(),
            },
            ActionDef::Assign { location, expr } => Executable::Assign {
                location: location.clone(),
                expr: expr.clone(),
            },
            ActionDef::Raise { event } => Executable::Raise {
                event: event.clone(),
            },
            ActionDef::Send { event, expr } => Executable::Send {
                event: event.clone(),
                expr: expr.clone(),
            },
            ActionDef::If {
                cond,
                actions,
                otherwise,
            } => Executable::If {
                cond: cond.clone(),
                actions: self.build_actions(actions)?,
                otherwise: self.build_actions(otherwise)?,
            },
            ActionDef::Custom {
                namespace,
                name,
                attributes,
            } => {
                let record = self.registry.resolve(namespace, name).ok_or_else(|| {
                    ModelBuildError::UnresolvedAction {
                        namespace: namespace.clone(),
                        local_name: name.clone(),
                    }
                })?;
                let action = record.action_type.instantiate(attributes).map_err(|reason| {
                    ModelBuildError::InvalidActionAttributes {
                        namespace: namespace.clone(),
                        local_name: name.clone(),
                        reason,
                    }
                })?;
                Executable::Custom {
                    namespace: namespace.clone(),
                    local_name: name.clone(),
                    action,
                }
            }
        })
    }
}
