//! The step engine.
//!
//! An [`Executor`] owns one session over a shared [`Model`]: the active
//! configuration, the data model, and the internal and derived event queues.
//! `start` enters the initial configuration; each `submit` runs one
//! macrostep, micro-stepping until no eventless transition is enabled and
//! both queues are empty, or until the chart becomes final.

use crate::action::{run_block, ActionContext, Executable};
use crate::config::{ErrorPolicy, ExecutorConfig};
use crate::datamodel::{DataModel, EVENT_VARIABLE};
use crate::document::TransitionKind;
use crate::error::{ActionError, ExecutionError};
use crate::event::{Event, DONE_STATE_PREFIX, ERROR_EXECUTION};
use crate::expr::{DataEvaluator, Evaluator};
use crate::model::{Model, StateIdx, StateKind, TransitionRef};
use crate::report::{ErrorReport, ErrorReporter, ReportKind, Reports};
use crate::status::{Phase, Status};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::Span;
use uuid::Uuid;

/// One running session of a chart.
pub struct Executor {
    model: Arc<Model>,
    config: ExecutorConfig,
    evaluator: Arc<dyn Evaluator>,
    session_id: Uuid,
    span: Span,
    phase: Phase,
    /// Active states, ancestors included, root excluded.
    configuration: BTreeSet<StateIdx>,
    data: DataModel,
    internal: VecDeque<Event>,
    derived: VecDeque<Event>,
    reports: Reports,
    done_data: Option<Value>,
    top_final: bool,
    /// First failure under the abort policy, pending until the microstep ends.
    abort: Option<ExecutionError>,
    /// Transitions whose guard already failed in the current macrostep.
    failed_guards: BTreeSet<TransitionRef>,
}

impl Executor {
    /// Creates an executor with the default configuration and evaluator.
    pub fn new(model: Arc<Model>) -> Self {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("executor", chart = %model.name(), session = %session_id);
        let config = ExecutorConfig::default();

        let mut data = DataModel::from_map(model.datamodel().clone());
        data.declare(EVENT_VARIABLE, Value::Null);

        Self {
            reports: Reports::new(config.max_reports),
            model,
            config,
            evaluator: Arc::new(DataEvaluator::new()),
            session_id,
            span,
            phase: Phase::Uninitialized,
            configuration: BTreeSet::new(),
            data,
            internal: VecDeque::new(),
            derived: VecDeque::new(),
            done_data: None,
            top_final: false,
            abort: None,
            failed_guards: BTreeSet::new(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.reports.set_max(config.max_reports);
        self.config = config;
        self
    }

    /// Replaces the expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Installs a hook that sees every report as it is produced.
    pub fn with_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.reports.set_sink(Box::new(reporter));
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The live data model.
    pub fn data(&self) -> &DataModel {
        &self.data
    }

    /// Removes and returns the retained reports.
    pub fn take_reports(&mut self) -> Vec<ErrorReport> {
        self.reports.drain()
    }

    /// Snapshot of the current configuration.
    pub fn status(&self) -> Status {
        if self.phase == Phase::Uninitialized {
            return Status::uninitialized();
        }
        let model = &self.model;
        Status {
            states: self
                .configuration
                .iter()
                .map(|s| model.state(*s))
                .filter(|n| n.is_atomic())
                .map(|n| n.id.clone())
                .collect(),
            active: self
                .configuration
                .iter()
                .map(|s| model.state(*s).id.clone())
                .collect(),
            is_final: self.phase == Phase::Final,
            done_data: self.done_data.clone(),
            phase: self.phase,
        }
    }

    /// Enters the initial configuration and runs until stable.
    pub fn start(&mut self) -> Result<Status, ExecutionError> {
        if self.phase != Phase::Uninitialized {
            return Err(ExecutionError::AlreadyStarted);
        }
        let span = self.span.clone();
        let _enter = span.enter();
        tracing::debug!("starting chart");

        self.phase = Phase::Running;
        self.failed_guards.clear();
        let model = self.model.clone();
        let mut entering = BTreeSet::new();
        add_descendants(&model, StateIdx::ROOT, &mut entering);
        entering.remove(&StateIdx::ROOT);
        self.enter_states(&model, &entering);

        self.run_macrostep(Vec::new())?;
        Ok(self.status())
    }

    /// Submits an event by name.
    pub fn submit(&mut self, name: &str) -> Result<Status, ExecutionError> {
        self.submit_event(Event::new(name))
    }

    /// Submits an event and runs one macrostep.
    pub fn submit_event(&mut self, event: Event) -> Result<Status, ExecutionError> {
        match self.phase {
            Phase::Uninitialized => return Err(ExecutionError::NotStarted),
            Phase::Halted => return Err(ExecutionError::Halted),
            Phase::Final => {
                let _enter = self.span.enter();
                self.reports.push(ErrorReport {
                    kind: ReportKind::Warning,
                    state: None,
                    message: format!("event '{}' ignored: chart is already final", event.name),
                });
                return Ok(self.status());
            }
            Phase::Running => {}
        }

        let span = self.span.clone();
        let _enter = span.enter();
        tracing::debug!(event = %event.name, "macrostep");

        self.failed_guards.clear();
        let previous = self.data.get(EVENT_VARIABLE).cloned();
        self.set_event(&event);
        let enabled = self.select(Some(&event));

        if enabled.is_empty() && self.abort.is_none() && self.internal.is_empty() {
            self.data
                .declare(EVENT_VARIABLE, previous.unwrap_or(Value::Null));
            tracing::debug!(event = %event.name, "no transition enabled");
            self.check_final();
            return Ok(self.status());
        }

        self.run_macrostep(enabled)?;
        Ok(self.status())
    }

    fn run_macrostep(&mut self, first: Vec<TransitionRef>) -> Result<(), ExecutionError> {
        let mut steps = 0;
        self.check_abort()?;
        if !first.is_empty() {
            self.tick(&mut steps)?;
            self.microstep(&first);
            self.check_abort()?;
        }

        loop {
            if self.check_final() {
                return Ok(());
            }

            let mut enabled = self.select(None);
            self.check_abort()?;
            if enabled.is_empty() {
                let Some(event) = self
                    .internal
                    .pop_front()
                    .or_else(|| self.derived.pop_front())
                else {
                    return Ok(());
                };
                tracing::trace!(event = %event.name, "dequeued");
                self.set_event(&event);
                enabled = self.select(Some(&event));
                self.check_abort()?;
            }

            self.tick(&mut steps)?;
            if !enabled.is_empty() {
                self.microstep(&enabled);
                self.check_abort()?;
            }
        }
    }

    fn tick(&mut self, steps: &mut usize) -> Result<(), ExecutionError> {
        *steps += 1;
        if *steps > self.config.max_microsteps {
            self.phase = Phase::Halted;
            self.internal.clear();
            self.derived.clear();
            let err = ExecutionError::MicrostepLimit {
                limit: self.config.max_microsteps,
            };
            tracing::error!("{}", err);
            return Err(err);
        }
        Ok(())
    }

    fn check_abort(&mut self) -> Result<(), ExecutionError> {
        match self.abort.take() {
            Some(err) => {
                self.internal.clear();
                self.derived.clear();
                tracing::warn!("macrostep aborted: {}", err);
                self.check_final();
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn check_final(&mut self) -> bool {
        if !self.is_final_configuration() {
            return false;
        }
        self.phase = Phase::Final;
        let dropped = self.internal.len() + self.derived.len();
        if dropped > 0 {
            tracing::debug!(dropped, "chart is final, dropping queued events");
            self.internal.clear();
            self.derived.clear();
        }
        tracing::debug!("chart reached a final configuration");
        true
    }

    fn is_final_configuration(&self) -> bool {
        if self.top_final {
            return true;
        }
        let model = &self.model;
        !self.configuration.is_empty()
            && self.configuration.iter().all(|s| {
                let node = model.state(*s);
                (!node.is_atomic() || node.is_final()) && node.transitions.is_empty()
            })
    }

    fn set_event(&mut self, event: &Event) {
        self.data.declare(EVENT_VARIABLE, event.to_value());
    }

    /// Enabled transitions for `event` (eventless ones for `None`), with
    /// conflicts removed, in document order.
    fn select(&mut self, event: Option<&Event>) -> Vec<TransitionRef> {
        let model = self.model.clone();
        let atomics: Vec<StateIdx> = self
            .configuration
            .iter()
            .copied()
            .filter(|s| model.state(*s).is_atomic())
            .collect();

        let mut enabled = Vec::new();
        for atomic in atomics {
            'search: for source in std::iter::once(atomic).chain(model.ancestors(atomic)) {
                let node = model.state(source);
                for (position, t) in node.transitions.iter().enumerate() {
                    let matches = match (event, &t.event) {
                        (None, None) => true,
                        (Some(e), Some(pattern)) => pattern.matches(&e.name),
                        _ => false,
                    };
                    let r = TransitionRef { source, position };
                    if matches && self.guard_holds(r, t.cond.as_deref(), &node.id) {
                        if !enabled.contains(&r) {
                            enabled.push(r);
                        }
                        break 'search;
                    }
                }
            }
        }

        self.remove_conflicts(&model, enabled)
    }

    /// Evaluates a guard. A failing guard is false; it is reported once per
    /// macrostep so an eventless transition cannot keep raising errors.
    fn guard_holds(&mut self, t: TransitionRef, cond: Option<&str>, state: &str) -> bool {
        let Some(cond) = cond else {
            return true;
        };
        match self.evaluator.evaluate_cond(cond, &self.data) {
            Ok(holds) => holds,
            Err(_) if self.failed_guards.contains(&t) => false,
            Err(err) => {
                self.failed_guards.insert(t);
                let message = format!("guard '{}' failed: {}", cond, err);
                self.reports.push(ErrorReport {
                    kind: ReportKind::Expression,
                    state: Some(state.to_string()),
                    message: message.clone(),
                });
                match self.config.error_policy {
                    ErrorPolicy::Skip => self.raise_error(&message),
                    ErrorPolicy::Abort => {
                        self.abort
                            .get_or_insert(ExecutionError::Expression(err));
                    }
                }
                false
            }
        }
    }

    /// Outer transitions win over inner ones; otherwise the earlier one wins.
    fn remove_conflicts(&self, model: &Model, enabled: Vec<TransitionRef>) -> Vec<TransitionRef> {
        let mut kept: Vec<(TransitionRef, BTreeSet<StateIdx>)> = Vec::new();
        for t1 in enabled {
            let exit1 = self.exit_set(model, t1);
            let mut preempted = false;
            let mut displaced = Vec::new();
            for (i, (t2, exit2)) in kept.iter().enumerate() {
                if exit1.is_disjoint(exit2) {
                    continue;
                }
                if model.is_descendant(t2.source, t1.source) {
                    displaced.push(i);
                } else {
                    preempted = true;
                    break;
                }
            }
            if !preempted {
                for i in displaced.into_iter().rev() {
                    kept.remove(i);
                }
                kept.push((t1, exit1));
            }
        }

        let mut selected: Vec<TransitionRef> = kept.into_iter().map(|(t, _)| t).collect();
        selected.sort();
        selected
    }

    fn exit_set(&self, model: &Model, t: TransitionRef) -> BTreeSet<StateIdx> {
        match transition_domain(model, t) {
            Some(domain) => self
                .configuration
                .iter()
                .copied()
                .filter(|s| model.is_descendant(*s, domain))
                .collect(),
            None => BTreeSet::new(),
        }
    }

    fn microstep(&mut self, transitions: &[TransitionRef]) {
        let model = self.model.clone();

        let mut exiting = BTreeSet::new();
        for t in transitions {
            exiting.extend(self.exit_set(&model, *t));
        }
        for s in exiting.iter().rev() {
            let node = model.state(*s);
            tracing::trace!(state = %node.id, "exit");
            self.run_actions(&node.on_exit, Some(&node.id));
            self.configuration.remove(s);
        }

        for t in transitions {
            let transition = model.transition(*t);
            let source = &model.state(t.source).id;
            tracing::trace!(
                source = %source,
                to = transition.target.map(|i| model.state(i).id.as_str()),
                "transition"
            );
            self.run_actions(&transition.actions, Some(source));
        }

        let mut entering = BTreeSet::new();
        for t in transitions {
            if let Some(target) = model.transition(*t).target {
                add_descendants(&model, target, &mut entering);
                if let Some(domain) = transition_domain(&model, *t) {
                    add_ancestors(&model, target, domain, &mut entering);
                }
            }
        }
        self.enter_states(&model, &entering);
    }

    fn enter_states(&mut self, model: &Model, entering: &BTreeSet<StateIdx>) {
        for &s in entering {
            if !self.configuration.insert(s) {
                continue;
            }
            let node = model.state(s);
            tracing::trace!(state = %node.id, "enter");
            self.run_actions(&node.on_entry, Some(&node.id));

            if !node.is_final() {
                continue;
            }
            let Some(parent) = node.parent else {
                continue;
            };
            if parent == StateIdx::ROOT {
                self.top_final = true;
                continue;
            }

            let parent_node = model.state(parent);
            self.internal
                .push_back(Event::new(format!("{}{}", DONE_STATE_PREFIX, parent_node.id)));
            if let Some(grandparent) = parent_node.parent {
                let gp = model.state(grandparent);
                if gp.is_parallel() && gp.children.iter().all(|c| self.in_final_state(model, *c)) {
                    self.internal
                        .push_back(Event::new(format!("{}{}", DONE_STATE_PREFIX, gp.id)));
                }
            }
        }
    }

    fn in_final_state(&self, model: &Model, s: StateIdx) -> bool {
        let node = model.state(s);
        match node.kind {
            StateKind::Compound => node
                .children
                .iter()
                .any(|c| model.state(*c).is_final() && self.configuration.contains(c)),
            StateKind::Parallel => node.children.iter().all(|c| self.in_final_state(model, *c)),
            StateKind::Atomic | StateKind::Final => false,
        }
    }

    fn run_actions(&mut self, actions: &[Executable], state: Option<&str>) {
        if actions.is_empty() || self.abort.is_some() {
            return;
        }
        let result = {
            let mut ctx = ActionContext {
                data: &mut self.data,
                evaluator: self.evaluator.as_ref(),
                internal: &mut self.internal,
                derived: &mut self.derived,
                reports: &mut self.reports,
                span: &self.span,
                state,
                completion: &mut self.done_data,
            };
            run_block(actions, &mut ctx)
        };
        if let Err(err) = result {
            self.action_failed(state, err);
        }
    }

    fn action_failed(&mut self, state: Option<&str>, err: ActionError) {
        let kind = match err {
            ActionError::Expression(_) => ReportKind::Expression,
            ActionError::Failed { .. } => ReportKind::Action,
        };
        let message = err.to_string();
        self.reports.push(ErrorReport {
            kind,
            state: state.map(str::to_string),
            message: message.clone(),
        });
        match self.config.error_policy {
            ErrorPolicy::Skip => self.raise_error(&message),
            ErrorPolicy::Abort => {
                self.abort.get_or_insert(match err {
                    ActionError::Expression(e) => ExecutionError::Expression(e),
                    other => ExecutionError::Action(other),
                });
            }
        }
    }

    fn raise_error(&mut self, message: &str) {
        self.internal
            .push_back(Event::with_data(ERROR_EXECUTION, json!({ "message": message })));
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("chart", &self.model.name())
            .field("session_id", &self.session_id)
            .field("phase", &self.phase)
            .field("configuration", &self.configuration)
            .finish_non_exhaustive()
    }
}

/// The state whose descendants a transition exits, or `None` if targetless.
fn transition_domain(model: &Model, t: TransitionRef) -> Option<StateIdx> {
    let transition = model.transition(t);
    let target = transition.target?;
    if transition.kind == TransitionKind::Internal
        && model.state(t.source).is_compound()
        && model.is_descendant(target, t.source)
    {
        return Some(t.source);
    }
    Some(model.lcca(&[t.source, target]))
}

fn add_descendants(model: &Model, state: StateIdx, entering: &mut BTreeSet<StateIdx>) {
    entering.insert(state);
    let node = model.state(state);
    match node.kind {
        StateKind::Compound => {
            if let Some(initial) = node.initial {
                add_descendants(model, initial, entering);
                add_ancestors(model, initial, state, entering);
            }
        }
        StateKind::Parallel => {
            for &child in &node.children {
                if !covers(model, entering, child) {
                    add_descendants(model, child, entering);
                }
            }
        }
        StateKind::Atomic | StateKind::Final => {}
    }
}

fn add_ancestors(
    model: &Model,
    state: StateIdx,
    domain: StateIdx,
    entering: &mut BTreeSet<StateIdx>,
) {
    for ancestor in model
        .ancestors(state)
        .take_while(|a| *a != domain && *a != StateIdx::ROOT)
    {
        entering.insert(ancestor);
        let node = model.state(ancestor);
        if node.is_parallel() {
            for &child in &node.children {
                if !covers(model, entering, child) {
                    add_descendants(model, child, entering);
                }
            }
        }
    }
}

/// True if `state` or one of its descendants is already being entered.
fn covers(model: &Model, entering: &BTreeSet<StateIdx>, state: StateIdx) -> bool {
    entering
        .iter()
        .any(|s| *s == state || model.is_descendant(*s, state))
}

/// An executor shared between threads, one macrostep per lock hold.
#[derive(Clone)]
pub struct SharedExecutor {
    inner: Arc<Mutex<Executor>>,
}

impl SharedExecutor {
    pub fn new(executor: Executor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(executor)),
        }
    }

    pub fn start(&self) -> Result<Status, ExecutionError> {
        self.inner.lock().start()
    }

    pub fn submit(&self, name: &str) -> Result<Status, ExecutionError> {
        self.inner.lock().submit(name)
    }

    pub fn submit_event(&self, event: Event) -> Result<Status, ExecutionError> {
        self.inner.lock().submit_event(event)
    }

    pub fn status(&self) -> Status {
        self.inner.lock().status()
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.lock().session_id()
    }

    /// Runs `f` with exclusive access to the executor.
    pub fn with<R>(&self, f: impl FnOnce(&mut Executor) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
