//! The action execution contract.
//!
//! Every piece of executable content, built-in or host supplied, implements
//! [`Action`]. Actions see the running chart only through an
//! [`ActionContext`]: they may change the data model, queue events and emit
//! diagnostics, but they never touch the active configuration.

use crate::datamodel::DataModel;
use crate::error::{ActionError, ExpressionError};
use crate::event::Event;
use crate::expr::Evaluator;
use crate::report::{ErrorReport, ReportKind, Reports};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use tracing::Span;

/// A unit of executable content.
pub trait Action: Send + Sync {
    fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError>;
}

/// Everything an action may use while it runs.
pub struct ActionContext<'a> {
    pub(crate) data: &'a mut DataModel,
    pub(crate) evaluator: &'a dyn Evaluator,
    pub(crate) internal: &'a mut VecDeque<Event>,
    pub(crate) derived: &'a mut VecDeque<Event>,
    pub(crate) reports: &'a mut Reports,
    pub(crate) span: &'a Span,
    pub(crate) state: Option<&'a str>,
    pub(crate) completion: &'a mut Option<Value>,
}

impl<'a> ActionContext<'a> {
    /// The live data model.
    pub fn data(&self) -> &DataModel {
        self.data
    }

    pub fn data_mut(&mut self) -> &mut DataModel {
        self.data
    }

    /// Evaluates an expression with the executor's evaluator.
    pub fn evaluate(&self, expr: &str) -> Result<Value, ExpressionError> {
        self.evaluator.evaluate(expr, self.data)
    }

    /// Evaluates a condition with the executor's evaluator.
    pub fn evaluate_cond(&self, expr: &str) -> Result<bool, ExpressionError> {
        self.evaluator.evaluate_cond(expr, self.data)
    }

    /// Queues an internal event, processed later in the current macrostep.
    pub fn raise(&mut self, event: impl Into<Event>) {
        self.internal.push_back(event.into());
    }

    /// Queues a derived event, processed after the internal queue drains.
    pub fn send(&mut self, event: impl Into<Event>) {
        self.derived.push_back(event.into());
    }

    /// Reports a non-fatal problem to the host.
    pub fn report(&mut self, kind: ReportKind, message: impl Into<String>) {
        self.reports.push(ErrorReport {
            kind,
            state: self.state.map(str::to_string),
            message: message.into(),
        });
    }

    /// The executor's tracing span.
    pub fn span(&self) -> &Span {
        self.span
    }

    /// Emits an application log line inside the executor's span.
    pub fn log(&self, label: &str, message: &str) {
        self.span.in_scope(|| {
            tracing::info!(target: "rstchart::log", label, "{}", message);
        });
    }

    /// Identifier of the state whose content is executing, if any.
    pub fn state(&self) -> Option<&str> {
        self.state
    }

    /// Records the chart's completion data.
    pub fn report_completion(&mut self, value: Value) {
        *self.completion = Some(value);
    }
}

/// Built-in executable content plus resolved custom actions.
pub enum Executable {
    /// Evaluates `expr` and logs it.
    Log {
        label: Option<String>,
        expr: Option<String>,
    },
    /// Stores the value of `expr` at a data model location.
    Assign { location: String, expr: String },
    /// Queues an internal event.
    Raise { event: String },
    /// Queues a derived event with an optional payload.
    Send { event: String, expr: Option<String> },
    /// Runs `actions` when `cond` holds, `otherwise` when it does not.
    If {
        cond: String,
        actions: Vec<Executable>,
        otherwise: Vec<Executable>,
    },
    /// Completion data of a desugared exit.
    ExitReport {
        expr: Option<String>,
        namelist: Vec<String>,
    },
    /// A host-registered action.
    Custom {
        namespace: String,
        local_name: String,
        action: Box<dyn Action>,
    },
}

impl Executable {
    /// Short name used in diagnostics.
    pub fn name(&self) -> String {
        match self {
            Executable::Log { .. } => "log".to_string(),
            Executable::Assign { .. } => "assign".to_string(),
            Executable::Raise { .. } => "raise".to_string(),
            Executable::Send { .. } => "send".to_string(),
            Executable::If { .. } => "if".to_string(),
            Executable::ExitReport { .. } => "exit".to_string(),
            Executable::Custom {
                namespace,
                local_name,
                ..
            } => format!("{}:{}", namespace, local_name),
        }
    }
}

impl Action for Executable {
    fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        match self {
            Executable::Log { label, expr } => {
                let message = match expr {
                    Some(expr) => match ctx.evaluate(expr)? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    },
                    None => String::new(),
                };
                ctx.log(label.as_deref().unwrap_or(""), &message);
                Ok(())
            }
            Executable::Assign { location, expr } => {
                let value = ctx.evaluate(expr)?;
                ctx.data_mut().assign(location, value)?;
                Ok(())
            }
            Executable::Raise { event } => {
                ctx.raise(event.as_str());
                Ok(())
            }
            Executable::Send { event, expr } => {
                let event = match expr {
                    Some(expr) => Event::with_data(event.as_str(), ctx.evaluate(expr)?),
                    None => Event::new(event.as_str()),
                };
                ctx.send(event);
                Ok(())
            }
            Executable::If {
                cond,
                actions,
                otherwise,
            } => {
                if ctx.evaluate_cond(cond)? {
                    run_block(actions, ctx)
                } else {
                    run_block(otherwise, ctx)
                }
            }
            Executable::ExitReport { expr, namelist } => {
                let value = completion_data(ctx, expr.as_deref(), namelist)?;
                ctx.report_completion(value);
                Ok(())
            }
            Executable::Custom { action, .. } => action.execute(ctx),
        }
    }
}

impl std::fmt::Debug for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executable::Log { label, expr } => f
                .debug_struct("Log")
                .field("label", label)
                .field("expr", expr)
                .finish(),
            Executable::Assign { location, expr } => f
                .debug_struct("Assign")
                .field("location", location)
                .field("expr", expr)
                .finish(),
            Executable::Raise { event } => f.debug_struct("Raise").field("event", event).finish(),
            Executable::Send { event, expr } => f
                .debug_struct("Send")
                .field("event", event)
                .field("expr", expr)
                .finish(),
            Executable::If {
                cond,
                actions,
                otherwise,
            } => f
                .debug_struct("If")
                .field("cond", cond)
                .field("actions", actions)
                .field("otherwise", otherwise)
                .finish(),
            Executable::ExitReport { expr, namelist } => f
                .debug_struct("ExitReport")
                .field("expr", expr)
                .field("namelist", namelist)
                .finish(),
            Executable::Custom {
                namespace,
                local_name,
                ..
            } => f
                .debug_struct("Custom")
                .field("namespace", namespace)
                .field("local_name", local_name)
                .finish_non_exhaustive(),
        }
    }
}

/// Runs a block in order, stopping at the first failure.
pub(crate) fn run_block(
    actions: &[Executable],
    ctx: &mut ActionContext<'_>,
) -> Result<(), ActionError> {
    for action in actions {
        action.execute(ctx)?;
    }
    Ok(())
}

fn completion_data(
    ctx: &ActionContext<'_>,
    expr: Option<&str>,
    namelist: &[String],
) -> Result<Value, ActionError> {
    let value = expr.map(|e| ctx.evaluate(e)).transpose()?;
    if namelist.is_empty() {
        return Ok(value.unwrap_or(Value::Null));
    }

    let mut names = Map::new();
    for name in namelist {
        let v = ctx.data().get(name).cloned().ok_or_else(|| {
            ActionError::failed("exit", format!("undefined variable '{}' in namelist", name))
        })?;
        names.insert(name.clone(), v);
    }
    if let Some(value) = value {
        names.insert("expr".to_string(), value);
    }
    Ok(Value::Object(names))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DataEvaluator;
    use serde_json::json;

    struct Harness {
        data: DataModel,
        evaluator: DataEvaluator,
        internal: VecDeque<Event>,
        derived: VecDeque<Event>,
        reports: Reports,
        span: Span,
        completion: Option<Value>,
    }

    impl Harness {
        fn new(vars: Value) -> Self {
            let data = match vars {
                Value::Object(map) => DataModel::from_map(map),
                _ => DataModel::new(),
            };
            Self {
                data,
                evaluator: DataEvaluator::new(),
                internal: VecDeque::new(),
                derived: VecDeque::new(),
                reports: Reports::new(16),
                span: Span::none(),
                completion: None,
            }
        }

        fn run(&mut self, action: &Executable) -> Result<(), ActionError> {
            let mut ctx = ActionContext {
                data: &mut self.data,
                evaluator: &self.evaluator,
                internal: &mut self.internal,
                derived: &mut self.derived,
                reports: &mut self.reports,
                span: &self.span,
                state: Some("s"),
                completion: &mut self.completion,
            };
            action.execute(&mut ctx)
        }
    }

    #[test]
    fn test_assign() {
        let mut h = Harness::new(json!({"count": 1}));
        h.run(&Executable::Assign {
            location: "count".into(),
            expr: "count + 1".into(),
        })
        .unwrap();
        assert_eq!(h.data.get("count"), Some(&json!(2)));
    }

    #[test]
    fn test_assign_undeclared_location() {
        let mut h = Harness::new(json!({}));
        let result = h.run(&Executable::Assign {
            location: "total".into(),
            expr: "1".into(),
        });
        assert!(matches!(result, Err(ActionError::Expression(_))));
    }

    #[test]
    fn test_raise_and_send() {
        let mut h = Harness::new(json!({"n": 7}));
        h.run(&Executable::Raise {
            event: "inner".into(),
        })
        .unwrap();
        h.run(&Executable::Send {
            event: "outer".into(),
            expr: Some("n".into()),
        })
        .unwrap();

        assert_eq!(h.internal.pop_front(), Some(Event::new("inner")));
        assert_eq!(
            h.derived.pop_front(),
            Some(Event::with_data("outer", json!(7)))
        );
    }

    #[test]
    fn test_if_branches() {
        let mut h = Harness::new(json!({"flag": false, "out": null}));
        let action = Executable::If {
            cond: "flag".into(),
            actions: vec![Executable::Assign {
                location: "out".into(),
                expr: "'then'".into(),
            }],
            otherwise: vec![Executable::Assign {
                location: "out".into(),
                expr: "'else'".into(),
            }],
        };

        h.run(&action).unwrap();
        assert_eq!(h.data.get("out"), Some(&json!("else")));

        h.data.declare("flag", json!(true));
        h.run(&action).unwrap();
        assert_eq!(h.data.get("out"), Some(&json!("then")));
    }

    #[test]
    fn test_exit_report_variants() {
        let mut h = Harness::new(json!({"a": 1, "b": "two"}));

        h.run(&Executable::ExitReport {
            expr: Some("a + 1".into()),
            namelist: vec![],
        })
        .unwrap();
        assert_eq!(h.completion, Some(json!(2)));

        h.run(&Executable::ExitReport {
            expr: None,
            namelist: vec!["a".into(), "b".into()],
        })
        .unwrap();
        assert_eq!(h.completion, Some(json!({"a": 1, "b": "two"})));

        h.run(&Executable::ExitReport {
            expr: Some("'done'".into()),
            namelist: vec!["a".into()],
        })
        .unwrap();
        assert_eq!(h.completion, Some(json!({"a": 1, "expr": "done"})));

        h.run(&Executable::ExitReport {
            expr: None,
            namelist: vec![],
        })
        .unwrap();
        assert_eq!(h.completion, Some(Value::Null));
    }

    #[test]
    fn test_exit_report_undefined_name() {
        let mut h = Harness::new(json!({}));
        let result = h.run(&Executable::ExitReport {
            expr: None,
            namelist: vec!["ghost".into()],
        });
        assert!(matches!(result, Err(ActionError::Failed { .. })));
        assert_eq!(h.completion, None);
    }

    #[test]
    fn test_block_stops_at_first_failure() {
        let mut h = Harness::new(json!({"x": 0}));
        let block = vec![
            Executable::Assign {
                location: "x".into(),
                expr: "1".into(),
            },
            Executable::Assign {
                location: "x".into(),
                expr: "missing".into(),
            },
            Executable::Assign {
                location: "x".into(),
                expr: "3".into(),
            },
        ];

        let mut ctx = ActionContext {
            data: &mut h.data,
            evaluator: &h.evaluator,
            internal: &mut h.internal,
            derived: &mut h.derived,
            reports: &mut h.reports,
            span: &h.span,
            state: None,
            completion: &mut h.completion,
        };
        assert!(run_block(&block, &mut ctx).is_err());
        assert_eq!(h.data.get("x"), Some(&json!(1)));
    }

    #[test]
    fn test_context_report() {
        let mut h = Harness::new(json!({}));
        let mut ctx = ActionContext {
            data: &mut h.data,
            evaluator: &h.evaluator,
            internal: &mut h.internal,
            derived: &mut h.derived,
            reports: &mut h.reports,
            span: &h.span,
            state: Some("billing"),
            completion: &mut h.completion,
        };
        ctx.report(ReportKind::Action, "card declined");

        let reports = h.reports.drain();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].state.as_deref(), Some("billing"));
        assert_eq!(reports[0].kind, ReportKind::Action);
    }

    #[test]
    fn test_names() {
        assert_eq!(Executable::Raise { event: "x".into() }.name(), "raise");
        let custom = Executable::Custom {
            namespace: "urn:ns".into(),
            local_name: "hello".into(),
            action: Box::new(Executable::Raise { event: "x".into() }),
        };
        assert_eq!(custom.name(), "urn:ns:hello");
        assert!(format!("{:?}", custom).contains("hello"));
    }
}
