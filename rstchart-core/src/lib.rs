//! # rstchart-core
//!
//! Statechart engine for rstchart.
//!
//! This crate provides:
//! - Chart document parsing (JSON/YAML) and validation into an arena model
//! - A registry for host-supplied custom actions
//! - The step engine: transition selection, conflict resolution, exit and
//!   entry ordering, micro-stepping and finality
//! - A small default expression evaluator
//!
//! ```
//! use rstchart_core::{ActionRegistry, Executor, Model};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let doc = json!({
//!     "states": [
//!         {"id": "A", "transitions": [{"event": "go", "target": "B"}]},
//!         {"id": "B", "final": true}
//!     ]
//! });
//! let model = Model::from_json(&doc, &ActionRegistry::new()).unwrap();
//! let mut executor = Executor::new(Arc::new(model));
//!
//! assert_eq!(executor.start().unwrap().states, vec!["A"]);
//! let status = executor.submit("go").unwrap();
//! assert!(status.is_final);
//! ```

pub mod action;
pub mod config;
pub mod datamodel;
pub mod document;
pub mod error;
pub mod event;
pub mod executor;
pub mod expr;
pub mod model;
pub mod registry;
pub mod report;
pub mod status;

pub use action::{Action, ActionContext, Executable};
pub use config::{ErrorPolicy, ExecutorConfig};
pub use datamodel::DataModel;
pub use document::{ActionDef, ChartDocument, ChildDef, ExitDef, StateDef, TransitionDef, TransitionKind};
pub use error::{
    ActionError, ConfigError, Error, ExecutionError, ExpressionError, ModelBuildError,
    RegistrationError,
};
pub use event::{Event, EventPattern};
pub use executor::{Executor, SharedExecutor};
pub use expr::{DataEvaluator, Evaluator};
pub use model::{Model, StateIdx, StateKind, StateNode, Transition, TransitionRef};
pub use registry::{ActionRegistry, ActionType, CustomActionRecord};
pub use report::{ErrorReport, ErrorReporter, ReportKind};
pub use status::{Phase, Status};
