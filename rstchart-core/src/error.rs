//! Core error types.

use thiserror::Error;

/// Errors from registering a custom action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("custom action namespace must not be blank")]
    BlankNamespace,

    #[error("custom action local name must not be blank (namespace '{namespace}')")]
    BlankLocalName { namespace: String },

    #[error("implementation registered for {namespace}:{local_name} is not an action type")]
    NotAnAction {
        namespace: String,
        local_name: String,
    },
}

/// Errors that prevent a model from being built.
#[derive(Debug, Error)]
pub enum ModelBuildError {
    #[error("failed to parse chart document: {reason}")]
    Parse { reason: String },

    #[error("failed to read chart document '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state identifier must not be blank")]
    BlankStateId,

    #[error("duplicate state identifier: '{id}'")]
    DuplicateStateId { id: String },

    #[error("transition in state '{state}' targets unknown state '{target}'")]
    UnknownTarget { state: String, target: String },

    #[error("invalid initial state '{initial}' for '{state}'")]
    InvalidInitial { state: String, initial: String },

    #[error("invalid state '{state}': {reason}")]
    InvalidState { state: String, reason: String },

    #[error("transition in state '{state}' has an event pattern matching no event: '{event}'")]
    InvalidEvent { state: String, event: String },

    #[error("state '{state}' includes '{src}', which was never loaded")]
    UnresolvedSource { state: String, src: String },

    #[error("chart document '{path}' includes itself")]
    IncludeCycle { path: String },

    #[error("unresolved custom action {namespace}:{local_name}")]
    UnresolvedAction {
        namespace: String,
        local_name: String,
    },

    #[error("invalid attributes for custom action {namespace}:{local_name}: {reason}")]
    InvalidActionAttributes {
        namespace: String,
        local_name: String,
        reason: String,
    },
}

impl From<serde_json::Error> for ModelBuildError {
    fn from(e: serde_json::Error) -> Self {
        ModelBuildError::Parse {
            reason: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ModelBuildError {
    fn from(e: serde_yaml::Error) -> Self {
        ModelBuildError::Parse {
            reason: e.to_string(),
        }
    }
}

/// Errors from evaluating a guard or data model expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("invalid expression '{expr}': {reason}")]
    Parse { expr: String, reason: String },

    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },

    #[error("type error in '{expr}': {reason}")]
    Type { expr: String, reason: String },
}

/// Errors raised by an action while it executes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("action '{action}' failed: {reason}")]
    Failed { action: String, reason: String },
}

impl ActionError {
    /// Convenience constructor for custom actions.
    pub fn failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        ActionError::Failed {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced to the caller of `start`/`submit`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("executor has not been started")]
    NotStarted,

    #[error("executor has already been started")]
    AlreadyStarted,

    #[error("executor is halted after an engine invariant violation")]
    Halted,

    #[error("macrostep aborted: {0}")]
    Expression(ExpressionError),

    #[error("macrostep aborted: {0}")]
    Action(ActionError),

    #[error("microstep limit of {limit} exceeded; the chart does not settle")]
    MicrostepLimit { limit: usize },
}

impl ExecutionError {
    /// Returns true if the executor can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecutionError::Halted | ExecutionError::MicrostepLimit { .. }
        )
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {reason}")]
    Parse { path: String, reason: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Any error the crate can produce.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    ModelBuild(#[from] ModelBuildError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Returns a stable error code suitable for host-facing diagnostics.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Registration(_) => "REGISTRATION_ERROR",
            Error::ModelBuild(ModelBuildError::Parse { .. }) => "BAD_DOCUMENT",
            Error::ModelBuild(ModelBuildError::Io { .. }) => "IO_ERROR",
            Error::ModelBuild(_) => "MODEL_BUILD_ERROR",
            Error::Execution(ExecutionError::Expression(_)) => "EXPRESSION_ERROR",
            Error::Execution(ExecutionError::Action(_)) => "ACTION_ERROR",
            Error::Execution(ExecutionError::NotStarted)
            | Error::Execution(ExecutionError::AlreadyStarted) => "BAD_REQUEST",
            Error::Execution(_) => "ENGINE_INVARIANT",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err: Error = RegistrationError::BlankNamespace.into();
        assert_eq!(err.error_code(), "REGISTRATION_ERROR");

        let err: Error = ExecutionError::MicrostepLimit { limit: 10 }.into();
        assert_eq!(err.error_code(), "ENGINE_INVARIANT");

        let err: Error = ModelBuildError::DuplicateStateId { id: "a".into() }.into();
        assert_eq!(err.error_code(), "MODEL_BUILD_ERROR");
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ExecutionError::MicrostepLimit { limit: 1 }.is_fatal());
        assert!(ExecutionError::Halted.is_fatal());
        assert!(!ExecutionError::NotStarted.is_fatal());
        assert!(!ExecutionError::Action(ActionError::failed("x", "y")).is_fatal());
    }
}
