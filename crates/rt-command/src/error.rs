//! Error types for command execution.

use rt_mapping::MappingError;
use thiserror::Error;

use crate::engine::{NetHandle, RuleId};

/// Errors reported by the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Engine rejected request: {reason}")]
    Rejected { reason: String },

    #[error("Unknown net {0}")]
    UnknownNet(NetHandle),

    #[error("Unknown rule {0:?}")]
    UnknownRule(RuleId),

    #[error("Net {0} is unloaded")]
    Unloaded(NetHandle),

    #[error("Invalid net: {reason}")]
    InvalidNet { reason: String },
}

/// Errors raised by command handles and sessions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("Command '{command}' ended in engine error state")]
    NetError { command: String },

    #[error("Command '{command}' is unloaded")]
    Unloaded { command: String },

    #[error("Command '{command}' has no result named '{result}'")]
    UnknownResult { command: String, result: String },

    #[error("Event handler failed: {message}")]
    HandlerFailed { message: String },

    #[error("Worker thread of command '{command}' panicked")]
    WorkerPanicked { command: String },

    #[error("Command '{command}' raised '{result}': {message}")]
    Exception {
        command: String,
        result: String,
        message: String,
    },

    #[error("{} errors occurred: {}", .0.len(), join(.0))]
    Aggregate(Vec<CommandError>),
}

pub type CmdResult<T> = Result<T, CommandError>;

impl CommandError {
    /// Combine errors into one, unwrapping nested aggregates.
    ///
    /// A single error is returned as is.
    pub fn aggregate(errors: impl IntoIterator<Item = CommandError>) -> CommandError {
        let mut flat = Vec::new();
        let mut stack: Vec<CommandError> = errors.into_iter().collect();
        stack.reverse();
        while let Some(err) = stack.pop() {
            match err {
                CommandError::Aggregate(inner) => stack.extend(inner.into_iter().rev()),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            CommandError::Aggregate(flat)
        }
    }

    /// The individual errors, in order.
    pub fn errors(&self) -> &[CommandError] {
        match self {
            CommandError::Aggregate(errors) => errors,
            other => std::slice::from_ref(other),
        }
    }
}

fn join(errors: &[CommandError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
