//! Error types for the simulated core.

use rt_command::EngineError;
use rt_core::CoreError;
use thiserror::Error;

/// Errors raised while loading or running simulated nets.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Unknown primitive type '{type_id}'")]
    UnknownPrimitive { type_id: String },

    #[error("Duplicate primitive name '{name}'")]
    DuplicatePrimitive { name: String },

    #[error("Primitive '{primitive}' has no port '{port}'")]
    UnknownPort { primitive: String, port: String },

    #[error("Input {port} of '{primitive}' is connected twice")]
    DoubleConnection { primitive: String, port: String },

    #[error("Primitive '{primitive}' is missing parameter '{key}'")]
    MissingParam { primitive: String, key: String },

    #[error("Combinational cycle through '{primitive}'")]
    Cycle { primitive: String },

    #[error("Device primitive '{primitive}' failed: {message}")]
    Device { primitive: String, message: String },

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type SimResult<T> = Result<T, SimError>;

impl From<SimError> for EngineError {
    fn from(e: SimError) -> Self {
        EngineError::InvalidNet {
            reason: e.to_string(),
        }
    }
}
