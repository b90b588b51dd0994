use thiserror::Error;

use crate::value::DataType;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Type mismatch for {what}: expected {expected}, found {found}")]
    TypeMismatch {
        what: &'static str,
        expected: DataType,
        found: DataType,
    },
}
