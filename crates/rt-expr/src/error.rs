//! Error types for expression construction.

use rt_core::{DataType, ExprId, RuntimeId};
use thiserror::Error;

/// Result type for expression operations.
pub type ExprResult<T> = Result<T, ExprError>;

/// Errors raised while building expression nodes.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    /// An operand was built by a different runtime.
    #[error("Expression {expr} belongs to runtime {found}, expected {expected}")]
    ForeignRuntime {
        expr: ExprId,
        expected: RuntimeId,
        found: RuntimeId,
    },

    /// Wrong number of operands for a node kind.
    #[error("{kind} takes {expected} operand(s), got {found}")]
    Arity {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    /// Operand has a type the node kind cannot consume.
    #[error("{kind} operand {index} must be {expected}, found {found}")]
    OperandType {
        kind: &'static str,
        index: usize,
        expected: &'static str,
        found: DataType,
    },

    /// Expression id not present in the arena.
    #[error("Unknown expression {0}")]
    Unknown(ExprId),
}
