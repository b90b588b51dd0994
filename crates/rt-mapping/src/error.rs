//! Error types for mapping and compilation.

use rt_core::{DataType, ExprId, ScopeId};
use rt_expr::ExprError;
use rt_net::NetError;
use thiserror::Error;

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// Errors raised while mapping actions, drivers and values to net fragments.
///
/// All of these surface during compilation, before a net is loaded.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MappingError {
    #[error("No mapper for action variant '{variant}'")]
    UnmappedAction { variant: &'static str },

    #[error("No mapper for driver '{driver}' with action result '{result}'")]
    UnmappedDriver {
        driver: &'static str,
        result: &'static str,
    },

    #[error("No fragment factory for {variant} value {expr}")]
    UnmappedValue { variant: &'static str, expr: String },

    #[error("Value {expr} depends on itself")]
    Cycle { expr: String },

    #[error("Alias of {expr} refers back to the original value")]
    SelfReferentialAlias { expr: String },

    #[error("Expression {expr} belongs to command scope {found}, not {expected}")]
    ForeignScope {
        expr: ExprId,
        expected: ScopeId,
        found: ScopeId,
    },

    #[error("Fragment for {expr} produces {found}, expected {expected}")]
    FragmentType {
        expr: String,
        expected: DataType,
        found: DataType,
    },

    #[error("Value resolution exceeded {limit} steps")]
    StepLimit { limit: usize },

    #[error("Mapper rejected input: {reason}")]
    Rejected { reason: String },

    #[error(transparent)]
    Expr(#[from] ExprError),

    #[error(transparent)]
    Net(#[from] NetError),
}
