//! Expression model for realtime values.
//!
//! Client code describes time-varying control signals (positions, velocities,
//! booleans, exception conditions) as expression trees. This crate provides the
//! node model those trees are built from.
//!
//! # Architecture
//!
//! - Nodes live in an [`ExprArena`] owned by one runtime and are addressed
//!   through [`Expr`] handles
//! - Nodes are immutable and hash-consed: building the same structure twice
//!   yields the same handle
//! - Each node caches its structural hash, its static [`DataType`] and an
//!   optional statically-known ("cheap") value
//! - Nodes may be bound to an owning command scope
//!
//! [`DataType`]: rt_core::DataType

pub mod arena;
pub mod error;
pub mod expr;
pub mod kind;
pub mod sensor;

pub use arena::{ExprArena, ExprNode};
pub use error::{ExprError, ExprResult};
pub use expr::Expr;
pub use kind::{BinaryOp, ExprKind, UnaryOp};
pub use sensor::SensorRef;
