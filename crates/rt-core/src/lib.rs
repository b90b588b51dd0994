//! rt-core: stable foundation for rtnet.
//!
//! Contains:
//! - ids (compact ids for expression, fragment and port arenas)
//! - value (data types and per-cycle values carried on ports)
//! - names (per-session name and channel-key allocation)
//! - error (shared error types)

pub mod error;
pub mod ids;
pub mod names;
pub mod value;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult};
pub use ids::*;
pub use names::NameAllocator;
pub use value::{DataType, Value};
