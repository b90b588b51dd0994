//! rt-compile: turns commands into frozen nets.
//!
//! - [`Command`] collects an action, its driver and the client's observers,
//!   assignments, event handlers and results
//! - [`compile`] maps the action and driver, resolves every value to a
//!   shared fragment and wires the monitor channels
//! - [`register_core_factories`] installs the alias and fragment factories
//!   for the built-in expression kinds

pub mod builtin;
pub mod command;
pub mod compiled;
pub mod compiler;
pub mod options;

pub use builtin::register_core_factories;
pub use command::{
    Assignment, CANCELLED, COMPLETED, Command, Delivery, EventCallback, EventHandler, Observer,
    ResultDecl, ValueListener,
};
pub use compiled::{
    AssignmentChannel, CompiledNet, HandlerChannel, ObserverChannel, ResultChannel,
};
pub use compiler::{CommandFragment, CompileContext, compile};
pub use options::CompileOptions;
