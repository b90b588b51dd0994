//! rt-command: command handles and net synchronization.
//!
//! - [`ControlCore`] is the contract with the execution engine
//! - [`CommandHandle`] maps engine reports to [`CommandStatus`] and turns
//!   start/cancel/abort/sequencing into [`NetSynchronizationRule`]s
//! - [`Session`] compiles commands and loads them into the engine

pub mod engine;
pub mod error;
pub mod handle;
pub mod session;
pub mod status;

mod worker;

pub use engine::{
    ControlCore, NetHandle, NetListener, NetSignal, NetStatus, NetSynchronizationRule, RuleId,
    SyncCondition,
};
pub use error::{CmdResult, CommandError, EngineError};
pub use handle::{CommandHandle, ExceptionListener, ResultListener, StatusListener};
pub use session::Session;
pub use status::{CommandStatus, ResultState};
