//! rt-sim: deterministic in-process control core.
//!
//! Provides:
//! - [`SimCore`], a [`rt_command::ControlCore`] that evaluates core-catalogue
//!   nets once per fixed-`dt` cycle
//! - [`DevicePrimitive`] for primitives supplied by actuator drivers
//! - [`SimRunner`] to drive a core from a background thread

pub mod core;
pub mod device;
pub mod error;

mod program;

pub use crate::core::{SimCore, SimOptions, SimRunner};
pub use device::{DevicePrimitive, FailAt, Recorder};
pub use error::{SimError, SimResult};
