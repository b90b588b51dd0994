//! Compilation options.

use serde::{Deserialize, Serialize};

/// Options for compiling commands into nets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Upper bound on resolution steps per command.
    pub max_steps: usize,
    /// Replace statically known values with constants before building
    /// fragments.
    pub fold_cheap_values: bool,
    /// Log the JSON net description at `trace` level after freezing.
    pub trace_descriptions: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            fold_cheap_values: true,
            trace_descriptions: false,
        }
    }
}
