//! Device primitives: type ids outside the core catalogue.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use rt_core::Value;

/// Behavior of a driver-provided primitive inside the simulated core.
pub trait DevicePrimitive: Send + Sync {
    /// Outputs for one cycle, in declared order. `inputs` follow the declared
    /// input order; `None` is a null input.
    fn evaluate(
        &self,
        primitive: &str,
        params: &BTreeMap<String, String>,
        time: f64,
        inputs: &[Option<Value>],
    ) -> Result<Vec<Option<Value>>, String>;
}

/// Sink that remembers the inputs each primitive last received.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<HashMap<String, Vec<Option<Value>>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last inputs of a primitive, by name.
    pub fn last(&self, primitive: &str) -> Option<Vec<Option<Value>>> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(primitive)
            .cloned()
    }

    /// Last inputs of every recorded primitive.
    pub fn all(&self) -> HashMap<String, Vec<Option<Value>>> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DevicePrimitive for Recorder {
    fn evaluate(
        &self,
        primitive: &str,
        _params: &BTreeMap<String, String>,
        _time: f64,
        inputs: &[Option<Value>],
    ) -> Result<Vec<Option<Value>>, String> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(primitive.to_string(), inputs.to_vec());
        Ok(Vec::new())
    }
}

/// Device that fails once net time reaches `at`.
#[derive(Debug, Clone, Copy)]
pub struct FailAt {
    pub at: f64,
}

impl DevicePrimitive for FailAt {
    fn evaluate(
        &self,
        _primitive: &str,
        _params: &BTreeMap<String, String>,
        time: f64,
        _inputs: &[Option<Value>],
    ) -> Result<Vec<Option<Value>>, String> {
        if time >= self.at {
            Err(format!("device fault at t={time}"))
        } else {
            Ok(Vec::new())
        }
    }
}
