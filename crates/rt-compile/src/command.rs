//! Command declarations.
//!
//! A [`Command`] pairs an action with the driver that executes it, plus
//! everything the client wants observed while the command runs:
//! - observers: a value and a listener called when it changes (booleans: when
//!   they become true)
//! - assignments: a value persisted into an inter-net channel
//! - event handlers: side effects run when a condition becomes true
//! - results: named boolean conditions reported back to the client
//!
//! Declarations are fixed once the command is compiled.

use std::fmt;
use std::sync::Arc;

use rt_core::Value;
use rt_expr::Expr;
use rt_mapping::{Action, ActuatorDriver};

/// Where a listener or handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Inline on the engine callback thread. Must not block.
    #[default]
    Sync,
    /// On a worker thread owned by the command handle.
    Async,
}

/// Called with the observed value.
pub type ValueListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Side effect of an event handler. An `Err` is recorded on the handle.
pub type EventCallback = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

#[derive(Clone)]
pub struct Observer {
    pub value: Expr,
    pub delivery: Delivery,
    pub listener: ValueListener,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub value: Expr,
    /// Readable hint used to derive the channel key.
    pub hint: String,
}

#[derive(Clone)]
pub struct EventHandler {
    pub condition: Expr,
    pub delivery: Delivery,
    pub callback: EventCallback,
}

/// A named result: the OR of its conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultDecl {
    pub name: String,
    pub conditions: Vec<Expr>,
    /// Raised as a command exception when the result becomes final.
    pub exception: Option<String>,
    /// Ends the net when active.
    pub terminating: bool,
}

/// Name of the built-in result that is active when the action and the
/// driver have both completed.
pub const COMPLETED: &str = "completed";
/// Name of the built-in result that is active once cancel was requested.
pub const CANCELLED: &str = "cancelled";

/// A client unit of work, compiled to exactly one net.
#[derive(Clone)]
pub struct Command {
    label: String,
    action: Arc<dyn Action>,
    driver: Arc<dyn ActuatorDriver>,
    observers: Vec<Observer>,
    assignments: Vec<Assignment>,
    handlers: Vec<EventHandler>,
    results: Vec<ResultDecl>,
}

impl Command {
    pub fn new(action: Arc<dyn Action>, driver: Arc<dyn ActuatorDriver>) -> Self {
        let label = format!("{}@{}", action.variant().name, driver.name());
        Self {
            label,
            action,
            driver,
            observers: Vec::new(),
            assignments: Vec::new(),
            handlers: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Call `listener` when `value` changes (booleans: on rising edge).
    pub fn observe(
        mut self,
        value: Expr,
        delivery: Delivery,
        listener: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Self {
        self.observers.push(Observer {
            value,
            delivery,
            listener: Arc::new(listener),
        });
        self
    }

    /// Persist `value` into an inter-net channel while the net runs.
    pub fn assign(mut self, value: Expr, hint: impl Into<String>) -> Self {
        self.assignments.push(Assignment {
            value,
            hint: hint.into(),
        });
        self
    }

    /// Run `callback` each time `condition` becomes true.
    pub fn on_event(
        mut self,
        condition: Expr,
        delivery: Delivery,
        callback: impl Fn() -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.handlers.push(EventHandler {
            condition,
            delivery,
            callback: Arc::new(callback),
        });
        self
    }

    /// Add `condition` to the named result. Repeated names are OR-ed.
    pub fn result(mut self, name: &str, condition: Expr) -> Self {
        self.result_mut(name).conditions.push(condition);
        self
    }

    /// Like [`result`](Self::result), but the net ends when it is active.
    pub fn terminating_result(mut self, name: &str, condition: Expr) -> Self {
        let decl = self.result_mut(name);
        decl.conditions.push(condition);
        decl.terminating = true;
        self
    }

    /// A terminating result that raises `message` as a command exception.
    pub fn exception(mut self, name: &str, condition: Expr, message: impl Into<String>) -> Self {
        let decl = self.result_mut(name);
        decl.conditions.push(condition);
        decl.terminating = true;
        decl.exception = Some(message.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn action(&self) -> &dyn Action {
        self.action.as_ref()
    }

    pub fn driver(&self) -> &dyn ActuatorDriver {
        self.driver.as_ref()
    }

    pub fn observers(&self) -> &[Observer] {
        &self.observers
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn handlers(&self) -> &[EventHandler] {
        &self.handlers
    }

    pub fn results(&self) -> &[ResultDecl] {
        &self.results
    }

    fn result_mut(&mut self, name: &str) -> &mut ResultDecl {
        let pos = match self.results.iter().position(|r| r.name == name) {
            Some(pos) => pos,
            None => {
                self.results.push(ResultDecl {
                    name: name.to_string(),
                    conditions: Vec::new(),
                    exception: None,
                    terminating: false,
                });
                self.results.len() - 1
            }
        };
        &mut self.results[pos]
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("label", &self.label)
            .field("observers", &self.observers.len())
            .field("assignments", &self.assignments)
            .field("handlers", &self.handlers.len())
            .field("results", &self.results)
            .finish()
    }
}
