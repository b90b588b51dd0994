//! Output of compiling one command.

use rt_core::{DataType, ScopeId};
use rt_net::NetDescription;

use crate::command::{Delivery, EventCallback, ValueListener};

/// Monitored channel of a named result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultChannel {
    pub name: String,
    pub key: String,
    pub exception: Option<String>,
    pub terminating: bool,
}

/// Monitored channel feeding an observer.
#[derive(Clone)]
pub struct ObserverChannel {
    pub key: String,
    pub ty: DataType,
    pub delivery: Delivery,
    pub listener: ValueListener,
}

/// Monitored channel triggering an event handler.
#[derive(Clone)]
pub struct HandlerChannel {
    pub key: String,
    pub delivery: Delivery,
    pub callback: EventCallback,
}

/// Inter-net channel written by an assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentChannel {
    pub hint: String,
    pub key: String,
    pub ty: DataType,
}

/// A compiled, frozen net ready to load.
#[derive(Clone)]
pub struct CompiledNet {
    pub label: String,
    pub scope: ScopeId,
    pub description: NetDescription,
    /// SHA-256 of the description, for logs.
    pub digest: String,
    pub results: Vec<ResultChannel>,
    /// Key of the monitored termination condition.
    pub terminated: String,
    pub observers: Vec<ObserverChannel>,
    pub handlers: Vec<HandlerChannel>,
    pub assignments: Vec<AssignmentChannel>,
}

impl CompiledNet {
    pub fn result(&self, name: &str) -> Option<&ResultChannel> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Channel key of an assignment by its hint.
    pub fn assignment_key(&self, hint: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.hint == hint)
            .map(|a| a.key.as_str())
    }
}

impl std::fmt::Debug for CompiledNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledNet")
            .field("label", &self.label)
            .field("digest", &self.digest)
            .field("primitives", &self.description.primitives.len())
            .field("results", &self.results)
            .field("terminated", &self.terminated)
            .field("observers", &self.observers.len())
            .field("handlers", &self.handlers.len())
            .field("assignments", &self.assignments)
            .finish()
    }
}
