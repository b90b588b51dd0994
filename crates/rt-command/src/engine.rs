//! Contract with the execution engine (Control Core).
//!
//! The engine loads net descriptions, runs them cycle by cycle and reports
//! back through a [`NetListener`]:
//! - net status transitions ([`NetStatus`])
//! - activation changes of monitored channels, with the monitored value
//!
//! Starting, cancelling and stopping nets is never done directly. Clients
//! submit [`NetSynchronizationRule`]s and the engine fires them atomically
//! when their condition holds.

use std::fmt;
use std::sync::Arc;

use rt_core::Value;
use rt_net::NetDescription;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Engine-side handle of a loaded net.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetHandle(Uuid);

impl NetHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NetHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NetHandle({})", self.0.simple())
    }
}

impl fmt::Display for NetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// A monitored boolean channel of a loaded net (a net result).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetSignal {
    pub net: NetHandle,
    pub key: String,
}

impl NetSignal {
    pub fn new(net: NetHandle, key: impl Into<String>) -> Self {
        Self {
            net,
            key: key.into(),
        }
    }
}

/// Identifier of a submitted synchronization rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub u64);

/// Status of a net as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetStatus {
    Loading,
    Ready,
    Scheduled,
    Running,
    Cancelling,
    Terminated,
    Unloaded,
    Error,
    Invalid,
    Rejected,
}

/// When a rule fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncCondition {
    /// At the next opportunity.
    Always,
    /// When the signal is active.
    Result(NetSignal),
    /// When any of the conditions holds.
    Any(Vec<SyncCondition>),
    /// When all of the conditions hold in the same cycle.
    All(Vec<SyncCondition>),
}

impl SyncCondition {
    /// Every signal the condition refers to.
    pub fn signals(&self) -> Vec<&NetSignal> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(cond) = stack.pop() {
            match cond {
                SyncCondition::Always => {}
                SyncCondition::Result(signal) => out.push(signal),
                SyncCondition::Any(conds) | SyncCondition::All(conds) => {
                    stack.extend(conds.iter().rev());
                }
            }
        }
        out
    }

    /// Evaluate against a predicate telling whether a signal is active.
    pub fn holds(&self, active: &dyn Fn(&NetSignal) -> bool) -> bool {
        match self {
            SyncCondition::Always => true,
            SyncCondition::Result(signal) => active(signal),
            SyncCondition::Any(conds) => conds.iter().any(|c| c.holds(active)),
            SyncCondition::All(conds) => conds.iter().all(|c| c.holds(active)),
        }
    }
}

/// "When `condition` holds, stop, cancel and start these nets", fired as one
/// atomic step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetSynchronizationRule {
    pub condition: SyncCondition,
    pub start: Vec<NetHandle>,
    pub cancel: Vec<NetHandle>,
    pub stop: Vec<NetHandle>,
}

impl NetSynchronizationRule {
    pub fn new(condition: SyncCondition) -> Self {
        Self {
            condition,
            start: Vec::new(),
            cancel: Vec::new(),
            stop: Vec::new(),
        }
    }

    pub fn starting(mut self, net: NetHandle) -> Self {
        self.start.push(net);
        self
    }

    pub fn cancelling(mut self, net: NetHandle) -> Self {
        self.cancel.push(net);
        self
    }

    pub fn stopping(mut self, net: NetHandle) -> Self {
        self.stop.push(net);
        self
    }

    /// Every net the rule acts on or observes.
    pub fn nets(&self) -> Vec<NetHandle> {
        let mut nets: Vec<NetHandle> = self
            .start
            .iter()
            .chain(&self.cancel)
            .chain(&self.stop)
            .copied()
            .chain(self.condition.signals().into_iter().map(|s| s.net))
            .collect();
        nets.sort();
        nets.dedup();
        nets
    }
}

/// Callbacks from the engine for one loaded net.
///
/// Called on engine-owned threads. Implementations must not block.
pub trait NetListener: Send + Sync {
    fn on_status(&self, net: NetHandle, status: NetStatus);

    /// A monitored channel changed activation or value.
    fn on_channel(&self, net: NetHandle, key: &str, active: bool, value: Option<&Value>);
}

/// The execution engine.
pub trait ControlCore: Send + Sync {
    /// Load a net. The listener receives every later report for it.
    fn load(
        &self,
        description: &NetDescription,
        listener: Arc<dyn NetListener>,
    ) -> Result<NetHandle, EngineError>;

    fn submit_rule(&self, rule: NetSynchronizationRule) -> Result<RuleId, EngineError>;

    /// Withdraw a rule that has not fired yet. Returns `false` if it already
    /// fired.
    fn cancel_rule(&self, rule: RuleId) -> Result<bool, EngineError>;

    /// Release a net. Later rules naming it are rejected.
    fn unload(&self, net: NetHandle) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_conditions_evaluate() {
        let net = NetHandle::new();
        let a = NetSignal::new(net, "a");
        let b = NetSignal::new(net, "b");
        let cond = SyncCondition::Any(vec![
            SyncCondition::Result(a.clone()),
            SyncCondition::All(vec![
                SyncCondition::Result(b.clone()),
                SyncCondition::Always,
            ]),
        ]);
        assert!(cond.holds(&|s| s.key == "b"));
        assert!(!cond.holds(&|_| false));
        assert_eq!(cond.signals(), vec![&a, &b]);
    }

    #[test]
    fn rule_lists_each_net_once() {
        let pred = NetHandle::new();
        let succ = NetHandle::new();
        let rule = NetSynchronizationRule::new(SyncCondition::Result(NetSignal::new(
            pred,
            "terminated#1",
        )))
        .starting(succ)
        .stopping(pred);
        let nets = rule.nets();
        assert_eq!(nets.len(), 2);
        assert!(nets.contains(&pred) && nets.contains(&succ));
    }
}
