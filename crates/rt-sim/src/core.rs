//! Simulated control core.
//!
//! Every cycle runs four phases under one engine lock:
//! - nets scheduled in the previous cycle start running with net time 0
//! - pending synchronization rules whose condition holds fire once; all their
//!   stops and cancels apply before any start
//! - running nets evaluate in topological order, reading the inter-net
//!   channels as they were at the start of the cycle
//! - channel writes are applied
//!
//! Reports are collected during the cycle and handed to listeners after the
//! lock is released, so listeners may call back into the core.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rt_command::{
    ControlCore, EngineError, NetHandle, NetListener, NetStatus, NetSynchronizationRule, RuleId,
};
use rt_core::Value;
use rt_net::NetDescription;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::device::DevicePrimitive;
use crate::error::{SimError, SimResult};
use crate::program::{CycleInput, Program};

/// Options for the simulated core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimOptions {
    /// Net time advanced per cycle (seconds)
    pub dt: f64,
    /// Cycle limit for [`SimCore::run_until_idle`]
    pub max_cycles: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            dt: 1e-3,
            max_cycles: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Scheduled,
    Running,
    Terminated,
}

impl Phase {
    fn status(self) -> NetStatus {
        match self {
            Phase::Ready => NetStatus::Ready,
            Phase::Scheduled => NetStatus::Scheduled,
            Phase::Running => NetStatus::Running,
            Phase::Terminated => NetStatus::Terminated,
        }
    }
}

struct SimNet {
    program: Program,
    listener: Arc<dyn NetListener>,
    phase: Phase,
    /// Cycles evaluated since the net started.
    cycles: u64,
    cancel: bool,
    failed: bool,
    /// Last reported activation per monitored channel.
    channels: HashMap<String, bool>,
}

enum Event {
    Status(NetStatus),
    Channel {
        key: String,
        active: bool,
        value: Option<Value>,
    },
}

struct Report {
    listener: Arc<dyn NetListener>,
    net: NetHandle,
    event: Event,
}

impl Report {
    fn dispatch(self) {
        match self.event {
            Event::Status(status) => self.listener.on_status(self.net, status),
            Event::Channel { key, active, value } => {
                self.listener
                    .on_channel(self.net, &key, active, value.as_ref())
            }
        }
    }
}

#[derive(Default)]
struct Engine {
    nets: BTreeMap<NetHandle, SimNet>,
    unloaded: HashSet<NetHandle>,
    rules: BTreeMap<RuleId, NetSynchronizationRule>,
    next_rule: u64,
    netcomm: HashMap<String, Value>,
    cycle: u64,
}

impl Engine {
    fn channel_active(&self, net: NetHandle, key: &str) -> bool {
        self.nets
            .get(&net)
            .and_then(|n| n.channels.get(key))
            .copied()
            .unwrap_or(false)
    }

    fn rule_holds(&self, rule: &NetSynchronizationRule) -> bool {
        rule.condition
            .holds(&|signal| self.channel_active(signal.net, &signal.key))
    }

    fn report(&self, reports: &mut Vec<Report>, net: NetHandle, event: Event) {
        if let Some(sim) = self.nets.get(&net) {
            reports.push(Report {
                listener: Arc::clone(&sim.listener),
                net,
                event,
            });
        }
    }

    /// Set a net's phase, reporting the change.
    fn transition(&mut self, reports: &mut Vec<Report>, net: NetHandle, phase: Phase) {
        let Some(sim) = self.nets.get_mut(&net) else {
            return;
        };
        sim.phase = phase;
        if phase == Phase::Running {
            sim.cycles = 0;
        }
        self.report(reports, net, Event::Status(phase.status()));
    }

    fn fire_rules(&mut self, reports: &mut Vec<Report>) {
        let ready: Vec<RuleId> = self
            .rules
            .iter()
            .filter(|(_, rule)| self.rule_holds(rule))
            .map(|(id, _)| *id)
            .collect();
        for id in &ready {
            debug!(rule = ?id, cycle = self.cycle, "rule fired");
        }
        let fired: Vec<NetSynchronizationRule> = ready
            .iter()
            .filter_map(|id| self.rules.remove(id))
            .collect();

        for net in fired.iter().flat_map(|r| &r.stop) {
            if self.phase_of(*net).is_some_and(|p| p != Phase::Terminated) {
                self.transition(reports, *net, Phase::Terminated);
            }
        }
        for net in fired.iter().flat_map(|r| &r.cancel) {
            let Some(sim) = self.nets.get_mut(net) else {
                continue;
            };
            if sim.cancel || sim.phase == Phase::Terminated {
                continue;
            }
            sim.cancel = true;
            if sim.phase == Phase::Running {
                self.report(reports, *net, Event::Status(NetStatus::Cancelling));
            }
        }
        for net in fired.iter().flat_map(|r| &r.start) {
            if self.phase_of(*net) == Some(Phase::Ready) {
                self.transition(reports, *net, Phase::Scheduled);
            }
        }
    }

    fn phase_of(&self, net: NetHandle) -> Option<Phase> {
        self.nets.get(&net).map(|n| n.phase)
    }

    /// Run one cycle. Returns whether the engine still has work.
    fn step(&mut self, dt: f64, reports: &mut Vec<Report>) -> bool {
        let scheduled: Vec<NetHandle> = self
            .nets
            .iter()
            .filter(|(_, n)| n.phase == Phase::Scheduled)
            .map(|(h, _)| *h)
            .collect();
        for net in scheduled {
            self.transition(reports, net, Phase::Running);
        }

        self.fire_rules(reports);

        let mut writes = Vec::new();
        let Engine { nets, netcomm, .. } = self;
        for (handle, sim) in nets.iter_mut() {
            if sim.phase != Phase::Running {
                continue;
            }
            let input = CycleInput {
                time: sim.cycles as f64 * dt,
                cancel: sim.cancel,
                netcomm: &*netcomm,
            };
            let report = |event| Report {
                listener: Arc::clone(&sim.listener),
                net: *handle,
                event,
            };
            match sim.program.cycle(&input) {
                Ok(out) => {
                    let mut pending = Vec::with_capacity(out.reports.len() + 1);
                    for (key, active, value) in out.reports {
                        pending.push(report(Event::Channel {
                            key: key.clone(),
                            active,
                            value,
                        }));
                        sim.channels.insert(key, active);
                    }
                    writes.extend(out.writes);
                    if out.terminate {
                        pending.push(report(Event::Status(NetStatus::Terminated)));
                    }
                    reports.extend(pending);
                    sim.cycles += 1;
                    if out.terminate {
                        info!(net = %handle, cycles = sim.cycles, "net terminated");
                        sim.phase = Phase::Terminated;
                    }
                }
                Err(e) => {
                    warn!(net = %handle, error = %e, "net failed");
                    reports.push(report(Event::Status(NetStatus::Error)));
                    sim.phase = Phase::Terminated;
                    sim.failed = true;
                }
            }
        }
        self.netcomm.extend(writes);
        self.cycle += 1;

        self.nets
            .values()
            .any(|n| matches!(n.phase, Phase::Scheduled | Phase::Running))
            || self.rules.values().any(|r| self.rule_holds(r))
    }
}

/// In-process [`ControlCore`] that evaluates nets cycle by cycle.
///
/// Drive it from a test with [`step`](Self::step) and
/// [`run_until_idle`](Self::run_until_idle), or on a background thread with
/// [`spawn`](Self::spawn).
pub struct SimCore {
    options: SimOptions,
    devices: HashMap<String, Arc<dyn DevicePrimitive>>,
    engine: Mutex<Engine>,
}

impl SimCore {
    pub fn new(options: SimOptions) -> SimResult<Self> {
        if options.dt <= 0.0 {
            return Err(SimError::InvalidArg {
                what: "dt must be positive",
            });
        }
        if options.max_cycles == 0 {
            return Err(SimError::InvalidArg {
                what: "max_cycles must be positive",
            });
        }
        Ok(Self {
            options,
            devices: HashMap::new(),
            engine: Mutex::new(Engine::default()),
        })
    }

    /// Evaluate primitives of `type_id` with `device`.
    pub fn with_device(
        mut self,
        type_id: impl Into<String>,
        device: impl DevicePrimitive + 'static,
    ) -> Self {
        self.devices.insert(type_id.into(), Arc::new(device));
        self
    }

    pub fn options(&self) -> &SimOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one cycle. Returns whether a net is scheduled or running, or a
    /// pending rule is ready to fire.
    pub fn step(&self) -> bool {
        let mut reports = Vec::new();
        let busy = self.lock().step(self.options.dt, &mut reports);
        for report in reports {
            report.dispatch();
        }
        busy
    }

    /// Run exactly `cycles` cycles.
    pub fn run_cycles(&self, cycles: usize) {
        for _ in 0..cycles {
            self.step();
        }
    }

    /// Run until there is no more work, at most `max_cycles` cycles.
    /// Returns the number of cycles run.
    pub fn run_until_idle(&self) -> usize {
        let mut cycles = 0;
        while cycles < self.options.max_cycles {
            cycles += 1;
            if !self.step() {
                return cycles;
            }
        }
        warn!(cycles, "cycle limit reached while busy");
        cycles
    }

    /// Run cycles on a background thread until the runner is stopped.
    pub fn spawn(self: &Arc<Self>) -> io::Result<SimRunner> {
        let stop = Arc::new(AtomicBool::new(false));
        let core = Arc::clone(self);
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("sim-core".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    if !core.step() {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })?;
        Ok(SimRunner {
            stop,
            thread: Some(thread),
        })
    }

    /// Current value of an inter-net channel.
    pub fn netcomm(&self, key: &str) -> Option<Value> {
        self.lock().netcomm.get(key).cloned()
    }

    /// Cycles run so far.
    pub fn cycle(&self) -> u64 {
        self.lock().cycle
    }

    /// Engine-side status of a loaded net.
    pub fn status(&self, net: NetHandle) -> Option<NetStatus> {
        let engine = self.lock();
        if engine.unloaded.contains(&net) {
            return Some(NetStatus::Unloaded);
        }
        engine.nets.get(&net).map(|n| {
            if n.failed {
                NetStatus::Error
            } else if n.cancel && n.phase == Phase::Running {
                NetStatus::Cancelling
            } else {
                n.phase.status()
            }
        })
    }

    /// Number of loaded nets.
    pub fn len(&self) -> usize {
        self.lock().nets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ControlCore for SimCore {
    fn load(
        &self,
        description: &NetDescription,
        listener: Arc<dyn NetListener>,
    ) -> Result<NetHandle, EngineError> {
        let program = Program::load(description, &self.devices).map_err(|e| {
            warn!(error = %e, "rejected net");
            EngineError::from(e)
        })?;
        let net = NetHandle::new();
        info!(net = %net, primitives = program.len(), "loaded net");
        self.lock().nets.insert(
            net,
            SimNet {
                program,
                listener: Arc::clone(&listener),
                phase: Phase::Ready,
                cycles: 0,
                cancel: false,
                failed: false,
                channels: HashMap::new(),
            },
        );
        listener.on_status(net, NetStatus::Ready);
        Ok(net)
    }

    fn submit_rule(&self, rule: NetSynchronizationRule) -> Result<RuleId, EngineError> {
        let mut engine = self.lock();
        for net in rule.nets() {
            if engine.unloaded.contains(&net) {
                return Err(EngineError::Unloaded(net));
            }
            if !engine.nets.contains_key(&net) {
                return Err(EngineError::UnknownNet(net));
            }
        }
        let id = RuleId(engine.next_rule);
        engine.next_rule += 1;
        debug!(rule = ?id, nets = rule.nets().len(), "accepted rule");
        engine.rules.insert(id, rule);
        Ok(id)
    }

    fn cancel_rule(&self, rule: RuleId) -> Result<bool, EngineError> {
        let mut engine = self.lock();
        if rule.0 >= engine.next_rule {
            return Err(EngineError::UnknownRule(rule));
        }
        Ok(engine.rules.remove(&rule).is_some())
    }

    fn unload(&self, net: NetHandle) -> Result<(), EngineError> {
        let listener = {
            let mut engine = self.lock();
            let Some(sim) = engine.nets.remove(&net) else {
                if engine.unloaded.contains(&net) {
                    return Ok(());
                }
                return Err(EngineError::UnknownNet(net));
            };
            engine.rules.retain(|_, r| !r.nets().contains(&net));
            engine.unloaded.insert(net);
            sim.listener
        };
        info!(net = %net, "unloaded net");
        listener.on_status(net, NetStatus::Unloaded);
        Ok(())
    }
}

/// Background thread running a [`SimCore`]. Stopped on drop.
pub struct SimRunner {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimRunner {
    /// Stop the thread and wait for it. Returns false if it panicked.
    pub fn stop(mut self) -> bool {
        self.halt()
    }

    fn halt(&mut self) -> bool {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join().is_ok(),
            None => true,
        }
    }
}

impl Drop for SimRunner {
    fn drop(&mut self) {
        self.halt();
    }
}
