//! Command handles.
//!
//! A [`CommandHandle`] binds a compiled command to its loaded net. It turns
//! engine reports into the command status machine and expresses start,
//! cancel, abort and sequencing as synchronization rules.
//!
//! Locking: engine reports are applied under a per-handle update lock, so
//! the status sequence is monotonic and the final-result snapshot is taken
//! exactly once. Notifications are queued under that lock and delivered
//! after it is released, by one draining thread at a time, in queue order.
//! A listener may therefore call back into its handle (for example unload
//! it on termination); the nested report is delivered after the listener
//! returns. Reads (status, final results) only take the short state lock.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use rt_compile::{AssignmentChannel, CompiledNet, Delivery, HandlerChannel, ObserverChannel};
use rt_core::Value;
use tracing::{debug, info, warn};

use crate::engine::{
    ControlCore, NetHandle, NetListener, NetSignal, NetStatus, NetSynchronizationRule, RuleId,
    SyncCondition,
};
use crate::error::{CmdResult, CommandError};
use crate::status::{CommandStatus, ResultState};
use crate::worker::{Job, Worker};

pub type StatusListener = Arc<dyn Fn(CommandStatus) + Send + Sync>;
/// Called with the result name.
pub type ResultListener = Arc<dyn Fn(&str, ResultState) + Send + Sync>;
/// Called with the result name and the exception message.
pub type ExceptionListener = Arc<dyn Fn(&str, &str) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct State {
    status: CommandStatus,
    /// Result keys observed active at least once.
    seen: HashSet<String>,
    final_results: Option<BTreeSet<String>>,
    /// Terminal status reached and all terminal notifications sent.
    settled: bool,
    unloaded: bool,
}

#[derive(Default, Clone)]
struct Listeners {
    status: Vec<StatusListener>,
    result: Vec<ResultListener>,
    exception: Vec<ExceptionListener>,
}

/// A notification and the listeners registered when it was raised.
enum Notice {
    Status(Vec<StatusListener>, CommandStatus),
    Result(Vec<ResultListener>, String, ResultState),
    Exception(Vec<ExceptionListener>, String, String),
    Job(Delivery, Job),
    /// All terminal notifications before this one were delivered.
    Settled,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Notice>,
    draining: bool,
}

/// Per-command state shared with the engine listener.
struct Shared {
    label: String,
    results: Vec<rt_compile::ResultChannel>,
    observers: HashMap<String, ObserverChannel>,
    handlers: HashMap<String, HandlerChannel>,
    update_lock: Mutex<()>,
    state: Mutex<State>,
    settled: Condvar,
    listeners: Mutex<Listeners>,
    outbox: Mutex<Outbox>,
    worker: Mutex<Option<Worker>>,
    errors_tx: Sender<CommandError>,
    errors_rx: Mutex<Receiver<CommandError>>,
    errors: Mutex<Vec<CommandError>>,
}

/// Client handle of a loaded command.
#[derive(Clone)]
pub struct CommandHandle {
    net: NetHandle,
    core: Arc<dyn ControlCore>,
    terminated: String,
    assignments: Vec<AssignmentChannel>,
    shared: Arc<Shared>,
}

impl CommandHandle {
    /// Load a compiled net into the engine.
    pub fn load(core: Arc<dyn ControlCore>, compiled: CompiledNet) -> CmdResult<Self> {
        let (errors_tx, errors_rx) = channel();
        let shared = Arc::new(Shared {
            label: compiled.label.clone(),
            results: compiled.results,
            observers: compiled
                .observers
                .into_iter()
                .map(|o| (o.key.clone(), o))
                .collect(),
            handlers: compiled
                .handlers
                .into_iter()
                .map(|h| (h.key.clone(), h))
                .collect(),
            update_lock: Mutex::new(()),
            state: Mutex::new(State {
                status: CommandStatus::Ready,
                seen: HashSet::new(),
                final_results: None,
                settled: false,
                unloaded: false,
            }),
            settled: Condvar::new(),
            listeners: Mutex::new(Listeners::default()),
            outbox: Mutex::new(Outbox::default()),
            worker: Mutex::new(None),
            errors_tx,
            errors_rx: Mutex::new(errors_rx),
            errors: Mutex::new(Vec::new()),
        });
        let listener = Arc::new(Feed(Arc::clone(&shared)));
        let net = core.load(&compiled.description, listener)?;
        info!(command = %compiled.label, net = %net, digest = %&compiled.digest[..12], "loaded command");
        Ok(Self {
            net,
            core,
            terminated: compiled.terminated,
            assignments: compiled.assignments,
            shared,
        })
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn net(&self) -> NetHandle {
        self.net
    }

    pub fn status(&self) -> CommandStatus {
        lock(&self.shared.state).status
    }

    /// Engine signal of a named result.
    pub fn signal(&self, result: &str) -> Option<NetSignal> {
        self.shared
            .results
            .iter()
            .find(|r| r.name == result)
            .map(|r| NetSignal::new(self.net, r.key.clone()))
    }

    /// Signal that is active once the net decided to terminate.
    pub fn terminated_signal(&self) -> NetSignal {
        NetSignal::new(self.net, self.terminated.clone())
    }

    /// Inter-net channel key of an assignment.
    pub fn assignment_key(&self, hint: &str) -> Option<&str> {
        self.assignments
            .iter()
            .find(|a| a.hint == hint)
            .map(|a| a.key.as_str())
    }

    /// Register a status listener. It is called with the current status
    /// right away, unless another thread is delivering notifications of
    /// this handle, in which case that thread calls it next.
    pub fn add_status_listener(&self, listener: impl Fn(CommandStatus) + Send + Sync + 'static) {
        {
            let _guard = lock(&self.shared.update_lock);
            let listener: StatusListener = Arc::new(listener);
            lock(&self.shared.listeners).status.push(Arc::clone(&listener));
            self.shared.post([Notice::Status(vec![listener], self.status())]);
        }
        self.shared.drain();
    }

    /// Register a result listener. Results already decided are replayed.
    pub fn add_result_listener(
        &self,
        listener: impl Fn(&str, ResultState) + Send + Sync + 'static,
    ) {
        {
            let _guard = lock(&self.shared.update_lock);
            let listener: ResultListener = Arc::new(listener);
            lock(&self.shared.listeners).result.push(Arc::clone(&listener));
            let (seen, decided) = {
                let state = lock(&self.shared.state);
                (state.seen.clone(), state.final_results.is_some())
            };
            let replay = self.shared.results.iter().filter_map(|result| {
                let outcome = if seen.contains(&result.key) {
                    ResultState::Active
                } else if decided {
                    ResultState::Impossible
                } else {
                    return None;
                };
                Some(Notice::Result(vec![Arc::clone(&listener)], result.name.clone(), outcome))
            });
            self.shared.post(replay);
        }
        self.shared.drain();
    }

    /// Register an exception listener. Exceptions already raised are
    /// replayed.
    pub fn add_exception_listener(&self, listener: impl Fn(&str, &str) + Send + Sync + 'static) {
        {
            let _guard = lock(&self.shared.update_lock);
            let listener: ExceptionListener = Arc::new(listener);
            lock(&self.shared.listeners).exception.push(Arc::clone(&listener));
            let finals = lock(&self.shared.state).final_results.clone();
            if let Some(finals) = finals {
                let replay: Vec<Notice> = self
                    .shared
                    .exceptions(&finals)
                    .into_iter()
                    .map(|(name, message)| {
                        Notice::Exception(
                            vec![Arc::clone(&listener)],
                            name.to_string(),
                            message.to_string(),
                        )
                    })
                    .collect();
                self.shared.post(replay);
            }
        }
        self.shared.drain();
    }

    /// Start the net at the next engine cycle.
    pub fn start(&self) -> CmdResult<RuleId> {
        self.submit(NetSynchronizationRule::new(SyncCondition::Always).starting(self.net))
    }

    /// Raise the net's cancel signal. The net decides how to wind down.
    pub fn cancel(&self) -> CmdResult<RuleId> {
        self.submit(NetSynchronizationRule::new(SyncCondition::Always).cancelling(self.net))
    }

    /// Stop the net in the engine without winding down.
    pub fn abort(&self) -> CmdResult<RuleId> {
        self.submit(NetSynchronizationRule::new(SyncCondition::Always).stopping(self.net))
    }

    /// Start this command when `result` of `predecessor` activates (its
    /// termination signal by default), stopping the predecessor in the same
    /// engine step.
    pub fn schedule_after(
        &self,
        predecessor: &CommandHandle,
        result: Option<&str>,
    ) -> CmdResult<RuleId> {
        predecessor.ensure_loaded()?;
        let signal = match result {
            Some(name) => predecessor
                .signal(name)
                .ok_or_else(|| CommandError::UnknownResult {
                    command: predecessor.label().to_string(),
                    result: name.to_string(),
                })?,
            None => predecessor.terminated_signal(),
        };
        self.submit(
            NetSynchronizationRule::new(SyncCondition::Result(signal))
                .stopping(predecessor.net)
                .starting(self.net),
        )
    }

    /// Start this command when any of `signals` activates. Nothing is
    /// stopped.
    pub fn schedule_when(&self, signals: &[NetSignal]) -> CmdResult<RuleId> {
        let condition = SyncCondition::Any(
            signals
                .iter()
                .cloned()
                .map(SyncCondition::Result)
                .collect(),
        );
        self.submit(NetSynchronizationRule::new(condition).starting(self.net))
    }

    /// Withdraw a pending rule.
    pub fn cancel_rule(&self, rule: RuleId) -> CmdResult<bool> {
        Ok(self.core.cancel_rule(rule)?)
    }

    /// Block until the command reached a terminal status, then join the
    /// worker thread and report every error that occurred.
    pub fn wait_complete(&self) -> CmdResult<()> {
        {
            let mut state = lock(&self.shared.state);
            while !state.settled {
                state = self
                    .shared
                    .settled
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        let worker = lock(&self.shared.worker).take();
        if let Some(worker) = worker {
            self.shared.retire(worker);
        }
        let errors = self.occurred_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CommandError::aggregate(errors))
        }
    }

    /// Errors recorded so far, oldest first.
    pub fn occurred_errors(&self) -> Vec<CommandError> {
        let mut errors = lock(&self.shared.errors);
        let rx = lock(&self.shared.errors_rx);
        errors.extend(rx.try_iter());
        errors.clone()
    }

    /// Names of the results that were active, once the command reached a
    /// terminal status.
    pub fn final_results(&self) -> Option<BTreeSet<String>> {
        lock(&self.shared.state).final_results.clone()
    }

    /// Release the net in the engine. Later rules are rejected.
    pub fn unload(&self) -> CmdResult<()> {
        if lock(&self.shared.state).unloaded {
            return Ok(());
        }
        self.core.unload(self.net)?;
        lock(&self.shared.state).unloaded = true;
        info!(command = %self.label(), net = %self.net, "unloaded command");
        Ok(())
    }

    fn ensure_loaded(&self) -> CmdResult<()> {
        if lock(&self.shared.state).unloaded {
            return Err(CommandError::Unloaded {
                command: self.label().to_string(),
            });
        }
        Ok(())
    }

    fn submit(&self, rule: NetSynchronizationRule) -> CmdResult<RuleId> {
        self.ensure_loaded()?;
        let id = self.core.submit_rule(rule)?;
        debug!(command = %self.label(), rule = ?id, "submitted rule");
        Ok(id)
    }
}

impl std::fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandle")
            .field("label", &self.shared.label)
            .field("net", &self.net)
            .field("status", &self.status())
            .finish()
    }
}

impl Shared {
    /// Apply an engine status report and deliver what it raised.
    fn update_status(&self, status: NetStatus) {
        self.record_status(status);
        self.drain();
    }

    /// Apply a monitored channel report and deliver what it raised.
    fn update_channel(&self, key: &str, active: bool, value: Option<&Value>) {
        self.record_channel(key, active, value);
        self.drain();
    }

    fn record_status(&self, status: NetStatus) {
        let _guard = lock(&self.update_lock);
        let next = CommandStatus::from_net(status);
        let finals = {
            let mut state = lock(&self.state);
            if !state.status.advances_to(next) {
                if state.status != next {
                    warn!(
                        command = %self.label,
                        current = ?state.status,
                        reported = ?status,
                        "ignored stale status"
                    );
                }
                return;
            }
            state.status = next;
            if next.is_terminal() {
                let finals: BTreeSet<String> = self
                    .results
                    .iter()
                    .filter(|r| state.seen.contains(&r.key))
                    .map(|r| r.name.clone())
                    .collect();
                state.final_results = Some(finals.clone());
                Some(finals)
            } else {
                None
            }
        };

        match next {
            CommandStatus::Error => warn!(command = %self.label, reported = ?status, "command failed"),
            _ => info!(command = %self.label, status = ?next, "command status"),
        }
        let listeners = lock(&self.listeners).clone();
        let mut notices = vec![Notice::Status(listeners.status, next)];

        if let Some(finals) = finals {
            for result in &self.results {
                if !finals.contains(&result.name) {
                    notices.push(Notice::Result(
                        listeners.result.clone(),
                        result.name.clone(),
                        ResultState::Impossible,
                    ));
                }
            }
            if next == CommandStatus::Error {
                let _ = self.errors_tx.send(CommandError::NetError {
                    command: self.label.clone(),
                });
            }
            for (name, message) in self.exceptions(&finals) {
                let _ = self.errors_tx.send(CommandError::Exception {
                    command: self.label.clone(),
                    result: name.to_string(),
                    message: message.to_string(),
                });
                notices.push(Notice::Exception(
                    listeners.exception.clone(),
                    name.to_string(),
                    message.to_string(),
                ));
            }
            notices.push(Notice::Settled);
        }
        self.post(notices);
    }

    fn record_channel(&self, key: &str, active: bool, value: Option<&Value>) {
        let _guard = lock(&self.update_lock);
        if let Some(result) = self.results.iter().find(|r| r.key == key) {
            let newly_active = {
                let mut state = lock(&self.state);
                !state.status.is_terminal() && active && state.seen.insert(key.to_string())
            };
            if newly_active {
                debug!(command = %self.label, result = %result.name, "result active");
                let listeners = lock(&self.listeners).result.clone();
                self.post([Notice::Result(
                    listeners,
                    result.name.clone(),
                    ResultState::Active,
                )]);
            }
            return;
        }
        if !active {
            return;
        }
        if let Some(observer) = self.observers.get(key) {
            let Some(value) = value.cloned() else {
                return;
            };
            let listener = Arc::clone(&observer.listener);
            self.post([Notice::Job(
                observer.delivery,
                Box::new(move || {
                    listener(&value);
                    Ok(())
                }),
            )]);
        } else if let Some(handler) = self.handlers.get(key) {
            let callback = Arc::clone(&handler.callback);
            self.post([Notice::Job(
                handler.delivery,
                Box::new(move || callback().map_err(|message| CommandError::HandlerFailed { message })),
            )]);
        }
    }

    /// Queue notifications. Called under the update lock so queue order
    /// follows update order.
    fn post(&self, notices: impl IntoIterator<Item = Notice>) {
        lock(&self.outbox).queue.extend(notices);
    }

    /// Deliver queued notifications unless a drain is already running, on
    /// this thread further up the stack or on another one.
    fn drain(&self) {
        {
            let mut outbox = lock(&self.outbox);
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        let _draining = Draining(&self.outbox);
        loop {
            let notice = {
                let mut outbox = lock(&self.outbox);
                match outbox.queue.pop_front() {
                    Some(notice) => notice,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            self.notify(notice);
        }
    }

    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Status(listeners, status) => {
                for listener in &listeners {
                    listener(status);
                }
            }
            Notice::Result(listeners, name, outcome) => {
                for listener in &listeners {
                    listener(&name, outcome);
                }
            }
            Notice::Exception(listeners, name, message) => {
                for listener in &listeners {
                    listener(&name, &message);
                }
            }
            Notice::Job(delivery, job) => self.deliver(delivery, job),
            Notice::Settled => {
                lock(&self.state).settled = true;
                self.settled.notify_all();
            }
        }
    }

    fn deliver(&self, delivery: Delivery, job: Job) {
        match delivery {
            Delivery::Sync => {
                if let Err(e) = job() {
                    warn!(command = %self.label, error = %e, "handler failed");
                    let _ = self.errors_tx.send(e);
                }
            }
            Delivery::Async => {
                let mut slot = lock(&self.worker);
                let mut job = job;
                // One retry: a worker whose thread died is replaced once.
                for _ in 0..2 {
                    if slot.is_none() {
                        match Worker::spawn(format!("{}-worker", self.label), self.errors_tx.clone())
                        {
                            Ok(worker) => *slot = Some(worker),
                            Err(e) => {
                                let _ = self.errors_tx.send(CommandError::HandlerFailed {
                                    message: format!("cannot spawn worker: {e}"),
                                });
                                return;
                            }
                        }
                    }
                    let Some(worker) = slot.as_ref() else {
                        return;
                    };
                    match worker.submit(job) {
                        Ok(()) => return,
                        Err(returned) => {
                            job = returned;
                            if let Some(dead) = slot.take() {
                                self.retire(dead);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Join a worker, recording a panic.
    fn retire(&self, worker: Worker) {
        if !worker.join() {
            warn!(command = %self.label, "worker thread panicked");
            let _ = self.errors_tx.send(CommandError::WorkerPanicked {
                command: self.label.clone(),
            });
        }
    }

    /// `(result, message)` of each final result carrying an exception.
    fn exceptions<'a>(&'a self, finals: &BTreeSet<String>) -> Vec<(&'a str, &'a str)> {
        self.results
            .iter()
            .filter(|r| finals.contains(&r.name))
            .filter_map(|r| r.exception.as_deref().map(|m| (r.name.as_str(), m)))
            .collect()
    }
}

/// Clears the draining flag if a listener panics mid-drain.
struct Draining<'a>(&'a Mutex<Outbox>);

impl Drop for Draining<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).draining = false;
        }
    }
}

/// Engine listener feeding a handle.
struct Feed(Arc<Shared>);

impl NetListener for Feed {
    fn on_status(&self, _net: NetHandle, status: NetStatus) {
        self.0.update_status(status);
    }

    fn on_channel(&self, _net: NetHandle, key: &str, active: bool, value: Option<&Value>) {
        self.0.update_channel(key, active, value);
    }
}
