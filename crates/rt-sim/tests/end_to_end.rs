//! Commands compiled, loaded and run on the simulated core.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, ThreadId};
use std::time::Duration;

use rt_command::{
    CommandError, CommandHandle, CommandStatus, EngineError, NetStatus, ResultState, Session,
};
use rt_compile::{Command, Delivery};
use rt_core::{DataType, Value};
use rt_expr::Expr;
use rt_mapping::{
    Action, ActionMapper, ActionResult, ActuatorDriver, ConsumerFragment, DriverMapper,
    MappingContext, MappingResult, Variant,
};
use rt_sim::{FailAt, Recorder, SimCore, SimOptions};

static HOLD: Variant = Variant::root("Hold");
static SETPOINT: Variant = Variant::root("Setpoint");
static AXIS: Variant = Variant::root("Axis");

const SETPOINT_TYPE: &str = "Axis::Setpoint";

/// Hold a position. Never completes on its own.
struct Hold(f64);

impl Action for Hold {
    fn variant(&self) -> &'static Variant {
        &HOLD
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct HoldMapper;

impl ActionMapper for HoldMapper {
    fn map(
        &self,
        action: &dyn Action,
        cx: &mut MappingContext<'_>,
    ) -> MappingResult<Option<ActionResult>> {
        let Some(hold) = action.as_any().downcast_ref::<Hold>() else {
            return Ok(None);
        };
        let target = cx.arena.double(hold.0);
        Ok(Some(ActionResult::new(&SETPOINT).with_payload(target)))
    }
}

struct Axis;

impl ActuatorDriver for Axis {
    fn variant(&self) -> &'static Variant {
        &AXIS
    }
    fn name(&self) -> &str {
        "axis"
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AxisMapper;

impl DriverMapper for AxisMapper {
    fn map(
        &self,
        _driver: &dyn ActuatorDriver,
        result: &ActionResult,
        cx: &mut MappingContext<'_>,
    ) -> MappingResult<Option<ConsumerFragment>> {
        let Some(&setpoint) = result.payload::<Expr>() else {
            return Ok(None);
        };
        let mut b = cx.builder("axis")?;
        let sink = b.custom_primitive(SETPOINT_TYPE, &[("inValue", DataType::Double)], &[])?;
        b.depend(setpoint, sink.input(0))?;
        Ok(Some(ConsumerFragment::new(b.finish())))
    }
}

fn options() -> SimOptions {
    SimOptions {
        dt: 0.125,
        max_cycles: 1_000,
    }
}

fn rig(core: SimCore) -> (Arc<SimCore>, Session) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let core = Arc::new(core);
    let mut session = Session::new(core.clone());
    session.registry().register_action_mapper(&HOLD, HoldMapper);
    session
        .registry()
        .register_driver_mapper(&AXIS, &SETPOINT, AxisMapper);
    (core, session)
}

fn sim() -> (Arc<SimCore>, Recorder, Session) {
    let recorder = Recorder::new();
    let core = SimCore::new(options())
        .unwrap()
        .with_device(SETPOINT_TYPE, recorder.clone());
    let (core, session) = rig(core);
    (core, recorder, session)
}

fn hold() -> Command {
    Command::new(Arc::new(Hold(1.5)), Arc::new(Axis))
}

/// `net_time >= at`
fn reached(session: &mut Session, at: f64) -> Expr {
    let arena = session.arena();
    let now = arena.net_time();
    let limit = arena.double(at);
    let before = arena.less(now, limit).unwrap();
    arena.not(before).unwrap()
}

fn record_statuses(handle: &CommandHandle) -> Arc<Mutex<Vec<CommandStatus>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    handle.add_status_listener(move |s| sink.lock().unwrap().push(s));
    seen
}

fn names(items: &[&str]) -> Option<BTreeSet<String>> {
    Some(items.iter().map(|s| s.to_string()).collect())
}

#[test]
fn command_runs_until_its_result_terminates_it() {
    let (core, recorder, mut session) = sim();
    let done = reached(&mut session, 2.0);
    let clock = session.arena().net_time();
    let command = hold().terminating_result("done", done).assign(clock, "clock");
    let handle = session.load(&command).unwrap();
    let statuses = record_statuses(&handle);

    handle.start().unwrap();
    core.run_until_idle();

    assert_eq!(
        *statuses.lock().unwrap(),
        vec![
            CommandStatus::Ready,
            CommandStatus::Scheduled,
            CommandStatus::Running,
            CommandStatus::Terminated
        ]
    );
    assert_eq!(handle.final_results(), names(&["done"]));
    assert!(handle.wait_complete().is_ok());

    let key = handle.assignment_key("clock").unwrap();
    assert_eq!(core.netcomm(key), Some(Value::Double(2.0)));

    let (name, inputs) = recorder.all().into_iter().next().unwrap();
    assert!(name.starts_with(SETPOINT_TYPE));
    assert_eq!(inputs, vec![Some(Value::Double(1.5))]);
}

#[test]
fn background_runner_completes_the_command() {
    let (core, _recorder, mut session) = sim();
    let done = reached(&mut session, 1.0);
    let handle = session.load(&hold().terminating_result("done", done)).unwrap();
    let runner = core.spawn().unwrap();

    handle.start().unwrap();
    handle.wait_complete().unwrap();
    assert!(runner.stop());

    assert_eq!(handle.status(), CommandStatus::Terminated);
    assert_eq!(handle.final_results(), names(&["done"]));
}

#[test]
fn sequenced_commands_never_run_together() {
    let (core, _recorder, mut session) = sim();
    let log: Arc<Mutex<Vec<(usize, CommandStatus)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..3 {
        let done = reached(&mut session, 0.5);
        let handle = session
            .load(&hold().with_label(format!("step{i}")).terminating_result("done", done))
            .unwrap();
        let sink = Arc::clone(&log);
        handle.add_status_listener(move |s| sink.lock().unwrap().push((i, s)));
        handles.push(handle);
    }
    handles[1].schedule_after(&handles[0], None).unwrap();
    handles[2].schedule_after(&handles[1], Some("done")).unwrap();

    handles[0].start().unwrap();
    core.run_until_idle();

    let mut running = BTreeSet::new();
    for (i, status) in log.lock().unwrap().iter() {
        match status {
            CommandStatus::Running => {
                running.insert(*i);
                assert_eq!(running.len(), 1, "two commands running at once");
            }
            _ => {
                running.remove(i);
            }
        }
    }
    for handle in &handles {
        assert_eq!(handle.status(), CommandStatus::Terminated);
        assert_eq!(handle.final_results(), names(&["done"]));
    }
}

#[test]
fn cancel_winds_the_command_down() {
    let (core, _recorder, mut session) = sim();
    let never = reached(&mut session, 100.0);
    let handle = session.load(&hold().terminating_result("done", never)).unwrap();

    handle.start().unwrap();
    core.run_cycles(4);
    assert_eq!(handle.status(), CommandStatus::Running);

    handle.cancel().unwrap();
    core.run_until_idle();

    assert_eq!(handle.status(), CommandStatus::Terminated);
    assert_eq!(handle.final_results(), names(&["cancelled"]));
}

#[test]
fn abort_stops_without_results() {
    let (core, _recorder, mut session) = sim();
    let never = reached(&mut session, 100.0);
    let handle = session.load(&hold().terminating_result("done", never)).unwrap();

    handle.start().unwrap();
    core.run_cycles(4);
    handle.abort().unwrap();
    core.run_until_idle();

    assert_eq!(handle.status(), CommandStatus::Terminated);
    assert_eq!(handle.final_results(), names(&[]));
}

#[test]
fn observers_fire_once_on_their_thread() {
    let (core, _recorder, mut session) = sim();
    let calls: Arc<Mutex<HashMap<&'static str, Vec<ThreadId>>>> = Arc::default();
    let sync_sink = Arc::clone(&calls);
    let async_sink = Arc::clone(&calls);
    let crossed = reached(&mut session, 0.5);
    let done = reached(&mut session, 1.0);
    let command = hold()
        .observe(crossed, Delivery::Sync, move |_| {
            sync_sink
                .lock()
                .unwrap()
                .entry("sync")
                .or_default()
                .push(thread::current().id());
        })
        .observe(crossed, Delivery::Async, move |_| {
            async_sink
                .lock()
                .unwrap()
                .entry("async")
                .or_default()
                .push(thread::current().id());
        })
        .terminating_result("done", done);
    let handle = session.load(&command).unwrap();

    handle.start().unwrap();
    core.run_until_idle();
    handle.wait_complete().unwrap();

    let calls = calls.lock().unwrap();
    let here = thread::current().id();
    assert_eq!(calls["sync"], vec![here]);
    assert_eq!(calls["async"].len(), 1);
    assert_ne!(calls["async"][0], here);
}

#[test]
fn handlers_run_on_each_rising_edge() {
    let (core, _recorder, mut session) = sim();
    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    let crossed = reached(&mut session, 0.25);
    let done = reached(&mut session, 0.75);
    let command = hold()
        .on_event(crossed, Delivery::Sync, move || {
            sink.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .terminating_result("done", done);
    let handle = session.load(&command).unwrap();

    handle.start().unwrap();
    core.run_until_idle();

    assert!(handle.wait_complete().is_ok());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn exceptions_surface_from_wait_complete() {
    let (core, _recorder, mut session) = sim();
    let overrun = reached(&mut session, 0.5);
    let handle = session
        .load(&hold().exception("overrun", overrun, "held too long"))
        .unwrap();

    handle.start().unwrap();
    core.run_until_idle();

    match handle.wait_complete() {
        Err(CommandError::Exception {
            result, message, ..
        }) => {
            assert_eq!(result, "overrun");
            assert_eq!(message, "held too long");
        }
        other => panic!("expected an exception, got {other:?}"),
    }
}

#[test]
fn unknown_device_types_reject_the_net() {
    let (_core, mut session) = rig(SimCore::new(options()).unwrap());
    let done = reached(&mut session, 1.0);
    let err = session
        .load(&hold().terminating_result("done", done))
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Engine(EngineError::InvalidNet { .. })
    ));
}

#[test]
fn device_faults_end_in_error() {
    let core = SimCore::new(options())
        .unwrap()
        .with_device(SETPOINT_TYPE, FailAt { at: 0.25 });
    let (core, mut session) = rig(core);
    let done = reached(&mut session, 1.0);
    let handle = session.load(&hold().terminating_result("done", done)).unwrap();

    handle.start().unwrap();
    core.run_until_idle();

    assert_eq!(handle.status(), CommandStatus::Error);
    assert_eq!(handle.final_results(), names(&[]));
    assert!(matches!(
        handle.wait_complete(),
        Err(CommandError::NetError { .. })
    ));
}

#[test]
fn final_results_are_decided_once() {
    let (core, _recorder, mut session) = sim();
    let done = reached(&mut session, 0.5);
    let never = reached(&mut session, 50.0);
    let handle = session
        .load(&hold().terminating_result("done", done).result("never", never))
        .unwrap();
    let states: Arc<Mutex<Vec<(String, ResultState)>>> = Arc::default();
    let sink = Arc::clone(&states);
    handle.add_result_listener(move |name, state| {
        sink.lock().unwrap().push((name.to_string(), state));
    });

    handle.start().unwrap();
    core.run_until_idle();

    let first = handle.final_results();
    assert_eq!(first, names(&["done"]));
    assert_eq!(handle.final_results(), first);

    let states = states.lock().unwrap();
    let count = |name: &str, state: ResultState| {
        states
            .iter()
            .filter(|(n, s)| n == name && *s == state)
            .count()
    };
    assert_eq!(count("done", ResultState::Active), 1);
    assert_eq!(count("never", ResultState::Impossible), 1);
    assert_eq!(count("cancelled", ResultState::Impossible), 1);
    assert_eq!(count("done", ResultState::Impossible), 0);
}

#[test]
fn assignments_feed_later_commands() {
    let (core, _recorder, mut session) = sim();
    let done = reached(&mut session, 1.0);
    let clock = session.arena().net_time();
    let producer = session
        .load(&hold().terminating_result("done", done).assign(clock, "clock"))
        .unwrap();
    let key = producer.assignment_key("clock").unwrap().to_string();

    let arena = session.arena();
    let handed_over = arena.netcomm(key.as_str(), DataType::Double);
    let half = arena.double(0.5);
    let seen = arena.greater(handed_over, half).unwrap();
    let consumer = session
        .load(&hold().terminating_result("seen", seen))
        .unwrap();
    consumer.schedule_after(&producer, None).unwrap();

    producer.start().unwrap();
    core.run_until_idle();

    assert_eq!(core.netcomm(&key), Some(Value::Double(1.0)));
    assert_eq!(consumer.final_results(), names(&["seen"]));
}

#[test]
fn unloaded_commands_reject_rules() {
    let (core, _recorder, mut session) = sim();
    let done = reached(&mut session, 1.0);
    let handle = session.load(&hold().terminating_result("done", done)).unwrap();
    handle.unload().unwrap();
    handle.unload().unwrap();

    assert_eq!(handle.status(), CommandStatus::Terminated);
    assert!(matches!(
        handle.start(),
        Err(CommandError::Unloaded { .. })
    ));
    assert!(core.is_empty());
}

#[test]
fn listener_can_unload_its_command_on_termination() {
    let (core, _recorder, mut session) = sim();
    let short = reached(&mut session, 0.5);
    let handle = session.load(&hold().terminating_result("done", short)).unwrap();
    let long = reached(&mut session, 1.0);
    let bystander = session
        .load(&hold().with_label("bystander").terminating_result("done", long))
        .unwrap();

    let unloaded = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&unloaded);
    let owner = handle.clone();
    handle.add_status_listener(move |s| {
        if s == CommandStatus::Terminated {
            *sink.lock().unwrap() = Some(owner.unload().is_ok());
        }
    });
    handle.start().unwrap();
    bystander.start().unwrap();

    let (tx, rx) = mpsc::channel();
    let engine = Arc::clone(&core);
    thread::spawn(move || {
        engine.run_until_idle();
        let _ = tx.send(());
    });
    assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());

    assert_eq!(*unloaded.lock().unwrap(), Some(true));
    assert_eq!(core.status(handle.net()), Some(NetStatus::Unloaded));
    assert_eq!(handle.final_results(), names(&["done"]));
    assert!(handle.wait_complete().is_ok());
    assert_eq!(bystander.status(), CommandStatus::Terminated);
    assert_eq!(bystander.final_results(), names(&["done"]));
}
