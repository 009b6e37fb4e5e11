//! Shared fixtures: a scriptable transport, a small CTD protocol and an
//! event recorder.

#![allow(dead_code)]

use instrument_driver::builder::FsmBuilder;
use instrument_driver::chunker::{Chunk, RegexSieve};
use instrument_driver::driver::{
    dispatch_named, token_names, DriverAsyncEvent, DriverEventKind, Packet, ParamMap,
    PortAgentConfig, Protocol, ProtocolArgs, ProtocolContext, ProtocolFsm,
    SingleConnectionDriver, Transport, TransportCallbacks,
};
use instrument_driver::fsm::Outcome;
use instrument_driver::protocol::ProtocolCore;
use instrument_driver::{token_enum, DriverError, DriverResult, Token};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const PROMPT: &str = "S>";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Poll `condition` until it holds or two seconds pass.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Transport whose callbacks the test fires by hand.
#[derive(Default)]
pub struct MockTransport {
    callbacks: Mutex<Option<TransportCallbacks>>,
    sent: Mutex<Vec<Vec<u8>>>,
    responder: Mutex<Option<Responder>>,
    refuse: AtomicBool,
    lose_on_stop: AtomicBool,
    opened: AtomicUsize,
    stopped: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport that refuses to open.
    pub fn refusing() -> Arc<Self> {
        let transport = Self::default();
        transport.refuse.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    /// A transport that answers like an SBE-style CTD: every command gets the
    /// prompt back, `ds` gets a status line first.
    pub fn instrument() -> Arc<Self> {
        let transport = Self::new();
        transport.respond_with(|line| {
            let line = String::from_utf8_lossy(line);
            let reply = match line.trim_end() {
                "ds" => format!("SBE 16plus V 2.5 logging=no\r\n{PROMPT}"),
                _ => PROMPT.to_string(),
            };
            Some(reply.into_bytes())
        });
        transport
    }

    pub fn respond_with(&self, responder: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static) {
        *self.responder.lock() = Some(Arc::new(responder));
    }

    /// Report a lost connection whenever the transport is closed, as a socket
    /// transport does when its reader sees the close.
    pub fn report_lost_on_stop(&self) {
        self.lose_on_stop.store(true, Ordering::SeqCst);
    }

    pub fn silence(&self) {
        *self.responder.lock() = None;
    }

    fn callbacks(&self) -> Option<TransportCallbacks> {
        self.callbacks.lock().clone()
    }

    pub fn fire_data(&self, data: &[u8]) {
        if let Some(callbacks) = self.callbacks() {
            (callbacks.on_data)(Packet::now(data));
        }
    }

    pub fn fire_raw(&self, data: &[u8]) {
        if let Some(callbacks) = self.callbacks() {
            (callbacks.on_raw)(Packet::now(data));
        }
    }

    pub fn fire_exception(&self, error: DriverError) {
        if let Some(callbacks) = self.callbacks() {
            (callbacks.on_exception)(error);
        }
    }

    pub fn fire_lost(&self) {
        if let Some(callbacks) = self.callbacks() {
            (callbacks.on_connection_lost)();
        }
    }

    pub fn sent_lines(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn init_comms(&self, callbacks: TransportCallbacks) -> DriverResult<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DriverError::Connection(
                "port agent refused connection".to_string(),
            ));
        }
        *self.callbacks.lock() = Some(callbacks);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_comms(&self) {
        let callbacks = self.callbacks.lock().take();
        self.stopped.fetch_add(1, Ordering::SeqCst);
        if self.lose_on_stop.load(Ordering::SeqCst) {
            if let Some(callbacks) = callbacks {
                (callbacks.on_connection_lost)();
            }
        }
    }

    fn send(&self, data: &[u8]) -> DriverResult<usize> {
        self.sent.lock().push(data.to_vec());
        let responder = self.responder.lock().clone();
        if let Some(reply) = responder.and_then(|respond| respond(data)) {
            self.fire_data(&reply);
        }
        Ok(data.len())
    }
}

token_enum! {
    pub enum CtdState {
        Unknown => "PROTOCOL_STATE_UNKNOWN",
        Command => "PROTOCOL_STATE_COMMAND",
        Autosample => "PROTOCOL_STATE_AUTOSAMPLE",
        DirectAccess => "PROTOCOL_STATE_DIRECT_ACCESS",
    }
}

token_enum! {
    pub enum CtdEvent {
        Enter => "PROTOCOL_EVENT_ENTER",
        Exit => "PROTOCOL_EVENT_EXIT",
        Discover => "DRIVER_EVENT_DISCOVER",
        Get => "DRIVER_EVENT_GET",
        Set => "DRIVER_EVENT_SET",
        ForceState => "DRIVER_FORCE_STATE",
        StartDirect => "DRIVER_EVENT_START_DIRECT",
        StopDirect => "DRIVER_EVENT_STOP_DIRECT",
        ExecuteDirect => "EXECUTE_DIRECT",
        StartAutosample => "DRIVER_EVENT_START_AUTOSAMPLE",
        StopAutosample => "DRIVER_EVENT_STOP_AUTOSAMPLE",
        AcquireStatus => "DRIVER_EVENT_ACQUIRE_STATUS",
    }
}

type Core = Arc<ProtocolCore>;
type Step = DriverResult<Outcome<CtdState, Value>>;

fn timeout_of(args: &ProtocolArgs) -> Duration {
    match args {
        ProtocolArgs::Discover { timeout }
        | ProtocolArgs::Set { timeout, .. }
        | ProtocolArgs::Execute { timeout, .. } => *timeout,
        _ => Duration::from_secs(1),
    }
}

fn enter(core: &mut Core, _: &ProtocolArgs) -> Step {
    core.bus().state_change();
    Ok(Outcome::stay(Value::Null))
}

fn discover(core: &mut Core, args: &ProtocolArgs) -> Step {
    let response = core.do_cmd_resp("ds", &[PROMPT], timeout_of(args))?;
    let next = if response.text.contains("logging=yes") {
        CtdState::Autosample
    } else {
        CtdState::Command
    };
    Ok(Outcome::transition(next, json!(next.name())))
}

fn force_state(_: &mut Core, args: &ProtocolArgs) -> Step {
    let ProtocolArgs::ForceState(name) = args else {
        return Err(DriverError::Parameter("missing state".to_string()));
    };
    let state = CtdState::from_name(name)
        .ok_or_else(|| DriverError::Parameter(format!("unknown protocol state '{name}'")))?;
    Ok(Outcome::transition(state, json!(state.name())))
}

fn get(core: &mut Core, args: &ProtocolArgs) -> Step {
    let ProtocolArgs::Get(names) = args else {
        return Err(DriverError::Parameter("missing parameter names".to_string()));
    };
    Ok(Outcome::stay(Value::Object(core.resolve_get(names)?)))
}

fn set(core: &mut Core, args: &ProtocolArgs) -> Step {
    let ProtocolArgs::Set { params, timeout } = args else {
        return Err(DriverError::Parameter("missing parameters".to_string()));
    };
    core.check_set(params)?;
    for (name, value) in params {
        core.do_cmd_resp(&format!("{name}={value}"), &[PROMPT], *timeout)?;
    }
    core.update_params(params.clone());
    Ok(Outcome::stay(Value::Null))
}

fn acquire_status(core: &mut Core, args: &ProtocolArgs) -> Step {
    let response = core.do_cmd_resp("ds", &[PROMPT], timeout_of(args))?;
    Ok(Outcome::stay(json!(response.text.trim_end())))
}

fn start_autosample(core: &mut Core, args: &ProtocolArgs) -> Step {
    core.do_cmd_resp("startnow", &[PROMPT], timeout_of(args))?;
    Ok(Outcome::transition(CtdState::Autosample, Value::Null))
}

fn stop_autosample(core: &mut Core, args: &ProtocolArgs) -> Step {
    core.do_cmd_resp("stop", &[PROMPT], timeout_of(args))?;
    Ok(Outcome::transition(CtdState::Command, Value::Null))
}

fn start_direct(_: &mut Core, _: &ProtocolArgs) -> Step {
    Ok(Outcome::transition(CtdState::DirectAccess, Value::Null))
}

fn execute_direct(core: &mut Core, args: &ProtocolArgs) -> Step {
    let ProtocolArgs::Direct(data) = args else {
        return Err(DriverError::Parameter("missing direct access data".to_string()));
    };
    core.send(data)?;
    Ok(Outcome::stay(Value::Null))
}

fn stop_direct(_: &mut Core, _: &ProtocolArgs) -> Step {
    Ok(Outcome::transition(CtdState::Command, Value::Null))
}

/// Entering COMMAND after direct access puts the snapshotted parameters
/// back on the instrument.
fn command_enter(core: &mut Core, args: &ProtocolArgs) -> Step {
    if let Some(snapshot) = core.take_direct_access_config() {
        for (name, value) in &snapshot {
            core.do_cmd_resp(&format!("{name}={value}"), &[PROMPT], Duration::from_secs(1))?;
        }
        core.update_params(snapshot);
    }
    enter(core, args)
}

/// A CTD that streams `T=<temperature>` lines.
pub struct CtdProtocol {
    core: Core,
    fsm: ProtocolFsm<CtdState, CtdEvent, Core>,
}

impl CtdProtocol {
    pub fn new(context: ProtocolContext) -> DriverResult<Self> {
        use CtdEvent as E;
        use CtdState as S;

        let sieve = RegexSieve::new([r"T=-?\d+\.\d+\r\n"])
            .map_err(|e| DriverError::Parameter(e.to_string()))?;
        let mut params = ParamMap::new();
        params.insert("interval".to_string(), json!(10));
        params.insert("pump_on".to_string(), json!(true));
        let core = Arc::new(
            ProtocolCore::new(context, sieve)
                .with_parameters(params)
                .with_direct_access_params(["interval"]),
        );

        let mut builder = FsmBuilder::new()
            .states(S::ALL.iter().copied())
            .events(E::ALL.iter().copied())
            .enter_event(E::Enter)
            .exit_event(E::Exit)
            .handler(S::Unknown, E::Discover, discover)
            .handler(S::Unknown, E::ForceState, force_state)
            .handler(S::Command, E::Get, get)
            .handler(S::Command, E::Set, set)
            .handler(S::Command, E::AcquireStatus, acquire_status)
            .handler(S::Command, E::StartAutosample, start_autosample)
            .handler(S::Command, E::StartDirect, start_direct)
            .handler(S::Autosample, E::Get, get)
            .handler(S::Autosample, E::StopAutosample, stop_autosample)
            .handler(S::DirectAccess, E::ExecuteDirect, execute_direct)
            .handler(S::DirectAccess, E::StopDirect, stop_direct)
            .handler(S::Command, E::Enter, command_enter);
        for state in [S::Unknown, S::Autosample, S::DirectAccess] {
            builder = builder.handler(state, E::Enter, enter);
        }

        let fsm = builder.build_thread_safe(Arc::clone(&core))?;
        fsm.start(S::Unknown, ProtocolArgs::None)?;
        Ok(Self { core, fsm })
    }

    pub fn factory(context: ProtocolContext) -> DriverResult<Arc<dyn Protocol>> {
        Ok(Arc::new(Self::new(context)?))
    }

    fn state(&self) -> CtdState {
        self.fsm.current_state().unwrap_or(CtdState::Unknown)
    }
}

impl Protocol for CtdProtocol {
    fn core(&self) -> &ProtocolCore {
        &self.core
    }

    fn current_state(&self) -> String {
        self.state().name().to_string()
    }

    fn on_event(&self, event: &str, args: ProtocolArgs) -> DriverResult<Value> {
        dispatch_named(&self.fsm, event, args)
    }

    fn capabilities(&self, current_state_only: bool) -> Vec<String> {
        token_names(self.fsm.get_events(current_state_only))
    }

    fn got_data(&self, packet: Packet) {
        if self.state() == CtdState::DirectAccess {
            self.core.bus().direct_access(&packet.data);
            return;
        }
        for chunk in self.core.accept(&packet) {
            self.got_chunk(chunk);
        }
    }

    fn got_chunk(&self, chunk: Chunk) {
        let text = String::from_utf8_lossy(&chunk.data);
        let Some(value) = text
            .trim_end()
            .strip_prefix("T=")
            .and_then(|v| v.parse::<f64>().ok())
        else {
            return;
        };
        self.core.bus().sample(json!({
            "temperature": value,
            "timestamp": chunk.timestamp.to_rfc3339(),
        }));
    }

    fn initialize_scheduler(&self) -> DriverResult<()> {
        self.core.bus().result(json!("scheduler ready"));
        Ok(())
    }

    fn apply_startup_params(&self) -> DriverResult<()> {
        let known = self.core.cached_config();
        let values: ParamMap = self
            .core
            .init_values()
            .into_iter()
            .filter(|(name, _)| known.contains_key(name))
            .collect();
        self.core.update_params(values);
        Ok(())
    }

    fn config_metadata(&self) -> DriverResult<Value> {
        Ok(json!({ "parameters": self.core.parameter_names() }))
    }
}

/// Records every event a driver publishes.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<DriverAsyncEvent>>>);

impl EventLog {
    pub fn sink(&self) -> impl Fn(DriverAsyncEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |event: DriverAsyncEvent| events.lock().push(event)
    }

    pub fn values(&self, kind: DriverEventKind) -> Vec<Value> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.value.clone())
            .collect()
    }

    pub fn count(&self, kind: DriverEventKind) -> usize {
        self.values(kind).len()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// A driver whose port agent transports are all `transport`.
pub fn driver_with(transport: Arc<MockTransport>, log: &EventLog) -> SingleConnectionDriver {
    init_tracing();
    SingleConnectionDriver::builder()
        .transport_factory(move |_: &PortAgentConfig| -> DriverResult<Arc<dyn Transport>> {
            Ok(transport.clone() as Arc<dyn Transport>)
        })
        .protocol_factory(CtdProtocol::factory)
        .event_sink(log.sink())
        .build()
        .unwrap()
}

/// A connected driver talking to an answering instrument.
pub fn connected(log: &EventLog) -> (SingleConnectionDriver, Arc<MockTransport>) {
    let transport = MockTransport::instrument();
    let driver = driver_with(Arc::clone(&transport), log);
    driver
        .configure(&json!({"addr": "localhost", "port": 4001}))
        .unwrap();
    driver.connect(None).unwrap();
    (driver, transport)
}
