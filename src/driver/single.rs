//! The public face of a single-connection instrument driver.

use crate::core::{StateWatch, TransitionHistory, DEFAULT_HISTORY_CAPACITY};
use crate::driver::config::ConnectionConfig;
use crate::driver::connection::{
    connection_fsm, ConnectionFsm, DriverArgs, DriverContext, LostNotice,
};
use crate::driver::events::{DriverAsyncEvent, DriverEventBus, EventSink};
use crate::driver::protocol::{
    token_names, NoProtocolFactory, ParamMap, Protocol, ProtocolArgs, ProtocolFactory,
};
use crate::driver::snapshot::{DriverSnapshot, SNAPSHOT_VERSION};
use crate::driver::state::{ConnectionEvent, ConnectionState, ResourceState, DRIVER_PARAMETER_ALL};
use crate::driver::transport::{NoTransportFactory, Transport, TransportFactory};
use crate::error::{DriverError, DriverResult, FsmError};
use crate::protocol::startup_parameters;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deadline for instrument interactions when the caller gives none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// What a resource can do and be asked about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub commands: Vec<String>,
    pub parameters: Vec<String>,
}

/// Fluent builder for [`SingleConnectionDriver`].
pub struct DriverBuilder {
    transports: Arc<dyn TransportFactory>,
    protocols: Arc<dyn ProtocolFactory>,
    sink: EventSink,
    default_timeout: Duration,
    history_capacity: usize,
    test_mode: bool,
}

impl DriverBuilder {
    pub fn new() -> Self {
        Self {
            transports: Arc::new(NoTransportFactory),
            protocols: Arc::new(NoProtocolFactory),
            sink: Arc::new(|_: DriverAsyncEvent| {}),
            default_timeout: DEFAULT_TIMEOUT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            test_mode: false,
        }
    }

    /// How port agent transports are built on CONFIGURE.
    pub fn transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.transports = Arc::new(factory);
        self
    }

    /// How the protocol object is built on CONNECT (required to connect).
    pub fn protocol_factory(mut self, factory: impl ProtocolFactory + 'static) -> Self {
        self.protocols = Arc::new(factory);
        self
    }

    /// Receiver of every driver event.
    pub fn event_sink(mut self, sink: impl Fn(DriverAsyncEvent) + Send + Sync + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn test_mode(mut self, enabled: bool) -> Self {
        self.test_mode = enabled;
        self
    }

    /// Build the driver and start it in UNCONFIGURED.
    pub fn build(self) -> DriverResult<SingleConnectionDriver> {
        let id = Uuid::new_v4();
        let (lost_tx, lost_rx) = channel();

        let watch = StateWatch::new();
        let bus = DriverEventBus::new(self.sink, watch.clone());
        let context = DriverContext::new(
            bus.clone(),
            lost_tx.clone(),
            self.transports,
            self.protocols,
        );
        let fsm = Arc::new(connection_fsm(context, self.history_capacity, watch)?);
        spawn_lost_connection_worker(id, Arc::downgrade(&fsm), lost_rx)?;
        fsm.start(ConnectionState::Unconfigured, DriverArgs::None)?;
        info!(driver = %id, "driver started");

        Ok(SingleConnectionDriver {
            id,
            fsm,
            bus,
            lost_tx,
            test_mode: AtomicBool::new(self.test_mode),
            default_timeout: self.default_timeout,
        })
    }
}

impl Default for DriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Deliver queued lost-connection notifications to the connection machine.
///
/// Runs off the transport's callback thread, so teardown never reenters the
/// transport from inside its own callback. The worker holds the machine
/// weakly and exits on [`LostNotice::Shutdown`] or once the driver is gone.
fn spawn_lost_connection_worker(
    id: Uuid,
    fsm: Weak<ConnectionFsm>,
    lost_rx: Receiver<LostNotice>,
) -> DriverResult<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name(format!("connection-lost-{id}"))
        .spawn(move || {
            debug!(driver = %id, "lost-connection worker started");
            while let Ok(LostNotice::Session(session)) = lost_rx.recv() {
                let Some(fsm) = fsm.upgrade() else {
                    break;
                };
                if fsm.current_state() != Some(ConnectionState::Connected) {
                    debug!(driver = %id, session, "lost connection after disconnect, ignored");
                    continue;
                }
                if let Err(err) =
                    fsm.on_event(ConnectionEvent::ConnectionLost, DriverArgs::Lost(session))
                {
                    warn!(driver = %id, error = %err, "could not deliver lost connection");
                }
            }
            debug!(driver = %id, "lost-connection worker stopped");
        })?;
    Ok(handle)
}

/// A driver talking to one instrument over one connection.
///
/// Every command is raised as an event on the connection machine, which
/// forwards instrument commands to the protocol machine while connected.
/// Invalid commands for the current state fail with
/// [`DriverError::State`]; malformed arguments fail with
/// [`DriverError::Parameter`] before any event is raised.
///
/// Dropping the driver disconnects it and stops its lost-connection worker.
pub struct SingleConnectionDriver {
    id: Uuid,
    fsm: Arc<ConnectionFsm>,
    bus: DriverEventBus,
    lost_tx: Sender<LostNotice>,
    test_mode: AtomicBool,
    default_timeout: Duration,
}

impl SingleConnectionDriver {
    pub fn builder() -> DriverBuilder {
        DriverBuilder::new()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn events(&self) -> &DriverEventBus {
        &self.bus
    }

    fn raise(&self, event: ConnectionEvent, args: DriverArgs) -> DriverResult<Value> {
        debug!(driver = %self.id, event = %event, "raising event");
        self.fsm.on_event(event, args)
    }

    fn timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.default_timeout)
    }

    /// Return to UNCONFIGURED, dropping any transport.
    pub fn initialize(&self) -> DriverResult<()> {
        self.raise(ConnectionEvent::Initialize, DriverArgs::None)
            .map(|_| ())
    }

    /// Validate `config` and build the transport it describes.
    pub fn configure(&self, config: &Value) -> DriverResult<()> {
        let config = ConnectionConfig::from_value(config)?;
        self.raise(ConnectionEvent::Configure, DriverArgs::Configure(config))
            .map(|_| ())
    }

    /// Configure with a pre-built transport instead of a port agent endpoint.
    pub fn configure_transport(&self, transport: Arc<dyn Transport>) -> DriverResult<()> {
        self.raise(
            ConnectionEvent::Configure,
            DriverArgs::Configure(ConnectionConfig::Mock(transport)),
        )
        .map(|_| ())
    }

    /// Open the transport, build the protocol and record the startup config.
    ///
    /// The startup config is checked before CONNECT is raised. The
    /// protocol's scheduler is set up once the startup config is known.
    pub fn connect(&self, init_config: Option<ParamMap>) -> DriverResult<()> {
        let init_config = init_config.unwrap_or_default();
        startup_parameters(&init_config)?;
        self.raise(ConnectionEvent::Connect, DriverArgs::None)?;
        self.set_init_params(init_config)?;
        match self.current_protocol() {
            Some(protocol) => protocol.initialize_scheduler(),
            None => Ok(()),
        }
    }

    pub fn disconnect(&self) -> DriverResult<()> {
        self.raise(ConnectionEvent::Disconnect, DriverArgs::None)
            .map(|_| ())
    }

    /// Disconnect if connected. Safe to call in any state.
    pub fn shutdown(&self) -> DriverResult<()> {
        if self.connection_state() == ConnectionState::Connected {
            self.disconnect()?;
        }
        info!(driver = %self.id, "driver shut down");
        Ok(())
    }

    pub fn discover_state(&self, timeout: Option<Duration>) -> DriverResult<Value> {
        let timeout = self.timeout(timeout);
        self.raise(
            ConnectionEvent::Discover,
            DriverArgs::Protocol(ProtocolArgs::Discover { timeout }),
        )
    }

    /// Read parameters: [`DRIVER_PARAMETER_ALL`] or a list of names.
    pub fn get_resource(&self, params: &Value) -> DriverResult<Value> {
        let names = match params {
            Value::String(name) if name == DRIVER_PARAMETER_ALL => vec![name.clone()],
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        DriverError::Parameter(format!("parameter names must be strings, got {item}"))
                    })
                })
                .collect::<DriverResult<Vec<_>>>()?,
            other => {
                return Err(DriverError::Parameter(format!(
                    "get expects {DRIVER_PARAMETER_ALL} or a list of parameter names, got {other}"
                )))
            }
        };
        self.raise(ConnectionEvent::Get, DriverArgs::Protocol(ProtocolArgs::Get(names)))
    }

    /// Write parameters given as a non-empty mapping.
    pub fn set_resource(&self, params: &Value, timeout: Option<Duration>) -> DriverResult<Value> {
        let params = match params {
            Value::Object(map) if !map.is_empty() => map.clone(),
            other => {
                return Err(DriverError::Parameter(format!(
                    "set expects a non-empty mapping of parameters, got {other}"
                )))
            }
        };
        let timeout = self.timeout(timeout);
        self.raise(
            ConnectionEvent::Set,
            DriverArgs::Protocol(ProtocolArgs::Set { params, timeout }),
        )
    }

    /// Run a resource command on the protocol machine.
    pub fn execute_resource(
        &self,
        command: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> DriverResult<Value> {
        if command.is_empty() {
            return Err(DriverError::Parameter(
                "resource command must not be empty".to_string(),
            ));
        }
        let timeout = self.timeout(timeout);
        self.raise(
            ConnectionEvent::Execute,
            DriverArgs::Execute {
                command: command.to_string(),
                args: ProtocolArgs::Execute { args, timeout },
            },
        )
    }

    pub fn start_direct(&self) -> DriverResult<Value> {
        self.raise(ConnectionEvent::StartDirect, DriverArgs::Protocol(ProtocolArgs::None))
    }

    /// Pass bytes straight through to the instrument.
    pub fn execute_direct(&self, data: &[u8]) -> DriverResult<Value> {
        self.raise(
            ConnectionEvent::ExecuteDirect,
            DriverArgs::Protocol(ProtocolArgs::Direct(data.to_vec())),
        )
    }

    pub fn stop_direct(&self) -> DriverResult<Value> {
        self.raise(ConnectionEvent::StopDirect, DriverArgs::Protocol(ProtocolArgs::None))
    }

    pub fn set_test_mode(&self, enabled: bool) {
        self.test_mode.store(enabled, Ordering::Release);
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode.load(Ordering::Acquire)
    }

    /// Force the protocol machine into `state`. Test mode only.
    pub fn test_force_state(&self, state: &str) -> DriverResult<Value> {
        if !self.test_mode() {
            return Err(DriverError::TestMode);
        }
        self.raise(
            ConnectionEvent::ForceState,
            DriverArgs::Protocol(ProtocolArgs::ForceState(state.to_string())),
        )
    }

    /// Connection state while not connected, protocol state once connected.
    pub fn get_resource_state(&self) -> ResourceState {
        self.bus.resource_state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.fsm
            .current_state()
            .unwrap_or(ConnectionState::Unconfigured)
    }

    pub fn previous_connection_state(&self) -> Option<ConnectionState> {
        self.fsm.previous_state()
    }

    /// Commands and parameters available now, or in any state.
    ///
    /// While connected these come from the protocol; otherwise the commands
    /// are the connection events and there are no parameters.
    pub fn get_resource_capabilities(&self, current_state_only: bool) -> Capabilities {
        match self.current_protocol() {
            Some(protocol) => Capabilities {
                commands: protocol.capabilities(current_state_only),
                parameters: protocol.parameter_names(),
            },
            None => Capabilities {
                commands: token_names(self.fsm.get_events(current_state_only)),
                parameters: Vec::new(),
            },
        }
    }

    pub fn history(&self) -> TransitionHistory<ConnectionState, ConnectionEvent> {
        self.fsm.history()
    }

    pub fn get_init_params(&self) -> ParamMap {
        self.fsm.with_context(|ctx| ctx.startup_config.clone())
    }

    /// Record the startup configuration and pass it to the protocol, if any.
    pub fn set_init_params(&self, config: ParamMap) -> DriverResult<()> {
        startup_parameters(&config)?;
        let protocol = self.fsm.with_context(|ctx| {
            ctx.startup_config = config.clone();
            ctx.protocol.clone()
        });
        match protocol {
            Some(protocol) => protocol.set_init_params(&config),
            None => Ok(()),
        }
    }

    pub fn apply_startup_params(&self) -> DriverResult<()> {
        self.require_protocol("apply_startup_params")?
            .apply_startup_params()
    }

    pub fn get_cached_config(&self) -> DriverResult<ParamMap> {
        Ok(self.require_protocol("get_cached_config")?.cached_config())
    }

    pub fn get_config_metadata(&self) -> DriverResult<Value> {
        self.require_protocol("get_config_metadata")?
            .config_metadata()
    }

    /// Capture the driver's current state.
    pub fn snapshot(&self) -> DriverSnapshot {
        let (startup_config, protocol) = self
            .fsm
            .with_context(|ctx| (ctx.startup_config.clone(), ctx.protocol.clone()));
        DriverSnapshot {
            version: SNAPSHOT_VERSION,
            driver_id: self.id,
            timestamp: Utc::now(),
            connection_state: self.connection_state(),
            previous_state: self.fsm.previous_state(),
            resource_state: self.get_resource_state().name().to_string(),
            startup_config,
            cached_config: protocol.map(|p| p.cached_config()),
            history: self.fsm.history(),
        }
    }

    fn current_protocol(&self) -> Option<Arc<dyn Protocol>> {
        self.fsm.with_context(|ctx| ctx.protocol.clone())
    }

    fn require_protocol(&self, operation: &str) -> DriverResult<Arc<dyn Protocol>> {
        self.current_protocol().ok_or_else(|| {
            FsmError::Unhandled {
                state: self.connection_state().to_string(),
                event: operation.to_string(),
            }
            .into()
        })
    }
}

impl Drop for SingleConnectionDriver {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(driver = %self.id, error = %err, "disconnect on drop failed");
        }
        let _ = self.lost_tx.send(LostNotice::Shutdown);
    }
}

impl fmt::Debug for SingleConnectionDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleConnectionDriver")
            .field("id", &self.id)
            .field("connection_state", &self.connection_state())
            .field("test_mode", &self.test_mode())
            .finish_non_exhaustive()
    }
}
