//! The connection machine: UNCONFIGURED, DISCONNECTED, CONNECTED.

use crate::builder::FsmBuilder;
use crate::core::{StateWatch, Token};
use crate::driver::config::ConnectionConfig;
use crate::driver::events::DriverEventBus;
use crate::driver::protocol::{
    ParamMap, Protocol, ProtocolArgs, ProtocolContext, ProtocolFactory,
};
use crate::driver::state::{ConnectionEvent, ConnectionState};
use crate::driver::transport::{Packet, Transport, TransportCallbacks, TransportFactory};
use crate::error::{DriverError, DriverResult};
use crate::fsm::{HandlerResult, Outcome, ThreadSafeFsm};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Arguments carried by a connection event.
#[derive(Clone, Debug)]
pub enum DriverArgs {
    None,
    Configure(ConnectionConfig),
    /// Arguments for an event forwarded into the protocol machine
    Protocol(ProtocolArgs),
    /// A resource command, forwarded into the protocol machine by name
    Execute { command: String, args: ProtocolArgs },
    /// A lost connection reported by the transport of the given session
    Lost(u64),
}

/// Messages for the lost-connection worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LostNotice {
    /// The transport of this session reported a lost connection
    Session(u64),
    /// The driver is going away
    Shutdown,
}

pub type ConnectionFsm =
    ThreadSafeFsm<ConnectionState, ConnectionEvent, DriverContext, DriverArgs, Value, DriverError>;

type Step = HandlerResult<ConnectionState, Value, DriverError>;

/// Everything the connection handlers operate on.
pub struct DriverContext {
    pub(crate) bus: DriverEventBus,
    /// Counts successful CONNECTs; stale lost notices carry an older value.
    pub(crate) session: u64,
    pub(crate) connection_lost: Arc<AtomicBool>,
    pub(crate) lost_tx: Sender<LostNotice>,
    pub(crate) transports: Arc<dyn TransportFactory>,
    pub(crate) protocols: Arc<dyn ProtocolFactory>,
    pub(crate) config: Option<ConnectionConfig>,
    pub(crate) connection: Option<Arc<dyn Transport>>,
    pub(crate) protocol: Option<Arc<dyn Protocol>>,
    pub(crate) startup_config: ParamMap,
}

impl DriverContext {
    pub(crate) fn new(
        bus: DriverEventBus,
        lost_tx: Sender<LostNotice>,
        transports: Arc<dyn TransportFactory>,
        protocols: Arc<dyn ProtocolFactory>,
    ) -> Self {
        Self {
            bus,
            session: 0,
            connection_lost: Arc::new(AtomicBool::new(true)),
            lost_tx,
            transports,
            protocols,
            config: None,
            connection: None,
            protocol: None,
            startup_config: ParamMap::new(),
        }
    }

    fn build_connection(&mut self, config: &ConnectionConfig) -> DriverResult<()> {
        let connection = match config {
            ConnectionConfig::PortAgent(endpoint) => {
                debug!(addr = %endpoint.addr, port = endpoint.port, "building port agent transport");
                self.transports.build(endpoint)?
            }
            ConnectionConfig::Mock(transport) => Arc::clone(transport),
        };
        self.connection = Some(connection);
        self.config = Some(config.clone());
        Ok(())
    }

    fn protocol(&self) -> DriverResult<&Arc<dyn Protocol>> {
        self.protocol
            .as_ref()
            .ok_or_else(|| DriverError::Protocol("no protocol while connected".to_string()))
    }

    /// Callbacks handed to the transport on CONNECT.
    ///
    /// Protocol callbacks hold a weak reference, so a transport that outlives
    /// the protocol delivers into nothing rather than keeping it alive. The
    /// lost-connection callback is bound to `session` and its own flag, so a
    /// late report from an old transport never touches a newer connection.
    fn callbacks(
        &self,
        protocol: &Arc<dyn Protocol>,
        session: u64,
        lost: &Arc<AtomicBool>,
    ) -> TransportCallbacks {
        let data_target = Arc::downgrade(protocol);
        let raw_target = Arc::downgrade(protocol);
        let bus = self.bus.clone();
        let lost = Arc::clone(lost);
        let lost_tx = self.lost_tx.clone();

        TransportCallbacks {
            on_data: Arc::new(move |packet: Packet| {
                if let Some(protocol) = data_target.upgrade() {
                    protocol.got_data(packet);
                }
            }),
            on_raw: Arc::new(move |packet: Packet| {
                if let Some(protocol) = raw_target.upgrade() {
                    protocol.got_raw(packet);
                }
            }),
            on_exception: Arc::new(move |err: DriverError| {
                error!(error = %err, "transport exception");
                bus.error(&err);
            }),
            on_connection_lost: Arc::new(move || notify_lost(session, &lost, &lost_tx)),
        }
    }
}

/// Queue one CONNECTION_LOST per disconnection.
///
/// Each session has its own flag, cleared on entry to CONNECTED and set on
/// entry to DISCONNECTED or UNCONFIGURED; only the notification that flips it
/// queues an event.
fn notify_lost(session: u64, lost: &AtomicBool, lost_tx: &Sender<LostNotice>) {
    if lost.swap(true, Ordering::AcqRel) {
        debug!(session, "lost connection already reported");
        return;
    }
    warn!(session, "transport reported lost connection");
    if lost_tx.send(LostNotice::Session(session)).is_err() {
        debug!(session, "driver gone, lost connection dropped");
    }
}

/// Build the connection machine with the handler table of a single-connection
/// driver.
pub(crate) fn connection_fsm(
    context: DriverContext,
    history_capacity: usize,
    watch: StateWatch<ConnectionState>,
) -> DriverResult<ConnectionFsm> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    let mut builder = FsmBuilder::new()
        .states(S::ALL.iter().copied())
        .events(E::ALL.iter().copied())
        .enter_event(E::Enter)
        .exit_event(E::Exit)
        .history_capacity(history_capacity)
        .state_watch(watch)
        .handler(S::Unconfigured, E::Enter, unconfigured_enter)
        .handler(S::Unconfigured, E::Initialize, |_: &mut DriverContext, _: &DriverArgs| {
            Ok(Outcome::stay(Value::Null))
        })
        .handler(S::Unconfigured, E::Configure, unconfigured_configure)
        .handler(S::Disconnected, E::Enter, disconnected_enter)
        .handler(S::Disconnected, E::Initialize, disconnected_initialize)
        .handler(S::Disconnected, E::Configure, disconnected_configure)
        .handler(S::Disconnected, E::Connect, disconnected_connect)
        .handler(S::Connected, E::Enter, connected_enter)
        .handler(S::Connected, E::Disconnect, connected_disconnect)
        .handler(S::Connected, E::ConnectionLost, connected_connection_lost)
        .handler(S::Connected, E::Execute, connected_execute)
        .handler(S::Connected, E::StartDirect, connected_start_direct);

    for &event in E::FORWARDED {
        builder = builder.handler(
            S::Connected,
            event,
            move |ctx: &mut DriverContext, args: &DriverArgs| connected_forward(ctx, event, args),
        );
    }

    Ok(builder.build_thread_safe(context)?)
}

fn unconfigured_enter(ctx: &mut DriverContext, _: &DriverArgs) -> Step {
    ctx.connection_lost.store(true, Ordering::Release);
    ctx.bus.state_change();
    Ok(Outcome::stay(Value::Null))
}

fn configuration(args: &DriverArgs) -> DriverResult<&ConnectionConfig> {
    match args {
        DriverArgs::Configure(config) => Ok(config),
        other => Err(DriverError::Parameter(format!(
            "configure expects a connection configuration, got {other:?}"
        ))),
    }
}

fn unconfigured_configure(ctx: &mut DriverContext, args: &DriverArgs) -> Step {
    ctx.build_connection(configuration(args)?)?;
    Ok(Outcome::transition(ConnectionState::Disconnected, Value::Null))
}

fn disconnected_enter(ctx: &mut DriverContext, _: &DriverArgs) -> Step {
    ctx.connection_lost.store(true, Ordering::Release);
    ctx.bus.state_change();
    Ok(Outcome::stay(Value::Null))
}

fn disconnected_initialize(ctx: &mut DriverContext, _: &DriverArgs) -> Step {
    ctx.connection = None;
    ctx.config = None;
    Ok(Outcome::transition(ConnectionState::Unconfigured, Value::Null))
}

fn disconnected_configure(ctx: &mut DriverContext, args: &DriverArgs) -> Step {
    ctx.build_connection(configuration(args)?)?;
    Ok(Outcome::stay(Value::Null))
}

fn disconnected_connect(ctx: &mut DriverContext, _: &DriverArgs) -> Step {
    let connection = ctx
        .connection
        .clone()
        .ok_or_else(|| DriverError::Connection("no transport configured".to_string()))?;

    let protocol = ctx.protocols.build(ProtocolContext {
        transport: Arc::clone(&connection),
        bus: ctx.bus.clone(),
    })?;

    let session = ctx.session + 1;
    let lost = Arc::new(AtomicBool::new(true));
    if let Err(err) = connection.init_comms(ctx.callbacks(&protocol, session, &lost)) {
        error!(error = %err, "failed to open transport");
        return Err(match err {
            DriverError::Connection(message) => DriverError::Connection(message),
            other => DriverError::Connection(other.to_string()),
        });
    }

    info!(session, "transport open");
    ctx.session = session;
    ctx.connection_lost = lost;
    ctx.bus.attach_protocol(&protocol);
    ctx.protocol = Some(protocol);
    Ok(Outcome::transition(ConnectionState::Connected, Value::Null))
}

fn connected_enter(ctx: &mut DriverContext, _: &DriverArgs) -> Step {
    ctx.connection_lost.store(false, Ordering::Release);
    ctx.bus.state_change();
    Ok(Outcome::stay(Value::Null))
}

fn teardown(ctx: &mut DriverContext) {
    if let Some(connection) = &ctx.connection {
        connection.stop_comms();
    }
    ctx.bus.detach_protocol();
    ctx.protocol = None;
}

fn connected_disconnect(ctx: &mut DriverContext, _: &DriverArgs) -> Step {
    teardown(ctx);
    info!("transport closed");
    Ok(Outcome::transition(ConnectionState::Disconnected, Value::Null))
}

fn connected_connection_lost(ctx: &mut DriverContext, args: &DriverArgs) -> Step {
    if let DriverArgs::Lost(session) = args {
        if *session != ctx.session {
            debug!(
                session = *session,
                current = ctx.session,
                "ignoring lost connection of an earlier session"
            );
            return Ok(Outcome::stay(Value::Null));
        }
    }
    teardown(ctx);
    warn!("connection lost, protocol dropped");
    ctx.bus.agent_lost_connection();
    Ok(Outcome::transition(ConnectionState::Disconnected, Value::Null))
}

fn protocol_args(args: &DriverArgs) -> ProtocolArgs {
    match args {
        DriverArgs::Protocol(args) | DriverArgs::Execute { args, .. } => args.clone(),
        DriverArgs::None | DriverArgs::Configure(_) | DriverArgs::Lost(_) => ProtocolArgs::None,
    }
}

fn connected_forward(ctx: &mut DriverContext, event: ConnectionEvent, args: &DriverArgs) -> Step {
    let result = ctx.protocol()?.on_event(event.name(), protocol_args(args))?;
    Ok(Outcome::stay(result))
}

fn connected_execute(ctx: &mut DriverContext, args: &DriverArgs) -> Step {
    let DriverArgs::Execute { command, args } = args else {
        return Err(DriverError::Parameter(
            "execute expects a resource command".to_string(),
        ));
    };
    let result = ctx.protocol()?.on_event(command, args.clone())?;
    Ok(Outcome::stay(result))
}

/// Snapshot the direct access parameters before handing the event on, so the
/// protocol can restore them when direct access ends.
fn connected_start_direct(ctx: &mut DriverContext, args: &DriverArgs) -> Step {
    let protocol = ctx.protocol()?;
    let cached = protocol.cached_config();
    let snapshot: ParamMap = protocol
        .direct_access_params()
        .into_iter()
        .filter_map(|name| cached.get(&name).cloned().map(|value| (name, value)))
        .collect();
    protocol.store_direct_access_config(snapshot);
    protocol.enable_da_initialization();

    let result = protocol.on_event(ConnectionEvent::StartDirect.name(), protocol_args(args))?;
    Ok(Outcome::stay(result))
}
