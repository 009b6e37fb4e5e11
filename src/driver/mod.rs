//! The two-tier driver: a connection machine wrapping a protocol machine.
//!
//! [`SingleConnectionDriver`] is the public façade. It owns the connection
//! machine (UNCONFIGURED, DISCONNECTED, CONNECTED), builds a transport on
//! CONFIGURE and a [`Protocol`] on CONNECT, and forwards instrument commands
//! to the protocol's own machine while connected.
//!
//! Transport callbacks arrive on the transport's thread. Data goes straight
//! to the protocol; a lost connection is queued to a worker thread that
//! raises CONNECTION_LOST at most once per disconnection.

pub mod config;
pub mod connection;
pub mod events;
pub mod protocol;
pub mod single;
pub mod snapshot;
pub mod state;
pub mod transport;

pub use config::{ConfigViolation, ConnectionConfig, PortAgentConfig};
pub use connection::{ConnectionFsm, DriverArgs, DriverContext};
pub use events::{DriverAsyncEvent, DriverEventBus, DriverEventKind, EventSink};
pub use protocol::{
    dispatch_named, token_names, NoProtocolFactory, ParamMap, Protocol, ProtocolArgs,
    ProtocolContext, ProtocolFactory, ProtocolFsm,
};
pub use single::{Capabilities, DriverBuilder, SingleConnectionDriver, DEFAULT_TIMEOUT};
pub use snapshot::{DriverSnapshot, SnapshotError, SNAPSHOT_VERSION};
pub use state::{
    ConnectionEvent, ConnectionState, ResourceState, AGENT_EVENT_LOST_CONNECTION,
    DRIVER_PARAMETER_ALL,
};
pub use transport::{
    ExceptionCallback, LostConnectionCallback, NoTransportFactory, Packet, PacketCallback,
    Transport, TransportCallbacks, TransportFactory,
};
