//! The transport seam: whatever relays bytes to and from the instrument.

use crate::driver::config::PortAgentConfig;
use crate::error::{DriverError, DriverResult};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// A block of bytes delivered by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Packet {
    /// A packet stamped with the current time.
    pub fn now(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            timestamp: Utc::now(),
        }
    }
}

pub type PacketCallback = Arc<dyn Fn(Packet) + Send + Sync>;
pub type ExceptionCallback = Arc<dyn Fn(DriverError) + Send + Sync>;
pub type LostConnectionCallback = Arc<dyn Fn() + Send + Sync>;

/// Callbacks a transport invokes from its own thread(s).
#[derive(Clone)]
pub struct TransportCallbacks {
    /// Decoded instrument data
    pub on_data: PacketCallback,
    /// Raw bytes, for logging and direct access
    pub on_raw: PacketCallback,
    /// An I/O failure on the transport
    pub on_exception: ExceptionCallback,
    /// The connection is gone
    pub on_connection_lost: LostConnectionCallback,
}

impl fmt::Debug for TransportCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCallbacks").finish_non_exhaustive()
    }
}

/// A connection to the instrument, typically through a port agent.
///
/// Implementations are shared between the driver and the protocol, so every
/// method takes `&self`.
pub trait Transport: Send + Sync {
    /// Open the connection and start delivering to `callbacks`.
    fn init_comms(&self, callbacks: TransportCallbacks) -> DriverResult<()>;

    /// Close the connection. Callbacks must not fire after this returns.
    fn stop_comms(&self);

    /// Write `data` to the instrument, returning the number of bytes sent.
    fn send(&self, data: &[u8]) -> DriverResult<usize>;
}

/// Builds transports from a validated port agent endpoint.
pub trait TransportFactory: Send + Sync {
    fn build(&self, config: &PortAgentConfig) -> DriverResult<Arc<dyn Transport>>;
}

impl<F> TransportFactory for F
where
    F: Fn(&PortAgentConfig) -> DriverResult<Arc<dyn Transport>> + Send + Sync,
{
    fn build(&self, config: &PortAgentConfig) -> DriverResult<Arc<dyn Transport>> {
        self(config)
    }
}

/// Factory used when a driver is built without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransportFactory;

impl TransportFactory for NoTransportFactory {
    fn build(&self, config: &PortAgentConfig) -> DriverResult<Arc<dyn Transport>> {
        Err(DriverError::NotImplemented(format!(
            "no transport factory for port agent at {}:{}",
            config.addr, config.port
        )))
    }
}
