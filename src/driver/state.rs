//! Connection-level vocabulary of a single-connection driver.

use crate::core::Token;
use crate::token_enum;
use std::fmt;

/// Wildcard accepted by `get_resource` in place of a parameter list.
pub const DRIVER_PARAMETER_ALL: &str = "DRIVER_PARAMETER_ALL";

/// Value of the agent event emitted when the transport drops.
pub const AGENT_EVENT_LOST_CONNECTION: &str = "RESOURCE_AGENT_EVENT_LOST_CONNECTION";

token_enum! {
    /// States of the connection machine.
    pub enum ConnectionState {
        Unconfigured => "DRIVER_STATE_UNCONFIGURED",
        Disconnected => "DRIVER_STATE_DISCONNECTED",
        Connected => "DRIVER_STATE_CONNECTED",
    }
}

token_enum! {
    /// Events understood by the connection machine.
    ///
    /// The protocol-facing events share their wire names with the protocol
    /// machine's vocabulary, so forwarding is a matter of passing the name on.
    pub enum ConnectionEvent {
        Enter => "DRIVER_EVENT_ENTER",
        Exit => "DRIVER_EVENT_EXIT",
        Initialize => "DRIVER_EVENT_INITIALIZE",
        Configure => "DRIVER_EVENT_CONFIGURE",
        Connect => "DRIVER_EVENT_CONNECT",
        Disconnect => "DRIVER_EVENT_DISCONNECT",
        ConnectionLost => "DRIVER_CONNECTION_LOST",
        Discover => "DRIVER_EVENT_DISCOVER",
        Get => "DRIVER_EVENT_GET",
        Set => "DRIVER_EVENT_SET",
        Execute => "DRIVER_EVENT_EXECUTE",
        ForceState => "DRIVER_FORCE_STATE",
        StartDirect => "DRIVER_EVENT_START_DIRECT",
        StopDirect => "DRIVER_EVENT_STOP_DIRECT",
        ExecuteDirect => "EXECUTE_DIRECT",
    }
}

impl ConnectionEvent {
    /// Events forwarded verbatim into the protocol machine while connected.
    pub const FORWARDED: &'static [ConnectionEvent] = &[
        ConnectionEvent::Discover,
        ConnectionEvent::Get,
        ConnectionEvent::Set,
        ConnectionEvent::ForceState,
        ConnectionEvent::StopDirect,
        ConnectionEvent::ExecuteDirect,
    ];
}

/// The single state a caller sees, regardless of which machine owns it.
///
/// Before the driver is connected this is the connection state; once
/// connected it is whatever state the protocol machine reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceState {
    Connection(ConnectionState),
    Protocol(String),
}

impl ResourceState {
    pub fn name(&self) -> &str {
        match self {
            Self::Connection(state) => state.name(),
            Self::Protocol(state) => state,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
