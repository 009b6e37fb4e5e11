//! Asynchronous driver events and the bus that publishes them.

use crate::core::StateWatch;
use crate::driver::protocol::Protocol;
use crate::driver::state::{ConnectionState, ResourceState, AGENT_EVENT_LOST_CONNECTION};
use crate::error::DriverError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

/// Kinds of event a driver publishes to its agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverEventKind {
    StateChange,
    ConfigChange,
    Sample,
    Error,
    Result,
    DirectAccess,
    AgentEvent,
}

/// One event published by a driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverAsyncEvent {
    pub id: Uuid,
    pub kind: DriverEventKind,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

impl DriverAsyncEvent {
    pub fn new(kind: DriverEventKind, value: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            value,
            timestamp: Utc::now(),
        }
    }
}

/// Receiver of driver events, usually the agent.
pub type EventSink = Arc<dyn Fn(DriverAsyncEvent) + Send + Sync>;

/// The single publishing primitive shared by the driver and its protocol.
///
/// Payloads that describe current state are computed when the event is
/// emitted, not when the emitter decided to emit it.
#[derive(Clone)]
pub struct DriverEventBus {
    sink: EventSink,
    connection: StateWatch<ConnectionState>,
    protocol: Arc<RwLock<Option<Weak<dyn Protocol>>>>,
}

impl DriverEventBus {
    pub(crate) fn new(sink: EventSink, connection: StateWatch<ConnectionState>) -> Self {
        Self {
            sink,
            connection,
            protocol: Arc::new(RwLock::new(None)),
        }
    }

    /// Connection state until connected, protocol state afterwards.
    pub fn resource_state(&self) -> ResourceState {
        let connection = self
            .connection
            .get()
            .unwrap_or(ConnectionState::Unconfigured);
        if connection == ConnectionState::Connected {
            if let Some(protocol) = self.protocol() {
                return ResourceState::Protocol(protocol.current_state());
            }
        }
        ResourceState::Connection(connection)
    }

    pub fn emit(&self, kind: DriverEventKind, value: Value) {
        let event = DriverAsyncEvent::new(kind, value);
        debug!(id = %event.id, kind = ?event.kind, "driver event");
        (self.sink)(event);
    }

    /// Publish the resource state as it is right now.
    pub fn state_change(&self) {
        let state = self.resource_state();
        self.emit(DriverEventKind::StateChange, json!(state.name()));
    }

    /// Publish the protocol's full cached configuration.
    pub fn config_change(&self) {
        let config = self
            .protocol()
            .map(|protocol| protocol.cached_config())
            .unwrap_or_default();
        self.emit(DriverEventKind::ConfigChange, Value::Object(config));
    }

    pub fn sample(&self, sample: Value) {
        self.emit(DriverEventKind::Sample, sample);
    }

    pub fn result(&self, result: Value) {
        self.emit(DriverEventKind::Result, result);
    }

    pub fn error(&self, error: &DriverError) {
        self.emit(
            DriverEventKind::Error,
            json!({ "kind": error.kind(), "message": error.to_string() }),
        );
    }

    /// Echo instrument output to a direct access session.
    pub fn direct_access(&self, data: &[u8]) {
        self.emit(
            DriverEventKind::DirectAccess,
            Value::String(String::from_utf8_lossy(data).into_owned()),
        );
    }

    pub fn agent_lost_connection(&self) {
        self.emit(DriverEventKind::AgentEvent, json!(AGENT_EVENT_LOST_CONNECTION));
    }

    pub(crate) fn attach_protocol(&self, protocol: &Arc<dyn Protocol>) {
        *self.protocol.write() = Some(Arc::downgrade(protocol));
    }

    pub(crate) fn detach_protocol(&self) {
        *self.protocol.write() = None;
    }

    fn protocol(&self) -> Option<Arc<dyn Protocol>> {
        self.protocol.read().as_ref().and_then(Weak::upgrade)
    }
}

impl fmt::Debug for DriverEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverEventBus")
            .field("resource_state", &self.resource_state())
            .finish_non_exhaustive()
    }
}
