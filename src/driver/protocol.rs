//! The protocol seam: instrument-specific behavior behind its own machine.
//!
//! A protocol object exists only while the driver is connected. It owns a
//! [`ThreadSafeFsm`] over instrument states and events, and receives the
//! events the connection machine forwards by wire name.

use crate::chunker::Chunk;
use crate::core::Token;
use crate::driver::events::DriverEventBus;
use crate::driver::transport::{Packet, Transport};
use crate::error::{DriverError, DriverResult, FsmError};
use crate::fsm::ThreadSafeFsm;
use crate::protocol::ProtocolCore;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Parameter name to value mapping used for get/set and startup config.
pub type ParamMap = Map<String, Value>;

/// Arguments carried by an event into the protocol machine.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolArgs {
    None,
    Discover { timeout: Duration },
    Get(Vec<String>),
    Set { params: ParamMap, timeout: Duration },
    Execute { args: Vec<Value>, timeout: Duration },
    Direct(Vec<u8>),
    ForceState(String),
}

/// Machine type protocols use for their own state.
pub type ProtocolFsm<S, E, C> = ThreadSafeFsm<S, E, C, ProtocolArgs, Value, DriverError>;

/// Instrument-specific behavior driven by the connection machine.
///
/// Only the four required methods depend on the instrument. The rest delegate
/// to the shared [`ProtocolCore`] and can be overridden when an instrument
/// needs something different.
pub trait Protocol: Send + Sync {
    fn core(&self) -> &ProtocolCore;

    /// Wire name of the protocol machine's current state.
    fn current_state(&self) -> String;

    /// Raise `event`, by wire name, on the protocol machine.
    fn on_event(&self, event: &str, args: ProtocolArgs) -> DriverResult<Value>;

    /// Wire names of the events the protocol machine handles.
    fn capabilities(&self, current_state_only: bool) -> Vec<String>;

    /// Transport data callback. Feeds the chunker and hands out each chunk.
    fn got_data(&self, packet: Packet) {
        for chunk in self.core().accept(&packet) {
            self.got_chunk(chunk);
        }
    }

    fn got_raw(&self, packet: Packet) {
        trace!(len = packet.data.len(), "raw data");
    }

    /// Extract samples from one complete record.
    fn got_chunk(&self, chunk: Chunk) {
        debug!(len = chunk.data.len(), "chunk ignored");
    }

    fn parameter_names(&self) -> Vec<String> {
        self.core().parameter_names()
    }

    fn direct_access_params(&self) -> Vec<String> {
        self.core().direct_access_params().to_vec()
    }

    fn store_direct_access_config(&self, config: ParamMap) {
        self.core().store_direct_access_config(config);
    }

    fn enable_da_initialization(&self) {
        self.core().enable_da_initialization();
    }

    fn set_init_params(&self, config: &ParamMap) -> DriverResult<()> {
        self.core().set_init_params(config)
    }

    /// Called by the driver after CONNECT, once the startup config is set.
    fn initialize_scheduler(&self) -> DriverResult<()> {
        Ok(())
    }

    fn apply_startup_params(&self) -> DriverResult<()> {
        Err(DriverError::NotImplemented(
            "apply_startup_params".to_string(),
        ))
    }

    fn cached_config(&self) -> ParamMap {
        self.core().cached_config()
    }

    fn config_metadata(&self) -> DriverResult<Value> {
        Err(DriverError::NotImplemented("config_metadata".to_string()))
    }
}

/// What a protocol is built from when the driver connects.
#[derive(Clone)]
pub struct ProtocolContext {
    pub transport: Arc<dyn Transport>,
    pub bus: DriverEventBus,
}

/// Builds the protocol object on CONNECT.
pub trait ProtocolFactory: Send + Sync {
    fn build(&self, context: ProtocolContext) -> DriverResult<Arc<dyn Protocol>>;
}

impl<F> ProtocolFactory for F
where
    F: Fn(ProtocolContext) -> DriverResult<Arc<dyn Protocol>> + Send + Sync,
{
    fn build(&self, context: ProtocolContext) -> DriverResult<Arc<dyn Protocol>> {
        self(context)
    }
}

/// Factory used when a driver is built without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProtocolFactory;

impl ProtocolFactory for NoProtocolFactory {
    fn build(&self, _context: ProtocolContext) -> DriverResult<Arc<dyn Protocol>> {
        Err(DriverError::NotImplemented("build_protocol".to_string()))
    }
}

/// Raise an event given by wire name on a protocol machine.
///
/// A name outside `E`'s vocabulary fails with [`FsmError::UnknownEvent`].
pub fn dispatch_named<S, E, C>(
    fsm: &ProtocolFsm<S, E, C>,
    event: &str,
    args: ProtocolArgs,
) -> DriverResult<Value>
where
    S: Token,
    E: Token,
{
    let token = E::from_name(event).ok_or_else(|| FsmError::UnknownEvent {
        event: event.to_string(),
    })?;
    fsm.on_event(token, args)
}

/// Wire names of `tokens`.
pub fn token_names<T: Token>(tokens: impl IntoIterator<Item = T>) -> Vec<String> {
    tokens.into_iter().map(|t| t.name().to_string()).collect()
}
