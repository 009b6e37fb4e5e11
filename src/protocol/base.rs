//! State every protocol shares, whatever the instrument.

use crate::chunker::{Chunk, Chunker, Sieve};
use crate::driver::events::DriverEventBus;
use crate::driver::protocol::{ParamMap, ProtocolContext};
use crate::driver::state::DRIVER_PARAMETER_ALL;
use crate::driver::transport::{Packet, Transport};
use crate::error::{DriverError, DriverResult};
use crate::protocol::response::{Response, ResponseBuffer};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Key of the parameter section in a startup configuration.
pub const STARTUP_PARAMETERS_KEY: &str = "parameters";

/// Shared base of a protocol object.
///
/// Holds the transport handle, the chunk pipeline, the prompt/response
/// buffer used by [`do_cmd_resp`](Self::do_cmd_resp), the parameter cache,
/// startup values and the direct access snapshot.
pub struct ProtocolCore {
    transport: Arc<dyn Transport>,
    bus: DriverEventBus,
    newline: String,
    chunker: Mutex<Chunker>,
    responses: ResponseBuffer,
    params: RwLock<ParamMap>,
    init_values: RwLock<ParamMap>,
    direct_access_params: Vec<String>,
    da_config: RwLock<ParamMap>,
    da_initialization: AtomicBool,
}

impl ProtocolCore {
    pub fn new(context: ProtocolContext, sieve: impl Sieve + 'static) -> Self {
        Self {
            transport: context.transport,
            bus: context.bus,
            newline: "\r\n".to_string(),
            chunker: Mutex::new(Chunker::new(sieve)),
            responses: ResponseBuffer::new(),
            params: RwLock::new(ParamMap::new()),
            init_values: RwLock::new(ParamMap::new()),
            direct_access_params: Vec::new(),
            da_config: RwLock::new(ParamMap::new()),
            da_initialization: AtomicBool::new(false),
        }
    }

    /// Line terminator appended to every command. Defaults to `"\r\n"`.
    pub fn with_newline(mut self, newline: impl Into<String>) -> Self {
        self.newline = newline.into();
        self
    }

    /// Declare the parameters and their initial cached values.
    pub fn with_parameters(self, params: ParamMap) -> Self {
        *self.params.write() = params;
        self
    }

    /// Parameters snapshotted before direct access and restored after it.
    pub fn with_direct_access_params<I, P>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.direct_access_params = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn bus(&self) -> &DriverEventBus {
        &self.bus
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn send(&self, data: &[u8]) -> DriverResult<usize> {
        trace!(len = data.len(), "sending");
        self.transport.send(data)
    }

    /// Send `command` followed by the newline and block for a prompt.
    ///
    /// # Errors
    ///
    /// [`DriverError::Timeout`] if none of `prompts` is received within
    /// `timeout`, or whatever the transport reports for the send.
    pub fn do_cmd_resp(
        &self,
        command: &str,
        prompts: &[&str],
        timeout: Duration,
    ) -> DriverResult<Response> {
        self.responses.clear();
        let line = format!("{command}{}", self.newline);
        self.send(line.as_bytes())?;
        let response = self.responses.wait_for(prompts, timeout)?;
        debug!(command, prompt = %response.prompt, "command answered");
        Ok(response)
    }

    /// Send `command` followed by the newline without waiting for a reply.
    pub fn do_cmd_no_resp(&self, command: &str) -> DriverResult<()> {
        let line = format!("{command}{}", self.newline);
        self.send(line.as_bytes()).map(|_| ())
    }

    /// Take in a packet from the transport.
    ///
    /// The text goes to the response buffer; the bytes go through the
    /// chunker. Complete records are returned in stream order.
    pub fn accept(&self, packet: &Packet) -> Vec<Chunk> {
        self.responses.push(&String::from_utf8_lossy(&packet.data));

        let mut chunker = self.chunker.lock();
        chunker.add_chunk(&packet.data, packet.timestamp);
        while let Some(noise) = chunker.next_non_data() {
            trace!(len = noise.data.len(), "discarding non-data bytes");
        }
        std::iter::from_fn(|| chunker.next_data()).collect()
    }

    /// Drop any partially received records.
    pub fn clear_buffers(&self) {
        self.chunker.lock().clean();
        self.responses.clear();
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.params.read().keys().cloned().collect()
    }

    pub fn cached_config(&self) -> ParamMap {
        self.params.read().clone()
    }

    pub fn param(&self, name: &str) -> Option<Value> {
        self.params.read().get(name).cloned()
    }

    /// Values of the requested parameters from the cache.
    ///
    /// [`DRIVER_PARAMETER_ALL`] anywhere in `names` selects every parameter.
    pub fn resolve_get(&self, names: &[String]) -> DriverResult<ParamMap> {
        let params = self.params.read();
        if names.iter().any(|n| n == DRIVER_PARAMETER_ALL) {
            return Ok(params.clone());
        }
        names
            .iter()
            .map(|name| {
                params
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
                    .ok_or_else(|| DriverError::Parameter(format!("unknown parameter '{name}'")))
            })
            .collect()
    }

    /// Check that every key of `params` is a known parameter.
    pub fn check_set(&self, params: &ParamMap) -> DriverResult<()> {
        let known = self.params.read();
        match params.keys().find(|name| !known.contains_key(*name)) {
            Some(name) => Err(DriverError::Parameter(format!(
                "unknown parameter '{name}'"
            ))),
            None => Ok(()),
        }
    }

    /// Merge `values` into the cache, publishing a config change if anything
    /// changed. Returns whether it did.
    pub fn update_params(&self, values: ParamMap) -> bool {
        let changed = {
            let mut params = self.params.write();
            let mut changed = false;
            for (name, value) in values {
                if params.get(&name) != Some(&value) {
                    params.insert(name, value);
                    changed = true;
                }
            }
            changed
        };
        if changed {
            self.bus.config_change();
        }
        changed
    }

    /// Record startup values from a driver startup configuration.
    ///
    /// Values live under the `"parameters"` key; a configuration without it
    /// clears nothing and sets nothing.
    pub fn set_init_params(&self, config: &ParamMap) -> DriverResult<()> {
        if let Some(values) = startup_parameters(config)? {
            let mut init = self.init_values.write();
            for (name, value) in values {
                init.insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }

    pub fn init_values(&self) -> ParamMap {
        self.init_values.read().clone()
    }

    pub fn direct_access_params(&self) -> &[String] {
        &self.direct_access_params
    }

    pub fn store_direct_access_config(&self, config: ParamMap) {
        debug!(params = config.len(), "stored direct access config");
        *self.da_config.write() = config;
    }

    pub fn enable_da_initialization(&self) {
        self.da_initialization.store(true, Ordering::Release);
    }

    /// The snapshot taken before direct access, if it still needs restoring.
    ///
    /// Clears the restore flag, so the snapshot is handed out once.
    pub fn take_direct_access_config(&self) -> Option<ParamMap> {
        if self.da_initialization.swap(false, Ordering::AcqRel) {
            Some(self.da_config.read().clone())
        } else {
            None
        }
    }
}

/// The startup values of a driver startup configuration, if it carries any.
///
/// A missing or null `"parameters"` entry means none; anything but a mapping
/// is a [`DriverError::Parameter`].
pub fn startup_parameters(config: &ParamMap) -> DriverResult<Option<&ParamMap>> {
    match config.get(STARTUP_PARAMETERS_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(values)) => Ok(Some(values)),
        Some(_) => Err(DriverError::Parameter(format!(
            "'{STARTUP_PARAMETERS_KEY}' must be a mapping"
        ))),
    }
}

impl fmt::Debug for ProtocolCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolCore")
            .field("newline", &self.newline)
            .field("parameters", &self.params.read().len())
            .field("direct_access_params", &self.direct_access_params)
            .finish_non_exhaustive()
    }
}
