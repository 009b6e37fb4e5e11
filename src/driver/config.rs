//! Connection configuration and its validation.
//!
//! Configuration arrives from the agent as a JSON mapping. Every rule is
//! checked and all violations are reported together, so a caller fixing a
//! bad configuration sees everything that is wrong in one round trip.

use crate::driver::transport::Transport;
use crate::error::{DriverError, DriverResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;
use thiserror::Error;

/// Endpoint of a port agent relaying the instrument connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAgentConfig {
    pub addr: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_port: Option<u16>,
}

/// A validated connection configuration.
#[derive(Clone)]
pub enum ConnectionConfig {
    /// Build a transport to a port agent through the driver's transport factory.
    PortAgent(PortAgentConfig),
    /// Use a pre-built transport as is. Meant for tests.
    Mock(Arc<dyn Transport>),
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortAgent(config) => f.debug_tuple("PortAgent").field(config).finish(),
            Self::Mock(_) => f.write_str("Mock(..)"),
        }
    }
}

/// A single broken configuration rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigViolation {
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' {reason}")]
    InvalidField { field: &'static str, reason: String },
}

type Check = Validation<(), NonEmptyVec<ConfigViolation>>;

impl ConnectionConfig {
    /// Validate a configuration mapping.
    ///
    /// Accepted keys are `addr` (non-empty string), `port` and the optional
    /// `cmd_port` (both in `1..=65535`). Anything else fails with
    /// [`DriverError::Parameter`] listing every violation.
    pub fn from_value(value: &Value) -> DriverResult<Self> {
        let Some(map) = value.as_object() else {
            return Err(DriverError::Parameter(
                "configuration must be a mapping".to_string(),
            ));
        };

        match validate(map) {
            Validation::Success(_) => {}
            Validation::Failure(violations) => {
                let message = violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(DriverError::Parameter(message));
            }
        }

        let config: PortAgentConfig = serde_json::from_value(value.clone())
            .map_err(|e| DriverError::Parameter(e.to_string()))?;
        Ok(Self::PortAgent(config))
    }
}

/// Check every rule, accumulating ALL violations.
fn validate(map: &Map<String, Value>) -> Check {
    let checks = vec![
        check_addr(map.get("addr")),
        check_port("port", map.get("port"), true),
        check_port("cmd_port", map.get("cmd_port"), false),
    ];
    Validation::all_vec(checks).map(|_| ())
}

fn check_addr(value: Option<&Value>) -> Check {
    match value {
        None => Validation::fail(ConfigViolation::MissingField { field: "addr" }),
        Some(Value::String(addr)) if !addr.trim().is_empty() => Validation::success(()),
        Some(Value::String(_)) => Validation::fail(ConfigViolation::InvalidField {
            field: "addr",
            reason: "must not be empty".to_string(),
        }),
        Some(other) => Validation::fail(ConfigViolation::InvalidField {
            field: "addr",
            reason: format!("must be a string, got {other}"),
        }),
    }
}

fn check_port(field: &'static str, value: Option<&Value>, required: bool) -> Check {
    match value {
        None if required => Validation::fail(ConfigViolation::MissingField { field }),
        None => Validation::success(()),
        Some(Value::Null) if !required => Validation::success(()),
        Some(value) => match value.as_u64() {
            Some(port) if (1..=u64::from(u16::MAX)).contains(&port) => Validation::success(()),
            _ => Validation::fail(ConfigViolation::InvalidField {
                field,
                reason: format!("must be a port number in 1..=65535, got {value}"),
            }),
        },
    }
}
