//! Error types shared by the machines and the driver layer.
//!
//! [`FsmError`] is what a machine raises on its own behalf: an unknown event,
//! an event with no handler in the current state, an undeclared initial state.
//! Handler errors are never wrapped; they pass through the machine untouched.
//!
//! [`DriverError`] is the taxonomy every public driver operation reports:
//!
//! - **State**: the requested operation is not valid in the current state
//! - **Parameter**: malformed configuration or get/set arguments, raised
//!   before any transition is attempted
//! - **Connection**: the transport could not be opened
//! - **Timeout**: a blocking instrument interaction passed its deadline
//! - **NotImplemented**: a hook that the concrete driver or protocol never
//!   supplied
//! - **TestMode**: a test-only operation invoked with test mode disabled

use crate::builder::BuildError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a state machine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsmError {
    #[error("event '{event}' is not recognized by this machine")]
    UnknownEvent { event: String },

    #[error("event '{event}' is reserved for state entry and exit")]
    PseudoEvent { event: String },

    #[error("state '{state}' is not declared by this machine")]
    UnknownState { state: String },

    #[error("command '{event}' is not handled in state '{state}'")]
    Unhandled { state: String, event: String },

    #[error("machine has not been started")]
    NotStarted,
}

/// Errors surfaced by driver and protocol operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Invalid event for the current state, or an unrecognized event
    #[error(transparent)]
    State(#[from] FsmError),

    /// Malformed configuration or command arguments
    #[error("invalid parameter: {0}")]
    Parameter(String),

    /// The transport could not be opened
    #[error("connection failed: {0}")]
    Connection(String),

    /// A blocking instrument interaction passed its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A hook that was never supplied by the concrete driver or protocol
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A test-only operation was invoked with test mode disabled
    #[error("operation is only available in test mode")]
    TestMode,

    /// The instrument or protocol reported a failure
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A machine could not be assembled from its handler table
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Short, stable label for the error kind, used in driver events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Parameter(_) => "parameter",
            Self::Connection(_) => "connection",
            Self::Timeout(_) => "timeout",
            Self::NotImplemented(_) => "not_implemented",
            Self::TestMode => "test_mode",
            Self::Protocol(_) => "protocol",
            Self::Build(_) => "build",
            Self::Io(_) => "io",
        }
    }
}

/// Convenience alias for results using [`DriverError`].
pub type DriverResult<T> = Result<T, DriverError>;
