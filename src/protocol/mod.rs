//! Shared machinery for instrument protocols.
//!
//! A concrete protocol pairs a [`ProtocolCore`] with its own
//! [`ProtocolFsm`](crate::driver::ProtocolFsm) and implements
//! [`Protocol`](crate::driver::Protocol) on top of the two.

mod base;
mod response;

pub use base::{startup_parameters, ProtocolCore, STARTUP_PARAMETERS_KEY};
pub use response::{Response, ResponseBuffer, MAX_RESPONSE_BUFFER};
