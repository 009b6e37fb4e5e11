//! Symbolic tokens for state machine states and events.
//!
//! Drivers declare their states and events as closed enumerations. A machine
//! is then built over a declared subset of those enumerations, and every
//! token handed to it is checked against that subset.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// Trait for state and event tokens.
///
/// Tokens are small, copyable identifiers. Their `name` is the stable wire
/// name used when a token crosses a boundary as a string (resource commands
/// from an agent, state reports in driver events).
///
/// Use [`token_enum!`](crate::token_enum) rather than implementing this by
/// hand.
///
/// # Example
///
/// ```rust
/// use instrument_driver::core::Token;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// enum PumpState {
///     Idle,
///     Pumping,
/// }
///
/// impl Token for PumpState {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::Idle => "PUMP_IDLE",
///             Self::Pumping => "PUMP_PUMPING",
///         }
///     }
///
///     fn from_name(name: &str) -> Option<Self> {
///         match name {
///             "PUMP_IDLE" => Some(Self::Idle),
///             "PUMP_PUMPING" => Some(Self::Pumping),
///             _ => None,
///         }
///     }
/// }
///
/// assert_eq!(PumpState::from_name("PUMP_IDLE"), Some(PumpState::Idle));
/// ```
pub trait Token:
    Copy + Eq + Hash + Debug + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static
{
    /// Stable name of the token.
    fn name(&self) -> &'static str;

    /// Look a token up by its stable name.
    fn from_name(name: &str) -> Option<Self>;
}
