//! Core building blocks shared by every machine.
//!
//! - Symbolic state and event tokens via the [`Token`] trait
//! - [`StateWatch`], a shared read handle onto a machine's current state
//! - Bounded [`TransitionHistory`] of completed transitions

mod history;
mod token;
mod watch;

pub use history::{TransitionHistory, TransitionRecord, DEFAULT_HISTORY_CAPACITY};
pub use token::Token;
pub use watch::StateWatch;
