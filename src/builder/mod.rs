//! Builder API for machine construction.
//!
//! [`token_enum!`](crate::token_enum) declares state and event tokens;
//! [`FsmBuilder`] assembles a machine over them and refuses handler keys
//! outside the declared sets.

pub mod error;
pub mod machine;
pub mod macros;

pub use error::BuildError;
pub use machine::FsmBuilder;
