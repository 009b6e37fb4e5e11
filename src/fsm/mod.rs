//! The dispatch engine.
//!
//! [`InstrumentFsm`] is the single-threaded machine; [`ThreadSafeFsm`] wraps
//! one together with its context behind a lock so several threads can raise
//! events against it.

mod handler;
mod machine;
mod thread_safe;

pub use handler::{Handler, HandlerResult, HandlerTable, Outcome};
pub use machine::InstrumentFsm;
pub use thread_safe::ThreadSafeFsm;
