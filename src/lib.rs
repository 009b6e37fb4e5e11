//! Instrument Driver: state-machine core for instrument drivers
//!
//! A driver sits between a supervising agent and a physical instrument
//! reached through a port agent. It is built from two machines running on the
//! same engine:
//!
//! - a **connection machine** (UNCONFIGURED, DISCONNECTED, CONNECTED) owned by
//!   the driver, and
//! - a **protocol machine** with instrument-specific states, owned by the
//!   protocol object that exists only while connected.
//!
//! # Core Concepts
//!
//! - **Tokens**: closed sets of state and event names via [`token_enum!`]
//! - **Machines**: [`InstrumentFsm`] dispatches `(state, event)` pairs to
//!   handlers with ENTER/EXIT semantics; [`ThreadSafeFsm`] serializes
//!   dispatch from several threads
//! - **Driver**: [`SingleConnectionDriver`] forwards agent commands into the
//!   machines and bridges transport callbacks into events
//! - **Chunker**: [`Chunker`] turns a byte stream into complete records
//!
//! # Example
//!
//! ```rust
//! use instrument_driver::fsm::{InstrumentFsm, Outcome};
//! use instrument_driver::token_enum;
//!
//! token_enum! {
//!     enum PumpState {
//!         Idle => "PUMP_STATE_IDLE",
//!         Pumping => "PUMP_STATE_PUMPING",
//!     }
//! }
//!
//! token_enum! {
//!     enum PumpEvent {
//!         Enter => "PUMP_EVENT_ENTER",
//!         Exit => "PUMP_EVENT_EXIT",
//!         Start => "PUMP_EVENT_START",
//!     }
//! }
//!
//! let mut fsm: InstrumentFsm<PumpState, PumpEvent, Vec<&str>> = InstrumentFsm::new(
//!     PumpState::ALL.iter().copied(),
//!     [PumpEvent::Start],
//!     PumpEvent::Enter,
//!     PumpEvent::Exit,
//! );
//! let added = fsm.add_handler(PumpState::Idle, PumpEvent::Start, |log, _| {
//!     log.push("start");
//!     Ok(Outcome::transition(PumpState::Pumping, ()))
//! });
//! assert!(added);
//!
//! let mut log = Vec::new();
//! fsm.start(&mut log, PumpState::Idle, ()).unwrap();
//! fsm.on_event(&mut log, PumpEvent::Start, ()).unwrap();
//!
//! assert_eq!(fsm.current_state(), Some(PumpState::Pumping));
//! assert_eq!(log, vec!["start"]);
//! ```

pub mod builder;
pub mod chunker;
pub mod core;
pub mod driver;
pub mod error;
pub mod fsm;
pub mod protocol;

// Re-export commonly used types
pub use builder::{BuildError, FsmBuilder};
pub use chunker::{Chunk, Chunker, RegexSieve, Sieve};
pub use crate::core::{StateWatch, Token, TransitionHistory, TransitionRecord};
pub use driver::{
    DriverAsyncEvent, DriverBuilder, DriverEventKind, Protocol, ProtocolArgs, ResourceState,
    SingleConnectionDriver, Transport,
};
pub use error::{DriverError, DriverResult, FsmError};
pub use fsm::{InstrumentFsm, Outcome, ThreadSafeFsm};
pub use protocol::ProtocolCore;
