//! Build errors for the machine builder.

use thiserror::Error;

/// Errors that can occur when building a machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("no states declared. Call .states(..) before .build()")]
    NoStates,

    #[error("ENTER event not specified. Call .enter_event(event) before .build()")]
    MissingEnterEvent,

    #[error("EXIT event not specified. Call .exit_event(event) before .build()")]
    MissingExitEvent,

    #[error("ENTER and EXIT must be distinct events, both were '{event}'")]
    SharedPseudoEvent { event: String },

    #[error("handler registered for undeclared pair ('{state}', '{event}')")]
    UndeclaredHandler { state: String, event: String },
}
