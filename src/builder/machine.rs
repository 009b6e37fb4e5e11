//! Builder for constructing machines.

use crate::builder::error::BuildError;
use crate::core::{StateWatch, Token, DEFAULT_HISTORY_CAPACITY};
use crate::error::FsmError;
use crate::fsm::{Handler, HandlerResult, InstrumentFsm, ThreadSafeFsm};

/// Fluent builder for [`InstrumentFsm`].
///
/// Unlike [`InstrumentFsm::add_handler`], which quietly returns `false` for
/// an undeclared `(state, event)` pair, the builder fails the whole build
/// with [`BuildError::UndeclaredHandler`].
///
/// # Example
///
/// ```
/// use instrument_driver::builder::FsmBuilder;
/// use instrument_driver::fsm::Outcome;
/// use instrument_driver::token_enum;
///
/// token_enum! {
///     enum Valve { Closed, Open }
/// }
/// token_enum! {
///     enum Cmd { Enter, Exit, Toggle }
/// }
///
/// let mut fsm = FsmBuilder::<Valve, Cmd, ()>::new()
///     .states(Valve::ALL.iter().copied())
///     .events([Cmd::Toggle])
///     .enter_event(Cmd::Enter)
///     .exit_event(Cmd::Exit)
///     .handler(Valve::Closed, Cmd::Toggle, |_, _| Ok(Outcome::transition(Valve::Open, ())))
///     .build()
///     .unwrap();
///
/// fsm.start(&mut (), Valve::Closed, ()).unwrap();
/// fsm.on_event(&mut (), Cmd::Toggle, ()).unwrap();
/// assert_eq!(fsm.current_state(), Some(Valve::Open));
/// ```
pub struct FsmBuilder<S: Token, E: Token, C, A = (), R = (), X = FsmError> {
    states: Vec<S>,
    events: Vec<E>,
    enter_event: Option<E>,
    exit_event: Option<E>,
    history_capacity: usize,
    watch: Option<StateWatch<S>>,
    handlers: Vec<(S, E, Handler<S, C, A, R, X>)>,
}

impl<S, E, C, A, R, X> FsmBuilder<S, E, C, A, R, X>
where
    S: Token,
    E: Token,
    X: From<FsmError>,
{
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            events: Vec::new(),
            enter_event: None,
            exit_event: None,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            watch: None,
            handlers: Vec::new(),
        }
    }

    /// Add states to the declared set.
    pub fn states(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.states.extend(states);
        self
    }

    /// Add events to the declared set.
    pub fn events(mut self, events: impl IntoIterator<Item = E>) -> Self {
        self.events.extend(events);
        self
    }

    /// Set the ENTER pseudo-event (required).
    pub fn enter_event(mut self, event: E) -> Self {
        self.enter_event = Some(event);
        self
    }

    /// Set the EXIT pseudo-event (required).
    pub fn exit_event(mut self, event: E) -> Self {
        self.exit_event = Some(event);
        self
    }

    /// Number of transitions kept in the history. Zero disables it.
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Publish the machine's state through an existing watch.
    pub(crate) fn state_watch(mut self, watch: StateWatch<S>) -> Self {
        self.watch = Some(watch);
        self
    }

    /// Register a handler for `(state, event)`.
    pub fn handler<F>(mut self, state: S, event: E, handler: F) -> Self
    where
        F: FnMut(&mut C, &A) -> HandlerResult<S, R, X> + Send + 'static,
    {
        self.handlers.push((state, event, Box::new(handler)));
        self
    }

    /// Build the machine.
    /// Returns an error if a required field is missing or a handler key is
    /// undeclared.
    pub fn build(self) -> Result<InstrumentFsm<S, E, C, A, R, X>, BuildError> {
        if self.states.is_empty() {
            return Err(BuildError::NoStates);
        }
        let enter = self.enter_event.ok_or(BuildError::MissingEnterEvent)?;
        let exit = self.exit_event.ok_or(BuildError::MissingExitEvent)?;
        if enter == exit {
            return Err(BuildError::SharedPseudoEvent {
                event: enter.name().to_string(),
            });
        }

        let mut machine = InstrumentFsm::new(self.states, self.events, enter, exit)
            .with_history_capacity(self.history_capacity);
        if let Some(watch) = self.watch {
            machine = machine.with_watch(watch);
        }

        for (state, event, handler) in self.handlers {
            if !machine.add_boxed_handler(state, event, handler) {
                return Err(BuildError::UndeclaredHandler {
                    state: state.name().to_string(),
                    event: event.name().to_string(),
                });
            }
        }

        Ok(machine)
    }

    /// Build the machine and wrap it, with `context`, in a [`ThreadSafeFsm`].
    pub fn build_thread_safe(
        self,
        context: C,
    ) -> Result<ThreadSafeFsm<S, E, C, A, R, X>, BuildError> {
        Ok(ThreadSafeFsm::new(self.build()?, context))
    }
}

impl<S, E, C, A, R, X> Default for FsmBuilder<S, E, C, A, R, X>
where
    S: Token,
    E: Token,
    X: From<FsmError>,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Outcome;

    crate::token_enum! {
        enum Valve {
            Closed,
            Open,
            Jammed,
        }
    }

    crate::token_enum! {
        enum Cmd {
            Enter,
            Exit,
            Toggle,
            Service,
        }
    }

    type Builder = FsmBuilder<Valve, Cmd, u32>;

    fn base() -> Builder {
        Builder::new()
            .states([Valve::Closed, Valve::Open])
            .events([Cmd::Toggle])
            .enter_event(Cmd::Enter)
            .exit_event(Cmd::Exit)
    }

    #[test]
    fn builder_validates_required_fields() {
        assert_eq!(Builder::new().build().err(), Some(BuildError::NoStates));
        assert_eq!(
            Builder::new().states([Valve::Closed]).build().err(),
            Some(BuildError::MissingEnterEvent)
        );
        assert_eq!(
            Builder::new()
                .states([Valve::Closed])
                .enter_event(Cmd::Enter)
                .build()
                .err(),
            Some(BuildError::MissingExitEvent)
        );
    }

    #[test]
    fn builder_rejects_shared_pseudo_event() {
        let result = base().exit_event(Cmd::Enter).build();
        assert!(matches!(result, Err(BuildError::SharedPseudoEvent { .. })));
    }

    #[test]
    fn builder_rejects_undeclared_handler_keys() {
        let result = base()
            .handler(Valve::Jammed, Cmd::Toggle, |_, _| Ok(Outcome::stay(())))
            .build();
        assert_eq!(
            result.err(),
            Some(BuildError::UndeclaredHandler {
                state: "Jammed".to_string(),
                event: "Toggle".to_string(),
            })
        );

        let result = base()
            .handler(Valve::Open, Cmd::Service, |_, _| Ok(Outcome::stay(())))
            .build();
        assert!(matches!(result, Err(BuildError::UndeclaredHandler { .. })));
    }

    #[test]
    fn fluent_api_builds_machine() {
        let mut fsm = base()
            .history_capacity(1)
            .handler(Valve::Closed, Cmd::Toggle, |n: &mut u32, _| {
                *n += 1;
                Ok(Outcome::transition(Valve::Open, ()))
            })
            .handler(Valve::Open, Cmd::Toggle, |n: &mut u32, _| {
                *n += 1;
                Ok(Outcome::transition(Valve::Closed, ()))
            })
            .build()
            .unwrap();

        let mut toggles = 0;
        fsm.start(&mut toggles, Valve::Closed, ()).unwrap();
        fsm.on_event(&mut toggles, Cmd::Toggle, ()).unwrap();
        fsm.on_event(&mut toggles, Cmd::Toggle, ()).unwrap();

        assert_eq!(toggles, 2);
        assert_eq!(fsm.current_state(), Some(Valve::Closed));
        assert_eq!(fsm.history().len(), 1);
    }

    #[test]
    fn thread_safe_build_owns_context() {
        let fsm = base()
            .handler(Valve::Closed, Cmd::Toggle, |n: &mut u32, _| {
                *n += 10;
                Ok(Outcome::stay(()))
            })
            .build_thread_safe(5)
            .unwrap();

        fsm.start(Valve::Closed, ()).unwrap();
        fsm.on_event(Cmd::Toggle, ()).unwrap();

        assert_eq!(fsm.with_context(|n| *n), 15);
    }
}
