//! Synchronous `(state, event)` dispatch engine.

use crate::core::{StateWatch, Token, TransitionHistory, TransitionRecord};
use crate::error::FsmError;
use crate::fsm::handler::{Handler, HandlerTable, HandlerResult, Outcome};
use chrono::Utc;
use std::fmt;
use tracing::{debug, warn};

/// Generic finite state machine driving a driver or protocol.
///
/// The machine is declared over a set of states and events, with two of the
/// events reserved as the ENTER and EXIT pseudo-events. Handlers are looked up
/// by `(current_state, event)` and return an [`Outcome`]; a declared
/// `next_state` triggers a transition:
///
/// 1. EXIT handler of the current state, if registered
/// 2. `previous_state := current_state`, `current_state := next_state`
/// 3. ENTER handler of the new state, if registered
///
/// all before [`on_event`](Self::on_event) returns.
///
/// The handler context `C` lives outside the machine and is passed to
/// every dispatch call, so the machine can be a field of the same struct
/// that owns the context.
///
/// A failing handler leaves `current_state` untouched. Anything the handler
/// changed in the context before failing stays changed.
pub struct InstrumentFsm<S: Token, E: Token, C, A = (), R = (), X = FsmError> {
    states: Vec<S>,
    events: Vec<E>,
    enter_event: E,
    exit_event: E,
    handlers: HandlerTable<S, E, C, A, R, X>,
    current: StateWatch<S>,
    previous_state: Option<S>,
    history: TransitionHistory<S, E>,
}

impl<S, E, C, A, R, X> InstrumentFsm<S, E, C, A, R, X>
where
    S: Token,
    E: Token,
    X: From<FsmError>,
{
    /// Create a machine over the declared `states` and `events`.
    ///
    /// `enter_event` and `exit_event` are added to the event set if the caller
    /// did not declare them.
    pub fn new(
        states: impl IntoIterator<Item = S>,
        events: impl IntoIterator<Item = E>,
        enter_event: E,
        exit_event: E,
    ) -> Self {
        let mut declared_states: Vec<S> = Vec::new();
        for state in states {
            if !declared_states.contains(&state) {
                declared_states.push(state);
            }
        }

        let mut declared_events: Vec<E> = Vec::new();
        for event in events.into_iter().chain([enter_event, exit_event]) {
            if !declared_events.contains(&event) {
                declared_events.push(event);
            }
        }

        Self {
            states: declared_states,
            events: declared_events,
            enter_event,
            exit_event,
            handlers: HandlerTable::new(),
            current: StateWatch::new(),
            previous_state: None,
            history: TransitionHistory::new(),
        }
    }

    /// Replace the transition history with one holding `capacity` records.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history = TransitionHistory::with_capacity(capacity);
        self
    }

    /// Publish the current state through `watch` instead of a private one.
    pub(crate) fn with_watch(mut self, watch: StateWatch<S>) -> Self {
        if let Some(state) = self.current.get() {
            watch.set(state);
        }
        self.current = watch;
        self
    }

    /// Register `handler` for `(state, event)`.
    ///
    /// Returns `false` without touching the table when `state` or `event` is
    /// not declared. Re-registering a key replaces its handler.
    #[must_use]
    pub fn add_handler<F>(&mut self, state: S, event: E, handler: F) -> bool
    where
        F: FnMut(&mut C, &A) -> HandlerResult<S, R, X> + Send + 'static,
    {
        self.add_boxed_handler(state, event, Box::new(handler))
    }

    pub(crate) fn add_boxed_handler(
        &mut self,
        state: S,
        event: E,
        handler: Handler<S, C, A, R, X>,
    ) -> bool {
        if !self.has_state(state) || !self.has_event(event) {
            debug!(
                state = state.name(),
                event = event.name(),
                "rejected handler for undeclared key"
            );
            return false;
        }
        self.handlers.insert(state, event, handler);
        true
    }

    /// Set the initial state and run its ENTER handler, if any.
    ///
    /// The ENTER handler's outcome is discarded. An undeclared state fails
    /// with [`FsmError::UnknownState`] and changes nothing.
    pub fn start(&mut self, context: &mut C, initial_state: S, args: A) -> Result<(), X> {
        if !self.has_state(initial_state) {
            return Err(FsmError::UnknownState {
                state: initial_state.name().to_string(),
            }
            .into());
        }

        debug!(state = initial_state.name(), "starting state machine");
        self.current.set(initial_state);

        if let Some(enter) = self.handlers.get_mut(initial_state, self.enter_event) {
            enter(context, &args)?;
        }
        Ok(())
    }

    /// Dispatch `event` to the handler registered for the current state.
    ///
    /// # Errors
    ///
    /// - [`FsmError::UnknownEvent`] if `event` is not declared
    /// - [`FsmError::PseudoEvent`] if `event` is the ENTER or EXIT event
    /// - [`FsmError::NotStarted`] if [`start`](Self::start) was never called
    /// - [`FsmError::Unhandled`] if no handler exists for the current state
    /// - any error returned by the handler, or by the EXIT/ENTER handlers of
    ///   a resulting transition, unchanged
    pub fn on_event(&mut self, context: &mut C, event: E, args: A) -> Result<R, X> {
        if !self.has_event(event) {
            return Err(FsmError::UnknownEvent {
                event: event.name().to_string(),
            }
            .into());
        }
        if event == self.enter_event || event == self.exit_event {
            return Err(FsmError::PseudoEvent {
                event: event.name().to_string(),
            }
            .into());
        }

        let state = self.current.get().ok_or(FsmError::NotStarted)?;
        let Some(handler) = self.handlers.get_mut(state, event) else {
            debug!(
                state = state.name(),
                event = event.name(),
                "no handler for event in current state"
            );
            return Err(FsmError::Unhandled {
                state: state.name().to_string(),
                event: event.name().to_string(),
            }
            .into());
        };

        let Outcome { next_state, result } = handler(context, &args)?;

        match next_state {
            Some(next) if self.has_state(next) => {
                self.transition(context, state, next, event, &args)?;
            }
            Some(next) => {
                warn!(
                    state = state.name(),
                    event = event.name(),
                    next_state = next.name(),
                    "handler returned an undeclared state; staying put"
                );
            }
            None => {}
        }

        Ok(result)
    }

    fn transition(
        &mut self,
        context: &mut C,
        from: S,
        to: S,
        event: E,
        args: &A,
    ) -> Result<(), X> {
        if let Some(exit) = self.handlers.get_mut(from, self.exit_event) {
            exit(context, args)?;
        }

        self.previous_state = Some(from);
        self.current.set(to);
        self.history.record(TransitionRecord {
            from,
            to,
            event,
            timestamp: Utc::now(),
        });
        debug!(
            from = from.name(),
            to = to.name(),
            event = event.name(),
            "state transition"
        );

        if let Some(enter) = self.handlers.get_mut(to, self.enter_event) {
            enter(context, args)?;
        }
        Ok(())
    }
}

impl<S: Token, E: Token, C, A, R, X> InstrumentFsm<S, E, C, A, R, X> {
    /// Current state, or `None` before the machine is started.
    pub fn current_state(&self) -> Option<S> {
        self.current.get()
    }

    pub fn previous_state(&self) -> Option<S> {
        self.previous_state
    }

    /// A handle that reads the current state without borrowing the machine.
    pub fn watch(&self) -> StateWatch<S> {
        self.current.clone()
    }

    pub fn has_state(&self, state: S) -> bool {
        self.states.contains(&state)
    }

    pub fn has_event(&self, event: E) -> bool {
        self.events.contains(&event)
    }

    pub fn states(&self) -> &[S] {
        &self.states
    }

    pub fn events(&self) -> &[E] {
        &self.events
    }

    pub fn enter_event(&self) -> E {
        self.enter_event
    }

    pub fn exit_event(&self) -> E {
        self.exit_event
    }

    /// Events that have a registered handler, excluding ENTER and EXIT.
    ///
    /// With `current_state_only` the search is restricted to the current
    /// state. Events are listed in handler insertion order without
    /// duplicates.
    pub fn get_events(&self, current_state_only: bool) -> Vec<E> {
        let current = self.current.get();
        let mut events: Vec<E> = Vec::new();
        for (state, event) in self.handlers.keys() {
            if event == self.enter_event || event == self.exit_event {
                continue;
            }
            if current_state_only && Some(state) != current {
                continue;
            }
            if !events.contains(&event) {
                events.push(event);
            }
        }
        events
    }

    pub fn history(&self) -> &TransitionHistory<S, E> {
        &self.history
    }
}

impl<S: Token, E: Token, C, A, R, X> fmt::Debug for InstrumentFsm<S, E, C, A, R, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentFsm")
            .field("states", &self.states)
            .field("events", &self.events)
            .field("current_state", &self.current.get())
            .field("previous_state", &self.previous_state)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
