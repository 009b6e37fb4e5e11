//! Handler types and the `(state, event)` dispatch table.

use crate::core::Token;
use std::collections::HashMap;

/// What a handler asks the machine to do after it returns.
///
/// A `next_state` that is a declared state triggers a transition; `None`, or
/// a state outside the declared set, leaves the machine where it is.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome<S, R> {
    pub next_state: Option<S>,
    pub result: R,
}

impl<S, R> Outcome<S, R> {
    /// Stay in the current state and return `result`.
    pub fn stay(result: R) -> Self {
        Self {
            next_state: None,
            result,
        }
    }

    /// Transition to `next_state` and return `result`.
    pub fn transition(next_state: S, result: R) -> Self {
        Self {
            next_state: Some(next_state),
            result,
        }
    }
}

/// Result type returned by every handler.
pub type HandlerResult<S, R, X> = Result<Outcome<S, R>, X>;

/// A handler bound to one `(state, event)` pair.
///
/// Handlers receive the machine's context mutably and the event arguments by
/// reference, since the same arguments are passed on to the EXIT and ENTER
/// handlers of a transition.
pub type Handler<S, C, A, R, X> = Box<dyn FnMut(&mut C, &A) -> HandlerResult<S, R, X> + Send>;

/// Handlers keyed by `(state, event)`, remembering insertion order.
pub struct HandlerTable<S: Token, E: Token, C, A, R, X> {
    entries: HashMap<(S, E), Handler<S, C, A, R, X>>,
    order: Vec<(S, E)>,
}

impl<S: Token, E: Token, C, A, R, X> HandlerTable<S, E, C, A, R, X> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Insert a handler, replacing any existing one for the same key.
    ///
    /// A replaced key keeps its original position in the insertion order.
    pub fn insert(&mut self, state: S, event: E, handler: Handler<S, C, A, R, X>) {
        if self.entries.insert((state, event), handler).is_none() {
            self.order.push((state, event));
        }
    }

    pub fn get_mut(&mut self, state: S, event: E) -> Option<&mut Handler<S, C, A, R, X>> {
        self.entries.get_mut(&(state, event))
    }

    pub fn contains(&self, state: S, event: E) -> bool {
        self.entries.contains_key(&(state, event))
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = (S, E)> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Token, E: Token, C, A, R, X> Default for HandlerTable<S, E, C, A, R, X> {
    fn default() -> Self {
        Self::new()
    }
}
