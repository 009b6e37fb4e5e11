//! Mutex-guarded machine for dispatch from several threads.

use crate::core::{StateWatch, Token, TransitionHistory};
use crate::error::FsmError;
use crate::fsm::handler::HandlerResult;
use crate::fsm::machine::InstrumentFsm;
use parking_lot::Mutex;
use std::fmt;

struct Inner<S: Token, E: Token, C, A, R, X> {
    machine: InstrumentFsm<S, E, C, A, R, X>,
    context: C,
}

/// An [`InstrumentFsm`] that owns its context behind a single lock.
///
/// Every [`on_event`](Self::on_event) holds the lock across handler lookup,
/// the handler call and any resulting transition, so at most one transition
/// is in flight per machine. The lock is released on every exit path,
/// including handler errors.
///
/// State can be read through [`current_state`](Self::current_state) without
/// taking the lock. Handlers must not dispatch into their own machine; the
/// lock is not reentrant.
pub struct ThreadSafeFsm<S: Token, E: Token, C, A = (), R = (), X = FsmError> {
    inner: Mutex<Inner<S, E, C, A, R, X>>,
    watch: StateWatch<S>,
}

impl<S, E, C, A, R, X> ThreadSafeFsm<S, E, C, A, R, X>
where
    S: Token,
    E: Token,
    X: From<FsmError>,
{
    /// Wrap `machine` together with the context its handlers operate on.
    pub fn new(machine: InstrumentFsm<S, E, C, A, R, X>, context: C) -> Self {
        let watch = machine.watch();
        Self {
            inner: Mutex::new(Inner { machine, context }),
            watch,
        }
    }

    /// See [`InstrumentFsm::add_handler`].
    #[must_use]
    pub fn add_handler<F>(&self, state: S, event: E, handler: F) -> bool
    where
        F: FnMut(&mut C, &A) -> HandlerResult<S, R, X> + Send + 'static,
    {
        self.inner.lock().machine.add_handler(state, event, handler)
    }

    /// See [`InstrumentFsm::start`].
    pub fn start(&self, initial_state: S, args: A) -> Result<(), X> {
        let mut guard = self.inner.lock();
        let Inner { machine, context } = &mut *guard;
        machine.start(context, initial_state, args)
    }

    /// See [`InstrumentFsm::on_event`].
    pub fn on_event(&self, event: E, args: A) -> Result<R, X> {
        let mut guard = self.inner.lock();
        let Inner { machine, context } = &mut *guard;
        machine.on_event(context, event, args)
    }
}

impl<S: Token, E: Token, C, A, R, X> ThreadSafeFsm<S, E, C, A, R, X> {
    /// Current state, read without taking the dispatch lock.
    pub fn current_state(&self) -> Option<S> {
        self.watch.get()
    }

    pub fn watch(&self) -> StateWatch<S> {
        self.watch.clone()
    }

    pub fn previous_state(&self) -> Option<S> {
        self.inner.lock().machine.previous_state()
    }

    /// See [`InstrumentFsm::get_events`].
    pub fn get_events(&self, current_state_only: bool) -> Vec<E> {
        self.inner.lock().machine.get_events(current_state_only)
    }

    pub fn history(&self) -> TransitionHistory<S, E> {
        self.inner.lock().machine.history().clone()
    }

    /// Run `f` against the context while holding the dispatch lock.
    pub fn with_context<T>(&self, f: impl FnOnce(&mut C) -> T) -> T {
        f(&mut self.inner.lock().context)
    }
}

impl<S: Token, E: Token, C, A, R, X> fmt::Debug for ThreadSafeFsm<S, E, C, A, R, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafeFsm")
            .field("current_state", &self.watch.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Outcome;
    use std::sync::Arc;
    use std::thread;

    crate::token_enum! {
        enum Phase {
            Low,
            High,
        }
    }

    crate::token_enum! {
        enum Toggle {
            Enter,
            Exit,
            Flip,
            Fail,
        }
    }

    #[derive(Default)]
    struct Counters {
        flips: usize,
        in_transition: bool,
    }

    fn machine() -> ThreadSafeFsm<Phase, Toggle, Counters, (), usize> {
        let mut fsm = InstrumentFsm::new(
            Phase::ALL.iter().copied(),
            [Toggle::Flip, Toggle::Fail],
            Toggle::Enter,
            Toggle::Exit,
        );
        for (from, to) in [(Phase::Low, Phase::High), (Phase::High, Phase::Low)] {
            assert!(fsm.add_handler(from, Toggle::Flip, move |c: &mut Counters, _| {
                assert!(!c.in_transition, "transitions overlapped");
                c.in_transition = true;
                c.flips += 1;
                Ok(Outcome::transition(to, c.flips))
            }));
            assert!(fsm.add_handler(to, Toggle::Enter, |c: &mut Counters, _| {
                c.in_transition = false;
                Ok(Outcome::stay(0))
            }));
            assert!(fsm.add_handler(from, Toggle::Fail, |_: &mut Counters, _| {
                Err(FsmError::NotStarted)
            }));
        }
        let fsm = ThreadSafeFsm::new(fsm, Counters::default());
        fsm.start(Phase::Low, ()).unwrap();
        fsm
    }

    #[test]
    fn concurrent_events_are_serialized() {
        let fsm = Arc::new(machine());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let fsm = Arc::clone(&fsm);
                thread::spawn(move || {
                    for _ in 0..250 {
                        fsm.on_event(Toggle::Flip, ()).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(fsm.with_context(|c| c.flips), 1000);
        assert_eq!(fsm.current_state(), Some(Phase::Low));
    }

    #[test]
    fn lock_is_released_after_handler_error() {
        let fsm = machine();

        assert!(fsm.on_event(Toggle::Fail, ()).is_err());
        assert_eq!(fsm.on_event(Toggle::Flip, ()).unwrap(), 1);
        assert_eq!(fsm.current_state(), Some(Phase::High));
        assert_eq!(fsm.previous_state(), Some(Phase::Low));
    }

    #[test]
    fn state_is_readable_from_inside_a_handler() {
        let mut inner: InstrumentFsm<Phase, Toggle, Vec<Option<Phase>>> = InstrumentFsm::new(
            Phase::ALL.iter().copied(),
            [Toggle::Flip],
            Toggle::Enter,
            Toggle::Exit,
        );
        let watch = inner.watch();
        assert!(inner.add_handler(Phase::Low, Toggle::Flip, |_, _| {
            Ok(Outcome::transition(Phase::High, ()))
        }));
        assert!(inner.add_handler(Phase::High, Toggle::Enter, move |seen, _| {
            seen.push(watch.get());
            Ok(Outcome::stay(()))
        }));
        let fsm = ThreadSafeFsm::new(inner, Vec::new());
        fsm.start(Phase::Low, ()).unwrap();

        fsm.on_event(Toggle::Flip, ()).unwrap();

        assert_eq!(fsm.with_context(|seen| seen.clone()), vec![Some(Phase::High)]);
    }

    #[test]
    fn get_events_reports_current_state_commands() {
        let fsm = machine();
        assert_eq!(fsm.get_events(true), vec![Toggle::Flip, Toggle::Fail]);
        assert_eq!(fsm.history().len(), 0);
    }
}
