//! Shared, read-mostly view of a machine's current state.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A cloneable handle onto the current state of a machine.
///
/// The owning machine writes it during a transition, before the ENTER handler
/// of the new state runs. Readers take a short read lock on this cell and
/// never the machine's dispatch lock, so state can be queried from inside a
/// handler or from another thread while a transition is in flight.
pub struct StateWatch<S> {
    cell: Arc<RwLock<Option<S>>>,
}

impl<S: Copy> StateWatch<S> {
    pub(crate) fn new() -> Self {
        Self {
            cell: Arc::new(RwLock::new(None)),
        }
    }

    /// Current state, or `None` before the machine is started.
    pub fn get(&self) -> Option<S> {
        *self.cell.read()
    }

    pub(crate) fn set(&self, state: S) {
        *self.cell.write() = Some(state);
    }
}

impl<S> Clone for StateWatch<S> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<S: Copy + fmt::Debug> fmt::Debug for StateWatch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateWatch").field(&*self.cell.read()).finish()
    }
}
