//! The state-change broadcaster (§2, §4.3 "Observers").
//!
//! A list of callbacks invoked, in registration order, every time a
//! [`Service`](crate::service::Service) transitions between states. The list
//! itself carries no knowledge of which Service it belongs to; each `Service`
//! owns one `Observer`.

use crate::ids::StateCbId;
use crate::service::State;
use std::cell::RefCell;

/// A registered state-change callback: old state, new state.
pub type StateCb = Box<dyn FnMut(State, State)>;

/// An ordered list of state-change callbacks with stable, cancellable ids.
#[derive(Default)]
pub struct Observer {
    callbacks: RefCell<Vec<(StateCbId, StateCb)>>,
}

impl Observer {
    /// Creates an empty observer list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback, returning a non-zero id usable with [`Observer::remove`].
    pub fn add(&self, cb: StateCb) -> StateCbId {
        let id = StateCbId::next();
        self.callbacks.borrow_mut().push((id, cb));
        id
    }

    /// Removes a callback by id. Returns whether an entry was found.
    pub fn remove(&self, id: StateCbId) -> bool {
        let mut cbs = self.callbacks.borrow_mut();
        if let Some(pos) = cbs.iter().position(|(i, _)| *i == id) {
            cbs.remove(pos);
            true
        } else {
            false
        }
    }

    /// Invokes every registered callback with `(old, new)`, synchronously,
    /// in registration order. A no-op if `old == new` (§4.3 Invariant 6).
    ///
    /// Callbacks may add or remove observers reentrantly; an addition
    /// reentrant to this call takes effect starting with the *next*
    /// transition, not the one in progress — the freshly-taken snapshot
    /// below has already been committed to by the time it could observe it.
    pub fn notify(&self, old: State, new: State) {
        if old == new {
            return;
        }
        let mut cbs = self.callbacks.take();
        for (_, cb) in cbs.iter_mut() {
            cb(old, new);
        }
        let mut late = self.callbacks.take();
        cbs.append(&mut late);
        *self.callbacks.borrow_mut() = cbs;
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.borrow().len()
    }

    /// Whether no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }
}
