#![forbid(unsafe_code)]

//! One-shot readiness gate.
//!
//! A [`Bootstrap`] collects callbacks until the host reports that it is
//! ready, then runs them in registration order. Attaching to a multiplexer
//! uses a once-subscription on the ready key, so the host registration for
//! that key disappears as soon as readiness fires.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use hookrt_core::{EventMultiplexer, Unsubscribe};

type ReadyCallback = Box<dyn FnOnce()>;

#[derive(Default)]
struct Gate {
    ready: Cell<bool>,
    draining: Cell<bool>,
    queue: RefCell<VecDeque<ReadyCallback>>,
    ran: Cell<usize>,
}

/// Clears the draining marker even if a callback panics.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Gate {
    fn open(&self) {
        if self.ready.replace(true) {
            return;
        }
        tracing::debug!(queued = self.queue.borrow().len(), "bootstrap ready");
        self.draining.set(true);
        let _guard = DrainGuard(&self.draining);
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(callback) = next else { break };
            callback();
            self.ran.set(self.ran.get() + 1);
        }
    }
}

/// Runs queued callbacks once the host is ready.
#[derive(Clone, Default)]
pub struct Bootstrap {
    gate: Rc<Gate>,
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("ready", &self.gate.ready.get())
            .field("queued", &self.gate.queue.borrow().len())
            .field("ran", &self.gate.ran.get())
            .finish()
    }
}

impl Bootstrap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate the first time `ready_key` is dispatched.
    pub fn attach<K, A>(&self, events: &EventMultiplexer<K, A>, ready_key: K) -> Unsubscribe<K, A>
    where
        K: Clone + Eq + Hash + fmt::Debug + 'static,
        A: 'static,
    {
        let gate = Rc::clone(&self.gate);
        events.once([ready_key], move |_, _| gate.open())
    }

    /// Run `callback` once ready.
    ///
    /// After readiness the callback runs immediately, unless earlier
    /// callbacks are still draining, in which case it joins the back of the
    /// queue.
    pub fn on_ready(&self, callback: impl FnOnce() + 'static) {
        if self.gate.ready.get() && !self.gate.draining.get() {
            callback();
            self.gate.ran.set(self.gate.ran.get() + 1);
        } else {
            self.gate.queue.borrow_mut().push_back(Box::new(callback));
        }
    }

    /// Open the gate without an event.
    pub fn mark_ready(&self) {
        self.gate.open();
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.gate.ready.get()
    }

    /// Callbacks run so far.
    #[must_use]
    pub fn ran(&self) -> usize {
        self.gate.ran.get()
    }
}
