#![forbid(unsafe_code)]

//! Deterministic host doubles for tests.
//!
//! - [`ManualTimer`] queues deferred tasks and runs them only when the test
//!   advances a tick, making "before the scheduler flushes" observable.
//! - [`RecordingSource`] records every register/unregister call made by an
//!   [`EventMultiplexer`](crate::EventMultiplexer).
//!
//! Available under `cfg(test)` and the `test-helpers` feature.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::time::Duration;

use crate::host::{DeferredTask, EventSource, Timer};

/// Timer whose tasks run only when a tick is advanced by hand.
#[derive(Default)]
pub struct ManualTimer {
    queue: RefCell<VecDeque<DeferredTask>>,
    delays: RefCell<Vec<Duration>>,
    scheduled: Cell<u64>,
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualTimer")
            .field("pending", &self.pending())
            .field("scheduled", &self.scheduled.get())
            .finish()
    }
}

impl ManualTimer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks waiting for the next tick.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Tasks ever handed to this timer.
    #[must_use]
    pub fn scheduled_total(&self) -> u64 {
        self.scheduled.get()
    }

    /// Delays requested, in scheduling order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }

    /// Advance one tick: run the tasks that were queued when the call began.
    ///
    /// Tasks scheduled by those tasks wait for the following tick. Returns the
    /// number of tasks run.
    pub fn run_pending(&self) -> usize {
        let due = self.pending();
        for _ in 0..due {
            let task = self.queue.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        due
    }

    /// Advance ticks until the queue is empty or `max_ticks` elapse.
    /// Returns the number of ticks advanced.
    pub fn run_until_idle(&self, max_ticks: usize) -> usize {
        let mut ticks = 0;
        while ticks < max_ticks && self.pending() > 0 {
            self.run_pending();
            ticks += 1;
        }
        ticks
    }
}

impl Timer for ManualTimer {
    fn after(&self, delay: Duration, task: DeferredTask) {
        self.scheduled.set(self.scheduled.get() + 1);
        self.delays.borrow_mut().push(delay);
        self.queue.borrow_mut().push_back(task);
    }
}

/// A register/unregister call observed by [`RecordingSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent<K> {
    Registered(K),
    Unregistered(K),
}

/// Event source that records every registration change.
#[derive(Debug)]
pub struct RecordingSource<K> {
    live: RefCell<Vec<K>>,
    events: RefCell<Vec<SourceEvent<K>>>,
}

impl<K> Default for RecordingSource<K> {
    fn default() -> Self {
        Self {
            live: RefCell::new(Vec::new()),
            events: RefCell::new(Vec::new()),
        }
    }
}

impl<K: Clone + PartialEq> RecordingSource<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently registered.
    #[must_use]
    pub fn is_registered(&self, key: &K) -> bool {
        self.live.borrow().contains(key)
    }

    /// Keys currently registered, in registration order.
    #[must_use]
    pub fn live_keys(&self) -> Vec<K> {
        self.live.borrow().clone()
    }

    /// Every call observed so far.
    #[must_use]
    pub fn events(&self) -> Vec<SourceEvent<K>> {
        self.events.borrow().clone()
    }
}

impl<K: Clone + PartialEq> EventSource<K> for RecordingSource<K> {
    fn register(&self, key: &K) {
        self.live.borrow_mut().push(key.clone());
        self.events
            .borrow_mut()
            .push(SourceEvent::Registered(key.clone()));
    }

    fn unregister(&self, key: &K) {
        self.live.borrow_mut().retain(|k| k != key);
        self.events
            .borrow_mut()
            .push(SourceEvent::Unregistered(key.clone()));
    }
}
