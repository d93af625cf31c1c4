#![forbid(unsafe_code)]

//! Tick-level flush batching.
//!
//! The scheduler owns a single pending flag. The first flush request in a
//! tick sets it and hands exactly one deferred task to the host [`Timer`];
//! every further request before that task runs is a no-op. Only the task
//! itself clears the flag, as it starts and *before* evaluating effects, so
//! the flag is set exactly while one task is queued and writes made by
//! effects schedule a fresh flush instead of being absorbed by the one in
//! progress.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use crate::host::{DeferredTask, Timer};

/// Counters describing scheduler activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Flush requests received.
    pub requests: u64,
    /// Deferred tasks handed to the host timer.
    pub scheduled: u64,
}

impl SchedulerStats {
    /// Requests absorbed by an already-pending flush.
    #[must_use]
    pub fn coalesced(&self) -> u64 {
        self.requests - self.scheduled
    }
}

pub(crate) struct Scheduler {
    pending: Cell<bool>,
    timer: Rc<dyn Timer>,
    delay: Duration,
    requests: Cell<u64>,
    scheduled: Cell<u64>,
}

impl Scheduler {
    pub(crate) fn new(timer: Rc<dyn Timer>, delay: Duration) -> Self {
        Self {
            pending: Cell::new(false),
            timer,
            delay,
            requests: Cell::new(0),
            scheduled: Cell::new(0),
        }
    }

    /// Schedule a deferred task unless one is already pending.
    ///
    /// `make_task` is only called when a task is actually scheduled. Returns
    /// whether a new task was handed to the timer.
    pub(crate) fn request(&self, make_task: impl FnOnce() -> DeferredTask) -> bool {
        self.requests.set(self.requests.get() + 1);
        if self.pending.get() {
            tracing::trace!("flush already pending; request coalesced");
            return false;
        }
        self.pending.set(true);
        self.scheduled.set(self.scheduled.get() + 1);
        let delay_us = u64::try_from(self.delay.as_micros()).unwrap_or(u64::MAX);
        tracing::trace!(delay_us, "flush scheduled");
        self.timer.after(self.delay, make_task());
        true
    }

    /// Clear the pending flag. Called by the deferred task as it starts.
    pub(crate) fn clear_pending(&self) {
        self.pending.set(false);
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.pending.get()
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            requests: self.requests.get(),
            scheduled: self.scheduled.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualTimer;

    fn scheduler() -> (Rc<ManualTimer>, Scheduler) {
        let timer = Rc::new(ManualTimer::new());
        let scheduler = Scheduler::new(timer.clone(), Duration::ZERO);
        (timer, scheduler)
    }

    #[test]
    fn first_request_schedules_one_task() {
        let (timer, scheduler) = scheduler();
        assert!(scheduler.request(|| Box::new(|| {})));
        assert!(scheduler.is_pending());
        assert_eq!(timer.pending(), 1);
    }

    #[test]
    fn requests_while_pending_coalesce() {
        let (timer, scheduler) = scheduler();
        let mut built = 0;
        for _ in 0..5 {
            scheduler.request(|| {
                built += 1;
                Box::new(|| {})
            });
        }
        assert_eq!(built, 1, "task factory only invoked once");
        assert_eq!(timer.pending(), 1);
        assert_eq!(
            scheduler.stats(),
            SchedulerStats {
                requests: 5,
                scheduled: 1
            }
        );
        assert_eq!(scheduler.stats().coalesced(), 4);
    }

    #[test]
    fn clearing_pending_allows_next_task() {
        let (timer, scheduler) = scheduler();
        scheduler.request(|| Box::new(|| {}));
        scheduler.clear_pending();
        assert!(scheduler.request(|| Box::new(|| {})));
        assert_eq!(timer.pending(), 2);
    }

    #[test]
    fn huge_delay_is_scheduled_without_overflow() {
        let timer = Rc::new(ManualTimer::new());
        let scheduler = Scheduler::new(timer.clone(), Duration::MAX);
        assert!(scheduler.request(|| Box::new(|| {})));
        assert_eq!(timer.delays(), vec![Duration::MAX]);
    }

    #[test]
    fn delay_is_forwarded_to_timer() {
        let timer = Rc::new(ManualTimer::new());
        let scheduler = Scheduler::new(timer.clone(), Duration::from_millis(16));
        scheduler.request(|| Box::new(|| {}));
        assert_eq!(timer.delays(), vec![Duration::from_millis(16)]);
    }
}
