#![forbid(unsafe_code)]

//! The reactive runtime context.
//!
//! [`Runtime`] owns one state store, one effect registry and one scheduler.
//! It is a cheap `Rc` handle: clones share the same engine, and independent
//! runtimes never interact, which keeps tests isolated.
//!
//! # Flush lifecycle
//!
//! ```text
//! State::set ──► request_flush ──► (pending? no-op)
//!                       │
//!                       └─► Timer::after(delay, task)
//!                                            │  next tick
//!                                            ▼
//!                         clear pending ─► evaluate_all ─► callbacks
//! ```
//!
//! The deferred task holds only a weak reference; a task that fires after
//! its runtime was dropped does nothing.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use tracing::debug_span;

use crate::config::RuntimeConfig;
use crate::effect::{Deps, EffectId, EffectRegistry, PassStats};
use crate::error::RuntimeError;
use crate::host::Timer;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::store::{SlotId, State, StateStore};

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// 1-based sequence number of this flush on its runtime.
    pub sequence: u64,
    /// Effects evaluated and invoked during the pass.
    pub pass: PassStats,
}

/// Aggregate counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// State slots created.
    pub slots: usize,
    /// Effects registered.
    pub effects: usize,
    /// Evaluation passes started.
    pub flushes: u64,
    /// Flush requests and deferred tasks.
    pub scheduler: SchedulerStats,
}

pub(crate) struct RuntimeInner {
    this: Weak<RuntimeInner>,
    store: StateStore,
    effects: EffectRegistry,
    scheduler: Scheduler,
    config: RuntimeConfig,
    flushing: Cell<bool>,
    /// A deferred task fired while a pass was running; the running flush
    /// owes another pass.
    rerun: Cell<bool>,
    flushes: Cell<u64>,
}

/// Resets the in-flush marker even if an effect panics.
struct FlushGuard<'a>(&'a Cell<bool>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl RuntimeInner {
    pub(crate) fn request_flush(&self) -> bool {
        let weak = Weak::clone(&self.this);
        self.scheduler.request(move || {
            Box::new(move || {
                if let Some(runtime) = weak.upgrade() {
                    runtime.run_deferred();
                }
            })
        })
    }

    fn run_deferred(&self) {
        // This task is no longer queued, so later writes must schedule anew.
        self.scheduler.clear_pending();
        if self.flushing.get() {
            // The host ran our task from inside an effect. Rescheduling would
            // spin a synchronous timer, so the running flush does another pass.
            tracing::debug!("deferred flush fired during a flush; folded into the running flush");
            self.rerun.set(true);
            return;
        }
        if let Err(err) = self.flush() {
            tracing::warn!(error = %err, "deferred flush failed");
        }
    }

    fn flush(&self) -> Result<FlushReport, RuntimeError> {
        if self.flushing.replace(true) {
            return Err(RuntimeError::ReentrantFlush);
        }
        let _guard = FlushGuard(&self.flushing);

        loop {
            self.rerun.set(false);
            let sequence = self.flushes.get() + 1;
            self.flushes.set(sequence);

            let span = debug_span!(
                "reactive_flush",
                flush = sequence,
                evaluated = tracing::field::Empty,
                ran = tracing::field::Empty
            )
            .entered();
            let pass = self.effects.evaluate_all();
            span.record("evaluated", pass.evaluated as u64);
            span.record("ran", pass.ran as u64);

            if !self.rerun.get() {
                return Ok(FlushReport { sequence, pass });
            }
        }
    }
}

/// Handle to a reactive runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("slots", &self.slot_count())
            .field("effects", &self.effect_count())
            .field("pending", &self.is_flush_pending())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime that defers flushes through `timer`.
    #[must_use]
    pub fn new(timer: Rc<dyn Timer>) -> Self {
        Self::with_config(timer, RuntimeConfig::default())
    }

    /// Create a runtime with explicit configuration.
    #[must_use]
    pub fn with_config(timer: Rc<dyn Timer>, config: RuntimeConfig) -> Self {
        let inner = Rc::new_cyclic(|this| RuntimeInner {
            this: Weak::clone(this),
            store: StateStore::new(),
            effects: EffectRegistry::new(),
            scheduler: Scheduler::new(timer, config.flush_delay),
            config,
            flushing: Cell::new(false),
            rerun: Cell::new(false),
            flushes: Cell::new(0),
        });
        Self { inner }
    }

    /// Append a new state slot holding `initial`.
    pub fn create_cell<T: 'static>(&self, initial: T) -> State<T> {
        let (id, value) = self.inner.store.append(initial);
        tracing::trace!(slot = id.index(), ty = std::any::type_name::<T>(), "state cell created");
        State::from_parts(id, value, Rc::downgrade(&self.inner))
    }

    /// Re-acquire a typed handle to an existing slot.
    ///
    /// Returns `None` if `id` is out of range or the slot holds another type.
    #[must_use]
    pub fn cell<T: 'static>(&self, id: SlotId) -> Option<State<T>> {
        let value = self.inner.store.lookup::<T>(id)?;
        Some(State::from_parts(id, value, Rc::downgrade(&self.inner)))
    }

    /// Register an effect. It is evaluated on the next flush.
    pub fn register_effect(&self, callback: impl FnMut() + 'static, deps: Deps) -> EffectId {
        let dependencies = deps.len();
        let id = self.inner.effects.register(Box::new(callback), deps);
        tracing::trace!(effect = id.index(), ?dependencies, "effect registered");
        id
    }

    /// Ask for a flush on the next tick. Returns whether a new deferred task
    /// was scheduled (`false` means one was already pending).
    pub fn request_flush(&self) -> bool {
        self.inner.request_flush()
    }

    /// Run an evaluation pass synchronously.
    ///
    /// The pending flag is left alone: a deferred task already queued stays
    /// the only outstanding one, absorbs later requests, and performs an
    /// ordinary pass when it runs.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ReentrantFlush`] when called from inside an effect.
    pub fn flush_now(&self) -> Result<FlushReport, RuntimeError> {
        self.inner.flush()
    }

    /// Whether a deferred flush is outstanding.
    #[must_use]
    pub fn is_flush_pending(&self) -> bool {
        self.inner.scheduler.is_pending()
    }

    /// Whether an evaluation pass is currently running.
    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.get()
    }

    /// Number of slots created so far.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.inner.store.len()
    }

    /// Number of effects registered so far.
    #[must_use]
    pub fn effect_count(&self) -> usize {
        self.inner.effects.len()
    }

    /// How many times an effect's callback has run.
    #[must_use]
    pub fn effect_runs(&self, id: EffectId) -> Option<u64> {
        self.inner.effects.runs(id)
    }

    /// Number of completed or in-progress flushes.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.inner.flushes.get()
    }

    /// Snapshot of the runtime's counters.
    #[must_use]
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            slots: self.slot_count(),
            effects: self.effect_count(),
            flushes: self.flush_count(),
            scheduler: self.inner.scheduler.stats(),
        }
    }

    /// Configuration the runtime was built with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub(crate) fn replace_effect_callback(
        &self,
        id: EffectId,
        callback: Box<dyn FnMut()>,
    ) -> bool {
        self.inner.effects.replace_callback(id, callback)
    }

    pub(crate) fn effect_dependency_count(&self, id: EffectId) -> Option<Option<usize>> {
        self.inner.effects.dependency_count(id)
    }

    /// Whether two handles refer to the same runtime.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;
    use crate::testing::ManualTimer;
    use std::cell::RefCell;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn runtime() -> (Rc<ManualTimer>, Runtime) {
        let timer = Rc::new(ManualTimer::new());
        let rt = Runtime::new(timer.clone());
        (timer, rt)
    }

    fn logger<T: 'static>() -> (Rc<RefCell<Vec<T>>>, Rc<RefCell<Vec<T>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        (Rc::clone(&log), log)
    }

    #[test]
    fn slots_are_numbered_in_creation_order() {
        let (_timer, rt) = runtime();
        let ids: Vec<usize> = (0..5).map(|i| rt.create_cell(i).id().index()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(rt.slot_count(), 5);
    }

    #[test]
    fn many_sets_one_deferred_flush() {
        let (timer, rt) = runtime();
        let c = rt.create_cell(0);
        let (log, sink) = logger();
        let c2 = c.clone();
        rt.register_effect(move || sink.borrow_mut().push(c2.get()), deps![c]);

        c.set(5);
        c.set(6);
        c.set(7);
        assert_eq!(timer.scheduled_total(), 1);

        timer.run_pending();
        assert_eq!(*log.borrow(), vec![7]);
        assert_eq!(rt.flush_count(), 1);
    }

    #[test]
    fn set_inside_effect_schedules_new_flush() {
        let (timer, rt) = runtime();
        let source = rt.create_cell(0);
        let mirror = rt.create_cell(0);

        let (src, dst) = (source.clone(), mirror.clone());
        rt.register_effect(move || dst.set(src.get() * 10), deps![source]);
        let (log, sink) = logger();
        let m = mirror.clone();
        rt.register_effect(move || sink.borrow_mut().push(m.get()), deps![mirror]);

        source.set(1);
        timer.run_pending();
        // First pass: mirror effect sees 10 already (registered after the writer).
        assert_eq!(*log.borrow(), vec![10]);
        assert!(rt.is_flush_pending(), "write during flush scheduled another");
        assert_eq!(timer.pending(), 1);

        timer.run_pending();
        assert_eq!(*log.borrow(), vec![10], "second pass finds no diff");
        assert_eq!(rt.flush_count(), 2);
    }

    #[test]
    fn flush_now_keeps_queued_task_as_the_only_one() {
        let (timer, rt) = runtime();
        let c = rt.create_cell(1);
        rt.register_effect(|| {}, deps![c]);
        rt.register_effect(|| {}, Deps::Always);
        c.set(2);
        let report = rt.flush_now().unwrap();
        assert_eq!(report.sequence, 1);
        assert_eq!(report.pass.evaluated, 2);
        assert_eq!(report.pass.ran, 2);

        // The queued task is still outstanding and absorbs further writes.
        assert!(rt.is_flush_pending());
        c.set(3);
        assert_eq!(timer.pending(), 1);
        assert_eq!(timer.scheduled_total(), 1);

        timer.run_pending();
        assert!(!rt.is_flush_pending());
        assert_eq!(rt.flush_count(), 2);
    }

    /// Runs every task the moment it is scheduled.
    struct SyncTimer;

    impl Timer for SyncTimer {
        fn after(&self, _delay: Duration, task: crate::host::DeferredTask) {
            task();
        }
    }

    #[test]
    fn synchronous_timer_never_strands_pending_flag() {
        let rt = Runtime::new(Rc::new(SyncTimer));
        let a = rt.create_cell(0);
        let b = rt.create_cell(0);
        let (ra, wb) = (a.clone(), b.clone());
        rt.register_effect(move || wb.set(ra.get() + 1), deps![a]);
        let (log, sink) = logger();
        let rb = b.clone();
        rt.register_effect(move || sink.borrow_mut().push(rb.get()), deps![b]);

        a.set(1);
        assert!(!rt.is_flush_pending());
        assert_eq!(b.get(), 2);

        a.set(5);
        assert!(!rt.is_flush_pending(), "flag cleared after the nested task");
        assert_eq!(b.get(), 6);
        assert_eq!(*log.borrow(), vec![2, 6]);
    }

    #[test]
    #[traced_test]
    fn deferred_task_fired_mid_flush_adds_a_pass() {
        let (timer, rt) = runtime();
        let c = rt.create_cell(0);
        let (log, sink) = logger();
        let (reader, host) = (c.clone(), Rc::clone(&timer));
        rt.register_effect(
            move || {
                let v = reader.get();
                sink.borrow_mut().push(v);
                if v == 1 {
                    reader.set(2);
                    // A host that pumps its queue from inside an effect.
                    host.run_pending();
                }
            },
            deps![c],
        );
        rt.flush_now().unwrap();

        c.set(1);
        timer.run_pending();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(!rt.is_flush_pending());
        assert_eq!(timer.pending(), 0);
        assert!(logs_contain("folded into the running flush"));

        c.set(7);
        assert_eq!(timer.pending(), 1, "scheduler still accepts requests");
        timer.run_pending();
        assert_eq!(*log.borrow(), vec![0, 1, 2, 7]);
    }

    #[test]
    fn flush_now_inside_effect_is_rejected() {
        let (_timer, rt) = runtime();
        let inner = rt.clone();
        let (log, sink) = logger();
        rt.register_effect(
            move || sink.borrow_mut().push(inner.flush_now().err()),
            Deps::once(),
        );
        rt.flush_now().unwrap();
        assert_eq!(*log.borrow(), vec![Some(RuntimeError::ReentrantFlush)]);
        assert!(!rt.is_flushing());
    }

    #[test]
    fn panic_in_effect_does_not_wedge_runtime() {
        let (timer, rt) = runtime();
        let c = rt.create_cell(0);
        let reader = c.clone();
        rt.register_effect(
            move || {
                if reader.get() == 1 {
                    panic!("effect failure");
                }
            },
            deps![c],
        );
        rt.flush_now().unwrap();

        c.set(1);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            timer.run_pending();
        }));
        assert!(result.is_err());
        assert!(!rt.is_flushing());
        assert!(!rt.is_flush_pending());

        c.set(2);
        assert_eq!(timer.pending(), 1, "scheduler still accepts requests");
        timer.run_pending();
        assert_eq!(rt.flush_count(), 3);
    }

    #[test]
    fn task_after_drop_is_inert() {
        let (timer, rt) = runtime();
        let c = rt.create_cell(0);
        c.set(1);
        drop(rt);
        assert_eq!(timer.run_pending(), 1);
    }

    #[test]
    fn configured_delay_reaches_timer() {
        let timer = Rc::new(ManualTimer::new());
        let rt = Runtime::with_config(
            timer.clone(),
            RuntimeConfig::default().with_flush_delay(Duration::from_millis(33)),
        );
        rt.request_flush();
        assert_eq!(timer.delays(), vec![Duration::from_millis(33)]);
    }

    #[test]
    fn cell_reacquires_typed_handle() {
        let (_timer, rt) = runtime();
        let original = rt.create_cell(String::from("a"));
        let again: State<String> = rt.cell(original.id()).unwrap();
        again.set("b".into());
        assert_eq!(original.get(), "b");
        assert!(rt.cell::<u32>(original.id()).is_none());
    }

    #[test]
    fn stats_track_coalescing() {
        let (timer, rt) = runtime();
        let c = rt.create_cell(0);
        for i in 0..4 {
            c.set(i);
        }
        timer.run_pending();
        let stats = rt.stats();
        assert_eq!(stats.slots, 1);
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.scheduler.requests, 4);
        assert_eq!(stats.scheduler.coalesced(), 3);
    }

    #[traced_test]
    #[test]
    fn coalesced_requests_are_traced() {
        let (timer, rt) = runtime();
        let c = rt.create_cell(0);
        c.set(1);
        c.set(2);
        timer.run_pending();
        assert!(logs_contain("flush scheduled"));
        assert!(logs_contain("request coalesced"));
    }
}
