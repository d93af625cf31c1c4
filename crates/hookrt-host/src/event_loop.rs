#![forbid(unsafe_code)]

//! Single-threaded host event loop.
//!
//! [`EventLoop`] is a concrete host for the reactive engine. It provides:
//!
//! - a timer queue implementing [`Timer`], ordered by deadline then by
//!   scheduling order;
//! - an event source that tracks which keys the multiplexer has registered,
//!   delivering notifications only for those keys;
//! - an inbox fed by [`Notifier`] handles, which are `Send` so producer
//!   threads can post notifications for the loop thread to dispatch.
//!
//! # Turn structure
//!
//! One [`turn`](EventLoop::turn) is one host tick:
//!
//! 1. drain the inbox and dispatch every notification whose key is live;
//! 2. collect every timer task due at that instant, then run them in order.
//!
//! Tasks scheduled while step 2 runs are not collected until the next turn,
//! so a flush that triggers another flush never runs both in one turn.
//!
//! # Failure Modes
//!
//! - [`LoopError::Saturated`]: `run_until_idle` hit `max_turns` without the
//!   queue draining, usually an effect that keeps writing state it depends on.
//! - [`LoopError::Disconnected`]: a [`Notifier`] outlived its loop.

use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

use hookrt_core::{
    ConfigError, DeferredTask, EventMultiplexer, EventSource, Runtime, RuntimeConfig, Timer,
};
use web_time::Instant;

/// Environment variable overriding [`EventLoopConfig::max_turns`].
pub const ENV_MAX_TURNS: &str = "HOOKRT_MAX_TURNS";
/// Environment variable overriding [`EventLoopConfig::poll_interval`].
pub const ENV_POLL_INTERVAL_MS: &str = "HOOKRT_POLL_INTERVAL_MS";

/// Configuration for an [`EventLoop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLoopConfig {
    /// Turn budget for [`EventLoop::run_until_idle`].
    pub max_turns: usize,
    /// Longest wait for a notification in [`EventLoop::run_while`].
    pub poll_interval: Duration,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            max_turns: 1024,
            poll_interval: Duration::from_millis(16),
        }
    }
}

impl EventLoopConfig {
    #[must_use]
    pub fn with_max_turns(mut self, turns: usize) -> Self {
        self.max_turns = turns;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Defaults overridden by process environment variables.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if a variable is set but unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from `lookup`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if a value is present but unparsable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(turns) = parse_u64(&lookup, ENV_MAX_TURNS)? {
            config.max_turns = usize::try_from(turns).unwrap_or(usize::MAX);
        }
        if let Some(millis) = parse_u64(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(millis);
        }
        Ok(config)
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

/// Errors from running the loop or posting to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    /// The loop did not go idle within its turn budget.
    Saturated { turns: usize },
    /// The loop this notifier belonged to has been dropped.
    Disconnected,
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saturated { turns } => write!(f, "event loop still busy after {turns} turns"),
            Self::Disconnected => write!(f, "event loop has been dropped"),
        }
    }
}

impl std::error::Error for LoopError {}

// ---------------------------------------------------------------------------
// Timer queue
// ---------------------------------------------------------------------------

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    task: DeferredTask,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Deadline-ordered queue of one-shot tasks.
#[derive(Default)]
pub struct LoopTimer {
    heap: RefCell<BinaryHeap<Reverse<TimerEntry>>>,
    seq: Cell<u64>,
}

impl LoopTimer {
    /// Remove and return every task due at `now`, earliest first.
    fn take_due(&self, now: Instant) -> Vec<DeferredTask> {
        let mut heap = self.heap.borrow_mut();
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(e)| e.deadline <= now) {
            if let Some(Reverse(entry)) = heap.pop() {
                due.push(entry.task);
            }
        }
        due
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.heap.borrow().peek().map(|Reverse(e)| e.deadline)
    }

    /// Tasks waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.borrow().is_empty()
    }
}

impl Timer for LoopTimer {
    fn after(&self, delay: Duration, task: DeferredTask) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        self.heap.borrow_mut().push(Reverse(TimerEntry {
            deadline: Instant::now() + delay,
            seq,
            task,
        }));
    }
}

// ---------------------------------------------------------------------------
// Event source
// ---------------------------------------------------------------------------

/// Tracks keys the multiplexer has registered with the loop.
struct LoopSource<K> {
    live: RefCell<HashSet<K>>,
}

impl<K: Clone + Eq + Hash> EventSource<K> for LoopSource<K> {
    fn register(&self, key: &K) {
        self.live.borrow_mut().insert(key.clone());
    }

    fn unregister(&self, key: &K) {
        self.live.borrow_mut().remove(key);
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// An external notification awaiting dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification<K, A> {
    pub key: K,
    pub args: A,
}

/// Posts notifications to an [`EventLoop`], possibly from another thread.
pub struct Notifier<K, A> {
    tx: mpsc::Sender<Notification<K, A>>,
}

impl<K, A> Clone for Notifier<K, A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<K, A> fmt::Debug for Notifier<K, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish()
    }
}

impl<K, A> Notifier<K, A> {
    /// Queue a notification for the loop's next turn.
    ///
    /// # Errors
    ///
    /// [`LoopError::Disconnected`] if the loop has been dropped.
    pub fn notify(&self, key: K, args: A) -> Result<(), LoopError> {
        self.tx
            .send(Notification { key, args })
            .map_err(|_| LoopError::Disconnected)
    }
}

/// What one turn did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnReport {
    /// Notifications dispatched to live keys.
    pub dispatched: usize,
    /// Notifications dropped because no handler was subscribed.
    pub dropped: usize,
    /// Timer tasks run.
    pub tasks: usize,
}

impl TurnReport {
    fn absorb(&mut self, other: TurnReport) {
        self.dispatched += other.dispatched;
        self.dropped += other.dropped;
        self.tasks += other.tasks;
    }

    /// Whether the turn did nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dispatched == 0 && self.dropped == 0 && self.tasks == 0
    }
}

// ---------------------------------------------------------------------------
// EventLoop
// ---------------------------------------------------------------------------

/// Single-threaded host loop driving timers and event dispatch.
pub struct EventLoop<K, A> {
    timer: Rc<LoopTimer>,
    source: Rc<LoopSource<K>>,
    events: EventMultiplexer<K, A>,
    tx: mpsc::Sender<Notification<K, A>>,
    rx: mpsc::Receiver<Notification<K, A>>,
    backlog: RefCell<VecDeque<Notification<K, A>>>,
    config: EventLoopConfig,
    turns: Cell<u64>,
}

impl<K, A> fmt::Debug for EventLoop<K, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("timers", &self.timer.len())
            .field("backlog", &self.backlog.borrow().len())
            .field("turns", &self.turns.get())
            .finish()
    }
}

impl<K, A> EventLoop<K, A>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    A: 'static,
{
    #[must_use]
    pub fn new(config: EventLoopConfig) -> Self {
        let source = Rc::new(LoopSource {
            live: RefCell::new(HashSet::new()),
        });
        let events = EventMultiplexer::new(source.clone());
        let (tx, rx) = mpsc::channel();
        Self {
            timer: Rc::new(LoopTimer::default()),
            source,
            events,
            tx,
            rx,
            backlog: RefCell::new(VecDeque::new()),
            config,
            turns: Cell::new(0),
        }
    }

    /// The loop's timer, for constructing runtimes.
    #[must_use]
    pub fn timer(&self) -> Rc<dyn Timer> {
        self.timer.clone()
    }

    /// A runtime whose flushes are deferred onto this loop.
    #[must_use]
    pub fn runtime(&self, config: RuntimeConfig) -> Runtime {
        Runtime::with_config(self.timer(), config)
    }

    /// The multiplexer notifications are dispatched through.
    #[must_use]
    pub fn events(&self) -> &EventMultiplexer<K, A> {
        &self.events
    }

    /// A sendable handle for posting notifications.
    #[must_use]
    pub fn notifier(&self) -> Notifier<K, A> {
        Notifier {
            tx: self.tx.clone(),
        }
    }

    /// Queue a notification from the loop thread.
    pub fn post(&self, key: K, args: A) {
        self.backlog
            .borrow_mut()
            .push_back(Notification { key, args });
    }

    #[must_use]
    pub fn config(&self) -> &EventLoopConfig {
        &self.config
    }

    /// Turns run so far.
    #[must_use]
    pub fn turns(&self) -> u64 {
        self.turns.get()
    }

    /// Whether a key currently has subscribers.
    #[must_use]
    pub fn is_live(&self, key: &K) -> bool {
        self.source.live.borrow().contains(key)
    }

    /// Whether no notification or timer task is waiting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pull_inbox();
        self.backlog.borrow().is_empty() && self.timer.is_empty()
    }

    fn pull_inbox(&self) {
        let mut backlog = self.backlog.borrow_mut();
        while let Ok(notification) = self.rx.try_recv() {
            backlog.push_back(notification);
        }
    }

    fn deliver(&self, notification: Notification<K, A>, report: &mut TurnReport) {
        if self.is_live(&notification.key) {
            self.events.dispatch(&notification.key, &notification.args);
            report.dispatched += 1;
        } else {
            tracing::trace!(key = ?notification.key, "notification for unregistered key dropped");
            report.dropped += 1;
        }
    }

    /// Run one host tick.
    pub fn turn(&self) -> TurnReport {
        let turn = self.turns.get() + 1;
        self.turns.set(turn);
        let _span = tracing::trace_span!("host_turn", turn).entered();

        let mut report = TurnReport::default();
        self.pull_inbox();
        let inbox: Vec<Notification<K, A>> = self.backlog.borrow_mut().drain(..).collect();
        for notification in inbox {
            self.deliver(notification, &mut report);
        }

        let due = self.timer.take_due(Instant::now());
        for task in due {
            task();
            report.tasks += 1;
        }
        report
    }

    /// Run turns until nothing is waiting, sleeping until timer deadlines
    /// that lie in the future.
    ///
    /// # Errors
    ///
    /// [`LoopError::Saturated`] if work remains after `max_turns` turns.
    pub fn run_until_idle(&self) -> Result<TurnReport, LoopError> {
        let mut total = TurnReport::default();
        for _ in 0..self.config.max_turns {
            if self.is_idle() {
                return Ok(total);
            }
            if self.backlog.borrow().is_empty() {
                self.sleep_until_next_deadline();
            }
            total.absorb(self.turn());
        }
        if self.is_idle() {
            return Ok(total);
        }
        tracing::warn!(turns = self.config.max_turns, "event loop saturated");
        Err(LoopError::Saturated {
            turns: self.config.max_turns,
        })
    }

    /// Run turns while `keep_running` returns true, blocking for at most
    /// `poll_interval` between turns when nothing is due.
    pub fn run_while(&self, mut keep_running: impl FnMut() -> bool) -> TurnReport {
        let mut total = TurnReport::default();
        while keep_running() {
            total.absorb(self.turn());
            let now = Instant::now();
            let wait = match self.timer.next_deadline() {
                Some(deadline) => deadline
                    .saturating_duration_since(now)
                    .min(self.config.poll_interval),
                None => self.config.poll_interval,
            };
            if wait.is_zero() || !self.backlog.borrow().is_empty() {
                continue;
            }
            if let Ok(notification) = self.rx.recv_timeout(wait) {
                self.backlog.borrow_mut().push_back(notification);
            }
        }
        total
    }

    fn sleep_until_next_deadline(&self) {
        if let Some(deadline) = self.timer.next_deadline() {
            let wait = deadline.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
    }
}
