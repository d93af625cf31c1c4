#![forbid(unsafe_code)]

//! Boundary traits for the host environment.
//!
//! The engine never owns an event loop. It asks the host for two things:
//!
//! - [`Timer`]: a fire-once delayed callback, used by the scheduler to defer
//!   a flush to the next tick.
//! - [`EventSource`]: a registration sink told when an event key gains its
//!   first subscriber or loses its last one. The host is expected to call
//!   [`EventMultiplexer::dispatch`](crate::EventMultiplexer::dispatch) when a
//!   registered key fires.
//!
//! Both primitives are assumed always available; no fallback exists.

use std::rc::Rc;
use std::time::Duration;

/// A one-shot task handed to the host timer.
pub type DeferredTask = Box<dyn FnOnce()>;

/// Host single-shot delayed-callback primitive.
///
/// Implementations run `task` exactly once, at or after `delay`, from the
/// host's own loop. Timing is best-effort. Running the task synchronously
/// inside `after` is permitted but defeats batching.
pub trait Timer {
    /// Schedule `task` to run once after `delay`.
    fn after(&self, delay: Duration, task: DeferredTask);
}

impl<T: Timer + ?Sized> Timer for Rc<T> {
    fn after(&self, delay: Duration, task: DeferredTask) {
        (**self).after(delay, task);
    }
}

/// Host event source that the multiplexer registers keys with.
pub trait EventSource<K> {
    /// `key` gained its first subscriber.
    fn register(&self, key: &K);

    /// `key` lost its last subscriber.
    fn unregister(&self, key: &K);
}

impl<K, S: EventSource<K> + ?Sized> EventSource<K> for Rc<S> {
    fn register(&self, key: &K) {
        (**self).register(key);
    }

    fn unregister(&self, key: &K) {
        (**self).unregister(key);
    }
}

/// Event source that ignores registration changes.
///
/// Useful for in-process event buses where nothing external needs to know
/// which keys are live.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSource;

impl<K> EventSource<K> for NullSource {
    fn register(&self, _key: &K) {}

    fn unregister(&self, _key: &K) {}
}
