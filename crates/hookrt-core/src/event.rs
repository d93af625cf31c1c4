#![forbid(unsafe_code)]

//! Event multiplexer: external event keys fanned out to ordered handlers.
//!
//! A key is registered with the host [`EventSource`] when its first handler
//! subscribes and unregistered when its last handler leaves. The host calls
//! [`EventMultiplexer::dispatch`] for notifications; each dispatch invokes
//! the handlers subscribed at that moment, in subscription order.
//!
//! # Dispatch safety
//!
//! Dispatch copies the handler list before invoking anything (copy-on-
//! dispatch). Consequently:
//!
//! - a handler may unsubscribe itself (the `once` case) or any other handler
//!   without disturbing the iteration in progress;
//! - a handler subscribed during a dispatch first runs on the next dispatch;
//! - a handler removed by an earlier handler of the same dispatch still runs
//!   in that dispatch, since it was live when the dispatch started.
//!
//! `once` handlers additionally guard themselves so the wrapped handler never
//! runs twice, even when an outer dispatch still holds them in its snapshot.
//!
//! # Invariants
//!
//! 1. `is_registered(k)` iff `subscriber_count(k) > 0`, and the host saw
//!    exactly one `register` per transition 0→1 and one `unregister` per 1→0.
//! 2. Removal is by handler identity and removes one entry per key.
//! 3. No borrow of the subscription map is held while a handler or the host
//!    event source runs.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use ahash::AHashMap;

use crate::host::{EventSource, NullSource};

type HandlerFn<K, A> = dyn Fn(&K, &A);

/// An event handler with pointer identity.
///
/// Clones share identity, so subscribing a clone twice creates two entries
/// that each unsubscribe removes one of.
pub struct Handler<K, A> {
    f: Rc<HandlerFn<K, A>>,
}

impl<K, A> Clone for Handler<K, A> {
    fn clone(&self) -> Self {
        Self {
            f: Rc::clone(&self.f),
        }
    }
}

impl<K, A> fmt::Debug for Handler<K, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler")
            .field(&Rc::as_ptr(&self.f).cast::<()>())
            .finish()
    }
}

impl<K: 'static, A: 'static> Handler<K, A> {
    /// Wrap a closure as a handler.
    pub fn new(f: impl Fn(&K, &A) + 'static) -> Self {
        Self { f: Rc::new(f) }
    }

    /// Invoke the handler.
    pub fn call(&self, key: &K, args: &A) {
        (self.f)(key, args);
    }

    /// Whether both handles are the same handler.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

struct MuxInner<K, A> {
    lists: RefCell<AHashMap<K, Vec<Handler<K, A>>>>,
    source: Rc<dyn EventSource<K>>,
    dispatches: Cell<u64>,
}

impl<K, A> MuxInner<K, A>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    A: 'static,
{
    fn add(&self, keys: &[K], handler: &Handler<K, A>) {
        let mut fresh = Vec::new();
        {
            let mut lists = self.lists.borrow_mut();
            for key in keys {
                let list = lists.entry(key.clone()).or_insert_with(|| {
                    fresh.push(key.clone());
                    Vec::new()
                });
                list.push(handler.clone());
                tracing::trace!(key = ?key, subscribers = list.len(), "handler subscribed");
            }
        }
        for key in &fresh {
            tracing::debug!(key = ?key, "registering event source key");
            self.source.register(key);
        }
    }

    fn remove(&self, keys: &[K], handler: &Handler<K, A>) {
        let mut emptied = Vec::new();
        {
            let mut lists = self.lists.borrow_mut();
            for key in keys {
                let Some(list) = lists.get_mut(key) else {
                    continue;
                };
                if let Some(pos) = list.iter().position(|h| h.same(handler)) {
                    list.remove(pos);
                    tracing::trace!(key = ?key, subscribers = list.len(), "handler unsubscribed");
                }
                if list.is_empty() {
                    lists.remove(key);
                    emptied.push(key.clone());
                }
            }
        }
        for key in &emptied {
            tracing::debug!(key = ?key, "unregistering event source key");
            self.source.unregister(key);
        }
    }
}

/// Maps event keys to ordered handler lists.
///
/// Cloning the multiplexer shares the same subscription map.
pub struct EventMultiplexer<K, A> {
    inner: Rc<MuxInner<K, A>>,
}

impl<K, A> Clone for EventMultiplexer<K, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: fmt::Debug, A> fmt::Debug for EventMultiplexer<K, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = self.inner.lists.borrow();
        let mut map = f.debug_map();
        for (key, list) in lists.iter() {
            map.entry(key, &list.len());
        }
        map.finish()
    }
}

impl<K, A> EventMultiplexer<K, A>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    A: 'static,
{
    /// Create a multiplexer that reports key registration to `source`.
    #[must_use]
    pub fn new(source: Rc<dyn EventSource<K>>) -> Self {
        Self {
            inner: Rc::new(MuxInner {
                lists: RefCell::new(AHashMap::new()),
                source,
                dispatches: Cell::new(0),
            }),
        }
    }

    /// Create a multiplexer with no host event source.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(Rc::new(NullSource))
    }

    /// Subscribe `handler` to every key in `keys`.
    ///
    /// Duplicate keys in `keys` are ignored after their first occurrence.
    /// With `once`, the handler unsubscribes from all of `keys` the first time
    /// it is invoked, before the wrapped handler runs.
    pub fn subscribe(
        &self,
        keys: impl IntoIterator<Item = K>,
        handler: Handler<K, A>,
        once: bool,
    ) -> Unsubscribe<K, A> {
        let mut unique: Vec<K> = Vec::new();
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        let keys: Rc<[K]> = unique.into();
        let entry = if once {
            self.once_wrapper(Rc::clone(&keys), handler)
        } else {
            handler
        };
        self.inner.add(&keys, &entry);
        Unsubscribe {
            mux: Rc::downgrade(&self.inner),
            keys,
            handler: entry,
        }
    }

    /// Subscribe a closure to `keys`.
    pub fn on(
        &self,
        keys: impl IntoIterator<Item = K>,
        f: impl Fn(&K, &A) + 'static,
    ) -> Unsubscribe<K, A> {
        self.subscribe(keys, Handler::new(f), false)
    }

    /// Subscribe a closure to `keys` for a single invocation.
    pub fn once(
        &self,
        keys: impl IntoIterator<Item = K>,
        f: impl Fn(&K, &A) + 'static,
    ) -> Unsubscribe<K, A> {
        self.subscribe(keys, Handler::new(f), true)
    }

    fn once_wrapper(&self, keys: Rc<[K]>, inner: Handler<K, A>) -> Handler<K, A> {
        let mux = Rc::downgrade(&self.inner);
        let fired = Cell::new(false);
        let me: Rc<RefCell<Option<Weak<HandlerFn<K, A>>>>> = Rc::new(RefCell::new(None));
        let me_inner = Rc::clone(&me);
        let f: Rc<HandlerFn<K, A>> = Rc::new(move |key: &K, args: &A| {
            if fired.replace(true) {
                return;
            }
            let this = me_inner.borrow().as_ref().and_then(Weak::upgrade);
            if let (Some(this), Some(mux)) = (this, mux.upgrade()) {
                mux.remove(&keys, &Handler { f: this });
            }
            inner.call(key, args);
        });
        *me.borrow_mut() = Some(Rc::downgrade(&f));
        Handler { f }
    }

    /// Invoke every handler subscribed to `key`, in subscription order.
    ///
    /// Returns the number of handlers invoked. Unknown keys are a no-op.
    pub fn dispatch(&self, key: &K, args: &A) -> usize {
        let snapshot: Vec<Handler<K, A>> = self
            .inner
            .lists
            .borrow()
            .get(key)
            .cloned()
            .unwrap_or_default();
        self.inner.dispatches.set(self.inner.dispatches.get() + 1);
        tracing::trace!(key = ?key, handlers = snapshot.len(), "dispatch");
        for handler in &snapshot {
            handler.call(key, args);
        }
        snapshot.len()
    }

    /// Handlers currently subscribed to `key`.
    #[must_use]
    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner.lists.borrow().get(key).map_or(0, Vec::len)
    }

    /// Whether `key` is currently registered with the host.
    #[must_use]
    pub fn is_registered(&self, key: &K) -> bool {
        self.inner.lists.borrow().contains_key(key)
    }

    /// Registered keys, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.inner.lists.borrow().keys().cloned().collect()
    }

    /// Total dispatch calls made on this multiplexer.
    #[must_use]
    pub fn dispatch_count(&self) -> u64 {
        self.inner.dispatches.get()
    }
}

/// Removes one subscription's handler from each of its keys.
///
/// Calling [`unsubscribe`](Self::unsubscribe) more than once removes one more
/// matching entry per key each time, or does nothing once none remain.
pub struct Unsubscribe<K, A> {
    mux: Weak<MuxInner<K, A>>,
    keys: Rc<[K]>,
    handler: Handler<K, A>,
}

impl<K, A> Clone for Unsubscribe<K, A> {
    fn clone(&self) -> Self {
        Self {
            mux: Weak::clone(&self.mux),
            keys: Rc::clone(&self.keys),
            handler: self.handler.clone(),
        }
    }
}

impl<K: fmt::Debug, A> fmt::Debug for Unsubscribe<K, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("keys", &self.keys)
            .finish()
    }
}

impl<K, A> Unsubscribe<K, A>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    A: 'static,
{
    /// Remove the handler from every key it was subscribed to.
    pub fn unsubscribe(&self) {
        if let Some(mux) = self.mux.upgrade() {
            mux.remove(&self.keys, &self.handler);
        }
    }

    /// Keys this subscription covers.
    #[must_use]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// The handler stored in the subscription lists (the wrapper, for `once`).
    #[must_use]
    pub fn handler(&self) -> &Handler<K, A> {
        &self.handler
    }

    /// Convert into a guard that unsubscribes when dropped.
    #[must_use = "dropping the guard unsubscribes immediately"]
    pub fn into_guard(self) -> SubscriptionGuard<K, A> {
        SubscriptionGuard {
            cancel: self,
            armed: true,
        }
    }
}

/// RAII guard that unsubscribes on drop.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard<K, A>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    A: 'static,
{
    cancel: Unsubscribe<K, A>,
    armed: bool,
}

impl<K, A> SubscriptionGuard<K, A>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    A: 'static,
{
    /// Keep the subscription alive past the guard.
    pub fn forget(mut self) -> Unsubscribe<K, A> {
        self.armed = false;
        self.cancel.clone()
    }
}

impl<K, A> Drop for SubscriptionGuard<K, A>
where
    K: Clone + Eq + Hash + fmt::Debug + 'static,
    A: 'static,
{
    fn drop(&mut self) {
        if self.armed {
            self.cancel.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSource, SourceEvent};

    type Log = Rc<RefCell<Vec<String>>>;

    fn mux() -> (Rc<RecordingSource<&'static str>>, EventMultiplexer<&'static str, i32>) {
        let source = Rc::new(RecordingSource::new());
        let mux = EventMultiplexer::new(source.clone());
        (source, mux)
    }

    fn recorder(log: &Log, name: &'static str) -> Handler<&'static str, i32> {
        let log = Rc::clone(log);
        Handler::new(move |key, arg| log.borrow_mut().push(format!("{name}:{key}:{arg}")))
    }

    #[test]
    fn first_subscriber_registers_key() {
        let (source, mux) = mux();
        let log = Log::default();
        mux.subscribe(["X"], recorder(&log, "h1"), false);
        mux.subscribe(["X"], recorder(&log, "h2"), false);
        assert_eq!(source.events(), vec![SourceEvent::Registered("X")]);
        assert_eq!(mux.subscriber_count(&"X"), 2);
    }

    #[test]
    fn refcounted_registration() {
        let (source, mux) = mux();
        let log = Log::default();
        let u1 = mux.subscribe(["X"], recorder(&log, "h1"), false);
        let u2 = mux.subscribe(["X"], recorder(&log, "h2"), false);

        u1.unsubscribe();
        assert!(source.is_registered(&"X"), "h2 still subscribed");
        assert!(mux.is_registered(&"X"));

        u2.unsubscribe();
        assert!(!source.is_registered(&"X"));
        assert!(!mux.is_registered(&"X"));
        assert_eq!(
            source.events(),
            vec![SourceEvent::Registered("X"), SourceEvent::Unregistered("X")]
        );
    }

    #[test]
    fn dispatch_passes_key_and_args_in_order() {
        let (_source, mux) = mux();
        let log = Log::default();
        mux.subscribe(["A", "B"], recorder(&log, "h1"), false);
        mux.subscribe(["B"], recorder(&log, "h2"), false);
        assert_eq!(mux.dispatch(&"B", &3), 2);
        assert_eq!(mux.dispatch(&"A", &4), 1);
        assert_eq!(*log.borrow(), vec!["h1:B:3", "h2:B:3", "h1:A:4"]);
    }

    #[test]
    fn dispatch_unknown_key_is_noop() {
        let (source, mux) = mux();
        assert_eq!(mux.dispatch(&"nothing", &0), 0);
        assert!(source.events().is_empty());
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let (source, mux) = mux();
        let log = Log::default();
        let u = mux.subscribe(["X"], recorder(&log, "h"), false);
        u.unsubscribe();
        u.unsubscribe();
        assert_eq!(source.events().len(), 2);
    }

    #[test]
    fn same_handler_twice_is_two_entries() {
        let (source, mux) = mux();
        let log = Log::default();
        let h = recorder(&log, "h");
        let first = mux.subscribe(["X"], h.clone(), false);
        let _second = mux.subscribe(["X"], h, false);

        mux.dispatch(&"X", &1);
        assert_eq!(log.borrow().len(), 2, "both entries fire");

        first.unsubscribe();
        assert_eq!(mux.subscriber_count(&"X"), 1, "removal removes only one");
        assert!(source.is_registered(&"X"));
    }

    #[test]
    fn duplicate_keys_in_one_subscribe_collapse() {
        let (_source, mux) = mux();
        let log = Log::default();
        let u = mux.subscribe(["X", "X"], recorder(&log, "h"), false);
        assert_eq!(u.keys(), &["X"]);
        assert_eq!(mux.subscriber_count(&"X"), 1);
    }

    #[test]
    fn once_handler_deregisters_before_dispatch_returns() {
        let (source, mux) = mux();
        let log = Log::default();
        mux.subscribe(["X"], recorder(&log, "once"), true);

        assert_eq!(mux.dispatch(&"X", &1), 1);
        assert!(!source.is_registered(&"X"));
        assert_eq!(mux.dispatch(&"X", &2), 0);
        assert_eq!(*log.borrow(), vec!["once:X:1"]);
    }

    #[test]
    fn once_handler_with_sibling() {
        let (_source, mux) = mux();
        let log = Log::default();
        mux.subscribe(["Y"], recorder(&log, "h1"), true);
        mux.subscribe(["Y"], recorder(&log, "h2"), false);

        mux.dispatch(&"Y", &0);
        assert_eq!(*log.borrow(), vec!["h1:Y:0", "h2:Y:0"]);
        mux.dispatch(&"Y", &1);
        assert_eq!(*log.borrow(), vec!["h1:Y:0", "h2:Y:0", "h2:Y:1"]);
    }

    #[test]
    fn once_handler_spanning_keys_leaves_all() {
        let (source, mux) = mux();
        let log = Log::default();
        mux.subscribe(["A", "B"], recorder(&log, "once"), true);
        mux.dispatch(&"B", &0);
        assert!(!source.is_registered(&"A"));
        assert!(!source.is_registered(&"B"));
        assert_eq!(mux.dispatch(&"A", &0), 0);
    }

    #[test]
    fn handler_added_during_dispatch_waits_for_next() {
        let (_source, mux) = mux();
        let log = Log::default();
        let late = recorder(&log, "late");
        let weak = Rc::downgrade(&mux.inner);
        let armed = Cell::new(true);
        let first_log = Rc::clone(&log);
        mux.on(["Z"], move |_, _| {
            first_log.borrow_mut().push("first".into());
            if armed.replace(false) {
                if let Some(inner) = weak.upgrade() {
                    inner.add(&["Z"], &late);
                }
            }
        });

        assert_eq!(mux.dispatch(&"Z", &7), 1);
        assert_eq!(*log.borrow(), vec!["first"]);
        assert_eq!(mux.dispatch(&"Z", &8), 2);
        assert_eq!(*log.borrow(), vec!["first", "first", "late:Z:8"]);
    }

    #[test]
    fn nested_dispatch_does_not_refire_once_handler() {
        let (_source, mux) = mux();
        let log = Log::default();
        let nested = mux.clone();
        let depth = Cell::new(0);
        mux.on(["N"], move |key, arg| {
            if depth.replace(depth.get() + 1) == 0 {
                nested.dispatch(key, arg);
            }
        });
        mux.subscribe(["N"], recorder(&log, "once"), true);

        mux.dispatch(&"N", &1);
        assert_eq!(*log.borrow(), vec!["once:N:1"]);
    }

    #[test]
    fn handler_panic_skips_rest_but_keeps_list_changes() {
        let (source, mux) = mux();
        let log = Log::default();
        mux.subscribe(["P"], recorder(&log, "once"), true);
        let armed = Cell::new(true);
        mux.on(["P"], move |_, _| {
            if armed.replace(false) {
                panic!("handler failure");
            }
        });
        mux.subscribe(["P"], recorder(&log, "after"), false);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            mux.dispatch(&"P", &1);
        }));
        assert!(result.is_err());
        assert_eq!(*log.borrow(), vec!["once:P:1"]);
        assert_eq!(mux.subscriber_count(&"P"), 2);
        assert!(source.is_registered(&"P"));

        assert_eq!(mux.dispatch(&"P", &2), 2);
        assert_eq!(*log.borrow(), vec!["once:P:1", "after:P:2"]);
    }

    #[test]
    fn guard_unsubscribes_on_drop() {
        let (source, mux) = mux();
        let log = Log::default();
        {
            let _guard = mux.subscribe(["G"], recorder(&log, "g"), false).into_guard();
            assert!(source.is_registered(&"G"));
        }
        assert!(!source.is_registered(&"G"));
    }

    #[test]
    fn forgotten_guard_keeps_subscription() {
        let (source, mux) = mux();
        let log = Log::default();
        let cancel = mux
            .subscribe(["G"], recorder(&log, "g"), false)
            .into_guard()
            .forget();
        assert!(source.is_registered(&"G"));
        cancel.unsubscribe();
        assert!(!source.is_registered(&"G"));
    }

    #[test]
    fn unsubscribe_after_mux_dropped_is_noop() {
        let (source, mux) = mux();
        let log = Log::default();
        let u = mux.subscribe(["X"], recorder(&log, "h"), false);
        drop(mux);
        u.unsubscribe();
        assert_eq!(source.events(), vec![SourceEvent::Registered("X")]);
    }

    #[test]
    fn debug_lists_counts() {
        let (_source, mux) = mux();
        let log = Log::default();
        mux.subscribe(["K"], recorder(&log, "h"), false);
        assert_eq!(format!("{mux:?}"), "{\"K\": 1}");
    }
}
