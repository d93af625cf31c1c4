#![forbid(unsafe_code)]

//! Append-only state slot store and the [`State`] cell handle.
//!
//! Every [`Runtime::create_cell`](crate::Runtime::create_cell) call appends one
//! slot. A slot's position is its identity: it is assigned once, never reused,
//! and slots are never freed for the lifetime of the runtime.
//!
//! # Invariants
//!
//! 1. The Nth slot appended has `SlotId(N)`.
//! 2. `State::get()` reads the slot at call time; nothing is cached.
//! 3. `State::set()` overwrites without comparing and always requests a
//!    flush. Deduplication happens per tick in the scheduler, not per value.
//!
//! # Failure Modes
//!
//! - Calling `set()`/`update()` on a cell from inside that same cell's
//!   `with()` closure panics with a `RefCell` borrow error.
//! - Writing after the runtime has been dropped stores the value but
//!   schedules nothing.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::RuntimeError;
use crate::runtime::RuntimeInner;

/// Positional identity of a state slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    /// Zero-based position of the slot in creation order.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Ordered, append-only sequence of type-erased value slots.
#[derive(Default)]
pub(crate) struct StateStore {
    slots: RefCell<Vec<Rc<dyn Any>>>,
}

impl StateStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a slot holding `initial`, returning its id and typed storage.
    pub(crate) fn append<T: 'static>(&self, initial: T) -> (SlotId, Rc<RefCell<T>>) {
        let value = Rc::new(RefCell::new(initial));
        let mut slots = self.slots.borrow_mut();
        let id = SlotId(slots.len());
        let erased: Rc<dyn Any> = value.clone();
        slots.push(erased);
        (id, value)
    }

    /// Typed storage for an existing slot, or `None` if the id is out of
    /// range or the slot holds a different type.
    pub(crate) fn lookup<T: 'static>(&self, id: SlotId) -> Option<Rc<RefCell<T>>> {
        let erased = self.slots.borrow().get(id.0).cloned()?;
        erased.downcast::<RefCell<T>>().ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.borrow().len()
    }
}

/// Handle to one state slot.
///
/// Cloning the handle shares the slot. The handle keeps the value alive on
/// its own; it holds only a weak reference to the runtime.
pub struct State<T> {
    id: SlotId,
    value: Rc<RefCell<T>>,
    runtime: Weak<RuntimeInner>,
}

impl<T> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Rc::clone(&self.value),
            runtime: Weak::clone(&self.runtime),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value.try_borrow() {
            Ok(value) => f
                .debug_struct("State")
                .field("id", &self.id)
                .field("value", &*value)
                .finish(),
            Err(_) => f
                .debug_struct("State")
                .field("id", &self.id)
                .field("value", &"<borrowed>")
                .finish(),
        }
    }
}

impl<T: 'static> State<T> {
    pub(crate) fn from_parts(
        id: SlotId,
        value: Rc<RefCell<T>>,
        runtime: Weak<RuntimeInner>,
    ) -> Self {
        Self { id, value, runtime }
    }

    /// The slot this handle is bound to.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SlotId {
        self.id
    }

    /// Current value of the slot.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    /// Access the current value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Overwrite the slot and request a flush.
    ///
    /// No equality check is made: writing the value already stored still
    /// requests a flush.
    pub fn set(&self, value: T) {
        drop(self.value.replace(value));
        self.notify();
    }

    /// Mutate the slot in place and request a flush.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.value.borrow_mut());
        self.notify();
    }

    /// Like [`set`](Self::set), but refuses the write when the runtime is gone.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Detached`] if the owning runtime has been dropped. The
    /// stored value is left unchanged.
    pub fn try_set(&self, value: T) -> Result<(), RuntimeError> {
        let runtime = self.runtime.upgrade().ok_or(RuntimeError::Detached)?;
        drop(self.value.replace(value));
        runtime.request_flush();
        Ok(())
    }

    /// Whether the owning runtime is still alive.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.runtime.strong_count() > 0
    }

    fn notify(&self) {
        match self.runtime.upgrade() {
            Some(runtime) => {
                runtime.request_flush();
            }
            None => tracing::trace!(slot = self.id.0, "write on detached state; no flush"),
        }
    }
}
