#![forbid(unsafe_code)]

//! Reactive engine for hookrt.
//!
//! This crate provides the change-tracking core that drives side-effect
//! updates from state mutation and external notifications:
//!
//! - [`State`]: a positional state cell created through [`Runtime::create_cell`].
//!   Every write asks the scheduler for a flush.
//! - [`Deps`] / [`Dependency`]: per-effect dependency snapshots compared by
//!   simple inequality on each flush.
//! - [`Runtime`]: the explicit context object that owns the state store, the
//!   effect registry and the batching scheduler.
//! - [`EventMultiplexer`]: fans external event keys out to ordered handler
//!   lists, ref-counting each key's registration with the host.
//! - [`HookScope`] / [`HookCursor`]: order-checked registration for code that
//!   re-runs the same sequence of `use_state` / `use_effect` calls.
//!
//! # Architecture
//!
//! Everything here is single-threaded. Shared ownership uses `Rc<RefCell<..>>`
//! and `Cell`, so engine types are `!Send` and the cooperative model is
//! enforced by the compiler. The host supplies two primitives through the
//! traits in [`host`]: a fire-once delayed callback ([`Timer`]) and a
//! key registration sink ([`EventSource`]).
//!
//! # Invariants
//!
//! 1. The Nth cell created on a runtime occupies slot N forever.
//! 2. Any number of writes before the deferred task runs produce exactly one
//!    flush; the pending flag is cleared before effects are evaluated.
//! 3. Effects are evaluated in registration order; every dependency snapshot
//!    is refreshed on every pass.
//! 4. A key is registered with the host iff its handler list is non-empty.
//! 5. Dispatch iterates a snapshot: handlers added during a dispatch do not
//!    run in it, and handlers removing themselves do not disturb it.
//! 6. No `RefCell` borrow is held while user code runs.

pub mod config;
pub mod effect;
pub mod error;
pub mod event;
pub mod hooks;
pub mod host;
pub mod runtime;
pub mod scheduler;
pub mod store;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use config::RuntimeConfig;
pub use effect::{Dependency, Deps, EffectId};
pub use error::{ConfigError, RuntimeError};
pub use event::{EventMultiplexer, Handler, SubscriptionGuard, Unsubscribe};
pub use hooks::{HookCursor, HookScope};
pub use host::{DeferredTask, EventSource, NullSource, Timer};
pub use runtime::{FlushReport, Runtime, RuntimeStats};
pub use store::{SlotId, State};
