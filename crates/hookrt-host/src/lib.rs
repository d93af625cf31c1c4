#![forbid(unsafe_code)]

//! Host collaborators for the hookrt reactive engine.
//!
//! - [`EventLoop`]: a single-threaded loop that implements the engine's
//!   timer and event-source traits, with a `Send` [`Notifier`] for feeding
//!   notifications in from other threads.
//! - [`Bootstrap`]: runs queued callbacks once the host reports readiness.
//! - [`Inspector`]: a named, sorted debug view over live state cells.
//! - `persist` (feature `state-persistence`): state cells loaded from and
//!   written back to a JSON storage backend.
//! - `telemetry` (feature `telemetry`): installs a `tracing` fmt subscriber
//!   filtered by `HOOKRT_LOG`.

pub mod event_loop;
pub mod inspect;
pub mod lifecycle;
#[cfg(feature = "state-persistence")]
pub mod persist;
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use event_loop::{
    EventLoop, EventLoopConfig, LoopError, LoopTimer, Notification, Notifier, TurnReport,
};
pub use inspect::Inspector;
pub use lifecycle::Bootstrap;
#[cfg(feature = "state-persistence")]
pub use persist::{FileStorage, MemoryStorage, PersistError, StateStorage, persisted_cell};
#[cfg(feature = "telemetry")]
pub use telemetry::{TelemetryError, init_tracing};
