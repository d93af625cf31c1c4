#![forbid(unsafe_code)]

//! hookrt: hooks-style reactive state, effects and event fan-out.
//!
//! This crate re-exports the engine from `hookrt-core` and, with the default
//! `host` feature, the event loop and collaborators from `hookrt-host`.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use hookrt::prelude::*;
//!
//! let lp: EventLoop<&'static str, u32> = EventLoop::new(EventLoopConfig::default());
//! let rt = lp.runtime(RuntimeConfig::default());
//!
//! let count = rt.create_cell(0u32);
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let (sink, reader) = (Rc::clone(&seen), count.clone());
//! rt.register_effect(move || sink.borrow_mut().push(reader.get()), deps![count]);
//!
//! let writer = count.clone();
//! lp.events().on(["BUMP"], move |_, by| writer.update(|c| *c += by));
//! lp.post("BUMP", 2);
//! lp.post("BUMP", 3);
//! lp.run_until_idle().unwrap();
//!
//! assert_eq!(*seen.borrow(), vec![5]);
//! ```

pub use hookrt_core::*;

#[cfg(feature = "host")]
pub use hookrt_host::{
    Bootstrap, EventLoop, EventLoopConfig, Inspector, LoopError, Notifier, TurnReport,
};

#[cfg(feature = "state-persistence")]
pub use hookrt_host::persist::{
    FileStorage, MemoryStorage, PersistError, StateStorage, persisted_cell,
};

#[cfg(feature = "telemetry")]
pub use hookrt_host::telemetry::{TelemetryError, init_tracing};

/// Common imports.
pub mod prelude {
    pub use hookrt_core::{
        Dependency, Deps, EffectId, EventMultiplexer, HookScope, Runtime, RuntimeConfig,
        RuntimeError, SlotId, State, SubscriptionGuard, Unsubscribe, deps,
    };

    #[cfg(feature = "host")]
    pub use hookrt_host::{Bootstrap, EventLoop, EventLoopConfig, Inspector};
}
