#![forbid(unsafe_code)]

//! Order-checked hook registration for repeatedly invoked code.
//!
//! Slot and effect identity is positional. Code that runs the same sequence
//! of `use_state` / `use_effect` calls on every invocation (a component
//! body, a bootstrap routine re-run on reload) can use a [`HookScope`] to get
//! the same handles back on every pass instead of appending new slots.
//!
//! The first pass records what was created at each position. Later passes
//! must make the same kinds of calls in the same order; a mismatch is
//! reported as [`RuntimeError::HookOrderViolation`]. When
//! [`RuntimeConfig::check_hook_order`](crate::RuntimeConfig::check_hook_order)
//! is set, [`HookCursor::finish`] also verifies that the pass made as many
//! calls as the first one.
//!
//! # Example
//!
//! ```
//! # use std::rc::Rc;
//! # use hookrt_core::{Deps, HookScope, Runtime, Timer, DeferredTask};
//! # struct Noop;
//! # impl Timer for Noop { fn after(&self, _: std::time::Duration, _: DeferredTask) {} }
//! let rt = Runtime::new(Rc::new(Noop));
//! let mut scope = HookScope::new("counter");
//!
//! for _ in 0..3 {
//!     let mut hooks = scope.begin(&rt);
//!     let count = hooks.use_state(|| 0).unwrap();
//!     hooks.use_effect(|| {}, Deps::Always).unwrap();
//!     hooks.finish().unwrap();
//!     count.update(|c| *c += 1);
//! }
//! assert_eq!(rt.slot_count(), 1);
//! assert_eq!(rt.effect_count(), 1);
//! ```

use crate::effect::{Deps, EffectId};
use crate::error::RuntimeError;
use crate::runtime::Runtime;
use crate::store::{SlotId, State};

const USE_STATE: &str = "use_state";
const USE_EFFECT: &str = "use_effect";
const END_OF_HOOKS: &str = "end of hooks";

#[derive(Debug, Clone, Copy)]
enum HookRecord {
    State { slot: SlotId, ty: &'static str },
    Effect { effect: EffectId, deps: Option<usize> },
}

impl HookRecord {
    fn kind(&self) -> &'static str {
        match self {
            Self::State { .. } => USE_STATE,
            Self::Effect { .. } => USE_EFFECT,
        }
    }
}

/// Positional hook record for one logical call site sequence.
#[derive(Debug)]
pub struct HookScope {
    name: String,
    records: Vec<HookRecord>,
    passes: u64,
}

impl HookScope {
    /// Create an empty scope. `name` only appears in diagnostics.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
            passes: 0,
        }
    }

    /// Start a pass.
    pub fn begin<'a>(&'a mut self, runtime: &'a Runtime) -> HookCursor<'a> {
        let first_pass = self.passes == 0;
        self.passes += 1;
        tracing::trace!(scope = %self.name, pass = self.passes, "hook pass started");
        HookCursor {
            scope: self,
            runtime,
            position: 0,
            first_pass,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Passes started so far.
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Hook calls recorded by the first pass.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Slots owned by this scope, in call order.
    #[must_use]
    pub fn slots(&self) -> Vec<SlotId> {
        self.records
            .iter()
            .filter_map(|r| match r {
                HookRecord::State { slot, .. } => Some(*slot),
                HookRecord::Effect { .. } => None,
            })
            .collect()
    }

    /// Effects owned by this scope, in call order.
    #[must_use]
    pub fn effects(&self) -> Vec<EffectId> {
        self.records
            .iter()
            .filter_map(|r| match r {
                HookRecord::Effect { effect, .. } => Some(*effect),
                HookRecord::State { .. } => None,
            })
            .collect()
    }
}

/// One pass over a [`HookScope`].
#[derive(Debug)]
pub struct HookCursor<'a> {
    scope: &'a mut HookScope,
    runtime: &'a Runtime,
    position: usize,
    first_pass: bool,
}

impl HookCursor<'_> {
    /// Return the state cell for the current position, creating it with
    /// `init` on the first pass.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::HookOrderViolation`] if this position held a different
    /// kind of hook or a cell of another type on the first pass, or if the
    /// first pass made fewer calls.
    pub fn use_state<T: 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<State<T>, RuntimeError> {
        let position = self.advance();
        if self.first_pass {
            let state = self.runtime.create_cell(init());
            self.scope.records.push(HookRecord::State {
                slot: state.id(),
                ty: std::any::type_name::<T>(),
            });
            return Ok(state);
        }
        match self.scope.records.get(position).copied() {
            Some(HookRecord::State { slot, ty }) => {
                self.runtime
                    .cell::<T>(slot)
                    .ok_or(RuntimeError::HookOrderViolation {
                        position,
                        expected: ty,
                        found: std::any::type_name::<T>(),
                    })
            }
            other => Err(RuntimeError::HookOrderViolation {
                position,
                expected: other.map_or(END_OF_HOOKS, |r| r.kind()),
                found: USE_STATE,
            }),
        }
    }

    /// Register the effect for the current position on the first pass; on
    /// later passes replace its callback and keep its dependency snapshots.
    ///
    /// `deps` on later passes is only checked for shape (same policy and
    /// length); the snapshots from the first pass stay in place.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::HookOrderViolation`] on kind or dependency-shape drift.
    pub fn use_effect(
        &mut self,
        callback: impl FnMut() + 'static,
        deps: Deps,
    ) -> Result<EffectId, RuntimeError> {
        let position = self.advance();
        if self.first_pass {
            let shape = deps.len();
            let effect = self.runtime.register_effect(callback, deps);
            self.scope.records.push(HookRecord::Effect {
                effect,
                deps: shape,
            });
            return Ok(effect);
        }
        match self.scope.records.get(position).copied() {
            Some(HookRecord::Effect { effect, deps: shape }) => {
                let registered = self.runtime.effect_dependency_count(effect);
                if deps.len() != shape || registered != Some(shape) {
                    return Err(RuntimeError::HookOrderViolation {
                        position,
                        expected: describe_shape(shape),
                        found: describe_shape(deps.len()),
                    });
                }
                self.runtime.replace_effect_callback(effect, Box::new(callback));
                Ok(effect)
            }
            other => Err(RuntimeError::HookOrderViolation {
                position,
                expected: other.map_or(END_OF_HOOKS, |r| r.kind()),
                found: USE_EFFECT,
            }),
        }
    }

    /// Hook calls made so far in this pass.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// End the pass, checking the call count against the first pass when
    /// hook-order checking is enabled.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::HookCountMismatch`] if this pass made fewer calls.
    pub fn finish(self) -> Result<(), RuntimeError> {
        let expected = self.scope.records.len();
        if self.runtime.config().check_hook_order && self.position != expected {
            tracing::debug!(
                scope = %self.scope.name,
                expected,
                found = self.position,
                "hook count drift"
            );
            return Err(RuntimeError::HookCountMismatch {
                expected,
                found: self.position,
            });
        }
        Ok(())
    }

    fn advance(&mut self) -> usize {
        let position = self.position;
        self.position += 1;
        position
    }
}

fn describe_shape(shape: Option<usize>) -> &'static str {
    match shape {
        None => "use_effect(Always)",
        Some(0) => "use_effect(once)",
        Some(_) => "use_effect(On)",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::deps;
    use crate::testing::ManualTimer;
    use std::cell::Cell;
    use std::rc::Rc;

    fn runtime(check: bool) -> (Rc<ManualTimer>, Runtime) {
        let timer = Rc::new(ManualTimer::new());
        let rt = Runtime::with_config(
            timer.clone(),
            RuntimeConfig::default().with_hook_order_check(check),
        );
        (timer, rt)
    }

    #[test]
    fn repeated_passes_reuse_slots() {
        let (_timer, rt) = runtime(true);
        let mut scope = HookScope::new("c");
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut hooks = scope.begin(&rt);
            let a = hooks.use_state(|| 1u8).unwrap();
            let b = hooks.use_state(String::new).unwrap();
            ids.push((a.id(), b.id()));
            hooks.finish().unwrap();
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(rt.slot_count(), 2);
        assert_eq!(scope.slots().len(), 2);
        assert_eq!(scope.passes(), 3);
    }

    #[test]
    fn init_only_runs_on_first_pass() {
        let (_timer, rt) = runtime(true);
        let mut scope = HookScope::new("c");
        let calls = Cell::new(0);
        for _ in 0..2 {
            let mut hooks = scope.begin(&rt);
            hooks
                .use_state(|| {
                    calls.set(calls.get() + 1);
                    0
                })
                .unwrap();
            hooks.finish().unwrap();
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn kind_swap_is_reported() {
        let (_timer, rt) = runtime(true);
        let mut scope = HookScope::new("c");
        {
            let mut hooks = scope.begin(&rt);
            hooks.use_state(|| 0).unwrap();
            hooks.finish().unwrap();
        }
        let mut hooks = scope.begin(&rt);
        let err = hooks.use_effect(|| {}, Deps::Always).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::HookOrderViolation {
                position: 0,
                expected: USE_STATE,
                found: USE_EFFECT,
            }
        );
    }

    #[test]
    fn type_swap_is_reported() {
        let (_timer, rt) = runtime(true);
        let mut scope = HookScope::new("c");
        {
            let mut hooks = scope.begin(&rt);
            hooks.use_state(|| 0i32).unwrap();
            hooks.finish().unwrap();
        }
        let mut hooks = scope.begin(&rt);
        assert!(matches!(
            hooks.use_state(|| "text"),
            Err(RuntimeError::HookOrderViolation { position: 0, .. })
        ));
    }

    #[test]
    fn extra_call_is_reported() {
        let (_timer, rt) = runtime(false);
        let mut scope = HookScope::new("c");
        scope.begin(&rt).finish().unwrap();
        let mut hooks = scope.begin(&rt);
        let err = hooks.use_state(|| 0).unwrap_err();
        assert_eq!(
            err,
            RuntimeError::HookOrderViolation {
                position: 0,
                expected: END_OF_HOOKS,
                found: USE_STATE,
            }
        );
    }

    #[test]
    fn missing_call_is_reported_when_checked() {
        let (_timer, rt) = runtime(true);
        let mut scope = HookScope::new("c");
        {
            let mut hooks = scope.begin(&rt);
            hooks.use_state(|| 0).unwrap();
            hooks.use_state(|| 0).unwrap();
            hooks.finish().unwrap();
        }
        let mut hooks = scope.begin(&rt);
        hooks.use_state(|| 0).unwrap();
        assert_eq!(
            hooks.finish().unwrap_err(),
            RuntimeError::HookCountMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn missing_call_is_ignored_when_unchecked() {
        let (_timer, rt) = runtime(false);
        let mut scope = HookScope::new("c");
        {
            let mut hooks = scope.begin(&rt);
            hooks.use_state(|| 0).unwrap();
            hooks.finish().unwrap();
        }
        assert!(scope.begin(&rt).finish().is_ok());
    }

    #[test]
    fn use_effect_replaces_callback_and_keeps_snapshots() {
        let (timer, rt) = runtime(true);
        let mut scope = HookScope::new("c");
        let seen = Rc::new(Cell::new(0));

        let mut count = None;
        for pass in 1..=2 {
            let mut hooks = scope.begin(&rt);
            let c = hooks.use_state(|| 0).unwrap();
            let (s, reader) = (Rc::clone(&seen), c.clone());
            hooks
                .use_effect(move || s.set(reader.get() + pass * 100), deps![c])
                .unwrap();
            hooks.finish().unwrap();
            count = Some(c);
        }
        assert_eq!(rt.effect_count(), 1);

        // Snapshot still unset, so the first flush runs the latest callback.
        rt.flush_now().unwrap();
        assert_eq!(seen.get(), 200);

        let count = count.unwrap();
        count.set(1);
        timer.run_pending();
        assert_eq!(seen.get(), 201);
    }

    #[test]
    fn dependency_shape_drift_is_reported() {
        let (_timer, rt) = runtime(true);
        let mut scope = HookScope::new("c");
        {
            let mut hooks = scope.begin(&rt);
            hooks.use_effect(|| {}, Deps::Always).unwrap();
            hooks.finish().unwrap();
        }
        let mut hooks = scope.begin(&rt);
        assert!(hooks.use_effect(|| {}, Deps::once()).is_err());
    }
}
