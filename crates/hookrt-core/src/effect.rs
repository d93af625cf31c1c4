#![forbid(unsafe_code)]

//! Effect registry and dependency diffing.
//!
//! An effect is a zero-argument callback plus a dependency policy:
//!
//! - [`Deps::Always`]: the effect runs on every flush.
//! - [`Deps::On`]: the effect runs on its first evaluation, then only on
//!   passes where at least one dependency reads differently from the value
//!   cached on the previous pass. An empty list therefore runs exactly once.
//!
//! Each dependency is a snapshot pairing a getter with the last value it
//! returned. The cache starts out unset, which differs from any real read,
//! so every effect with dependencies runs on the first flush that sees it.
//!
//! # Invariants
//!
//! 1. Effects are evaluated in registration order.
//! 2. Every snapshot is read and refreshed on every pass, even after an
//!    earlier snapshot already marked the effect dirty.
//! 3. A dependency list is fixed at registration; snapshots are updated in
//!    place, never reordered or resized.
//! 4. Callbacks run with no registry borrow held, so they may register new
//!    effects (appended and evaluated later in the same pass) or write state.
//!
//! # Failure Modes
//!
//! - A panicking callback aborts the rest of the pass. Registry contents,
//!   including snapshots refreshed for that effect, stay intact.
//! - Identity is positional. Registering effects in a different order between
//!   passes silently misattributes snapshots; use [`HookCursor`](crate::HookCursor)
//!   to detect it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::store::{SlotId, State};

/// Positional identity of a registered effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(usize);

impl EffectId {
    /// Zero-based registration position.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A value source whose last observed value is cached for change detection.
pub trait Dependency {
    /// Read the source, compare with the cached value, and overwrite the
    /// cache when different. Returns whether it differed.
    fn refresh(&mut self) -> bool;

    /// The state slot read by this dependency, if it reads one.
    fn slot(&self) -> Option<SlotId> {
        None
    }
}

/// Snapshot over an arbitrary getter.
struct Snapshot<T, G> {
    cached: Option<T>,
    getter: G,
    slot: Option<SlotId>,
}

impl<T: PartialEq, G: Fn() -> T> Dependency for Snapshot<T, G> {
    fn refresh(&mut self) -> bool {
        let current = (self.getter)();
        if self.cached.as_ref() == Some(&current) {
            return false;
        }
        self.cached = Some(current);
        true
    }

    fn slot(&self) -> Option<SlotId> {
        self.slot
    }
}

impl<T: Clone + PartialEq + 'static> From<&State<T>> for Box<dyn Dependency> {
    fn from(state: &State<T>) -> Self {
        let source = state.clone();
        Box::new(Snapshot {
            cached: None,
            getter: move || source.get(),
            slot: Some(state.id()),
        })
    }
}

/// Build a dependency over any getter, e.g. a derived value.
pub fn watch<T, G>(getter: G) -> Box<dyn Dependency>
where
    T: PartialEq + 'static,
    G: Fn() -> T + 'static,
{
    Box::new(Snapshot {
        cached: None,
        getter,
        slot: None,
    })
}

/// Dependency policy of an effect.
pub enum Deps {
    /// Run on every flush, whether or not anything changed.
    Always,
    /// Run on the first evaluation and whenever a listed dependency differs.
    On(Vec<Box<dyn Dependency>>),
}

impl Deps {
    /// An explicit empty list: run once.
    #[must_use]
    pub fn once() -> Self {
        Self::On(Vec::new())
    }

    /// Number of dependencies, or `None` for [`Deps::Always`].
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Always => None,
            Self::On(deps) => Some(deps.len()),
        }
    }

    /// Whether this is an explicit empty list.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::On(deps) if deps.is_empty())
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::On(deps) => {
                let slots: Vec<Option<SlotId>> = deps.iter().map(|d| d.slot()).collect();
                f.debug_tuple("On").field(&slots).finish()
            }
        }
    }
}

/// Build a [`Deps::On`] list from state handles or boxed dependencies.
///
/// # Examples
///
/// ```
/// # use std::rc::Rc;
/// # use hookrt_core::{Runtime, Timer, DeferredTask, deps};
/// # struct Noop;
/// # impl Timer for Noop { fn after(&self, _: std::time::Duration, _: DeferredTask) {} }
/// let rt = Runtime::new(Rc::new(Noop));
/// let a = rt.create_cell(1);
/// let b = rt.create_cell("x");
/// let d = deps![a, b];
/// assert_eq!(d.len(), Some(2));
/// ```
#[macro_export]
macro_rules! deps {
    () => {
        $crate::effect::Deps::On(::std::vec::Vec::new())
    };
    ($($dep:expr),+ $(,)?) => {
        $crate::effect::Deps::On(::std::vec![
            $(::std::boxed::Box::<dyn $crate::effect::Dependency>::from(&$dep)),+
        ])
    };
}

type Callback = Rc<RefCell<Box<dyn FnMut()>>>;

struct EffectRecord {
    callback: Callback,
    deps: Option<Vec<Box<dyn Dependency>>>,
    evaluated: bool,
    runs: u64,
}

impl EffectRecord {
    /// Refresh every snapshot and report whether the effect must run.
    fn check_dirty(&mut self) -> bool {
        let first = !self.evaluated;
        self.evaluated = true;
        match &mut self.deps {
            None => true,
            Some(deps) => deps
                .iter_mut()
                .fold(first, |dirty, dep| dep.refresh() || dirty),
        }
    }
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Effects whose dependencies were checked.
    pub evaluated: usize,
    /// Effects whose callbacks were invoked.
    pub ran: usize,
}

/// Append-only ordered sequence of effect records.
#[derive(Default)]
pub(crate) struct EffectRegistry {
    effects: RefCell<Vec<EffectRecord>>,
}

impl EffectRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, callback: Box<dyn FnMut()>, deps: Deps) -> EffectId {
        let deps = match deps {
            Deps::Always => None,
            Deps::On(list) => Some(list),
        };
        let mut effects = self.effects.borrow_mut();
        let id = EffectId(effects.len());
        effects.push(EffectRecord {
            callback: Rc::new(RefCell::new(callback)),
            deps,
            evaluated: false,
            runs: 0,
        });
        id
    }

    /// Swap the callback of an existing effect. The dependency list is kept.
    pub(crate) fn replace_callback(&self, id: EffectId, callback: Box<dyn FnMut()>) -> bool {
        match self.effects.borrow_mut().get_mut(id.0) {
            Some(record) => {
                record.callback = Rc::new(RefCell::new(callback));
                true
            }
            None => false,
        }
    }

    pub(crate) fn dependency_count(&self, id: EffectId) -> Option<Option<usize>> {
        self.effects
            .borrow()
            .get(id.0)
            .map(|record| record.deps.as_ref().map(Vec::len))
    }

    pub(crate) fn runs(&self, id: EffectId) -> Option<u64> {
        self.effects.borrow().get(id.0).map(|record| record.runs)
    }

    pub(crate) fn len(&self) -> usize {
        self.effects.borrow().len()
    }

    /// Evaluate every effect in registration order.
    ///
    /// The length is re-read each step, so effects registered by a callback
    /// during this pass are evaluated before it ends.
    pub(crate) fn evaluate_all(&self) -> PassStats {
        let mut stats = PassStats::default();
        loop {
            let callback = {
                let mut effects = self.effects.borrow_mut();
                let Some(record) = effects.get_mut(stats.evaluated) else {
                    break;
                };
                stats.evaluated += 1;
                if !record.check_dirty() {
                    continue;
                }
                record.runs += 1;
                Rc::clone(&record.callback)
            };
            stats.ran += 1;
            let mut guard = callback.borrow_mut();
            let run: &mut dyn FnMut() = &mut **guard;
            run();
        }
        stats
    }
}
