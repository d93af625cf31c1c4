#![forbid(unsafe_code)]

//! Named debug view over live state.
//!
//! An [`Inspector`] maps names to renderers. Watching a [`State`] renders its
//! current value with `Debug` on every read, so the view never goes stale.
//! A thread-local instance is available through [`Inspector::global`].

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use hookrt_core::State;

type Render = Box<dyn Fn() -> String>;

thread_local! {
    static GLOBAL_INSPECTOR: Inspector = Inspector::new();
}

/// Name-ordered registry of debug renderers.
#[derive(Clone, Default)]
pub struct Inspector {
    entries: Rc<RefCell<BTreeMap<String, Render>>>,
}

impl fmt::Debug for Inspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

impl Inspector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The inspector shared by everything on this thread.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL_INSPECTOR.with(Clone::clone)
    }

    /// Expose a state cell under `name`, replacing any previous entry.
    pub fn watch<T: fmt::Debug + 'static>(&self, name: impl Into<String>, state: &State<T>) {
        let state = state.clone();
        self.insert(name.into(), Box::new(move || state.with(|v| format!("{v:?}"))));
    }

    /// Expose a fixed value under `name`.
    pub fn set_value(&self, name: impl Into<String>, value: impl fmt::Debug) {
        let rendered = format!("{value:?}");
        self.insert(name.into(), Box::new(move || rendered.clone()));
    }

    fn insert(&self, name: String, render: Render) {
        tracing::trace!(%name, "inspector entry set");
        self.entries.borrow_mut().insert(name, render);
    }

    /// Returns `true` if an entry was removed.
    pub fn remove(&self, name: &str) -> bool {
        self.entries.borrow_mut().remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.entries.borrow().get(name).map(|render| render())
    }

    /// Every entry rendered now, ordered by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.entries
            .borrow()
            .iter()
            .map(|(name, render)| (name.clone(), render()))
            .collect()
    }

    /// One `name = value` line per entry.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.snapshot() {
            out.push_str(&name);
            out.push_str(" = ");
            out.push_str(&value);
            out.push('\n');
        }
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
