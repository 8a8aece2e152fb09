//! Host callbacks attached to states.

use crate::context::LiveModel;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Callbacks invoked when the embedded model enters, runs or exits a state.
///
/// Each method receives a [`LiveModel`] that can query the machine and queue
/// events while the step is in progress. All methods default to no-ops.
pub trait StateCallback {
    fn entry(&self, _model: &LiveModel<'_>) {}
    fn doo(&self, _model: &LiveModel<'_>) {}
    fn exit(&self, _model: &LiveModel<'_>) {}
}

/// Maps normalized state names to callbacks without owning them.
///
/// The caller keeps the `Rc` alive; once it is dropped the entry resolves to
/// nothing and the dispatch is skipped.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: HashMap<String, Weak<dyn StateCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `state`, replacing any previous entry.
    pub fn insert<C: StateCallback + 'static>(&mut self, state: impl Into<String>, callback: &Rc<C>) {
        let weak: Weak<C> = Rc::downgrade(callback);
        let weak: Weak<dyn StateCallback> = weak;
        self.entries.insert(state.into(), weak);
    }

    pub fn remove(&mut self, state: &str) -> bool {
        self.entries.remove(state).is_some()
    }

    /// Returns the callback for `state` if it is still alive.
    pub fn get(&self, state: &str) -> Option<Rc<dyn StateCallback>> {
        self.entries.get(state).and_then(Weak::upgrade)
    }

    pub fn contains(&self, state: &str) -> bool {
        self.get(state).is_some()
    }

    /// Drops entries whose callback no longer exists. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        before - self.entries.len()
    }

    /// Registered state names, sorted.
    pub fn states(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("states", &self.states())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl StateCallback for Noop {}

    #[test]
    fn test_registry_does_not_own_callbacks() {
        let mut registry = CallbackRegistry::new();
        let cb = Rc::new(Noop);
        registry.insert("A", &cb);
        assert!(registry.contains("A"));
        assert_eq!(Rc::strong_count(&cb), 1);
        assert_eq!(Rc::weak_count(&cb), 1);

        drop(cb);
        assert!(!registry.contains("A"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.prune(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_replaces_and_removes() {
        let mut registry = CallbackRegistry::new();
        let first = Rc::new(Noop);
        let second = Rc::new(Noop);
        registry.insert("B", &first);
        registry.insert("A.x", &second);
        registry.insert("B", &second);

        assert_eq!(registry.states(), vec!["A.x", "B"]);
        drop(first);
        assert!(registry.contains("B"));
        assert!(registry.remove("A.x"));
        assert!(!registry.remove("A.x"));
        registry.clear();
        assert!(registry.is_empty());
    }
}
