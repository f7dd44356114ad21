//! Store of active targets.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::target::Target;

/// Concurrency-safe map from canonical target name to the active target.
///
/// Writes come from the single discovery consumer; reads may come from any
/// thread.
#[derive(Debug)]
pub struct Registry {
    name: &'static str,
    targets: RwLock<HashMap<String, Target>>,
}

impl Registry {
    /// Creates an empty registry for a provider family.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            targets: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the provider family name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Inserts or replaces the target under its name, returning the previous one.
    pub fn register(&self, target: Target) -> Option<Target> {
        self.targets
            .write()
            .insert(target.name().to_string(), target)
    }

    /// Removes the target registered under `name`, if any.
    pub fn unregister(&self, name: &str) -> Option<Target> {
        self.targets.write().remove(name)
    }

    /// Returns a copy of the target registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Target> {
        self.targets.read().get(name).cloned()
    }

    /// Returns `true` if a target is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.targets.read().contains_key(name)
    }

    /// Returns the number of registered targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.read().len()
    }

    /// Returns `true` if no targets are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.read().is_empty()
    }

    /// Returns a snapshot of all registered targets, ordered by name.
    #[must_use]
    pub fn targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self.targets.read().values().cloned().collect();
        targets.sort_by(|a, b| a.name().cmp(b.name()));
        targets
    }
}
