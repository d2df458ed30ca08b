//! Index-addressed set of plugins shared by the router, the dispatcher and
//! the TCP listener.

use std::sync::{Arc, RwLock};

use super::{Plugin, PluginState};
use crate::logging::Logger;
use crate::message::Domain;

/// All registered plugins, indexed by their `No`.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    slots: RwLock<Vec<Arc<Plugin>>>,
}

impl PluginRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Plugin>>> {
        match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Plugin>>> {
        match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append `plugin`, assigning it the next index.
    pub fn register(&self, plugin: Plugin) -> Arc<Plugin> {
        let mut slots = self.write();
        let no = slots.len();
        plugin.assign_no(no);
        let plugin = Arc::new(plugin);
        slots.push(Arc::clone(&plugin));
        plugin
    }

    /// Plugin at `no`.
    pub fn get(&self, no: usize) -> Option<Arc<Plugin>> {
        self.read().get(no).cloned()
    }

    /// Snapshot of every plugin.
    pub fn all(&self) -> Vec<Arc<Plugin>> {
        self.read().clone()
    }

    /// Number of registered slots.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Enabled plugins subscribed to `domain`.
    pub fn subscribers(&self, domain: &Domain) -> Vec<Arc<Plugin>> {
        self.read()
            .iter()
            .filter(|p| p.state() == PluginState::Enabled && p.is_subscribed(domain))
            .cloned()
            .collect()
    }

    /// Plugin to open for slot `no`: the current one if it was never
    /// opened, otherwise a fresh plugin with the same manifest replacing a
    /// spent one. Returns `None` for unknown slots or slots still in use.
    pub fn claim(&self, no: usize, log: &Logger) -> Option<Arc<Plugin>> {
        let mut slots = self.write();
        let current = slots.get(no)?;
        if current.is_spent() {
            let fresh = Plugin::new(current.manifest().clone(), log);
            fresh.assign_no(no);
            let fresh = Arc::new(fresh);
            slots[no] = Arc::clone(&fresh);
            return Some(fresh);
        }
        if current.was_opened() {
            return None;
        }
        Some(Arc::clone(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginManifest;

    fn manifest(name: &str, subscribe: &[&str]) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            subscribe: subscribe.iter().map(|s| s.to_string()).collect(),
            ..PluginManifest::default()
        }
    }

    #[test]
    fn test_register_assigns_sequential_indexes() {
        let log = Logger::root("test");
        let registry = PluginRegistry::new();
        let a = registry.register(Plugin::new(manifest("a", &[]), &log));
        let b = registry.register(Plugin::new(manifest("b", &[]), &log));
        assert_eq!(a.no(), Some(0));
        assert_eq!(b.no(), Some(1));
        assert_eq!(registry.get(1).unwrap().name(), "b");
        assert!(registry.get(2).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_closed_plugins_are_not_subscribers() {
        let log = Logger::root("test");
        let registry = PluginRegistry::new();
        registry.register(Plugin::new(manifest("a", &["nagome"]), &log));
        assert!(registry.subscribers(&Domain::Nagome).is_empty());
    }

    #[test]
    fn test_claim_unopened_returns_same_plugin() {
        let log = Logger::root("test");
        let registry = PluginRegistry::new();
        let a = registry.register(Plugin::new(manifest("a", &[]), &log));
        let claimed = registry.claim(0, &log).unwrap();
        assert!(Arc::ptr_eq(&a, &claimed));
        assert!(registry.claim(5, &log).is_none());
    }
}
