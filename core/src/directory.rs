//! Feature and interface directories
//!
//! A feature is a name owned by exactly one module. An interface is a name many
//! modules can provide, with a usage list that blocks unloading its providers.

use crate::module::ModuleId;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Providers and users of one interface
#[derive(Debug, Clone, Default)]
pub struct InterfaceEntry {
    providers: Vec<ModuleId>,
    users: Vec<ModuleId>,
}

impl InterfaceEntry {
    /// Providers in publish order
    pub fn providers(&self) -> &[ModuleId] {
        &self.providers
    }

    /// Outstanding uses
    pub fn use_count(&self) -> usize {
        self.users.len()
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    features: FxHashMap<String, ModuleId>,
    interfaces: FxHashMap<String, InterfaceEntry>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a feature. Returns false, leaving the owner unchanged, if the name is taken.
    pub fn publish_feature(&mut self, name: &str, owner: ModuleId) -> bool {
        if self.features.contains_key(name) {
            return false;
        }
        debug!("Feature '{}' published by {:?}", name, owner);
        self.features.insert(name.to_string(), owner);
        true
    }

    /// Remove a feature, but only when `owner` published it
    pub fn unpublish_feature(&mut self, name: &str, owner: ModuleId) -> bool {
        if self.features.get(name) != Some(&owner) {
            return false;
        }
        self.features.remove(name);
        true
    }

    pub fn find_feature(&self, name: &str) -> Option<ModuleId> {
        self.features.get(name).copied()
    }

    /// Add `provider` to an interface, creating it if needed
    pub fn publish_interface(&mut self, name: &str, provider: ModuleId) -> bool {
        let entry = self.interfaces.entry(name.to_string()).or_default();
        entry.providers.push(provider);
        debug!(
            "Interface '{}' gained provider {:?} ({} total)",
            name,
            provider,
            entry.providers.len()
        );
        true
    }

    /// Remove one provider entry of `provider`; the interface goes away once it has none
    pub fn unpublish_interface(&mut self, name: &str, provider: ModuleId) -> bool {
        let Some(entry) = self.interfaces.get_mut(name) else {
            return false;
        };
        let Some(pos) = entry.providers.iter().position(|p| *p == provider) else {
            return false;
        };
        entry.providers.remove(pos);
        if entry.providers.is_empty() {
            self.interfaces.remove(name);
        }
        true
    }

    pub fn find_interface(&self, name: &str) -> Option<&InterfaceEntry> {
        self.interfaces.get(name)
    }

    /// Record that `user` depends on the interface
    pub fn use_interface(&mut self, name: &str, user: ModuleId) -> bool {
        match self.interfaces.get_mut(name) {
            Some(entry) => {
                entry.users.push(user);
                true
            }
            None => false,
        }
    }

    /// Release one use taken by `user`
    pub fn done_with_interface(&mut self, name: &str, user: ModuleId) -> bool {
        let Some(entry) = self.interfaces.get_mut(name) else {
            return false;
        };
        match entry.users.iter().position(|u| *u == user) {
            Some(pos) => {
                entry.users.remove(pos);
                true
            }
            None => false,
        }
    }

    /// An interface provided by `owner` that other modules are still using
    pub fn busy_interface(&self, owner: ModuleId) -> Option<(&str, usize)> {
        self.interfaces
            .iter()
            .filter(|(_, entry)| entry.providers.contains(&owner))
            .map(|(name, entry)| {
                let foreign = entry.users.iter().filter(|u| **u != owner).count();
                (name.as_str(), foreign)
            })
            .find(|(_, users)| *users > 0)
    }

    /// Drop everything `owner` published or used
    pub fn remove_owner(&mut self, owner: ModuleId) {
        self.features.retain(|_, o| *o != owner);
        self.interfaces.retain(|_, entry| {
            entry.providers.retain(|p| *p != owner);
            entry.users.retain(|u| *u != owner);
            !entry.providers.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> ModuleId {
        ModuleId::new(n)
    }

    #[test]
    fn test_feature_single_owner() {
        let mut dir = Directory::new();
        assert!(dir.publish_feature("ssl", id(1)));
        assert!(!dir.publish_feature("ssl", id(2)));
        assert_eq!(dir.find_feature("ssl"), Some(id(1)));

        assert!(!dir.unpublish_feature("ssl", id(2)));
        assert!(dir.unpublish_feature("ssl", id(1)));
        assert!(dir.publish_feature("ssl", id(2)));
    }

    #[test]
    fn test_interface_providers_and_bucket_removal() {
        let mut dir = Directory::new();
        dir.publish_interface("HashRequest", id(1));
        dir.publish_interface("HashRequest", id(2));
        assert_eq!(dir.find_interface("HashRequest").unwrap().providers(), &[id(1), id(2)]);

        assert!(dir.unpublish_interface("HashRequest", id(1)));
        assert_eq!(dir.find_interface("HashRequest").unwrap().providers(), &[id(2)]);
        assert!(!dir.unpublish_interface("HashRequest", id(1)));

        assert!(dir.unpublish_interface("HashRequest", id(2)));
        assert!(dir.find_interface("HashRequest").is_none());
    }

    #[test]
    fn test_interface_usage_blocks_provider() {
        let mut dir = Directory::new();
        assert!(!dir.use_interface("HashRequest", id(3)));

        dir.publish_interface("HashRequest", id(1));
        assert!(dir.use_interface("HashRequest", id(3)));
        assert_eq!(dir.busy_interface(id(1)), Some(("HashRequest", 1)));

        assert!(dir.done_with_interface("HashRequest", id(3)));
        assert_eq!(dir.busy_interface(id(1)), None);
        assert!(!dir.done_with_interface("HashRequest", id(3)));
    }

    #[test]
    fn test_remove_owner() {
        let mut dir = Directory::new();
        dir.publish_feature("a", id(1));
        dir.publish_interface("i", id(1));
        dir.publish_interface("j", id(2));
        dir.use_interface("j", id(1));

        dir.remove_owner(id(1));
        assert!(dir.find_feature("a").is_none());
        assert!(dir.find_interface("i").is_none());
        assert_eq!(dir.find_interface("j").unwrap().use_count(), 0);
    }
}
