use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::notifier::ReloadNotifier;
use crate::provider::{ConfigurationProvider, ConfigurationSource};
use crate::section::Section;
use crate::KEY_DELIMITER;

/// The configuration stack: an ordered list of providers behind one
/// hierarchical key namespace.
///
/// Lookups iterate providers in reverse insertion order, so the source added
/// latest wins. Cloning is cheap and shares the stack.
#[derive(Clone, Default)]
pub struct ConfigurationManager {
    inner: Arc<ManagerInner>,
}

#[derive(Default)]
struct ManagerInner {
    providers: Mutex<Vec<Arc<dyn ConfigurationProvider>>>,
    notifier: Arc<ReloadNotifier>,
}

impl ConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the source's provider, loads it, and appends it to the stack.
    /// Provider-level reloads propagate to the stack notifier from then on.
    pub fn add_source(&self, source: &dyn ConfigurationSource) {
        let provider = source.build();
        provider.load();

        {
            let mut providers = self.inner.providers.lock().expect("manager lock poisoned");
            providers.push(provider.clone());
        }

        let stack_notifier = self.inner.notifier.clone();
        provider.reload_notifier().subscribe(move || {
            stack_notifier.notify();
        });

        self.inner.notifier.notify();
    }

    pub fn get(&self, key: &str) -> String {
        self.try_get(key).unwrap_or_default()
    }

    pub fn try_get(&self, key: &str) -> Option<String> {
        let providers = self.inner.providers.lock().expect("manager lock poisoned");
        for provider in providers.iter().rev() {
            if let Some(value) = provider.try_get(key) {
                return Some(value);
            }
        }
        None
    }

    /// Broadcasts the write to every provider.
    pub fn set(&self, key: &str, value: &str) {
        let providers = self.inner.providers.lock().expect("manager lock poisoned");
        for provider in providers.iter() {
            provider.set(key, value);
        }
    }

    pub fn section(&self, key: &str) -> Section {
        Section::new(self.clone(), key.to_string())
    }

    pub fn children(&self) -> Vec<Section> {
        self.children_by_path("")
    }

    /// Union of child keys across providers for `path`, deduplicated after
    /// upper-casing, in sorted order.
    pub fn children_by_path(&self, path: &str) -> Vec<Section> {
        self.child_keys(path)
            .into_iter()
            .map(|key| {
                if path.is_empty() {
                    self.section(&key)
                } else {
                    self.section(&format!("{path}{KEY_DELIMITER}{key}"))
                }
            })
            .collect()
    }

    pub fn child_keys(&self, path: &str) -> Vec<String> {
        let providers = self.inner.providers.lock().expect("manager lock poisoned");
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for provider in providers.iter() {
            for key in provider.child_keys(path) {
                if seen.insert(key.to_uppercase()) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        keys
    }

    /// Reloads every provider, then fires the stack notifier exactly once.
    pub fn reload(&self) {
        let providers = {
            let guard = self.inner.providers.lock().expect("manager lock poisoned");
            guard.clone()
        };
        for provider in &providers {
            provider.load();
        }
        self.inner.notifier.notify();
    }

    pub fn reload_notifier(&self) -> &ReloadNotifier {
        &self.inner.notifier
    }

    pub fn providers(&self) -> Vec<Arc<dyn ConfigurationProvider>> {
        self.inner
            .providers
            .lock()
            .expect("manager lock poisoned")
            .clone()
    }
}
