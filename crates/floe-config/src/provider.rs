use std::sync::{Arc, Mutex};

use crate::map::CaseInsensitiveMap;
use crate::notifier::ReloadNotifier;

/// One tier in the configuration stack.
pub trait ConfigurationProvider: Send + Sync {
    fn try_get(&self, key: &str) -> Option<String>;

    fn get(&self, key: &str) -> String {
        self.try_get(key).unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str);

    /// (Re)loads the provider's data. Memory-backed providers do nothing.
    fn load(&self);

    /// First-segment child keys under `parent_path`, sorted. May contain
    /// duplicates across keys; the stack deduplicates.
    fn child_keys(&self, parent_path: &str) -> Vec<String>;

    fn reload_notifier(&self) -> &ReloadNotifier;
}

/// Builds a provider for the stack. Sources are cheap descriptions (a path,
/// an in-memory seed); providers own live data.
pub trait ConfigurationSource {
    fn build(&self) -> Arc<dyn ConfigurationProvider>;
}

/// Data-map + notifier base shared by every provider implementation.
pub struct BaseProvider {
    data: Mutex<CaseInsensitiveMap<String>>,
    notifier: ReloadNotifier,
}

impl Default for BaseProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseProvider {
    pub fn new() -> Self {
        BaseProvider {
            data: Mutex::new(CaseInsensitiveMap::new()),
            notifier: ReloadNotifier::new(),
        }
    }

    pub fn seeded(data: CaseInsensitiveMap<String>) -> Self {
        BaseProvider {
            data: Mutex::new(data),
            notifier: ReloadNotifier::new(),
        }
    }

    /// Atomically replaces the whole map, then fires the reload notifier
    /// outside the lock.
    pub fn replace(&self, data: CaseInsensitiveMap<String>) {
        {
            let mut guard = self.data.lock().expect("provider lock poisoned");
            *guard = data;
        }
        self.notifier.notify();
    }
}

impl ConfigurationProvider for BaseProvider {
    fn try_get(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .expect("provider lock poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.data
            .lock()
            .expect("provider lock poisoned")
            .insert(key, value.to_string());
    }

    fn load(&self) {}

    fn child_keys(&self, parent_path: &str) -> Vec<String> {
        let data = self.data.lock().expect("provider lock poisoned");
        sorted_segment_child_keys(&data, parent_path)
    }

    fn reload_notifier(&self) -> &ReloadNotifier {
        &self.notifier
    }
}

/// Collects the first key segment below `parent_path` for every key in the
/// map, case-insensitively, sorted.
pub(crate) fn sorted_segment_child_keys(
    map: &CaseInsensitiveMap<String>,
    parent_path: &str,
) -> Vec<String> {
    let mut children = Vec::new();
    if parent_path.is_empty() {
        map.scan(|key, _| children.push(key_segment(key, 0)));
    } else {
        let upper_parent = parent_path.to_uppercase();
        map.scan_upper(|upper, key, _| {
            if upper.len() > parent_path.len()
                && upper.starts_with(&upper_parent)
                && upper.as_bytes()[parent_path.len()] == b':'
            {
                children.push(key_segment(key, parent_path.len() + 1));
            }
        });
    }
    children.sort();
    children
}

fn key_segment(key: &str, prefix_len: usize) -> String {
    if prefix_len >= key.len() {
        return String::new();
    }
    let rest = &key[prefix_len..];
    match rest.find(':') {
        Some(idx) => rest[..idx].to_string(),
        None => rest.to_string(),
    }
}
