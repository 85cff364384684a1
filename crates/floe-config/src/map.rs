use std::collections::HashMap;

/// String-keyed map with case-insensitive lookup that preserves the original
/// key casing for enumeration.
///
/// Internally keeps the real-cased entries plus an upper-case index into
/// them.
#[derive(Debug, Default, Clone)]
pub struct CaseInsensitiveMap<V> {
    values: HashMap<String, V>,
    upper_to_key: HashMap<String, String>,
}

impl<V> CaseInsensitiveMap<V> {
    pub fn new() -> Self {
        CaseInsensitiveMap {
            values: HashMap::new(),
            upper_to_key: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.upper_to_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upper_to_key.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.upper_to_key.contains_key(&key.to_uppercase())
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let real = self.upper_to_key.get(&key.to_uppercase())?;
        self.values.get(real)
    }

    /// Inserts under `key`, replacing any entry that matches
    /// case-insensitively. The latest spelling of the key wins.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        let upper = key.to_uppercase();
        if let Some(old_key) = self.upper_to_key.get(&upper) {
            self.values.remove(old_key);
        }
        self.values.insert(key.clone(), value);
        self.upper_to_key.insert(upper, key);
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let real = self.upper_to_key.remove(&key.to_uppercase())?;
        self.values.remove(&real)
    }

    /// Visits every `(key, value)` pair in arbitrary order.
    pub fn scan(&self, mut f: impl FnMut(&str, &V)) {
        for (key, value) in &self.values {
            f(key, value);
        }
    }

    /// Visits every `(upper_key, key, value)` triple in arbitrary order.
    pub fn scan_upper(&self, mut f: impl FnMut(&str, &str, &V)) {
        for (upper, key) in &self.upper_to_key {
            if let Some(value) = self.values.get(key) {
                f(upper, key, value);
            }
        }
    }
}

impl<V> FromIterator<(String, V)> for CaseInsensitiveMap<V> {
    fn from_iter<T: IntoIterator<Item = (String, V)>>(iter: T) -> Self {
        let mut map = CaseInsensitiveMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
