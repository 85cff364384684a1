use crate::manager::ConfigurationManager;
use crate::KEY_DELIMITER;

/// A prefix view over the configuration stack.
///
/// `Section::get("c")` on a section at path `a:b` reads stack key `a:b:c`.
/// Sections are virtual: they hold no data of their own and stay live as the
/// stack reloads.
#[derive(Clone)]
pub struct Section {
    root: ConfigurationManager,
    path: String,
}

impl Section {
    pub(crate) fn new(root: ConfigurationManager, path: String) -> Self {
        Section { root, path }
    }

    /// The last path segment.
    pub fn key(&self) -> &str {
        match self.path.rfind(':') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    /// The full path from the stack root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The value stored at the section path itself, if any.
    pub fn value(&self) -> Option<String> {
        self.root.try_get(&self.path)
    }

    pub fn get(&self, key: &str) -> String {
        self.root.get(&self.full_key(key))
    }

    pub fn try_get(&self, key: &str) -> Option<String> {
        self.root.try_get(&self.full_key(key))
    }

    pub fn set(&self, key: &str, value: &str) {
        self.root.set(&self.full_key(key), value);
    }

    /// Nested sections compose by concatenating with the delimiter.
    pub fn section(&self, key: &str) -> Section {
        self.root.section(&self.full_key(key))
    }

    pub fn children(&self) -> Vec<Section> {
        self.root.children_by_path(&self.path)
    }

    pub fn child_keys(&self) -> Vec<String> {
        self.root.child_keys(&self.path)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}{}", self.path, KEY_DELIMITER, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MemorySource;

    fn config(entries: &[(&str, &str)]) -> ConfigurationManager {
        let manager = ConfigurationManager::new();
        manager.add_source(&MemorySource::new(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
        manager
    }

    #[test]
    fn section_prefixes_lookups() {
        let config = config(&[("a:b:c", "v"), ("a:b", "self")]);
        let section = config.section("a:b");
        assert_eq!(section.get("c"), "v");
        assert_eq!(section.try_get("d"), None);
        assert_eq!(section.value(), Some("self".to_string()));
        assert_eq!(section.key(), "b");
        assert_eq!(section.path(), "a:b");
    }

    #[test]
    fn nested_sections_compose() {
        let config = config(&[("a:b:c:d", "deep")]);
        let section = config.section("a").section("b").section("c");
        assert_eq!(section.path(), "a:b:c");
        assert_eq!(section.get("d"), "deep");
    }

    #[test]
    fn section_children() {
        let config = config(&[("svc:alpha:x", "1"), ("svc:beta:y", "2")]);
        let keys = config.section("svc").child_keys();
        assert_eq!(keys, vec!["alpha", "beta"]);
    }

    #[test]
    fn section_set_writes_through() {
        let config = config(&[]);
        config.section("db").set("host", "h");
        assert_eq!(config.get("db:host"), "h");
    }
}
