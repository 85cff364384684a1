use std::path::PathBuf;
use std::sync::Arc;

use crate::map::CaseInsensitiveMap;
use crate::provider::{ConfigurationProvider, ConfigurationSource};
use crate::sources::file::FileSource;
use crate::KEY_DELIMITER;

/// YAML file source. Flattening follows the same rules as JSON; mapping keys
/// that are not strings (the untyped-map shape some YAML emitters produce)
/// are stringified.
#[derive(Debug, Clone)]
pub struct YamlSource {
    pub path: PathBuf,
    pub optional: bool,
    pub reload_on_change: bool,
}

impl YamlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        YamlSource {
            path: path.into(),
            optional: false,
            reload_on_change: false,
        }
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    pub fn reload_on_change(mut self, reload: bool) -> Self {
        self.reload_on_change = reload;
        self
    }
}

impl ConfigurationSource for YamlSource {
    fn build(&self) -> Arc<dyn ConfigurationProvider> {
        FileSource::new(self.path.clone(), Arc::new(parse_yaml))
            .optional(self.optional)
            .reload_on_change(self.reload_on_change)
            .build()
    }
}

fn parse_yaml(bytes: &[u8]) -> Result<CaseInsensitiveMap<String>, String> {
    let value: serde_yaml::Value =
        serde_yaml::from_slice(bytes).map_err(|e| format!("invalid yaml: {e}"))?;

    let mut map = CaseInsensitiveMap::new();
    flatten_yaml("", &value, &mut map);
    Ok(map)
}

pub fn flatten_yaml(prefix: &str, value: &serde_yaml::Value, map: &mut CaseInsensitiveMap<String>) {
    use serde_yaml::Value;

    match value {
        Value::Mapping(fields) => {
            for (key, child) in fields {
                let key = scalar_key(key);
                let path = join_key(prefix, &key);
                flatten_yaml(&path, child, map);
            }
        }
        Value::Sequence(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = join_key(prefix, &index.to_string());
                flatten_yaml(&path, child, map);
            }
        }
        Value::String(s) => map.insert(prefix, s.clone()),
        Value::Bool(b) => map.insert(prefix, b.to_string()),
        Value::Number(n) => map.insert(prefix, stringify_number(n)),
        Value::Null => map.insert(prefix, String::new()),
        Value::Tagged(tagged) => flatten_yaml(prefix, &tagged.value, map),
    }
}

fn scalar_key(key: &serde_yaml::Value) -> String {
    use serde_yaml::Value;

    match key {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => stringify_number(n),
        Value::Null => String::new(),
        other => format!("{other:?}"),
    }
}

fn stringify_number(n: &serde_yaml::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    let f = n.as_f64().unwrap_or_default();
    if f == f.trunc() && f.abs() < i64::MAX as f64 {
        (f as i64).to_string()
    } else {
        format!("{f:.6}")
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{KEY_DELIMITER}{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(yaml: &str) -> CaseInsensitiveMap<String> {
        parse_yaml(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn flattens_mappings_and_sequences() {
        let map = flat("db:\n  host: h\n  port: 3306\narr:\n  - x\n  - y\n");
        assert_eq!(map.get("db:host"), Some(&"h".to_string()));
        assert_eq!(map.get("db:port"), Some(&"3306".to_string()));
        assert_eq!(map.get("arr:0"), Some(&"x".to_string()));
        assert_eq!(map.get("arr:1"), Some(&"y".to_string()));
    }

    #[test]
    fn scalars_stringify_like_json() {
        let map = flat("i: 42\nf: 1.5\nt: true\nn: null\n");
        assert_eq!(map.get("i"), Some(&"42".to_string()));
        assert_eq!(map.get("f"), Some(&"1.500000".to_string()));
        assert_eq!(map.get("t"), Some(&"true".to_string()));
        assert_eq!(map.get("n"), Some(&"".to_string()));
    }

    #[test]
    fn numeric_mapping_keys_are_stringified() {
        let map = flat("levels:\n  1: debug\n  2: info\n");
        assert_eq!(map.get("levels:1"), Some(&"debug".to_string()));
        assert_eq!(map.get("levels:2"), Some(&"info".to_string()));
    }

    #[test]
    fn invalid_yaml_reports_error() {
        assert!(parse_yaml(b"a: [unclosed").is_err());
    }
}
