use std::path::PathBuf;
use std::sync::Arc;

use crate::map::CaseInsensitiveMap;
use crate::provider::{ConfigurationProvider, ConfigurationSource};
use crate::sources::file::FileSource;
use crate::KEY_DELIMITER;

/// JSON file source. `//` and `/* */` comments are stripped before parsing.
#[derive(Debug, Clone)]
pub struct JsonSource {
    pub path: PathBuf,
    pub optional: bool,
    pub reload_on_change: bool,
}

impl JsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonSource {
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

impl ConfigurationSource for JsonSource {
    fn build(&self) -> Arc<dyn ConfigurationProvider> {
        FileSource::new(self.path.clone(), Arc::new(parse_json))
            .optional(self.optional)
            .reload_on_change(self.reload_on_change)
            .build()
    }
}

fn parse_json(bytes: &[u8]) -> Result<CaseInsensitiveMap<String>, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| format!("invalid utf-8: {e}"))?;
    let stripped = strip_json_comments(text);
    let value: serde_json::Value =
        serde_json::from_str(&stripped).map_err(|e| format!("invalid json: {e}"))?;

    let mut map = CaseInsensitiveMap::new();
    flatten_json("", &value, &mut map);
    Ok(map)
}

/// Flattens a JSON value into `path = stringified-value` pairs.
///
/// Object keys extend the path with `:`, array elements with `:<index>`.
/// Booleans stringify as `true`/`false`; integral numbers without a decimal
/// point; other floats with six fractional digits.
pub fn flatten_json(prefix: &str, value: &serde_json::Value, map: &mut CaseInsensitiveMap<String>) {
    use serde_json::Value;

    match value {
        Value::Object(fields) => {
            for (key, child) in fields {
                let path = join_key(prefix, key);
                flatten_json(&path, child, map);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = join_key(prefix, &index.to_string());
                flatten_json(&path, child, map);
            }
        }
        Value::String(s) => map.insert(prefix, s.clone()),
        Value::Bool(b) => map.insert(prefix, b.to_string()),
        Value::Number(n) => map.insert(prefix, stringify_number(n)),
        Value::Null => map.insert(prefix, String::new()),
    }
}

fn stringify_number(n: &serde_json::Number) -> String {
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

/// Removes `//` line comments and `/* */` block comments while respecting
/// string literals.
pub fn strip_json_comments(src: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Normal,
        InString,
        Escape,
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(src.len());
    let mut state = State::Normal;
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Normal => match c {
                '"' => {
                    state = State::InString;
                    out.push(c);
                }
                '/' => match chars.peek() {
                    Some('/') => {
                        chars.next();
                        state = State::LineComment;
                    }
                    Some('*') => {
                        chars.next();
                        state = State::BlockComment;
                    }
                    _ => out.push(c),
                },
                _ => out.push(c),
            },
            State::InString => {
                out.push(c);
                match c {
                    '\\' => state = State::Escape,
                    '"' => state = State::Normal,
                    _ => {}
                }
            }
            State::Escape => {
                out.push(c);
                state = State::InString;
            }
            State::LineComment => {
                if c == '\n' {
                    out.push(c);
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Normal;
                }
            }
        }
    }

    out
}
