//! Layered configuration with live reload.
//!
//! A configuration is an ordered stack of *providers*, each owning a
//! case-insensitive `key -> value` map. Keys are hierarchical, joined by
//! `:`. Lookups walk the stack in reverse insertion order, so a source added
//! later overrides an earlier one. Providers report changes through a
//! [`ReloadNotifier`]; file-backed providers can watch their file and reload
//! on change.

pub mod manager;
pub mod map;
pub mod notifier;
pub mod provider;
pub mod section;
pub mod sources;

pub use manager::ConfigurationManager;
pub use map::CaseInsensitiveMap;
pub use notifier::ReloadNotifier;
pub use provider::{BaseProvider, ConfigurationProvider, ConfigurationSource};
pub use section::Section;

/// Separator between hierarchical key segments.
pub const KEY_DELIMITER: &str = ":";
