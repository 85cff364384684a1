//! Configuration sources: memory, raw file, JSON and YAML.

mod file;
mod json;
mod memory;
mod yaml;

pub use file::{FileProvider, FileSource, ParseFn};
pub use json::{flatten_json, strip_json_comments, JsonSource};
pub use memory::MemorySource;
pub use yaml::{flatten_yaml, YamlSource};
