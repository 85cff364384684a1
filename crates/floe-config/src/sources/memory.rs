use std::collections::HashMap;
use std::sync::Arc;

use crate::map::CaseInsensitiveMap;
use crate::provider::{BaseProvider, ConfigurationProvider, ConfigurationSource};

/// In-memory source, seeded at construction. Useful for defaults and tests.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    pub init: HashMap<String, String>,
}

impl MemorySource {
    pub fn new(init: HashMap<String, String>) -> Self {
        MemorySource { init }
    }

    pub fn entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.init.insert(key.into(), value.into());
        self
    }
}

impl ConfigurationSource for MemorySource {
    fn build(&self) -> Arc<dyn ConfigurationProvider> {
        let map: CaseInsensitiveMap<String> = self
            .init
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Arc::new(BaseProvider::seeded(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_seeded_provider() {
        let source = MemorySource::default().entry("a", "1").entry("B:c", "2");
        let provider = source.build();
        assert_eq!(provider.get("a"), "1");
        assert_eq!(provider.get("b:C"), "2");
    }
}
