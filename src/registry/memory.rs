//! In-memory registry.

use super::ScriptRegistry;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A registry backed by an id -> source map.
#[derive(Debug, Default)]
pub struct InMemoryScriptRegistry {
    scripts: RwLock<HashMap<String, String>>,
}

impl InMemoryScriptRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `source` under `id`, replacing any previous entry.
    pub fn register(&self, id: impl Into<String>, source: impl Into<String>) {
        self.scripts.write().insert(id.into(), source.into());
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.scripts.read().contains_key(id)
    }

    /// Remove `id`, reporting whether it existed.
    pub fn unregister(&self, id: &str) -> bool {
        self.scripts.write().remove(id).is_some()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.scripts.write().clear();
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scripts.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ScriptRegistry for InMemoryScriptRegistry {
    async fn resolve(&self, id: &str) -> Result<String> {
        self.scripts
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Registry(format!("Script not found: {id}")))
    }
}
