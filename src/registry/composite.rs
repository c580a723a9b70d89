//! Composite registry.

use super::ScriptRegistry;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Tries constituent registries in order and returns the first success. On
/// total failure the error enumerates every child's message.
#[derive(Default)]
pub struct CompositeScriptRegistry {
    registries: Vec<Arc<dyn ScriptRegistry>>,
}

impl CompositeScriptRegistry {
    /// Empty composite; resolves nothing until children are added.
    #[must_use]
    pub fn new(registries: Vec<Arc<dyn ScriptRegistry>>) -> Self {
        Self { registries }
    }

    /// Append a child registry; earlier children win.
    pub fn push(&mut self, registry: Arc<dyn ScriptRegistry>) {
        self.registries.push(registry);
    }

    /// Number of children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    /// Whether the composite has no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

#[async_trait]
impl ScriptRegistry for CompositeScriptRegistry {
    async fn resolve(&self, id: &str) -> Result<String> {
        let mut failures = Vec::with_capacity(self.registries.len());
        for (index, registry) in self.registries.iter().enumerate() {
            match registry.resolve(id).await {
                Ok(text) => return Ok(text),
                Err(e) => failures.push(format!("[{index}] {e}")),
            }
        }
        if failures.is_empty() {
            failures.push("no registries configured".to_string());
        }
        Err(Error::Registry(format!(
            "Script '{id}' not found in any registry: {}",
            failures.join("; ")
        )))
    }
}
