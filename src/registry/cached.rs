//! Caching registry wrapper.

use super::ScriptRegistry;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Observations over a [`CachedScriptRegistry`].
#[derive(Debug, Clone, Serialize)]
pub struct RegistryCacheStats {
    /// Live entries.
    pub entries: usize,
    /// Mean entry age in milliseconds.
    pub average_age_ms: u64,
    /// Age of the oldest entry in milliseconds.
    pub oldest_age_ms: u64,
}

/// Wraps another registry with a TTL-gated source cache.
pub struct CachedScriptRegistry {
    inner: Arc<dyn ScriptRegistry>,
    ttl: Duration,
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl CachedScriptRegistry {
    /// Cache resolutions of `inner` for `ttl`.
    #[must_use]
    pub fn new(inner: Arc<dyn ScriptRegistry>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop the cached source for `id`, reporting whether one existed.
    pub async fn invalidate(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    /// Drop every cached source.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Entry count and age distribution.
    pub async fn stats(&self) -> RegistryCacheStats {
        let entries = self.entries.read().await;
        let ages: Vec<u128> = entries
            .values()
            .map(|(_, at)| at.elapsed().as_millis())
            .collect();
        RegistryCacheStats {
            entries: ages.len(),
            average_age_ms: if ages.is_empty() {
                0
            } else {
                (ages.iter().sum::<u128>() / ages.len() as u128) as u64
            },
            oldest_age_ms: ages.iter().max().copied().unwrap_or(0) as u64,
        }
    }
}

#[async_trait]
impl ScriptRegistry for CachedScriptRegistry {
    async fn resolve(&self, id: &str) -> Result<String> {
        {
            let entries = self.entries.read().await;
            if let Some((text, inserted_at)) = entries.get(id) {
                if inserted_at.elapsed() <= self.ttl {
                    tracing::debug!(id, "registry cache hit");
                    return Ok(text.clone());
                }
            }
        }

        let text = self.inner.resolve(id).await?;
        self.entries
            .write()
            .await
            .insert(id.to_string(), (text.clone(), Instant::now()));
        Ok(text)
    }
}
