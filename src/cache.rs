//! Script cache.
//!
//! Maps script identifiers to introspected scripts, keyed alongside the
//! SHA-256 hash of the source they were produced from. Entries expire after
//! `max_age_ms` (checked on access and by `cleanup`) and the cache is
//! trimmed oldest-first to `max_size`. Timestamps are insertion-time and
//! never refreshed on access.

use crate::config::{CachePolicy, CachePolicyUpdate};
use crate::hash::ContentHash;
use crate::introspect::LoadedScript;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// How an entry entered the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOrigin {
    /// Planned as the engine's main script.
    Main,
    /// Loaded while walking the dependency tree.
    Dependency,
}

/// A cached, introspected script.
#[derive(Clone)]
pub struct CacheEntry {
    /// The introspected script.
    pub script: Arc<LoadedScript>,
    /// Hash of the source the script was introspected from.
    pub content_hash: ContentHash,
    /// Insertion time; never refreshed on access.
    pub inserted_at: Instant,
    /// How the entry entered the cache.
    pub origin: CacheOrigin,
}

/// Cache observations.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Live entries.
    pub entries: usize,
    /// Mean entry age in milliseconds.
    pub average_age_ms: u64,
    /// Entries tagged [`CacheOrigin::Main`].
    pub main_entries: usize,
    /// Entries tagged [`CacheOrigin::Dependency`].
    pub dependency_entries: usize,
}

/// Keyed script storage with TTL and oldest-first eviction.
pub struct ScriptCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    policy: parking_lot::RwLock<CachePolicy>,
}

impl ScriptCache {
    /// Create an empty cache under `policy`.
    #[must_use]
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            policy: parking_lot::RwLock::new(policy),
        }
    }

    /// Current eviction policy.
    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        *self.policy.read()
    }

    /// Apply a partial policy update.
    pub fn set_policy(&self, update: CachePolicyUpdate) {
        self.policy.write().update(update);
    }

    /// Fetch a live entry; an expired one is evicted and reported absent.
    pub async fn get(&self, id: &str) -> Option<CacheEntry> {
        let max_age = Duration::from_millis(self.policy().max_age_ms);
        {
            let entries = self.entries.read().await;
            match entries.get(id) {
                Some(entry) if entry.inserted_at.elapsed() <= max_age => {
                    return Some(entry.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Stale: take the write lock and evict.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(id) {
            if entry.inserted_at.elapsed() > max_age {
                tracing::debug!(id, "evicting expired cache entry");
                entries.remove(id);
            } else {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Insert or replace the entry for `id`.
    pub async fn put(&self, id: &str, script: Arc<LoadedScript>, hash: ContentHash, origin: CacheOrigin) {
        let entry = CacheEntry {
            script,
            content_hash: hash,
            inserted_at: Instant::now(),
            origin,
        };
        self.entries.write().await.insert(id.to_string(), entry);
    }

    /// Drop the entry for `id`, reporting whether one existed.
    pub async fn invalidate(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    /// Recompute the hash of `source`; evict the entry for `id` when it no
    /// longer matches. Returns true when an eviction happened.
    pub async fn invalidate_if_content_changed(&self, id: &str, source: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(id) {
            Some(entry) if !entry.content_hash.verify(source) => {
                tracing::debug!(id, "cached content hash changed; evicting");
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Sweep expired entries, then trim oldest-first to the size bound.
    pub async fn cleanup(&self) {
        let policy = self.policy();
        let max_age = Duration::from_millis(policy.max_age_ms);
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.inserted_at.elapsed() <= max_age);

        if entries.len() > policy.max_size {
            let mut by_age: Vec<(String, Instant)> = entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.inserted_at))
                .collect();
            by_age.sort_by_key(|(_, inserted_at)| *inserted_at);
            let excess = entries.len() - policy.max_size;
            for (id, _) in by_age.into_iter().take(excess) {
                entries.remove(&id);
            }
        }
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Count, mean age, and per-origin counts.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let count = entries.len();
        let total_age_ms: u128 = entries
            .values()
            .map(|e| e.inserted_at.elapsed().as_millis())
            .sum();
        CacheStats {
            entries: count,
            average_age_ms: if count == 0 {
                0
            } else {
                (total_age_ms / count as u128) as u64
            },
            main_entries: entries
                .values()
                .filter(|e| e.origin == CacheOrigin::Main)
                .count(),
            dependency_entries: entries
                .values()
                .filter(|e| e.origin == CacheOrigin::Dependency)
                .count(),
        }
    }
}
