//! Engine configuration.
//!
//! All knobs a caller can turn: execution limits, resource monitor settings,
//! cache policy, the registry used for dependency resolution, and the
//! providers merged into every script context.

use crate::error::{Error, Result};
use crate::registry::ScriptRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Hard bounds applied to a single top-level call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Maximum wall-clock time for the entry function, in milliseconds.
    /// A bound of 0 makes every call fail with a timeout.
    pub timeout_ms: u64,

    /// Maximum depth of the import stack.
    pub max_recursion_depth: usize,

    /// Maximum number of scripts imported during one call.
    pub max_imported_scripts: usize,

    /// Maximum memory growth, in bytes.
    pub max_memory_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_recursion_depth: 10,
            max_imported_scripts: 50,
            max_memory_bytes: 100 * 1024 * 1024,
        }
    }
}

/// A partial update applied over existing [`ExecutionLimits`].
///
/// Used by tests and tooling; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsUpdate {
    /// New timeout, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// New recursion depth bound.
    pub max_recursion_depth: Option<usize>,
    /// New import count bound.
    pub max_imported_scripts: Option<usize>,
    /// New memory bound, in bytes.
    pub max_memory_bytes: Option<usize>,
}

impl ExecutionLimits {
    /// Apply a partial update in place.
    pub fn update(&mut self, partial: LimitsUpdate) {
        if let Some(v) = partial.timeout_ms {
            self.timeout_ms = v;
        }
        if let Some(v) = partial.max_recursion_depth {
            self.max_recursion_depth = v;
        }
        if let Some(v) = partial.max_imported_scripts {
            self.max_imported_scripts = v;
        }
        if let Some(v) = partial.max_memory_bytes {
            self.max_memory_bytes = v;
        }
    }
}

/// Resource monitor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Memory growth limit in bytes. `None` inherits
    /// [`ExecutionLimits::max_memory_bytes`].
    pub max_memory_bytes: Option<usize>,

    /// Sampling interval in milliseconds.
    pub check_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: None,
            check_interval_ms: 1000,
        }
    }
}

/// Script cache eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Entries older than this are purged on the next planning pass, in
    /// milliseconds.
    pub max_age_ms: u64,

    /// Oldest-first trim bound applied by `cleanup`.
    pub max_size: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_age_ms: 300_000,
            max_size: 100,
        }
    }
}

/// A partial update applied over an existing [`CachePolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicyUpdate {
    /// New age bound, in milliseconds.
    pub max_age_ms: Option<u64>,
    /// New size bound.
    pub max_size: Option<usize>,
}

impl CachePolicy {
    /// Apply a partial update in place.
    pub fn update(&mut self, partial: CachePolicyUpdate) {
        if let Some(v) = partial.max_age_ms {
            self.max_age_ms = v;
        }
        if let Some(v) = partial.max_size {
            self.max_size = v;
        }
    }
}

/// Configuration for a [`ScriptEngine`](crate::ScriptEngine).
#[derive(Clone, Default)]
pub struct EngineConfig {
    /// Registry used to resolve dependency identifiers. Without one, only
    /// inline imports work.
    pub registry: Option<Arc<dyn ScriptRegistry>>,

    /// Per-call execution limits.
    pub limits: ExecutionLimits,

    /// Resource monitor settings.
    pub monitor: MonitorConfig,

    /// Script cache eviction policy.
    pub cache_policy: CachePolicy,

    /// Values shallow-merged over the base context capabilities. Providers
    /// may override base keys.
    pub context_providers: serde_json::Map<String, Value>,
}

impl EngineConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight limits and a fast sampling interval for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            limits: ExecutionLimits {
                timeout_ms: 5_000,
                ..ExecutionLimits::default()
            },
            monitor: MonitorConfig {
                check_interval_ms: 100,
                ..MonitorConfig::default()
            },
            cache_policy: CachePolicy {
                max_age_ms: 60_000,
                max_size: 20,
            },
            ..Self::default()
        }
    }

    /// Set the dependency registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn ScriptRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the execution limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the cache policy.
    #[must_use]
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Add a context provider value under `key`.
    #[must_use]
    pub fn with_provider(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_providers.insert(key.into(), value);
        self
    }

    /// The memory bound the monitor enforces: explicit monitor setting,
    /// falling back to the execution limit.
    #[must_use]
    pub fn effective_memory_limit(&self) -> usize {
        self.monitor
            .max_memory_bytes
            .unwrap_or(self.limits.max_memory_bytes)
    }

    /// Ensure the configuration is internally consistent.
    ///
    /// A zero timeout is allowed (it makes every call fail with a timeout,
    /// which callers use to disable an engine); a zero sampling interval is
    /// not.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.check_interval_ms == 0 {
            return Err(Error::Configuration(
                "monitor check_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.effective_memory_limit() == 0 {
            return Err(Error::Configuration(
                "max_memory_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("registry", &self.registry.as_ref().map(|_| "<registry>"))
            .field("limits", &self.limits)
            .field("monitor", &self.monitor)
            .field("cache_policy", &self.cache_policy)
            .field(
                "context_providers",
                &self.context_providers.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}
