//! The script engine: planner and executor.
//!
//! An engine is bound to one main script (literal source or a resolver
//! callback) and a configuration. Initialisation validates the main source
//! and walks its dependency tree breadth-first through the registry, caching
//! every loaded script. Calls validate inputs against the main IO schema,
//! build a per-invocation context, and run the entry function on a blocking
//! thread under the configured timeout while the resource monitor samples.

use crate::cache::{CacheOrigin, CacheStats, ScriptCache};
use crate::config::{CachePolicyUpdate, EngineConfig, LimitsUpdate};
use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::host::{self, CallEnv};
use crate::introspect::{introspect, LoadedScript};
use crate::limits;
use crate::monitor::{ResourceMonitor, ResourceStats};
use crate::params;
use crate::registry::ScriptRegistry;
use crate::tracker::ImportTracker;
use crate::validator::ScriptValidator;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Where an engine's main script comes from.
#[derive(Clone)]
pub enum ScriptSource {
    /// Literal source text.
    Literal(String),
    /// Callback invoked on every (re)initialisation; the vector for hot
    /// reload.
    Resolver(Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>),
}

impl ScriptSource {
    /// Source from a resolver callback.
    pub fn resolver<F, Fut>(resolver: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String>> + Send + 'static,
    {
        Self::Resolver(Arc::new(move || Box::pin(resolver())))
    }

    async fn resolve(&self) -> Result<String> {
        match self {
            Self::Literal(text) => Ok(text.clone()),
            Self::Resolver(resolver) => resolver().await,
        }
    }
}

impl From<&str> for ScriptSource {
    fn from(text: &str) -> Self {
        Self::Literal(text.to_string())
    }
}

impl From<String> for ScriptSource {
    fn from(text: String) -> Self {
        Self::Literal(text)
    }
}

impl fmt::Debug for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => f.debug_tuple("Literal").field(&text.len()).finish(),
            Self::Resolver(_) => f.write_str("Resolver"),
        }
    }
}

enum InitState {
    Pending,
    Ready(Arc<LoadedScript>),
    Failed(String),
}

/// A prepared, callable engine bound to one main script.
///
/// # Example
///
/// ```no_run
/// use scriptflow::{EngineConfig, ScriptEngine};
/// use serde_json::json;
///
/// # async fn demo() -> scriptflow::Result<()> {
/// let source = r#"
/// export const io = { inputs: {}, outputs: { ok: { type: "boolean" } } };
/// export default async function run(inputs, context) { return { ok: true }; }
/// "#;
/// let engine = ScriptEngine::new(source, EngineConfig::default());
/// let result = engine.call(json!({})).await?;
/// assert_eq!(result, json!({ "ok": true }));
/// engine.dispose().await;
/// # Ok(())
/// # }
/// ```
pub struct ScriptEngine {
    source: ScriptSource,
    registry: Option<Arc<dyn ScriptRegistry>>,
    limits: parking_lot::RwLock<crate::config::ExecutionLimits>,
    providers: Map<String, Value>,
    validator: parking_lot::RwLock<ScriptValidator>,
    cache: ScriptCache,
    monitor: ResourceMonitor,
    init: tokio::sync::Mutex<InitState>,
}

impl ScriptEngine {
    /// Bind `source` under `config`. Construction is cheap; planning runs
    /// when the first caller awaits ([`call`](Self::call),
    /// [`wait_for_initialization`](Self::wait_for_initialization), …).
    #[must_use]
    pub fn new(source: impl Into<ScriptSource>, config: EngineConfig) -> Self {
        let init = match config.validate() {
            Ok(()) => InitState::Pending,
            Err(e) => InitState::Failed(e.to_string()),
        };
        Self {
            source: source.into(),
            registry: config.registry.clone(),
            limits: parking_lot::RwLock::new(config.limits),
            providers: config.context_providers.clone(),
            validator: parking_lot::RwLock::new(ScriptValidator::new()),
            cache: ScriptCache::new(config.cache_policy),
            monitor: ResourceMonitor::new(
                config.effective_memory_limit(),
                config.monitor.check_interval_ms,
            ),
            init: tokio::sync::Mutex::new(init),
        }
    }

    /// Await initialisation, planning it if nobody has yet.
    pub async fn wait_for_initialization(&self) -> Result<()> {
        self.ensure_initialized().await.map(|_| ())
    }

    async fn ensure_initialized(&self) -> Result<Arc<LoadedScript>> {
        let mut state = self.init.lock().await;
        match &*state {
            InitState::Ready(script) => Ok(Arc::clone(script)),
            InitState::Failed(message) => Err(Error::Initialization(message.clone())),
            InitState::Pending => match self.plan().await {
                Ok(script) => {
                    *state = InitState::Ready(Arc::clone(&script));
                    Ok(script)
                }
                Err(e) => {
                    let message = e.to_string();
                    *state = InitState::Failed(message.clone());
                    Err(Error::Initialization(message))
                }
            },
        }
    }

    /// Resolve, validate and introspect the main source, then BFS-load the
    /// declared dependency tree. Cache insertions from a failed pass are
    /// rolled back.
    async fn plan(&self) -> Result<Arc<LoadedScript>> {
        let main_source = self.source.resolve().await?;
        let report = self.validator.read().validate(&main_source);
        if !report.valid {
            return Err(Error::Validation(report.errors.join("; ")));
        }
        for warning in &report.warnings {
            tracing::warn!(target: "scriptflow::planner", "{warning}");
        }

        let main_id = format!("script-{}", Uuid::new_v4());
        let mut queue: VecDeque<(String, Option<String>)> = VecDeque::new();
        queue.push_back((main_id, Some(main_source)));
        let mut processed: HashSet<String> = HashSet::new();
        let mut inserted: Vec<String> = Vec::new();
        let mut main_script: Option<Arc<LoadedScript>> = None;

        let outcome: Result<Arc<LoadedScript>> = async {
            while let Some((id, maybe_text)) = queue.pop_front() {
                if !processed.insert(id.clone()) {
                    continue;
                }
                let script = match maybe_text {
                    Some(text) => {
                        let hash = ContentHash::from_source(&text);
                        match self.cache.get(&id).await {
                            Some(entry) if entry.content_hash == hash => {
                                tracing::debug!(target: "scriptflow::planner", %id, "cache hit");
                                entry.script
                            }
                            _ => {
                                let script = Arc::new(introspect(&id, &text)?);
                                self.cache
                                    .put(&id, Arc::clone(&script), hash, CacheOrigin::Main)
                                    .await;
                                inserted.push(id.clone());
                                script
                            }
                        }
                    }
                    None => match self.cache.get(&id).await {
                        Some(entry) => {
                            tracing::debug!(target: "scriptflow::planner", %id, "dependency cache hit");
                            entry.script
                        }
                        None => {
                            let registry = self.registry.as_ref().ok_or_else(|| {
                                Error::Registry(format!(
                                    "Cannot resolve dependency '{id}': no registry configured"
                                ))
                            })?;
                            tracing::debug!(target: "scriptflow::planner", %id, "resolving dependency");
                            let text = registry.resolve(&id).await?;
                            let report = self.validator.read().validate(&text);
                            if !report.valid {
                                return Err(Error::Validation(format!(
                                    "dependency '{id}': {}",
                                    report.errors.join("; ")
                                )));
                            }
                            let hash = ContentHash::from_source(&text);
                            let script = Arc::new(introspect(&id, &text)?);
                            self.cache
                                .put(&id, Arc::clone(&script), hash, CacheOrigin::Dependency)
                                .await;
                            inserted.push(id.clone());
                            script
                        }
                    },
                };

                for dep in &script.deps {
                    if !processed.contains(dep) {
                        queue.push_back((dep.clone(), None));
                    }
                }
                if main_script.is_none() {
                    main_script = Some(script);
                }
            }
            main_script
                .ok_or_else(|| Error::Initialization("planning produced no main script".to_string()))
        }
        .await;

        match outcome {
            Ok(script) => {
                self.cache.cleanup().await;
                tracing::info!(
                    target: "scriptflow::planner",
                    id = %script.id,
                    deps = script.deps.len(),
                    "planning complete"
                );
                Ok(script)
            }
            Err(e) => {
                for id in &inserted {
                    self.cache.invalidate(id).await;
                }
                Err(e)
            }
        }
    }

    /// Run the main script with `inputs` (an object; `null` means empty).
    pub async fn call(&self, inputs: Value) -> Result<Value> {
        let script = self.ensure_initialized().await?;
        let inputs = match inputs {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::Input(format!(
                    "inputs must be an object, got {}",
                    params::observed_kind(&other)
                )))
            }
        };

        self.monitor.start();
        let result = self.call_prepared(&script, inputs).await;
        self.monitor.stop();
        result
    }

    async fn call_prepared(
        &self,
        script: &Arc<LoadedScript>,
        inputs: Map<String, Value>,
    ) -> Result<Value> {
        let validated = params::prepare_inputs(&inputs, &script.io.inputs)?;
        let limits = *self.limits.read();
        let env = CallEnv {
            limits,
            registry: self.registry.clone(),
            validator: self.validator.read().clone(),
            monitor: self.monitor.clone(),
            tracker: ImportTracker::new(),
            providers: self.providers.clone(),
            handle: tokio::runtime::Handle::current(),
        };

        let source = script.source.clone();
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || host::run_script(&source, validated, env));
        let outcome = limits::execute_with_timeout(
            async move {
                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(Error::Execution(format!("blocking task failed: {e}"))),
                }
            },
            limits.timeout_ms,
        )
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => {
                tracing::info!(target: "scriptflow::engine", elapsed_ms, "call complete");
            }
            Err(e) => {
                tracing::warn!(target: "scriptflow::engine", elapsed_ms, error = %e, "call failed");
            }
        }
        outcome
    }

    /// The main script's io object as written.
    pub async fn get_io(&self) -> Result<Value> {
        Ok(self.ensure_initialized().await?.io.raw.clone())
    }

    /// The main script's declared dependency identifiers.
    pub async fn get_dependencies(&self) -> Result<Vec<String>> {
        Ok(self.ensure_initialized().await?.deps.clone())
    }

    /// Input keys partitioned by display group, in declaration order. The
    /// bridge UI form generators consume.
    pub async fn get_input_groups(&self) -> Result<indexmap::IndexMap<String, Vec<String>>> {
        let script = self.ensure_initialized().await?;
        Ok(params::group_parameters(&script.io.inputs))
    }

    /// Apply a partial execution-limits update.
    pub fn update_limits(&self, update: LimitsUpdate) {
        self.limits.write().update(update);
    }

    /// Apply a partial cache-policy update.
    pub fn set_cache_policy(&self, update: CachePolicyUpdate) {
        self.cache.set_policy(update);
    }

    /// Script cache observations.
    pub async fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Resource monitor observations.
    #[must_use]
    pub fn get_resource_stats(&self) -> ResourceStats {
        self.monitor.stats()
    }

    /// Drop the cache entry for `id`.
    pub async fn invalidate_script(&self, id: &str) -> bool {
        self.cache.invalidate(id).await
    }

    /// Evict the entry for `id` when `source` no longer matches its hash.
    pub async fn invalidate_if_changed(&self, id: &str, source: &str) -> bool {
        self.cache.invalidate_if_content_changed(id, source).await
    }

    /// Drop every cache entry.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Append a custom dangerous pattern, keyed by `message`.
    pub fn add_dangerous_pattern(&self, pattern: &str, message: &str) -> Result<()> {
        self.validator.write().add_pattern(pattern, message)
    }

    /// Remove the dangerous pattern registered under `message`.
    pub fn remove_dangerous_pattern(&self, message: &str) -> bool {
        self.validator.write().remove_pattern(message)
    }

    /// Clear the cache, reset initialisation state, and re-plan from the
    /// current source. Propagates planning failures; until a successful
    /// reload, calls keep failing.
    pub async fn reload(&self) -> Result<()> {
        {
            let mut state = self.init.lock().await;
            self.cache.clear().await;
            *state = InitState::Pending;
        }
        tracing::info!(target: "scriptflow::engine", "reloading");
        self.ensure_initialized().await.map(|_| ())
    }

    /// Clear the cache and stop the monitor.
    pub async fn dispose(&self) {
        self.cache.clear().await;
        self.monitor.dispose();
    }
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("source", &self.source)
            .field("registry", &self.registry.as_ref().map(|_| "<registry>"))
            .field("limits", &*self.limits.read())
            .finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryScriptRegistry;
    use serde_json::json;

    const MAIN: &str = r#"
export const io = {
    inputs: { number: { type: "int", default: 2 } },
    outputs: { result: { type: "int" } }
};
export default async function run(inputs, context) {
    return { result: inputs.number * 2 };
}
"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialization_and_call() {
        let engine = ScriptEngine::new(MAIN, EngineConfig::for_testing());
        engine.wait_for_initialization().await.unwrap();
        let result = engine.call(json!({ "number": 21 })).await.unwrap();
        assert_eq!(result, json!({ "result": 42 }));
        engine.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_source_fails_initialization_fast() {
        let engine = ScriptEngine::new("const nope = 1;", EngineConfig::for_testing());
        let first = engine.wait_for_initialization().await.unwrap_err();
        assert!(first.to_string().starts_with("Script initialization failed:"));

        // Subsequent calls fail fast with the stored message.
        let second = engine.call(json!({})).await.unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dependency_planning_populates_cache() {
        let registry = Arc::new(InMemoryScriptRegistry::new());
        registry.register(
            "helper",
            r#"
export const io = { inputs: { n: "int" }, outputs: { n: "int" } };
export default async function run(inputs, context) { return { n: inputs.n }; }
"#,
        );
        let main = r#"
export const io = { inputs: {}, outputs: {} };
export default async function run(inputs, context) {
    const helper = await context.importScript("helper");
    return await helper({ n: 7 });
}
"#;
        let config = EngineConfig::for_testing().with_registry(registry);
        let engine = ScriptEngine::new(main, config);
        engine.wait_for_initialization().await.unwrap();

        let stats = engine.get_cache_stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.main_entries, 1);
        assert_eq!(stats.dependency_entries, 1);

        assert_eq!(
            engine.get_dependencies().await.unwrap(),
            vec!["helper".to_string()]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_dependency_rolls_back_cache() {
        let main = r#"
export const io = { inputs: {}, outputs: {} };
export default async function run(inputs, context) {
    const helper = await context.importScript("ghost");
    return {};
}
"#;
        let registry = Arc::new(InMemoryScriptRegistry::new());
        let config = EngineConfig::for_testing().with_registry(registry);
        let engine = ScriptEngine::new(main, config);

        assert!(engine.wait_for_initialization().await.is_err());
        assert_eq!(engine.get_cache_stats().await.entries, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_input_groups_follow_declaration_order() {
        let source = r#"
export const io = {
    inputs: {
        width: { type: "int", group: "shape" },
        label: { type: "string" },
        height: { type: "int", group: "shape" }
    },
    outputs: {}
};
export default async function run(inputs, context) { return {}; }
"#;
        let engine = ScriptEngine::new(source, EngineConfig::for_testing());
        let groups = engine.get_input_groups().await.unwrap();
        let names: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(names, vec!["shape".to_string(), "default".to_string()]);
        assert_eq!(groups["shape"], vec!["width".to_string(), "height".to_string()]);
        assert_eq!(groups["default"], vec!["label".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_inputs_must_be_an_object() {
        let engine = ScriptEngine::new(MAIN, EngineConfig::for_testing());
        let err = engine.call(json!([1, 2])).await.unwrap_err();
        assert!(err.to_string().contains("inputs must be an object"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_limits_applies_to_next_call() {
        let engine = ScriptEngine::new(MAIN, EngineConfig::for_testing());
        engine.update_limits(LimitsUpdate {
            timeout_ms: Some(0),
            ..LimitsUpdate::default()
        });
        let err = engine.call(json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(0)));
    }
}
