//! Convenience wrappers over [`ScriptEngine`]: one-shot execution, strict
//! validation, planning-only inspection, sequential batches, reusable and
//! hot-reloadable handles, and a small benchmark harness.

use crate::config::EngineConfig;
use crate::engine::{ScriptEngine, ScriptSource};
use crate::error::{Error, Result};
use crate::params;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Instant;

/// Construct, call once, dispose.
pub async fn execute(source: &str, inputs: Value, config: EngineConfig) -> Result<Value> {
    let engine = ScriptEngine::new(source, config);
    let result = engine.call(inputs).await;
    engine.dispose().await;
    result
}

/// As [`execute`], after strictly checking that every required visible input
/// is present before the call.
pub async fn execute_with_validation(
    source: &str,
    inputs: Value,
    config: EngineConfig,
) -> Result<Value> {
    let engine = ScriptEngine::new(source, config);
    let outcome = strict_call(&engine, inputs).await;
    engine.dispose().await;
    outcome
}

async fn strict_call(engine: &ScriptEngine, inputs: Value) -> Result<Value> {
    let io = engine.get_io().await?;
    let (schema, errors, _) = params::parse_io_schema(&io);
    let schema = schema.ok_or_else(|| Error::Validation(errors.join("; ")))?;
    let provided = match &inputs {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(Error::Input(format!(
                "inputs must be an object, got {}",
                params::observed_kind(other)
            )))
        }
    };
    if let Some(key) = params::missing_required(&provided, &schema.inputs).first() {
        return Err(Error::Input(format!("Missing required input: {key}")));
    }
    engine.call(inputs).await
}

/// Outcome of planning a script without calling it.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    /// Whether planning succeeded.
    pub valid: bool,
    /// The io object, when planning succeeded.
    pub io: Option<Value>,
    /// Declared dependency identifiers.
    pub dependencies: Vec<String>,
    /// Planning errors, when it failed.
    pub errors: Option<Vec<String>>,
}

/// Plan `source` (validate, introspect, load dependencies) without calling
/// it.
pub async fn validate(source: &str, config: EngineConfig) -> ValidationOutcome {
    let engine = ScriptEngine::new(source, config);
    let outcome = match engine.wait_for_initialization().await {
        Ok(()) => {
            let io = engine.get_io().await.ok();
            let dependencies = engine.get_dependencies().await.unwrap_or_default();
            ValidationOutcome {
                valid: true,
                io,
                dependencies,
                errors: None,
            }
        }
        Err(e) => ValidationOutcome {
            valid: false,
            io: None,
            dependencies: Vec::new(),
            errors: Some(vec![e.to_string()]),
        },
    };
    engine.dispose().await;
    outcome
}

/// One script of a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Source text.
    pub content: String,
    /// Inputs for the call.
    pub inputs: Value,
    /// Identifier echoed in the result; defaults to `script-<index>`.
    pub id: Option<String>,
}

/// Per-item outcome of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// The item's identifier.
    pub id: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// The call's result on success.
    pub result: Option<Value>,
    /// The error message on failure.
    pub error: Option<String>,
}

/// Execute a batch sequentially; one failing item does not stop the rest.
pub async fn execute_batch(items: Vec<BatchItem>, config: EngineConfig) -> Vec<BatchResult> {
    let mut results = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let id = item.id.unwrap_or_else(|| format!("script-{index}"));
        match execute(&item.content, item.inputs, config.clone()).await {
            Ok(result) => results.push(BatchResult {
                id,
                success: true,
                result: Some(result),
                error: None,
            }),
            Err(e) => results.push(BatchResult {
                id,
                success: false,
                result: None,
                error: Some(e.to_string()),
            }),
        }
    }
    results
}

/// A planned engine handle for repeated calls.
pub struct ReusableScript {
    engine: ScriptEngine,
}

impl ReusableScript {
    /// Call with `inputs`.
    pub async fn execute(&self, inputs: Value) -> Result<Value> {
        self.engine.call(inputs).await
    }

    /// The io object.
    pub async fn get_io(&self) -> Result<Value> {
        self.engine.get_io().await
    }

    /// Declared dependencies.
    pub async fn get_dependencies(&self) -> Result<Vec<String>> {
        self.engine.get_dependencies().await
    }

    /// Release the engine.
    pub async fn dispose(self) {
        self.engine.dispose().await;
    }
}

/// Plan `source` once and return a handle for repeated calls.
pub async fn create_reusable(source: &str, config: EngineConfig) -> Result<ReusableScript> {
    let engine = ScriptEngine::new(source, config);
    engine.wait_for_initialization().await?;
    Ok(ReusableScript { engine })
}

/// An engine handle whose source is re-resolved on [`reload`](Self::reload).
pub struct HotReloadableScript {
    engine: ScriptEngine,
}

impl HotReloadableScript {
    /// Call with `inputs`.
    pub async fn execute(&self, inputs: Value) -> Result<Value> {
        self.engine.call(inputs).await
    }

    /// Re-resolve the source and await the new initialisation, propagating
    /// its failures.
    pub async fn reload(&self) -> Result<()> {
        self.engine.reload().await
    }

    /// The io object of the currently loaded version.
    pub async fn get_io(&self) -> Result<Value> {
        self.engine.get_io().await
    }

    /// Release the engine.
    pub async fn dispose(self) {
        self.engine.dispose().await;
    }
}

/// Build a hot-reloadable handle around a source resolver.
pub fn create_hot_reloadable<F, Fut>(get_source: F, config: EngineConfig) -> HotReloadableScript
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String>> + Send + 'static,
{
    HotReloadableScript {
        engine: ScriptEngine::new(ScriptSource::resolver(get_source), config),
    }
}

/// Timing report over repeated calls of one script.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    /// Mean call time in milliseconds.
    pub average_time: f64,
    /// Fastest call in milliseconds.
    pub min_time: f64,
    /// Slowest call in milliseconds.
    pub max_time: f64,
    /// Per-iteration times in milliseconds.
    pub times: Vec<f64>,
    /// Per-iteration results.
    pub results: Vec<Value>,
}

/// Plan once, call `iterations` times, time each call.
pub async fn benchmark(
    source: &str,
    inputs: Value,
    iterations: usize,
    config: EngineConfig,
) -> Result<BenchmarkReport> {
    let engine = ScriptEngine::new(source, config);
    engine.wait_for_initialization().await?;

    let mut times = Vec::with_capacity(iterations);
    let mut results = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let started = Instant::now();
        let outcome = engine.call(inputs.clone()).await;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok(result) => {
                times.push(elapsed);
                results.push(result);
            }
            Err(e) => {
                engine.dispose().await;
                return Err(e);
            }
        }
    }
    engine.dispose().await;

    let total: f64 = times.iter().sum();
    Ok(BenchmarkReport {
        average_time: if times.is_empty() {
            0.0
        } else {
            total / times.len() as f64
        },
        min_time: times.iter().copied().fold(f64::INFINITY, f64::min).min(total),
        max_time: times.iter().copied().fold(0.0, f64::max),
        times,
        results,
    })
}
