//! Registry variants composed together and driven through the engine.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use scriptflow::{
    execute, CachedScriptRegistry, CompositeScriptRegistry, EngineConfig, Environment,
    EnvironmentScriptRegistry, FileScriptRegistry, InMemoryScriptRegistry, ScriptEngine,
    ScriptRegistry,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn helper_source(factor: i64) -> String {
    format!(
        r#"
export const io = {{
    inputs: {{ n: {{ type: "int", default: 0 }} }},
    outputs: {{ n: {{ type: "int" }} }}
}};
export default async function run(inputs, context) {{
    return {{ n: inputs.n * {factor} }};
}}
"#
    )
}

const MAIN: &str = r#"
export const io = {
    inputs: { number: { type: "int", default: 1 } },
    outputs: { result: { type: "int" } }
};
export default async function run(inputs, context) {
    const helper = await context.importScript("helper");
    const out = await helper({ n: inputs.number });
    return { result: out.n };
}
"#;

#[tokio::test(flavor = "multi_thread")]
async fn test_composite_spans_memory_and_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("helper"), helper_source(2)).unwrap();

    let memory = Arc::new(InMemoryScriptRegistry::new());
    memory.register("other", helper_source(10));
    let files = Arc::new(FileScriptRegistry::new(dir.path()));
    let composite: Arc<dyn ScriptRegistry> =
        Arc::new(CompositeScriptRegistry::new(vec![memory, files]));

    // "helper" only exists on disk; "other" only in memory.
    assert!(composite.resolve("helper").await.is_ok());
    assert!(composite.resolve("other").await.is_ok());
    let err = composite.resolve("neither").await.unwrap_err().to_string();
    assert!(err.contains("[0]") && err.contains("[1]"), "{err}");

    let config = EngineConfig::for_testing().with_registry(composite);
    let result = execute(MAIN, json!({ "number": 21 }), config).await.unwrap();
    assert_eq!(result, json!({ "result": 42 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cached_registry_serves_planning_and_imports() {
    let inner = Arc::new(InMemoryScriptRegistry::new());
    inner.register("helper", helper_source(2));
    let cached = Arc::new(CachedScriptRegistry::new(
        inner.clone(),
        Duration::from_secs(60),
    ));

    let config = EngineConfig::for_testing().with_registry(cached.clone());
    let engine = ScriptEngine::new(MAIN, config);
    engine.wait_for_initialization().await.unwrap();
    assert_eq!(cached.stats().await.entries, 1);

    // The inner registry changes, but the cached copy keeps winning until it
    // is invalidated and the engine re-plans.
    inner.register("helper", helper_source(3));
    let result = engine.call(json!({ "number": 10 })).await.unwrap();
    assert_eq!(result, json!({ "result": 20 }));

    cached.invalidate("helper").await;
    engine.reload().await.unwrap();
    let result = engine.call(json!({ "number": 10 })).await.unwrap();
    assert_eq!(result, json!({ "result": 30 }));
    engine.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_environment_registry_switches_worlds() {
    let dev = Arc::new(InMemoryScriptRegistry::new());
    dev.register("helper", helper_source(2));
    let prod = Arc::new(InMemoryScriptRegistry::new());
    prod.register("helper", helper_source(100));

    let environment = Arc::new(
        EnvironmentScriptRegistry::with_environment(Environment::Development)
            .with_registry(Environment::Development, dev)
            .with_registry(Environment::Production, prod),
    );

    let config = EngineConfig::for_testing().with_registry(environment.clone());
    let engine = ScriptEngine::new(MAIN, config);
    assert_eq!(
        engine.call(json!({ "number": 3 })).await.unwrap(),
        json!({ "result": 6 })
    );

    environment.set_environment(Environment::Production);
    engine.reload().await.unwrap();
    assert_eq!(
        engine.call(json!({ "number": 3 })).await.unwrap(),
        json!({ "result": 300 })
    );
    engine.dispose().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_planning_fails_without_registry_for_dependency() {
    let engine = ScriptEngine::new(MAIN, EngineConfig::for_testing());
    let err = engine.wait_for_initialization().await.unwrap_err();
    assert!(
        err.to_string().contains("no registry configured"),
        "unexpected error: {err}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_planning_surfaces_composite_resolution_failure() {
    let empty: Arc<dyn ScriptRegistry> = Arc::new(CompositeScriptRegistry::new(vec![
        Arc::new(InMemoryScriptRegistry::new()),
        Arc::new(InMemoryScriptRegistry::new()),
    ]));
    let config = EngineConfig::for_testing().with_registry(empty);
    let engine = ScriptEngine::new(MAIN, config);

    let err = engine.wait_for_initialization().await.unwrap_err();
    assert!(
        err.to_string().contains("not found in any registry"),
        "unexpected error: {err}"
    );
    // Rollback: the failed pass left nothing behind.
    assert_eq!(engine.get_cache_stats().await.entries, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dependency_validation_failure_is_fatal_at_planning() {
    let registry = Arc::new(InMemoryScriptRegistry::new());
    registry.register("helper", "this is not a module");
    let config = EngineConfig::for_testing().with_registry(registry);
    let engine = ScriptEngine::new(MAIN, config);

    let err = engine.wait_for_initialization().await.unwrap_err();
    assert!(
        err.to_string().contains("dependency 'helper'"),
        "unexpected error: {err}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transitive_dependencies_are_planned() {
    let registry = Arc::new(InMemoryScriptRegistry::new());
    registry.register(
        "helper",
        r#"
export const io = {
    inputs: { n: { type: "int", default: 0 } },
    outputs: { n: { type: "int" } }
};
export default async function run(inputs, context) {
    const inner = await context.importScript("inner");
    return await inner({ n: inputs.n });
}
"#,
    );
    registry.register("inner", helper_source(2));

    let config = EngineConfig::for_testing().with_registry(registry);
    let engine = ScriptEngine::new(MAIN, config);
    engine.wait_for_initialization().await.unwrap();

    let stats = engine.get_cache_stats().await;
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.dependency_entries, 2);

    assert_eq!(
        engine.call(json!({ "number": 7 })).await.unwrap(),
        json!({ "result": 14 })
    );
    engine.dispose().await;
}
