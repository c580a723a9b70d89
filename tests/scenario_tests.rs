//! End-to-end scenarios: defaults, inline and registry imports, recursive
//! import detection, timeouts, hot reload.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use scriptflow::{
    create_hot_reloadable, execute, EngineConfig, Error, ExecutionLimits, InMemoryScriptRegistry,
    ScriptEngine,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scriptflow=debug")),
        )
        .with_test_writer()
        .try_init();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_defaults_and_simple_call() {
    init_tracing();
    let source = r#"
export const io = {
    inputs: {
        message: { type: "string", default: "Hello" },
        count: { type: "int", default: 1, min: 1, max: 5 }
    },
    outputs: { result: { type: "string" } }
};

export default async function run(inputs, context) {
    return { result: Array(inputs.count).fill(inputs.message).join(" ") };
}
"#;

    let result = execute(source, json!({}), EngineConfig::for_testing())
        .await
        .unwrap();
    assert_eq!(result, json!({ "result": "Hello" }));

    let result = execute(
        source,
        json!({ "count": 3, "message": "Hi" }),
        EngineConfig::for_testing(),
    )
    .await
    .unwrap();
    assert_eq!(result, json!({ "result": "Hi Hi Hi" }));

    let err = execute(source, json!({ "count": 10 }), EngineConfig::for_testing())
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("above the maximum"),
        "unexpected error: {err}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_inline_import_and_double() {
    let source = r#"
export const io = {
    inputs: { number: { type: "int", default: 1 } },
    outputs: { doubled: { type: "int" }, quadrupled: { type: "int" } }
};

const DOUBLER = `
export const io = {
    inputs: { value: { type: "int", default: 0 } },
    outputs: { value: { type: "int" } }
};
export default async function run(inputs, context) {
    return { value: inputs.value * 2 };
}
`;

export default async function run(inputs, context) {
    const doubler = await context.importScript(DOUBLER);
    const once = await doubler({ value: inputs.number });
    const twice = await doubler({ value: once.value });
    return { doubled: once.value, quadrupled: twice.value };
}
"#;

    let result = execute(source, json!({ "number": 21 }), EngineConfig::for_testing())
        .await
        .unwrap();
    assert_eq!(result, json!({ "doubled": 42, "quadrupled": 84 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nested_registry_import() {
    let registry = Arc::new(InMemoryScriptRegistry::new());
    registry.register(
        "helper",
        r#"
export const io = {
    inputs: { n: { type: "int", default: 0 } },
    outputs: { n: { type: "int" } }
};
export default async function run(inputs, context) {
    return { n: inputs.n * 2 };
}
"#,
    );

    let main = r#"
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

    let config = EngineConfig::for_testing().with_registry(registry);
    let result = execute(main, json!({ "number": 21 }), config).await.unwrap();
    assert_eq!(result, json!({ "result": 42 }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recursive_content_import_is_detected() {
    let source = r#"
export const io = { inputs: {}, outputs: {} };

const INLINE = `
export const io = { inputs: {}, outputs: { ok: { type: "boolean" } } };
export default async function run(inputs, context) {
    return { ok: true };
}
`;

export default async function run(inputs, context) {
    const first = await context.importScript(INLINE);
    await first({});
    const second = await context.importScript(INLINE);
    return {};
}
"#;

    let err = execute(source, json!({}), EngineConfig::for_testing())
        .await
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("Recursive import detected: script content already imported in this execution"),
        "unexpected error: {err}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_fails_call_and_leaves_cache_intact() {
    let source = r#"
export const io = { inputs: {}, outputs: { done: { type: "boolean" } } };
export default async function run(inputs, context) {
    await context.utils.delay(200);
    return { done: true };
}
"#;

    let config = EngineConfig {
        limits: ExecutionLimits {
            timeout_ms: 100,
            ..ExecutionLimits::default()
        },
        ..EngineConfig::for_testing()
    };
    let engine = ScriptEngine::new(source, config);

    let err = engine.call(json!({})).await.unwrap_err();
    assert_eq!(err.to_string(), "Script execution timeout after 100ms");
    assert!(matches!(err, Error::Timeout(100)));

    let stats = engine.get_cache_stats().await;
    assert_eq!(stats.entries, 1);
    engine.dispose().await;
}

fn versioned_source(version: usize) -> String {
    format!(
        r#"
export const io = {{ inputs: {{}}, outputs: {{ version: {{ type: "int" }} }} }};
export default async function run(inputs, context) {{
    return {{ version: {version} }};
}}
"#
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hot_reload_picks_up_new_source() {
    let version = Arc::new(AtomicUsize::new(1));
    let seen = Arc::clone(&version);
    let handle = create_hot_reloadable(
        move || {
            let seen = Arc::clone(&seen);
            async move {
                let n = seen.load(Ordering::SeqCst);
                if n == 3 {
                    Ok("this is not a script".to_string())
                } else {
                    Ok(versioned_source(n))
                }
            }
        },
        EngineConfig::for_testing(),
    );

    assert_eq!(handle.execute(json!({})).await.unwrap(), json!({ "version": 1 }));

    version.store(2, Ordering::SeqCst);
    handle.reload().await.unwrap();
    assert_eq!(handle.execute(json!({})).await.unwrap(), json!({ "version": 2 }));

    // A resolver handing back invalid source fails the reload, and calls
    // keep failing until a successful one.
    version.store(3, Ordering::SeqCst);
    assert!(handle.reload().await.is_err());
    assert!(handle.execute(json!({})).await.is_err());

    version.store(2, Ordering::SeqCst);
    handle.reload().await.unwrap();
    assert_eq!(handle.execute(json!({})).await.unwrap(), json!({ "version": 2 }));
    handle.dispose().await;
}
