//! Embedded ECMAScript host.
//!
//! One Boa `Context` is created per top-level call and nothing JS-side
//! outlives it. The module source is evaluated as a whole (exports rewritten
//! into local bindings inside an IIFE) so top-level helper declarations stay
//! in scope for the entry function; values cross the boundary as JSON.
//!
//! Scripts run on a blocking thread under the engine's timeout; every native
//! capability is synchronous on that thread, and registry resolution inside
//! `importScript` re-enters the async runtime via `Handle::block_on`.

use crate::config::ExecutionLimits;
use crate::error::{Error, Result};
use crate::monitor::ResourceMonitor;
use crate::registry::ScriptRegistry;
use crate::tracker::ImportTracker;
use crate::validator::ScriptValidator;
use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{Context, JsError, JsNativeError, JsObject, JsResult, JsValue, Source};
use regex::Regex;
use serde_json::{Map, Value};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::LazyLock;

mod context;
mod import;

#[allow(clippy::unwrap_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static EXPORT_IO_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"export\s+const\s+io\s*="));
static EXPORT_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"export\s+default\b"));

/// Per-loop iteration ceiling inside the host. The call-level timeout cannot
/// interrupt a spinning loop on the blocking thread, so the interpreter
/// itself has to give up; scripts that legitimately iterate this much are
/// outside the engine's intended workload.
const LOOP_ITERATION_LIMIT: u64 = 10_000_000;

/// Everything a running script can reach, shared by every context frame of
/// one top-level call.
pub(crate) struct CallEnv {
    pub limits: ExecutionLimits,
    pub registry: Option<Arc<dyn ScriptRegistry>>,
    pub validator: ScriptValidator,
    pub monitor: ResourceMonitor,
    pub tracker: ImportTracker,
    pub providers: Map<String, Value>,
    pub handle: tokio::runtime::Handle,
}

/// Evaluate `source` and invoke its default function with `inputs` and a
/// freshly built context. Returns the settled result as JSON.
pub(crate) fn run_script(source: &str, inputs: Map<String, Value>, env: CallEnv) -> Result<Value> {
    let env = Rc::new(env);
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(LOOP_ITERATION_LIMIT);

    let entry = eval_module(&mut context, source)
        .map_err(|e| Error::Execution(format!("module evaluation failed: {e}")))?;
    let context_object = context::build_context_object(&mut context, &env)
        .map_err(|e| Error::Execution(format!("context construction failed: {e}")))?;
    let js_inputs = JsValue::from_json(&Value::Object(inputs), &mut context)
        .map_err(|e| Error::Execution(format!("input conversion failed: {e}")))?;

    let result = entry.call(
        &JsValue::undefined(),
        &[js_inputs, context_object.into()],
        &mut context,
    );
    let settled = settle_entry(result, &mut context)?;
    js_to_json(&settled, &mut context)
}

/// Rewrite the module's two exports into local bindings and wrap the whole
/// text in an IIFE that returns the entry function.
///
/// Export anchors are located on canonical (comment-stripped, string-masked)
/// text so that export-shaped text inside a template literal, e.g. an inline
/// script passed to `importScript`, is never touched.
fn rewrite_exports(source: &str) -> String {
    let canonical =
        crate::validator::mask_strings(&crate::validator::strip_comments(source));
    let mut spans: Vec<(usize, usize, &str)> = Vec::with_capacity(2);
    if let Some(m) = EXPORT_IO_RE.find(&canonical) {
        spans.push((m.start(), m.end(), "const io ="));
    }
    if let Some(m) = EXPORT_DEFAULT_RE.find(&canonical) {
        spans.push((m.start(), m.end(), "const __scriptflow_entry__ ="));
    }
    spans.sort_by_key(|(start, _, _)| *start);

    let mut rewritten = String::with_capacity(source.len() + 64);
    let mut position = 0;
    for (start, end, replacement) in spans {
        rewritten.push_str(&source[position..start]);
        rewritten.push_str(replacement);
        position = end;
    }
    rewritten.push_str(&source[position..]);
    format!("(function() {{\n{rewritten}\n;return __scriptflow_entry__;\n}})()")
}

/// Evaluate a module and return its (callable) default export.
pub(crate) fn eval_module(context: &mut Context, source: &str) -> JsResult<JsObject> {
    let script = rewrite_exports(source);
    let value = context.eval(Source::from_bytes(&script))?;
    value.as_callable().cloned().ok_or_else(|| {
        JsNativeError::typ()
            .with_message("default export is not callable")
            .into()
    })
}

/// Evaluate an object-literal text in a throwaway context and return it as
/// JSON. Used for `io` declarations.
pub(crate) fn eval_object_literal(text: &str) -> std::result::Result<Value, String> {
    let mut context = Context::default();
    let wrapped = format!("({text})");
    let value = context
        .eval(Source::from_bytes(&wrapped))
        .map_err(|e| e.to_string())?;
    value.to_json(&mut context).map_err(|e| e.to_string())
}

/// Drain the job queue and unwrap the entry function's promise.
fn settle_entry(result: JsResult<JsValue>, context: &mut Context) -> Result<JsValue> {
    let value = result.map_err(|e| Error::Execution(e.to_string()))?;
    context.run_jobs();

    let Some(object) = value.as_object() else {
        return Ok(value);
    };
    let Ok(promise) = JsPromise::from_object(object.clone()) else {
        return Ok(value);
    };
    match promise.state() {
        PromiseState::Fulfilled(v) => Ok(v),
        PromiseState::Rejected(reason) => {
            Err(Error::Execution(value_message(&reason, context)))
        }
        PromiseState::Pending => Err(Error::Execution(
            "entry function did not settle".to_string(),
        )),
    }
}

/// Render a thrown JS value for an error message.
pub(crate) fn value_message(value: &JsValue, context: &mut Context) -> String {
    value
        .to_string(context)
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|_| value.display().to_string())
}

/// Convert a settled JS value to JSON; `undefined` and `null` become `null`.
fn js_to_json(value: &JsValue, context: &mut Context) -> Result<Value> {
    if value.is_undefined() || value.is_null() {
        return Ok(Value::Null);
    }
    value
        .to_json(context)
        .map_err(|e| Error::Execution(format!("result conversion failed: {e}")))
}

/// Surface an engine error inside the script as a JS exception.
pub(crate) fn to_js_error(error: Error) -> JsError {
    JsNativeError::error().with_message(error.to_string()).into()
}
