//! The `importScript` primitive.
//!
//! Accepts inline source text, a registry identifier, or a zero-argument
//! resolver function, and produces a callable imported-script object with
//! `io`, `deps` and `id` attached. Guards run before any observable work:
//! import count, recursion depth, a manual resource sample, the
//! content-identity cycle check, and validation of the resolved source.

use super::{context, to_js_error, value_message, CallEnv};
use crate::error::Error;
use crate::hash::ContentHash;
use crate::introspect::{self, LoadedScript};
use crate::limits;
use crate::params;
use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::PropertyDescriptor;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Trace};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};
use std::rc::Rc;

pub(crate) fn import_script(
    env: &Rc<CallEnv>,
    args: &[JsValue],
    context: &mut Context,
) -> JsResult<JsValue> {
    limits::check_imports(&env.limits, env.tracker.count()).map_err(to_js_error)?;
    limits::check_recursion(&env.limits, env.tracker.depth()).map_err(to_js_error)?;
    env.monitor.check().map_err(to_js_error)?;

    let source = resolve_source(env, args.get_or_undefined(0), context)?;

    let hash = ContentHash::from_source(&source);
    if env.tracker.has_content(&hash) {
        return Err(to_js_error(Error::RecursiveImport));
    }

    let report = env.validator.validate(&source);
    if !report.valid {
        return Err(JsNativeError::error()
            .with_message(format!(
                "Imported script validation failed: {}",
                report.errors.join("; ")
            ))
            .into());
    }

    let id = fresh_import_id();
    tracing::debug!(%id, count = env.tracker.count() + 1, "importing script");
    env.tracker.record_import(id.clone(), hash);

    // The stack entry brackets loading and evaluation; count and content
    // identity persist for the rest of the call.
    let produced: JsResult<JsValue> = (|| {
        let loaded = introspect::introspect(&id, &source).map_err(to_js_error)?;
        let entry = super::eval_module(context, &source)?;
        make_callable(context, env, Rc::new(loaded), entry)
    })();
    env.tracker.pop();
    produced
}

fn resolve_failure(detail: impl std::fmt::Display) -> boa_engine::JsError {
    JsNativeError::error()
        .with_message(format!("Failed to resolve script content: {detail}"))
        .into()
}

/// Turn the `importScript` argument into source text.
fn resolve_source(env: &Rc<CallEnv>, arg: &JsValue, context: &mut Context) -> JsResult<String> {
    if let Some(resolver) = arg.as_callable() {
        let resolver = resolver.clone();
        let result = resolver
            .call(&JsValue::undefined(), &[], context)
            .map_err(|e| resolve_failure(e))?;
        let settled = settle_resolver(result, context)?;
        return source_from_value(&settled, context);
    }

    if let Some(s) = arg.as_string() {
        let id = s.to_std_string_escaped();
        if let Some(registry) = &env.registry {
            match env.handle.block_on(registry.resolve(&id)) {
                Ok(text) => return Ok(text),
                Err(e) => {
                    // Registry misses fall through: the argument itself may
                    // be inline source.
                    tracing::debug!(
                        %id,
                        error = %e,
                        "registry resolution failed; treating argument as inline source"
                    );
                    return Ok(id);
                }
            }
        }
        return Ok(id);
    }

    Err(JsNativeError::typ()
        .with_message("importScript expects a script id, source text or resolver function")
        .into())
}

/// Settle the value a resolver function returned.
fn settle_resolver(value: JsValue, context: &mut Context) -> JsResult<JsValue> {
    let Some(object) = value.as_object() else {
        return Ok(value);
    };
    let Ok(promise) = JsPromise::from_object(object.clone()) else {
        return Ok(value);
    };
    context.run_jobs();
    match promise.state() {
        PromiseState::Fulfilled(v) => Ok(v),
        PromiseState::Rejected(reason) => {
            let message = value_message(&reason, context);
            Err(resolve_failure(message))
        }
        PromiseState::Pending => Err(resolve_failure("resolver did not settle")),
    }
}

/// A resolved value is source when it is a string, or an object carrying a
/// `content` or `script` string member. Anything else is unsupported.
fn source_from_value(value: &JsValue, context: &mut Context) -> JsResult<String> {
    if let Some(s) = value.as_string() {
        return Ok(s.to_std_string_escaped());
    }
    if let Some(object) = value.as_object() {
        for member in [js_string!("content"), js_string!("script")] {
            let candidate = object.get(member, context)?;
            if let Some(s) = candidate.as_string() {
                return Ok(s.to_std_string_escaped());
            }
        }
    }
    Err(resolve_failure("unsupported resolver return value"))
}

fn fresh_import_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("imported-{millis}-{suffix}")
}

#[derive(Trace, Finalize)]
struct CallableCaptures {
    entry: JsObject,
    #[unsafe_ignore_trace]
    env: Rc<CallEnv>,
    #[unsafe_ignore_trace]
    script: Rc<LoadedScript>,
}

fn inputs_map(value: &JsValue, context: &mut Context) -> JsResult<Map<String, Value>> {
    if value.is_undefined() || value.is_null() {
        return Ok(Map::new());
    }
    match value.to_json(context)? {
        Value::Object(map) => Ok(map),
        other => Err(JsNativeError::typ()
            .with_message(format!(
                "imported script inputs must be an object, got {}",
                params::observed_kind(&other)
            ))
            .into()),
    }
}

fn define_readonly(
    object: &JsObject,
    key: JsString,
    value: JsValue,
    context: &mut Context,
) -> JsResult<()> {
    object.define_property_or_throw(
        key,
        PropertyDescriptor::builder()
            .value(value)
            .writable(false)
            .enumerable(true)
            .configurable(false)
            .build(),
        context,
    )?;
    Ok(())
}

/// Produce the callable imported-script object: an async function of an
/// input map, with `io`, `deps` and `id` as readable members. Each
/// invocation validates inputs against the imported schema and rebuilds a
/// fresh context sharing the call's tracker.
fn make_callable(
    context: &mut Context,
    env: &Rc<CallEnv>,
    script: Rc<LoadedScript>,
    entry: JsObject,
) -> JsResult<JsValue> {
    let captures = CallableCaptures {
        entry,
        env: Rc::clone(env),
        script: Rc::clone(&script),
    };
    let native = NativeFunction::from_copy_closure_with_captures(
        |_, args, captures: &CallableCaptures, ctx| {
            let inputs = inputs_map(args.get_or_undefined(0), ctx)?;
            let validated = params::prepare_inputs(&inputs, &captures.script.io.inputs)
                .map_err(to_js_error)?;
            let fresh_context = context::build_context_object(ctx, &captures.env)?;
            let js_inputs = JsValue::from_json(&Value::Object(validated), ctx)?;
            captures.entry.call(
                &JsValue::undefined(),
                &[js_inputs, fresh_context.into()],
                ctx,
            )
        },
        captures,
    );

    let callable = FunctionObjectBuilder::new(context.realm(), native)
        .name(js_string!("importedScript"))
        .length(1)
        .build();

    let io_value = JsValue::from_json(&script.io.raw, context)?;
    define_readonly(&callable, js_string!("io"), io_value, context)?;
    let deps = Value::Array(script.deps.iter().cloned().map(Value::String).collect());
    define_readonly(&callable, js_string!("deps"), JsValue::from_json(&deps, context)?, context)?;
    define_readonly(
        &callable,
        js_string!("id"),
        JsValue::from(JsString::from(script.id.as_str())),
        context,
    )?;

    Ok(callable.into())
}
