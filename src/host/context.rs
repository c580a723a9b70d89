//! Per-invocation context assembly.
//!
//! The context object handed to every entry function carries the base
//! capabilities (logger, calculator, utils), the `importScript` primitive,
//! and any injected provider values shallow-merged over the base.

use super::{import, CallEnv};
use boa_engine::object::{FunctionObjectBuilder, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction,
};
use boa_gc::{Finalize, Trace};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use std::rc::Rc;

#[derive(Trace, Finalize)]
struct ImportCaptures {
    #[unsafe_ignore_trace]
    env: Rc<CallEnv>,
}

/// Build a fresh context object. Called once per top-level call and again
/// for every imported-script invocation; all frames share the call's
/// tracker through `env`.
pub(crate) fn build_context_object(context: &mut Context, env: &Rc<CallEnv>) -> JsResult<JsObject> {
    let logger = ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(log_info), js_string!("info"), 1)
        .function(NativeFunction::from_fn_ptr(log_success), js_string!("success"), 1)
        .function(NativeFunction::from_fn_ptr(log_warn), js_string!("warn"), 1)
        .function(NativeFunction::from_fn_ptr(log_error), js_string!("error"), 1)
        .build();

    let calculator = ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(calc_enhance), js_string!("enhance"), 1)
        .function(NativeFunction::from_fn_ptr(calc_sum), js_string!("sum"), 1)
        .function(NativeFunction::from_fn_ptr(calc_average), js_string!("average"), 1)
        .function(NativeFunction::from_fn_ptr(calc_product), js_string!("product"), 1)
        .build();

    let utils = ObjectInitializer::new(context)
        .function(NativeFunction::from_fn_ptr(utils_format_number), js_string!("formatNumber"), 2)
        .function(NativeFunction::from_fn_ptr(utils_capitalize), js_string!("capitalize"), 1)
        .function(NativeFunction::from_fn_ptr(utils_delay), js_string!("delay"), 1)
        .function(NativeFunction::from_fn_ptr(utils_random_int), js_string!("randomInt"), 2)
        .function(NativeFunction::from_fn_ptr(utils_shuffle), js_string!("shuffle"), 1)
        .function(NativeFunction::from_fn_ptr(utils_random_choice), js_string!("randomChoice"), 1)
        .build();

    let import_fn = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_copy_closure_with_captures(
            |_, args, captures: &ImportCaptures, ctx| import::import_script(&captures.env, args, ctx),
            ImportCaptures { env: Rc::clone(env) },
        ),
    )
    .name(js_string!("importScript"))
    .length(1)
    .build();

    let object = ObjectInitializer::new(context)
        .property(js_string!("logger"), logger, Attribute::all())
        .property(js_string!("calculator"), calculator, Attribute::all())
        .property(js_string!("utils"), utils, Attribute::all())
        .property(js_string!("importScript"), import_fn, Attribute::all())
        .build();

    // Injected providers win over base keys.
    for (key, value) in &env.providers {
        let js = JsValue::from_json(value, context)?;
        object.set(JsString::from(key.as_str()), js, true, context)?;
    }

    Ok(object)
}

fn join_args(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(arg.to_string(context)?.to_std_string_escaped());
    }
    Ok(parts.join(" "))
}

fn log_info(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let message = join_args(args, context)?;
    tracing::info!(target: "scriptflow::script", "[INFO] {message}");
    Ok(JsValue::undefined())
}

fn log_success(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let message = join_args(args, context)?;
    tracing::info!(target: "scriptflow::script", "[OK] {message}");
    Ok(JsValue::undefined())
}

fn log_warn(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let message = join_args(args, context)?;
    tracing::warn!(target: "scriptflow::script", "[WARN] {message}");
    Ok(JsValue::undefined())
}

fn log_error(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let message = join_args(args, context)?;
    tracing::error!(target: "scriptflow::script", "[ERROR] {message}");
    Ok(JsValue::undefined())
}

fn numbers_arg(args: &[JsValue], context: &mut Context) -> JsResult<Vec<f64>> {
    let value = args.get_or_undefined(0);
    let json = if value.is_undefined() || value.is_null() {
        Value::Null
    } else {
        value.to_json(context)?
    };
    let Value::Array(items) = json else {
        return Err(JsNativeError::typ()
            .with_message("expected an array of numbers")
            .into());
    };
    items
        .iter()
        .map(|item| {
            item.as_f64().ok_or_else(|| {
                JsNativeError::typ()
                    .with_message("expected an array of numbers")
                    .into()
            })
        })
        .collect()
}

fn calc_enhance(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let n = args.get_or_undefined(0).to_number(context)?;
    Ok(JsValue::from(n * 1.1))
}

fn calc_sum(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let numbers = numbers_arg(args, context)?;
    Ok(JsValue::from(numbers.iter().sum::<f64>()))
}

fn calc_average(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let numbers = numbers_arg(args, context)?;
    if numbers.is_empty() {
        return Ok(JsValue::from(0));
    }
    Ok(JsValue::from(
        numbers.iter().sum::<f64>() / numbers.len() as f64,
    ))
}

fn calc_product(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let numbers = numbers_arg(args, context)?;
    Ok(JsValue::from(numbers.iter().product::<f64>()))
}

fn utils_format_number(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let value = args.get_or_undefined(0).to_number(context)?;
    let decimals = match args.get(1) {
        None => 2,
        Some(v) if v.is_undefined() => 2,
        Some(v) => v.to_number(context)?.clamp(0.0, 12.0) as usize,
    };
    Ok(JsValue::from(JsString::from(format!(
        "{value:.decimals$}"
    ))))
}

fn utils_capitalize(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let text = args
        .get_or_undefined(0)
        .to_string(context)?
        .to_std_string_escaped();
    let mut chars = text.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    Ok(JsValue::from(JsString::from(capitalized)))
}

fn utils_delay(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let ms = args.get_or_undefined(0).to_number(context)?.max(0.0);
    // Script execution owns a blocking thread; sleeping here suspends only
    // the script, and the call-level timeout still applies.
    std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    Ok(JsValue::undefined())
}

fn utils_random_int(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let a = args.get_or_undefined(0).to_number(context)? as i64;
    let b = args.get_or_undefined(1).to_number(context)? as i64;
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    Ok(JsValue::from(rand::thread_rng().gen_range(low..=high) as f64))
}

fn utils_shuffle(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let value = args.get_or_undefined(0);
    let json = value.to_json(context)?;
    let Value::Array(mut items) = json else {
        return Err(JsNativeError::typ()
            .with_message("shuffle expects an array")
            .into());
    };
    items.shuffle(&mut rand::thread_rng());
    JsValue::from_json(&Value::Array(items), context)
}

fn utils_random_choice(_: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let value = args.get_or_undefined(0);
    let json = value.to_json(context)?;
    let Value::Array(items) = json else {
        return Err(JsNativeError::typ()
            .with_message("randomChoice expects an array")
            .into());
    };
    match items.choose(&mut rand::thread_rng()) {
        Some(item) => JsValue::from_json(item, context),
        None => Ok(JsValue::undefined()),
    }
}
