//! Parameter model.
//!
//! Normalises IO schema parameter declarations, applies kind-specific
//! defaults, validates values, evaluates conditional visibility and groups
//! parameters for display. Values are plain JSON; schemas keep declaration
//! order.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Maximum option-list size before the schema walk emits a warning.
const OPTIONS_WARN_THRESHOLD: usize = 100;

/// Sentinel default for the domain-tagged identifier kind.
const ITEM_ID_DEFAULT: &str = "minecraft:stone";

/// The closed set of parameter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// Whole number.
    Int,
    /// Finite floating-point number.
    Float,
    /// Text.
    Text,
    /// Strict boolean.
    Boolean,
    /// Non-null, non-array object.
    Object,
    /// Sequence.
    Array,
    /// Namespaced identifier of the shape `namespace:path`.
    ItemId,
}

impl ParameterKind {
    /// Parse a declared kind string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "string" => Some(Self::Text),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "item_id" => Some(Self::ItemId),
            _ => None,
        }
    }

    /// The declared name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "string",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::ItemId => "item_id",
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ParameterKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A single parsed parameter declaration.
///
/// Serializes back to the declaration shape scripts write, so tooling (form
/// generators, editors) can round-trip a schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDef {
    /// Value kind.
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    /// Explicit default; kind-specific zero otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Inclusive lower bound for numeric kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Display step for numeric kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    /// Enumerated allowed values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,
    /// Element kind for sequences.
    #[serde(rename = "itemType", skip_serializing_if = "Option::is_none")]
    pub item_kind: Option<ParameterKind>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Display group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Sibling-key -> expected-value map gating visibility.
    #[serde(rename = "dependsOn", skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Map<String, Value>>,
}

/// Normalise a declaration: a bare kind string becomes `{ "type": kind }`,
/// an object passes through unchanged.
#[must_use]
pub fn normalize(spec: &Value) -> Value {
    match spec {
        Value::String(kind) => {
            let mut obj = Map::new();
            obj.insert("type".to_string(), Value::String(kind.clone()));
            Value::Object(obj)
        }
        other => other.clone(),
    }
}

impl ParameterDef {
    /// Parse a declaration for `key`, accepting the bare-string shorthand.
    ///
    /// Returns the parsed definition plus any non-fatal warnings; malformed
    /// declarations produce an error message naming the key.
    pub fn from_value(key: &str, spec: &Value) -> std::result::Result<(Self, Vec<String>), String> {
        let normalized = normalize(spec);
        let obj = normalized
            .as_object()
            .ok_or_else(|| format!("Parameter '{key}' must be a kind string or an object"))?;

        let kind_str = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("Parameter '{key}' is missing a type"))?;
        let kind = ParameterKind::parse(kind_str)
            .ok_or_else(|| format!("Unknown parameter type '{kind_str}' for '{key}'"))?;

        let number = |field: &str| -> std::result::Result<Option<f64>, String> {
            match obj.get(field) {
                None => Ok(None),
                Some(v) => v
                    .as_f64()
                    .map(Some)
                    .ok_or_else(|| format!("Parameter '{key}' has a non-numeric {field}")),
            }
        };

        let min = number("min")?;
        let max = number("max")?;
        let step = number("step")?;
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(format!(
                    "Invalid range for '{key}': min {lo} is greater than max {hi}"
                ));
            }
        }

        let mut warnings = Vec::new();
        let options = match obj.get("options") {
            None => None,
            Some(Value::Array(items)) => {
                if items.len() > OPTIONS_WARN_THRESHOLD {
                    warnings.push(format!(
                        "Parameter '{key}' declares {} options; consider a different input shape",
                        items.len()
                    ));
                }
                Some(items.clone())
            }
            Some(_) => return Err(format!("Parameter '{key}' options must be an array")),
        };

        let item_kind = match obj.get("itemType").and_then(Value::as_str) {
            None => None,
            Some(s) => Some(
                ParameterKind::parse(s)
                    .ok_or_else(|| format!("Unknown item type '{s}' for '{key}'"))?,
            ),
        };

        let depends_on = match obj.get("dependsOn") {
            None => None,
            Some(Value::Object(map)) => Some(map.clone()),
            Some(_) => return Err(format!("Parameter '{key}' dependsOn must be an object")),
        };

        Ok((
            Self {
                kind,
                default: obj.get("default").cloned(),
                min,
                max,
                step,
                options,
                item_kind,
                description: obj.get("description").and_then(Value::as_str).map(String::from),
                group: obj.get("group").and_then(Value::as_str).map(String::from),
                depends_on,
            },
            warnings,
        ))
    }

    /// The value used when the caller omits this parameter: the explicit
    /// default, else the kind-specific zero.
    #[must_use]
    pub fn default_value(&self) -> Value {
        if let Some(v) = &self.default {
            return v.clone();
        }
        match self.kind {
            ParameterKind::Int => Value::from(0),
            ParameterKind::Float => Value::from(0.0),
            ParameterKind::Text => Value::String(String::new()),
            ParameterKind::Boolean => Value::Bool(false),
            ParameterKind::Object => Value::Object(Map::new()),
            ParameterKind::Array => Value::Array(Vec::new()),
            ParameterKind::ItemId => Value::String(ITEM_ID_DEFAULT.to_string()),
        }
    }
}

/// The name of a JSON value's kind, for error messages.
#[must_use]
pub fn observed_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_namespaced_id(s: &str) -> bool {
    let Some((namespace, path)) = s.split_once(':') else {
        return false;
    };
    !namespace.is_empty()
        && !path.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_-.".contains(c))
        && path
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_-./".contains(c))
}

fn kind_matches(value: &Value, kind: ParameterKind) -> bool {
    match kind {
        ParameterKind::Int => value.as_f64().is_some_and(|n| n.fract() == 0.0),
        ParameterKind::Float => value.is_number(),
        ParameterKind::Text => value.is_string(),
        ParameterKind::Boolean => value.is_boolean(),
        ParameterKind::Object => value.is_object(),
        ParameterKind::Array => value.is_array(),
        ParameterKind::ItemId => value.as_str().is_some_and(is_namespaced_id),
    }
}

/// Validate a single value against its declaration.
///
/// Failures carry the offending key and the observed kind.
pub fn validate_value(value: &Value, def: &ParameterDef, key: &str) -> Result<()> {
    if !kind_matches(value, def.kind) {
        return Err(Error::Input(format!(
            "Invalid value for '{key}': expected {}, got {}",
            def.kind.as_str(),
            observed_kind(value)
        )));
    }

    if matches!(def.kind, ParameterKind::Int | ParameterKind::Float) {
        // serde_json numbers are always finite; only the bounds need checks.
        let n = value.as_f64().unwrap_or_default();
        if let Some(min) = def.min {
            if n < min {
                return Err(Error::Input(format!(
                    "Value {n} for '{key}' is below the minimum {min}"
                )));
            }
        }
        if let Some(max) = def.max {
            if n > max {
                return Err(Error::Input(format!(
                    "Value {n} for '{key}' is above the maximum {max}"
                )));
            }
        }
    }

    if let Some(options) = &def.options {
        if !options.contains(value) {
            return Err(Error::Input(format!(
                "Value for '{key}' is not one of the allowed options"
            )));
        }
    }

    if def.kind == ParameterKind::Array {
        if let (Some(item_kind), Some(items)) = (def.item_kind, value.as_array()) {
            for (index, item) in items.iter().enumerate() {
                if !kind_matches(item, item_kind) {
                    return Err(Error::Input(format!(
                        "Invalid element {index} in '{key}': expected {}, got {}",
                        item_kind.as_str(),
                        observed_kind(item)
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Whether a parameter is visible given the current input map: every
/// `dependsOn` key must be present with a strictly-equal value.
#[must_use]
pub fn is_visible(def: &ParameterDef, inputs: &Map<String, Value>) -> bool {
    match &def.depends_on {
        None => true,
        Some(conditions) => conditions
            .iter()
            .all(|(key, expected)| inputs.get(key) == Some(expected)),
    }
}

/// Copy `inputs`, inserting [`ParameterDef::default_value`] for every absent
/// key. Present keys keep their value, including explicit `false`, `0`, `""`
/// and `null`.
///
/// The engine's call path uses [`prepare_inputs`] instead, which fills only
/// declared defaults so that required inputs can still be reported missing.
#[must_use]
pub fn apply_defaults(
    inputs: &Map<String, Value>,
    schema: &IndexMap<String, ParameterDef>,
) -> Map<String, Value> {
    let mut out = inputs.clone();
    for (key, def) in schema {
        if !out.contains_key(key) {
            out.insert(key.clone(), def.default_value());
        }
    }
    out
}

/// Partition schema keys by display group, preserving declaration order.
#[must_use]
pub fn group_parameters(schema: &IndexMap<String, ParameterDef>) -> IndexMap<String, Vec<String>> {
    let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
    for (key, def) in schema {
        let group = def.group.clone().unwrap_or_else(|| "default".to_string());
        groups.entry(group).or_default().push(key.clone());
    }
    groups
}

/// Apply defaults, evaluate visibility and validate: the map actually passed
/// to an entry function.
///
/// The result contains exactly the visible schema keys; a visible key with
/// neither a value nor a default is a missing required input.
pub fn prepare_inputs(
    inputs: &Map<String, Value>,
    schema: &IndexMap<String, ParameterDef>,
) -> Result<Map<String, Value>> {
    let full = fill_declared_defaults(inputs, schema);

    let mut validated = Map::new();
    for (key, def) in schema {
        if !is_visible(def, &full) {
            continue;
        }
        match full.get(key) {
            None => {
                return Err(Error::Input(format!("Missing required input: {key}")));
            }
            Some(value) => {
                validate_value(value, def, key)?;
                validated.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(validated)
}

/// Visible required keys absent from `inputs`, in declaration order.
///
/// Used by the strict pre-check of the convenience facade.
#[must_use]
pub fn missing_required(
    inputs: &Map<String, Value>,
    schema: &IndexMap<String, ParameterDef>,
) -> Vec<String> {
    let full = fill_declared_defaults(inputs, schema);
    schema
        .iter()
        .filter(|(key, def)| {
            def.default.is_none() && is_visible(def, &full) && !inputs.contains_key(*key)
        })
        .map(|(key, _)| key.clone())
        .collect()
}

/// Copy `inputs`, filling in only declared defaults; keys without one stay
/// absent so required-input checks can see them.
fn fill_declared_defaults(
    inputs: &Map<String, Value>,
    schema: &IndexMap<String, ParameterDef>,
) -> Map<String, Value> {
    let mut out = inputs.clone();
    for (key, def) in schema {
        if !out.contains_key(key) {
            if let Some(default) = &def.default {
                out.insert(key.clone(), default.clone());
            }
        }
    }
    out
}

/// A parsed IO schema: ordered input and output declarations plus the raw
/// object they came from.
#[derive(Debug, Clone)]
pub struct IoSchema {
    /// Input declarations in source order.
    pub inputs: IndexMap<String, ParameterDef>,
    /// Output declarations in source order.
    pub outputs: IndexMap<String, ParameterDef>,
    /// The io object as written.
    pub raw: Value,
}

/// Walk an `io` object and parse it into an [`IoSchema`].
///
/// Fatal problems (absent or non-object `inputs`/`outputs`, unknown kinds,
/// inverted ranges) land in `errors`; size advisories land in `warnings`.
#[must_use]
pub fn parse_io_schema(value: &Value) -> (Option<IoSchema>, Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(root) = value.as_object() else {
        errors.push("io must be an object".to_string());
        return (None, errors, warnings);
    };

    let mut parse_side = |side: &str| -> IndexMap<String, ParameterDef> {
        let mut parsed = IndexMap::new();
        match root.get(side) {
            Some(Value::Object(map)) => {
                for (key, spec) in map {
                    match ParameterDef::from_value(key, spec) {
                        Ok((def, mut warns)) => {
                            warnings.append(&mut warns);
                            parsed.insert(key.clone(), def);
                        }
                        Err(message) => errors.push(format!("io.{side}: {message}")),
                    }
                }
            }
            Some(_) => errors.push(format!("io.{side} must be an object")),
            None => errors.push(format!("io is missing an {side} object")),
        }
        parsed
    };

    let inputs = parse_side("inputs");
    let outputs = parse_side("outputs");

    if errors.is_empty() {
        (
            Some(IoSchema {
                inputs,
                outputs,
                raw: value.clone(),
            }),
            errors,
            warnings,
        )
    } else {
        (None, errors, warnings)
    }
}
