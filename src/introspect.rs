//! Script introspection.
//!
//! Extracts the three facts the planner needs from a source text: the `io`
//! object (located by an anchored scan over canonical text and evaluated
//! through the embedded host), the default entry function, and the
//! identifiers named by textual `importScript("…")` call sites.

use crate::error::{Error, Result};
use crate::params::{self, IoSchema};
use crate::validator::{self, mask_strings, strip_comments};
use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::unwrap_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static DEFAULT_FN_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"export\s+default\s+(async\s+function\b)"));
static DEFAULT_ARROW_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"export\s+default\s+(async\b)"));
static IMPORT_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"importScript\s*\(\s*(?:"([^"]+)"|'([^']+)')\s*\)"#)
});

/// A fully introspected script. Immutable once produced.
#[derive(Debug, Clone)]
pub struct LoadedScript {
    /// Identifier the script is cached and reported under.
    pub id: String,
    /// Parsed IO schema.
    pub io: IoSchema,
    /// Declared dependency identifiers, in call-site order, deduplicated.
    pub deps: Vec<String>,
    /// The default entry function as written.
    pub entry: String,
    /// The full module source; the executor evaluates this so top-level
    /// helpers stay in scope.
    pub source: String,
}

/// Introspect `source` under `id`.
pub fn introspect(id: &str, source: &str) -> Result<LoadedScript> {
    let stripped = strip_comments(source);
    let canonical = mask_strings(&stripped);

    let io_text = validator::extract_io_text(source, &canonical)
        .ok_or_else(|| Error::Introspection("could not locate the io object".to_string()))?;
    let io_value = crate::host::eval_object_literal(&io_text)
        .map_err(|e| Error::Introspection(format!("io object evaluation failed: {e}")))?;
    let (schema, errors, _warnings) = params::parse_io_schema(&io_value);
    let io = schema.ok_or_else(|| Error::Introspection(errors.join("; ")))?;

    let entry = extract_entry_text(source, &canonical).ok_or_else(|| {
        Error::Introspection("could not locate the default entry function".to_string())
    })?;

    let deps = extract_dependencies(&stripped);

    Ok(LoadedScript {
        id: id.to_string(),
        io,
        deps,
        entry,
        source: source.to_string(),
    })
}

/// Declared dependencies: `importScript("…")` / `importScript('…')` call
/// sites in comment-stripped text, first occurrence wins.
#[must_use]
pub fn extract_dependencies(stripped: &str) -> Vec<String> {
    let mut deps = Vec::new();
    for capture in IMPORT_CALL_RE.captures_iter(stripped) {
        let id = capture
            .get(1)
            .or_else(|| capture.get(2))
            .map(|m| m.as_str().to_string());
        if let Some(id) = id {
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
    }
    deps
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'(') {
        return None;
    }
    let mut depth = 0usize;
    for (offset, byte) in bytes[open..].iter().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Slice the default export's function text out of `source`. Prefers the
/// regular async-function form, then falls back to an async arrow.
fn extract_entry_text(source: &str, canonical: &str) -> Option<String> {
    if let Some(caps) = DEFAULT_FN_RE.captures(canonical) {
        let start = caps.get(1)?.start();
        // Skip the parameter list before looking for the body: destructured
        // parameters carry their own braces.
        let params_open = canonical[start..].find('(')? + start;
        let params_close = matching_paren(canonical, params_open)?;
        let body_open = canonical[params_close..].find('{')? + params_close;
        let body_close = validator::matching_brace(canonical, body_open)?;
        return source.get(start..=body_close).map(str::to_string);
    }

    if let Some(caps) = DEFAULT_ARROW_RE.captures(canonical) {
        let start = caps.get(1)?.start();
        let arrow = canonical[start..].find("=>")? + start;
        let after = canonical[arrow + 2..]
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map(|(i, _)| arrow + 2 + i)?;
        if canonical.as_bytes().get(after) == Some(&b'{') {
            let body_close = validator::matching_brace(canonical, after)?;
            return source.get(start..=body_close).map(str::to_string);
        }
        // Expression-bodied arrow: take the rest of the statement.
        let end = canonical[after..]
            .find(';')
            .map_or(source.len(), |i| after + i);
        return source.get(start..end).map(|s| s.trim_end().to_string());
    }

    None
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
export const io = {
    inputs: {
        message: { type: "string", default: "Hello" },
        count: { type: "int", default: 1, min: 1, max: 5 }
    },
    outputs: { result: { type: "string" } }
};

function repeat(text, times) {
    return Array(times).fill(text).join(" ");
}

export default async function run(inputs, context) {
    const helper = await context.importScript("helper");
    const extra = await context.importScript('shared/extra');
    return { result: repeat(inputs.message, inputs.count) };
}
"#;

    #[test]
    fn test_introspection_extracts_everything() {
        let script = introspect("main", SOURCE).unwrap();
        assert_eq!(script.id, "main");
        assert_eq!(script.deps, vec!["helper".to_string(), "shared/extra".to_string()]);
        assert!(script.entry.starts_with("async function run"));
        assert!(script.entry.ends_with('}'));
        assert_eq!(script.io.inputs.len(), 2);
        assert_eq!(script.io.outputs.len(), 1);
    }

    #[test]
    fn test_introspection_is_deterministic() {
        let a = introspect("x", SOURCE).unwrap();
        let b = introspect("x", SOURCE).unwrap();
        assert_eq!(a.deps, b.deps);
        assert_eq!(a.io.raw, b.io.raw);
        assert_eq!(a.entry, b.entry);
    }

    #[test]
    fn test_arrow_entry_form() {
        let source = r#"
export const io = { inputs: {}, outputs: {} };
export default async (inputs, context) => {
    return {};
};
"#;
        let script = introspect("arrow", source).unwrap();
        assert!(script.entry.starts_with("async (inputs, context) =>"));
    }

    #[test]
    fn test_expression_arrow_entry() {
        let source = r#"
export const io = { inputs: {}, outputs: {} };
export default async (inputs, context) => ({ ok: true });
"#;
        let script = introspect("expr", source).unwrap();
        assert!(script.entry.contains("({ ok: true })"));
    }

    #[test]
    fn test_destructured_parameters() {
        let source = r#"
export const io = { inputs: { a: "int" }, outputs: {} };
export default async function run({ a }, context) {
    return {};
}
"#;
        let script = introspect("destructured", source).unwrap();
        assert!(script.entry.contains("{ a }"));
        assert!(script.entry.ends_with('}'));
    }

    #[test]
    fn test_commented_import_is_not_a_dependency() {
        let source = r#"
export const io = { inputs: {}, outputs: {} };
// const old = await context.importScript("legacy");
export default async function run(inputs, context) {
    return {};
}
"#;
        let script = introspect("no-deps", source).unwrap();
        assert!(script.deps.is_empty());
    }

    #[test]
    fn test_duplicate_imports_deduplicated() {
        let stripped = r#"importScript("a"); importScript('b'); importScript("a");"#;
        assert_eq!(
            extract_dependencies(stripped),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_missing_io_fails() {
        let err = introspect("bad", "export default async function run() { return {}; }")
            .unwrap_err();
        assert!(err.to_string().starts_with("Script introspection failed:"));
    }

    #[test]
    fn test_missing_entry_fails() {
        let err = introspect("bad", "export const io = { inputs: {}, outputs: {} };")
            .unwrap_err();
        assert!(err.to_string().contains("default entry function"));
    }

    #[test]
    fn test_invalid_io_schema_fails() {
        let source = r#"
export const io = { inputs: { n: { type: "vector" } }, outputs: {} };
export default async function run(inputs, context) { return {}; }
"#;
        let err = introspect("bad", source).unwrap_err();
        assert!(err.to_string().contains("vector"));
    }
}
