//! Surface-level script validation.
//!
//! The validator treats source as plain text: comments are stripped and
//! string bodies masked to spaces (both length-preserving, so byte offsets
//! keep lining up with the original), then shape, balance and
//! dangerous-pattern checks run over the canonical text. The IO declaration
//! is located with a balanced-brace scan and evaluated through the embedded
//! host. Validation is advisory; it does not prove absence of misbehaviour.

use crate::error::{Error, Result};
use crate::params;
use regex::Regex;
use std::sync::LazyLock;

const MAX_LINE_LEN: usize = 1000;
const MAX_NESTING_DEPTH: usize = 10;
const MAX_SOURCE_LEN: usize = 100_000;

/// Compile a pattern known valid at authoring time.
#[allow(clippy::unwrap_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static EXPORT_IO_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"export\s+const\s+io\s*="));
static EXPORT_DEFAULT_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"export\s+default\b"));
static OPTIONS_ARRAY_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"\boptions\s*:\s*\["));

/// Outcome of validating one source text.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// True when no errors were found.
    pub valid: bool,
    /// Fatal findings.
    pub errors: Vec<String>,
    /// Advisory findings.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
struct DangerousPattern {
    regex: Regex,
    message: String,
}

/// Surface-level safety and shape checker.
#[derive(Debug, Clone)]
pub struct ScriptValidator {
    patterns: Vec<DangerousPattern>,
}

impl Default for ScriptValidator {
    fn default() -> Self {
        let defaults: &[(&str, &str)] = &[
            (r"\beval\s*\(", "Dynamic code evaluation via eval() is not allowed"),
            (
                r"\bnew\s+Function\s*\(|\bFunction\s*\(",
                "Dynamic code construction via the Function constructor is not allowed",
            ),
            (
                r"\bsetTimeout\s*\([^)]*,\s*0\s*\)",
                "Zero-delay timers are not allowed",
            ),
            (r"\bsetInterval\s*\(", "Recurring timers are not allowed"),
            (
                r"\bXMLHttpRequest\b",
                "Synchronous HTTP via XMLHttpRequest is not allowed",
            ),
            (
                r"\brequire\s*\(",
                "Filesystem and module access via require() is not allowed",
            ),
            (
                r"(?m)^\s*import\s",
                "Static module imports are not allowed; use importScript",
            ),
            (r"__proto__", "Prototype manipulation via __proto__ is not allowed"),
            (
                r"\bObject\s*\.\s*setPrototypeOf\b",
                "Prototype manipulation via Object.setPrototypeOf is not allowed",
            ),
            (
                r"\b(?:for|while)\s*\([^)]{0,200}\b\d{6}",
                "Loop with an excessive literal bound is not allowed",
            ),
        ];
        let patterns = defaults
            .iter()
            .map(|(pattern, message)| DangerousPattern {
                regex: compile(pattern),
                message: (*message).to_string(),
            })
            .collect();
        Self { patterns }
    }
}

impl ScriptValidator {
    /// Validator with the standard pattern set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a custom dangerous pattern, keyed by `message`.
    pub fn add_pattern(&mut self, pattern: &str, message: &str) -> Result<()> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Configuration(format!("invalid dangerous pattern: {e}")))?;
        self.patterns.push(DangerousPattern {
            regex,
            message: message.to_string(),
        });
        Ok(())
    }

    /// Remove the pattern registered under `message`; reports whether one
    /// was present.
    pub fn remove_pattern(&mut self, message: &str) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.message != message);
        self.patterns.len() != before
    }

    /// Run every check over `source`.
    #[must_use]
    pub fn validate(&self, source: &str) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if source.trim().is_empty() {
            errors.push("Script source is empty".to_string());
            return ValidationReport {
                valid: false,
                errors,
                warnings,
            };
        }

        let stripped = strip_comments(source);
        let masked = mask_strings(&stripped);

        if !EXPORT_IO_RE.is_match(&masked) {
            errors.push(
                "Script must export an io declaration (export const io = { ... })".to_string(),
            );
        }
        if !EXPORT_DEFAULT_RE.is_match(&masked) {
            errors.push(
                "Script must export a default entry function (export default async ...)"
                    .to_string(),
            );
        }

        match terminal_state(source) {
            ScanState::Single | ScanState::Double | ScanState::Template => {
                errors.push("Unbalanced quotes in script source".to_string());
            }
            ScanState::Block => {
                errors.push("Unterminated block comment in script source".to_string());
            }
            _ => {}
        }

        let net = net_braces(&masked);
        if net > 0 {
            errors.push(format!("Unbalanced braces: {net} unclosed"));
        } else if net < 0 {
            errors.push(format!("Unbalanced braces: {} extra closing", -net));
        }

        for pattern in &self.patterns {
            if pattern.regex.is_match(&masked) {
                errors.push(pattern.message.clone());
            }
        }

        for (index, line) in masked.lines().enumerate() {
            // Only a line that is itself an options array is exempt; the
            // substring "options" appearing elsewhere does not count.
            if line.len() > MAX_LINE_LEN && !OPTIONS_ARRAY_RE.is_match(line) {
                warnings.push(format!("Line {} is over {MAX_LINE_LEN} characters", index + 1));
            }
        }
        let depth = max_nesting_depth(&masked);
        if depth > MAX_NESTING_DEPTH {
            warnings.push(format!("Deeply nested code (depth {depth})"));
        }
        if source.len() > MAX_SOURCE_LEN {
            warnings.push(format!(
                "Script is {} characters long; consider splitting it",
                source.len()
            ));
        }

        if EXPORT_IO_RE.is_match(&masked) && net == 0 {
            match extract_io_text(source, &masked) {
                Some(io_text) => match crate::host::eval_object_literal(&io_text) {
                    Ok(value) => {
                        let (_, mut io_errors, mut io_warnings) = params::parse_io_schema(&value);
                        errors.append(&mut io_errors);
                        warnings.append(&mut io_warnings);
                    }
                    Err(e) => errors.push(format!("io declaration could not be evaluated: {e}")),
                },
                None => {
                    errors.push("io declaration is not a well-formed object literal".to_string());
                }
            }
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    Line,
    Block,
    Single,
    Double,
    Template,
}

/// One pass of the string/comment state machine, emitting a rewritten copy.
///
/// `mask_comments` replaces comment characters with spaces; `mask_strings`
/// replaces string bodies (not their quotes) with spaces. Newlines always
/// survive and every replacement preserves byte length, so offsets into the
/// output are valid offsets into the input.
fn scan_rewrite(source: &str, mask_comments: bool, mask_strings: bool) -> String {
    let mut out = String::with_capacity(source.len());
    let mut state = ScanState::Code;
    let mut chars = source.char_indices().peekable();

    let push_masked = |out: &mut String, ch: char| {
        if ch == '\n' {
            out.push('\n');
        } else {
            for _ in 0..ch.len_utf8() {
                out.push(' ');
            }
        }
    };

    while let Some((_, ch)) = chars.next() {
        match state {
            ScanState::Code => match ch {
                '/' => match chars.peek() {
                    Some((_, '/')) => {
                        state = ScanState::Line;
                        chars.next();
                        if mask_comments {
                            out.push(' ');
                            out.push(' ');
                        } else {
                            out.push('/');
                            out.push('/');
                        }
                    }
                    Some((_, '*')) => {
                        state = ScanState::Block;
                        chars.next();
                        if mask_comments {
                            out.push(' ');
                            out.push(' ');
                        } else {
                            out.push('/');
                            out.push('*');
                        }
                    }
                    _ => out.push('/'),
                },
                '\'' => {
                    state = ScanState::Single;
                    out.push(ch);
                }
                '"' => {
                    state = ScanState::Double;
                    out.push(ch);
                }
                '`' => {
                    state = ScanState::Template;
                    out.push(ch);
                }
                _ => out.push(ch),
            },
            ScanState::Line => {
                if ch == '\n' {
                    state = ScanState::Code;
                    out.push('\n');
                } else if mask_comments {
                    push_masked(&mut out, ch);
                } else {
                    out.push(ch);
                }
            }
            ScanState::Block => {
                if ch == '*' && matches!(chars.peek(), Some((_, '/'))) {
                    chars.next();
                    state = ScanState::Code;
                    if mask_comments {
                        out.push(' ');
                        out.push(' ');
                    } else {
                        out.push('*');
                        out.push('/');
                    }
                } else if mask_comments {
                    push_masked(&mut out, ch);
                } else {
                    out.push(ch);
                }
            }
            ScanState::Single | ScanState::Double | ScanState::Template => {
                let closer = match state {
                    ScanState::Single => '\'',
                    ScanState::Double => '"',
                    _ => '`',
                };
                if ch == '\\' {
                    if mask_strings {
                        out.push(' ');
                        if let Some((_, escaped)) = chars.next() {
                            push_masked(&mut out, escaped);
                        }
                    } else {
                        out.push('\\');
                        if let Some((_, escaped)) = chars.next() {
                            out.push(escaped);
                        }
                    }
                } else if ch == closer {
                    state = ScanState::Code;
                    out.push(ch);
                } else if ch == '\n' && state != ScanState::Template {
                    // Unterminated single-line string; fall back to code so
                    // the rest of the file still gets scanned.
                    state = ScanState::Code;
                    out.push('\n');
                } else if mask_strings {
                    push_masked(&mut out, ch);
                } else {
                    out.push(ch);
                }
            }
        }
    }
    out
}

/// Replace line and block comments with spaces; strings are tracked but kept.
#[must_use]
pub fn strip_comments(source: &str) -> String {
    scan_rewrite(source, true, false)
}

/// Replace string and template-literal bodies with spaces; the delimiting
/// quotes remain and comments are tracked but kept.
#[must_use]
pub fn mask_strings(source: &str) -> String {
    scan_rewrite(source, false, true)
}

fn terminal_state(source: &str) -> ScanState {
    let mut state = ScanState::Code;
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        state = match state {
            ScanState::Code => match ch {
                '/' => match chars.peek() {
                    Some('/') => {
                        chars.next();
                        ScanState::Line
                    }
                    Some('*') => {
                        chars.next();
                        ScanState::Block
                    }
                    _ => ScanState::Code,
                },
                '\'' => ScanState::Single,
                '"' => ScanState::Double,
                '`' => ScanState::Template,
                _ => ScanState::Code,
            },
            ScanState::Line => {
                if ch == '\n' {
                    ScanState::Code
                } else {
                    ScanState::Line
                }
            }
            ScanState::Block => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    ScanState::Code
                } else {
                    ScanState::Block
                }
            }
            ScanState::Single | ScanState::Double | ScanState::Template => {
                let closer = match state {
                    ScanState::Single => '\'',
                    ScanState::Double => '"',
                    _ => '`',
                };
                if ch == '\\' {
                    chars.next();
                    state
                } else if ch == closer {
                    ScanState::Code
                } else {
                    state
                }
            }
        };
    }
    state
}

fn net_braces(masked: &str) -> i64 {
    let mut net = 0i64;
    for ch in masked.chars() {
        match ch {
            '{' => net += 1,
            '}' => net -= 1,
            _ => {}
        }
    }
    net
}

fn max_nesting_depth(masked: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    for ch in masked.chars() {
        match ch {
            '{' => {
                depth += 1;
                max = max.max(depth);
            }
            '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

/// Find the byte index of the brace matching the one at `open`, scanning
/// canonical (comment-stripped, string-masked) text.
pub(crate) fn matching_brace(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    for (offset, byte) in bytes[open..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
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

/// Slice the io object literal out of `source`, using `masked` (which must
/// be the canonical form of `source`) to find the balanced braces.
pub(crate) fn extract_io_text(source: &str, masked: &str) -> Option<String> {
    let m = EXPORT_IO_RE.find(masked)?;
    let open = masked[m.end()..].find('{')? + m.end();
    let close = matching_brace(masked, open)?;
    source.get(open..=close).map(str::to_string)
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
export const io = {
    inputs: { name: { type: "string", default: "World" } },
    outputs: { greeting: { type: "string" } }
};

export default async function run(inputs, context) {
    return { greeting: "Hello " + inputs.name };
}
"#;

    #[test]
    fn test_valid_script_passes() {
        let report = ScriptValidator::new().validate(VALID);
        assert!(report.valid, "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_empty_source_is_invalid() {
        let report = ScriptValidator::new().validate("   \n  ");
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Script source is empty".to_string()]);
    }

    #[test]
    fn test_missing_exports_reported() {
        let report = ScriptValidator::new().validate("const x = 1;");
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("io declaration")));
        assert!(report.errors.iter().any(|e| e.contains("default entry")));
    }

    #[test]
    fn test_masking_preserves_length_and_delimiters() {
        let source = "const s = \"a{b}c\"; // {comment}\nconst t = 'x';";
        let canonical = mask_strings(&strip_comments(source));
        assert_eq!(canonical.len(), source.len());
        // Braces inside the string and the comment are gone.
        assert_eq!(net_braces(&canonical), 0);
        // Quotes and code-level punctuation survive.
        assert_eq!(canonical.matches('"').count(), 2);
        assert!(canonical.contains("const s = "));
        assert!(canonical.contains(';'));
    }

    #[test]
    fn test_mask_then_strip_equals_strip_then_mask() {
        let source = "const s = \"//not a comment\"; /* 'not a string' */ let x = `y${1}`;";
        let a = mask_strings(&strip_comments(source));
        let b = strip_comments(&mask_strings(source));
        assert_eq!(a, b);
    }

    #[test]
    fn test_dangerous_pattern_in_string_is_ignored() {
        let source = format!("{VALID}\nconst hint = \"call eval(x) to break things\";");
        let report = ScriptValidator::new().validate(&source);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_eval_is_rejected() {
        let source = format!("{VALID}\nconst y = eval(\"1+1\");");
        let report = ScriptValidator::new().validate(&source);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("eval()")), "errors: {:?}", report.errors);
    }

    #[test]
    fn test_function_constructor_rejected() {
        let source = format!("{VALID}\nconst f = new Function(\"return 1\");");
        let report = ScriptValidator::new().validate(&source);
        assert!(report.errors.iter().any(|e| e.contains("Function constructor")));
    }

    #[test]
    fn test_timers_rejected() {
        let zero = format!("{VALID}\nsetTimeout(tick, 0);");
        assert!(!ScriptValidator::new().validate(&zero).valid);

        let recurring = format!("{VALID}\nsetInterval(tick, 50);");
        assert!(!ScriptValidator::new().validate(&recurring).valid);
    }

    #[test]
    fn test_require_and_static_import_rejected() {
        let require = format!("{VALID}\nconst fs = require('fs');");
        assert!(!ScriptValidator::new().validate(&require).valid);

        let import = format!("import fs from 'fs';\n{VALID}");
        assert!(!ScriptValidator::new().validate(&import).valid);
    }

    #[test]
    fn test_import_script_call_is_not_a_static_import() {
        let source = format!(
            "{VALID}\nasync function extra(context) {{ return context.importScript('helper'); }}"
        );
        let report = ScriptValidator::new().validate(&source);
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_prototype_manipulation_rejected() {
        let source = format!("{VALID}\nconst p = obj.__proto__;");
        assert!(!ScriptValidator::new().validate(&source).valid);

        let source = format!("{VALID}\nObject.setPrototypeOf(a, b);");
        assert!(!ScriptValidator::new().validate(&source).valid);
    }

    #[test]
    fn test_huge_loop_bound_rejected() {
        let source = format!("{VALID}\nfor (let i = 0; i < 1000000; i++) {{ work(i); }}");
        let report = ScriptValidator::new().validate(&source);
        assert!(report.errors.iter().any(|e| e.contains("literal bound")));

        let fine = format!("{VALID}\nfor (let i = 0; i < 99999; i++) {{ work(i); }}");
        assert!(ScriptValidator::new().validate(&fine).valid);
    }

    #[test]
    fn test_unbalanced_quotes_and_braces() {
        let quotes = "export const io = { inputs: {}, outputs: {} };\nexport default async () => { return \"unterminated };";
        let report = ScriptValidator::new().validate(quotes);
        assert!(report.errors.iter().any(|e| e.contains("quotes")));

        let braces = format!("{VALID}\nfunction broken() {{");
        let report = ScriptValidator::new().validate(&braces);
        assert!(report.errors.iter().any(|e| e.contains("braces")));
    }

    #[test]
    fn test_io_subvalidation_catches_bad_kind() {
        let source = r#"
export const io = {
    inputs: { n: { type: "quaternion" } },
    outputs: {}
};
export default async function run(inputs, context) { return {}; }
"#;
        let report = ScriptValidator::new().validate(source);
        assert!(
            report.errors.iter().any(|e| e.contains("quaternion")),
            "errors: {:?}",
            report.errors
        );
    }

    #[test]
    fn test_io_subvalidation_requires_inputs_and_outputs() {
        let source = r#"
export const io = { inputs: {} };
export default async function run(inputs, context) { return {}; }
"#;
        let report = ScriptValidator::new().validate(source);
        assert!(report.errors.iter().any(|e| e.contains("outputs")));
    }

    #[test]
    fn test_custom_pattern_roundtrip() {
        let mut validator = ScriptValidator::new();
        validator
            .add_pattern(r"\bforbiddenCall\s*\(", "forbiddenCall is not allowed")
            .unwrap();
        let source = format!("{VALID}\nforbiddenCall();");
        assert!(!validator.validate(&source).valid);

        assert!(validator.remove_pattern("forbiddenCall is not allowed"));
        assert!(validator.validate(&source).valid);
        assert!(!validator.remove_pattern("forbiddenCall is not allowed"));
    }

    #[test]
    fn test_invalid_custom_pattern_is_configuration_error() {
        let mut validator = ScriptValidator::new();
        assert!(validator.add_pattern("(unclosed", "bad").is_err());
    }

    #[test]
    fn test_long_line_warns_except_options() {
        let long = "x".repeat(1200);
        let source = format!("{VALID}\nconst data = \"{long}\";");
        let report = ScriptValidator::new().validate(&source);
        assert!(report.valid);
        assert!(!report.warnings.is_empty());

        let options: Vec<String> = (0..200).map(|i| format!("\"v{i}\"")).collect();
        let source = format!(
            "export const io = {{ inputs: {{ o: {{ type: \"string\", options: [{}] }} }}, outputs: {{}} }};\nexport default async function run(i, c) {{ return {{}}; }}",
            options.join(", ")
        );
        let report = ScriptValidator::new().validate(&source);
        assert!(
            !report.warnings.iter().any(|w| w.contains("characters")),
            "warnings: {:?}",
            report.warnings
        );

        // "options" as an unrelated substring does not buy an exemption.
        let long = "x".repeat(1200);
        let source = format!("{VALID}\nconst packed_options_data = \"{long}\";");
        let report = ScriptValidator::new().validate(&source);
        assert!(report.valid);
        assert!(
            report.warnings.iter().any(|w| w.contains("characters")),
            "warnings: {:?}",
            report.warnings
        );
    }

    #[test]
    fn test_extract_io_text_spans_nested_braces() {
        let masked = mask_strings(&strip_comments(VALID));
        let text = extract_io_text(VALID, &masked).unwrap();
        assert!(text.starts_with('{'));
        assert!(text.ends_with('}'));
        assert!(text.contains("inputs"));
        assert!(text.contains("outputs"));
    }
}
