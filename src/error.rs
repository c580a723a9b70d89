//! Error types for the script engine.
//!
//! One variant per class of the engine's error taxonomy: shape and safety
//! errors abort planning, input errors abort a single call, resource errors
//! unwind through any active imports, registry errors abort only the
//! resolution that needed them, and user-code errors carry the script's own
//! message.

use thiserror::Error;

/// Result type for script engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while planning or executing a script.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Source text failed surface-level validation (shape, balance,
    /// dangerous patterns, IO schema well-formedness).
    #[error("Script validation failed: {0}")]
    Validation(String),

    /// The IO object or default function could not be extracted from the
    /// source text.
    #[error("Script introspection failed: {0}")]
    Introspection(String),

    /// An input value was missing, of the wrong kind, out of range, or not a
    /// member of its option list.
    #[error("Input validation failed: {0}")]
    Input(String),

    /// The entry function did not settle within the configured timeout.
    #[error("Script execution timeout after {0}ms")]
    Timeout(u64),

    /// Sampled memory growth exceeded the configured limit.
    #[error("Memory limit exceeded: {used_mb}MB used (limit: {limit_mb}MB)")]
    MemoryLimit {
        /// Observed growth over the monitor baseline, in MiB.
        used_mb: u64,
        /// Configured limit, in MiB.
        limit_mb: u64,
    },

    /// Too many scripts imported during a single top-level call.
    #[error("Import limit exceeded: {count} scripts (max: {max})")]
    ImportLimit {
        /// Imports performed so far in this call.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Import nesting went deeper than the configured bound.
    #[error("Recursion depth limit exceeded: {depth} (max: {max})")]
    RecursionLimit {
        /// Current nesting depth.
        depth: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The same source text was imported twice within one call.
    #[error("Recursive import detected: script content already imported in this execution")]
    RecursiveImport,

    /// A registry could not resolve a script identifier.
    #[error("{0}")]
    Registry(String),

    /// Planning failed; the engine cannot accept calls until a successful
    /// reload.
    #[error("Script initialization failed: {0}")]
    Initialization(String),

    /// The entry function (or an imported script) threw.
    #[error("Script execution failed: {0}")]
    Execution(String),

    /// Invalid engine or validator configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The taxonomy class this error belongs to.
    ///
    /// Shape and safety errors are fatal at planning time; input errors
    /// abort a single call; resource errors abort the enclosing call and
    /// unwind through active imports; registry errors abort only the
    /// resolution that needed them; user errors are whatever the script
    /// threw.
    #[must_use]
    pub fn taxonomy(&self) -> ErrorClass {
        match self {
            Error::Validation(_) | Error::Introspection(_) | Error::Initialization(_) => {
                ErrorClass::Shape
            }
            Error::Input(_) => ErrorClass::Input,
            Error::Timeout(_)
            | Error::MemoryLimit { .. }
            | Error::ImportLimit { .. }
            | Error::RecursionLimit { .. }
            | Error::RecursiveImport => ErrorClass::Resource,
            Error::Registry(_) => ErrorClass::Registry,
            Error::Execution(_) => ErrorClass::User,
            Error::Configuration(_) | Error::Io(_) | Error::Serialization(_) => ErrorClass::System,
        }
    }
}

/// Coarse classification of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Missing exports, invalid IO schema, introspection or planning
    /// failure.
    Shape,
    /// Missing, mistyped or out-of-range input values.
    Input,
    /// Timeout, memory, import-count, recursion-depth or recursive-content
    /// breach.
    Resource,
    /// Identifier resolution failure.
    Registry,
    /// An error raised by the script itself.
    User,
    /// Configuration, I/O or serialization trouble on the host side.
    System,
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = Error::Timeout(100);
        assert_eq!(err.to_string(), "Script execution timeout after 100ms");
    }

    #[test]
    fn test_limit_messages_name_observed_and_configured() {
        let err = Error::ImportLimit { count: 50, max: 50 };
        assert_eq!(err.to_string(), "Import limit exceeded: 50 scripts (max: 50)");

        let err = Error::RecursionLimit { depth: 10, max: 10 };
        assert_eq!(err.to_string(), "Recursion depth limit exceeded: 10 (max: 10)");
    }

    #[test]
    fn test_recursive_import_message() {
        assert_eq!(
            Error::RecursiveImport.to_string(),
            "Recursive import detected: script content already imported in this execution"
        );
    }

    #[test]
    fn test_taxonomy_classification() {
        assert_eq!(
            Error::Validation("x".into()).taxonomy(),
            ErrorClass::Shape
        );
        assert_eq!(Error::Input("x".into()).taxonomy(), ErrorClass::Input);
        assert_eq!(Error::Timeout(5).taxonomy(), ErrorClass::Resource);
        assert_eq!(Error::RecursiveImport.taxonomy(), ErrorClass::Resource);
        assert_eq!(Error::Registry("x".into()).taxonomy(), ErrorClass::Registry);
        assert_eq!(Error::Execution("x".into()).taxonomy(), ErrorClass::User);
        assert_eq!(
            Error::Configuration("x".into()).taxonomy(),
            ErrorClass::System
        );
    }
}
