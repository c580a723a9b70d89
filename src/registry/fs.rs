//! Filesystem registry.

use super::ScriptRegistry;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Reads scripts from files under a root directory. Identifiers are
/// restricted to `[A-Za-z0-9_.\-]` so they cannot traverse out of the root.
#[derive(Debug, Clone)]
pub struct FileScriptRegistry {
    root: PathBuf,
}

fn is_sane_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && id != "."
        && id != ".."
}

impl FileScriptRegistry {
    /// Registry rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if !is_sane_id(id) {
            return Err(Error::Registry(format!(
                "Invalid script id '{id}': only alphanumerics, '.', '_' and '-' are allowed"
            )));
        }
        let path = self.root.join(id);
        // The character filter already forbids separators; keep the
        // containment check as a hard stop.
        if !path.starts_with(&self.root) {
            return Err(Error::Registry(format!(
                "Script id '{id}' escapes the registry root"
            )));
        }
        Ok(path)
    }
}

#[async_trait]
impl ScriptRegistry for FileScriptRegistry {
    async fn resolve(&self, id: &str) -> Result<String> {
        let path = self.path_for(id)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Registry(format!("Failed to read script '{id}': {e}")))
    }
}
