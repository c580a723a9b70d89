//! Script registries.
//!
//! A registry resolves a script identifier to source text. Variants are
//! composable: a [`CompositeScriptRegistry`] tries children in order, a
//! [`CachedScriptRegistry`] wraps any other with a TTL-gated cache, and an
//! [`EnvironmentScriptRegistry`] dispatches by deployment environment.

use crate::error::Result;
use async_trait::async_trait;

mod cached;
mod composite;
mod environment;
mod fs;
mod hosted;
mod http;
mod memory;

pub use cached::{CachedScriptRegistry, RegistryCacheStats};
pub use composite::CompositeScriptRegistry;
pub use environment::{Environment, EnvironmentScriptRegistry};
pub use fs::FileScriptRegistry;
pub use hosted::HostedScriptRegistry;
pub use http::HttpScriptRegistry;
pub use memory::InMemoryScriptRegistry;

/// Resolves script identifiers to source text.
///
/// # Example
///
/// ```no_run
/// use scriptflow::registry::{InMemoryScriptRegistry, ScriptRegistry};
///
/// # async fn demo() -> scriptflow::Result<()> {
/// let registry = InMemoryScriptRegistry::new();
/// registry.register("helper", "export const io = { inputs: {}, outputs: {} }; ...");
/// let source = registry.resolve("helper").await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait ScriptRegistry: Send + Sync {
    /// Resolve `id` to source text, failing with a descriptive message.
    async fn resolve(&self, id: &str) -> Result<String>;
}
