//! Environment-switching registry.

use super::ScriptRegistry;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Deployment environments a registry set can be partitioned by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    /// Local development.
    Development,
    /// Pre-production.
    Staging,
    /// Production.
    Production,
    /// Fallback when no environment-specific registry exists.
    Default,
}

impl Environment {
    /// Parse an environment tag; unknown tags map to [`Environment::Default`].
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            "staging" => Self::Staging,
            "production" | "prod" => Self::Production,
            _ => Self::Default,
        }
    }

    /// Read the `SCRIPTFLOW_ENV` process variable.
    #[must_use]
    pub fn from_process_env() -> Self {
        std::env::var("SCRIPTFLOW_ENV")
            .map(|tag| Self::parse(&tag))
            .unwrap_or(Self::Default)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Default => "default",
        }
    }
}

/// Dispatches resolution to the registry for the current environment,
/// falling back to the default registry. The environment is chosen from the
/// process environment at construction and may be switched at runtime.
pub struct EnvironmentScriptRegistry {
    registries: HashMap<Environment, Arc<dyn ScriptRegistry>>,
    current: RwLock<Environment>,
}

impl EnvironmentScriptRegistry {
    /// Registry dispatching on the process environment tag.
    #[must_use]
    pub fn new() -> Self {
        Self::with_environment(Environment::from_process_env())
    }

    /// Registry pinned to a specific starting environment.
    #[must_use]
    pub fn with_environment(environment: Environment) -> Self {
        Self {
            registries: HashMap::new(),
            current: RwLock::new(environment),
        }
    }

    /// Attach a registry for `environment`.
    #[must_use]
    pub fn with_registry(
        mut self,
        environment: Environment,
        registry: Arc<dyn ScriptRegistry>,
    ) -> Self {
        self.registries.insert(environment, registry);
        self
    }

    /// The environment currently dispatched to.
    #[must_use]
    pub fn environment(&self) -> Environment {
        *self.current.read()
    }

    /// Switch the dispatch environment.
    pub fn set_environment(&self, environment: Environment) {
        *self.current.write() = environment;
    }
}

impl Default for EnvironmentScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptRegistry for EnvironmentScriptRegistry {
    async fn resolve(&self, id: &str) -> Result<String> {
        let environment = self.environment();
        let registry = self
            .registries
            .get(&environment)
            .or_else(|| self.registries.get(&Environment::Default))
            .ok_or_else(|| {
                Error::Registry(format!(
                    "No registry configured for environment '{}'",
                    environment.as_str()
                ))
            })?;
        registry.resolve(id).await
    }
}
