//! HTTP registry.

use super::ScriptRegistry;
use crate::error::{Error, Result};
use async_trait::async_trait;
use url::Url;

/// Fetches scripts over HTTP. Absolute URLs are fetched directly; other ids
/// are joined against the configured base URL. A relative id without a base
/// is rejected.
#[derive(Debug, Clone)]
pub struct HttpScriptRegistry {
    client: reqwest::Client,
    base_url: Option<Url>,
}

impl HttpScriptRegistry {
    /// Registry resolving absolute URLs only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: None,
        }
    }

    /// Registry resolving relative ids against `base_url`.
    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Registry(format!("Invalid base URL '{base_url}': {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: Some(base),
        })
    }

    fn url_for(&self, id: &str) -> Result<Url> {
        if id.starts_with("http://") || id.starts_with("https://") {
            return Url::parse(id)
                .map_err(|e| Error::Registry(format!("Invalid script URL '{id}': {e}")));
        }
        match &self.base_url {
            Some(base) => base
                .join(id)
                .map_err(|e| Error::Registry(format!("Cannot join '{id}' to base URL: {e}"))),
            None => Err(Error::Registry(format!(
                "Cannot resolve relative script id '{id}': no base URL configured"
            ))),
        }
    }
}

impl Default for HttpScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptRegistry for HttpScriptRegistry {
    async fn resolve(&self, id: &str) -> Result<String> {
        let url = self.url_for(id)?;
        tracing::debug!(%url, "fetching script over HTTP");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Registry(format!("Failed to fetch script '{id}': {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Registry(format!(
                "Failed to fetch script '{id}': {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Registry(format!("Failed to read script '{id}': {e}")))
    }
}
