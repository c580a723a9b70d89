//! Hosted (repository-style) registry.

use super::ScriptRegistry;
use crate::error::{Error, Result};
use async_trait::async_trait;
use url::Url;

/// A parsed `host:owner/repo/path[@branch]` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostedId {
    owner: String,
    repo: String,
    path: String,
    branch: String,
}

fn parse_hosted_id(host: &str, id: &str) -> Result<HostedId> {
    let (tag, rest) = id.split_once(':').ok_or_else(|| {
        Error::Registry(format!(
            "Invalid hosted script id '{id}': expected {host}:owner/repo/path[@branch]"
        ))
    })?;
    if tag != host {
        return Err(Error::Registry(format!(
            "Hosted script id '{id}' does not target host '{host}'"
        )));
    }

    let (path_part, branch) = match rest.rsplit_once('@') {
        Some((path, branch)) if !branch.is_empty() => (path, branch.to_string()),
        _ => (rest, "main".to_string()),
    };

    let mut segments = path_part.splitn(3, '/');
    let owner = segments.next().unwrap_or_default();
    let repo = segments.next().unwrap_or_default();
    let path = segments.next().unwrap_or_default();
    if owner.is_empty() || repo.is_empty() || path.is_empty() {
        return Err(Error::Registry(format!(
            "Invalid hosted script id '{id}': expected {host}:owner/repo/path[@branch]"
        )));
    }

    Ok(HostedId {
        owner: owner.to_string(),
        repo: repo.to_string(),
        path: path.to_string(),
        branch,
    })
}

/// Fetches scripts from a repository host (raw-content style URLs), with an
/// optional bearer token.
#[derive(Debug, Clone)]
pub struct HostedScriptRegistry {
    host: String,
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HostedScriptRegistry {
    /// Registry for ids tagged `host:`, fetched under `base_url`.
    pub fn new(host: &str, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Registry(format!("Invalid base URL '{base_url}': {e}")))?;
        Ok(Self {
            host: host.to_string(),
            base_url: base,
            token: None,
            client: reqwest::Client::new(),
        })
    }

    /// Attach a bearer token sent in the `Authorization` header.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url_for(&self, id: &str) -> Result<Url> {
        let parsed = parse_hosted_id(&self.host, id)?;
        self.base_url
            .join(&format!(
                "{}/{}/{}/{}",
                parsed.owner, parsed.repo, parsed.branch, parsed.path
            ))
            .map_err(|e| Error::Registry(format!("Cannot build URL for '{id}': {e}")))
    }
}

#[async_trait]
impl ScriptRegistry for HostedScriptRegistry {
    async fn resolve(&self, id: &str) -> Result<String> {
        let url = self.url_for(id)?;
        tracing::debug!(%url, "fetching hosted script");
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
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
