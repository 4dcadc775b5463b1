use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Method, RequestBuilder};
use url::Url;

use crate::error::{PaperwatchError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An HTTP client capped to an explicit set of hosts.
///
/// The allowlist is built from the endpoints the agent was configured with
/// (arXiv, the LLM provider, Notion), so a typo or a redirected base URL fails
/// loudly instead of leaking API keys to an unexpected host.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: Arc<HashSet<String>>,
}

/// Builder for [`SandboxClient`].
#[derive(Debug, Default)]
pub struct SandboxClientBuilder {
    allowlist: HashSet<String>,
    timeout: Option<Duration>,
}

impl SandboxClientBuilder {
    /// Allow requests to the host of `endpoint` (and its subdomains).
    pub fn allow_endpoint(mut self, endpoint: &str) -> Result<Self> {
        let host = host_of(endpoint)?;
        self.allowlist.insert(host);
        Ok(self)
    }

    /// Allow an exact hostname.
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowlist.insert(host.into().to_lowercase());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<SandboxClient> {
        let client = ClientBuilder::new()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .user_agent(crate::USER_AGENT)
            .build()?;

        tracing::debug!(hosts = ?self.allowlist, "HTTP sandbox allowlist");

        Ok(SandboxClient {
            client,
            allowlist: Arc::new(self.allowlist),
        })
    }
}

impl SandboxClient {
    pub fn builder() -> SandboxClientBuilder {
        SandboxClientBuilder::default()
    }

    /// Validates if a URL is permitted under the current allowlist.
    pub fn is_allowed(&self, url: &str) -> bool {
        match host_of(url) {
            Ok(host) => self.allowlist.iter().any(|allowed| {
                host == *allowed || host.ends_with(&format!(".{allowed}"))
            }),
            Err(_) => false,
        }
    }

    pub fn get(&self, url: &str) -> Result<RequestBuilder> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> Result<RequestBuilder> {
        self.request(Method::POST, url)
    }

    pub fn patch(&self, url: &str) -> Result<RequestBuilder> {
        self.request(Method::PATCH, url)
    }

    pub fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        if !self.is_allowed(url) {
            return Err(PaperwatchError::EgressBlocked {
                host: host_of(url).unwrap_or_else(|_| url.to_string()),
            });
        }
        Ok(self.client.request(method, url))
    }
}

fn host_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| PaperwatchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    parsed
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or_else(|| PaperwatchError::InvalidUrl {
            url: url.to_string(),
            reason: "URL has no host".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SandboxClient {
        SandboxClient::builder()
            .allow_endpoint("https://export.arxiv.org/api/query")
            .unwrap()
            .allow_endpoint("https://api.notion.com")
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_configured_hosts_are_allowed() {
        let c = client();
        assert!(c.is_allowed("https://export.arxiv.org/api/query?search_query=cat:cs.AI"));
        assert!(c.is_allowed("https://api.notion.com/v1/pages"));
    }

    #[test]
    fn test_subdomain_of_allowed_host() {
        let c = SandboxClient::builder().allow_host("notion.com").build().unwrap();
        assert!(c.is_allowed("https://api.notion.com/v1/pages"));
        assert!(!c.is_allowed("https://evilnotion.com/v1/pages"));
    }

    #[test]
    fn test_unlisted_host_is_blocked() {
        let c = client();
        assert!(!c.is_allowed("https://api.openai.com/v1/chat/completions"));
        let err = c.get("https://api.openai.com/v1/chat/completions").unwrap_err();
        assert!(matches!(err, PaperwatchError::EgressBlocked { ref host } if host == "api.openai.com"));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let err = SandboxClient::builder().allow_endpoint("not a url").unwrap_err();
        assert!(matches!(err, PaperwatchError::InvalidUrl { .. }));
    }
}
