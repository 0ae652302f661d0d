use std::time::Duration;

use crate::errors::HarnessError;
use crate::vendors::env_non_empty;

/// Configuration for the Anthropic Messages API client.
#[derive(Clone, Debug)]
pub struct AnthropicClientConfig {
    /// Sent as `x-api-key`.
    pub api_key: String,
    /// Base URL, overridable for proxies or local test servers.
    pub base_url: String,
    /// HTTP timeout for the whole streaming request.
    pub timeout: Duration,
    /// Offers the `web_search_20250305` server tool to the model.
    pub web_search: bool,
}

impl AnthropicClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            timeout: Duration::from_secs(300),
            web_search: false,
        }
    }

    /// Builds a config from `ANTHROPIC_API_KEY` and optional `ANTHROPIC_BASE_URL`.
    pub fn from_env() -> Result<Self, HarnessError> {
        let api_key = env_non_empty("ANTHROPIC_API_KEY").ok_or_else(|| {
            HarnessError::Config("missing ANTHROPIC_API_KEY for Anthropic provider".into())
        })?;
        let mut config = Self::new(api_key);
        if let Some(base_url) = env_non_empty("ANTHROPIC_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub(crate) fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}
