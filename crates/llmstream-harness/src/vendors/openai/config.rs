use std::time::Duration;

use crate::errors::HarnessError;
use crate::model::ReasoningConfig;
use crate::vendors::env_non_empty;

use super::options::{OpenAiApi, OpenAiReasoningEffort};

const DEFAULT_STALL_SECS: u64 = 30;

/// Configuration for the OpenAI provider client.
#[derive(Clone, Debug)]
pub struct OpenAiClientConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL for the OpenAI-compatible endpoint.
    ///
    /// Useful for proxies or local test servers.
    pub base_url: String,
    /// Default HTTP timeout for requests.
    pub timeout: Duration,
    pub api: OpenAiApi,
    /// Fails the stream when no chunk arrives within this window. `None` disables it.
    pub stall_timeout: Option<Duration>,
    /// Offers `web_search_preview` (Responses API only).
    pub web_search: bool,
    /// Effort used when reasoning is enabled without an explicit budget.
    pub reasoning_effort: OpenAiReasoningEffort,
}

impl OpenAiClientConfig {
    /// Creates a config with sensible defaults and a provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
            timeout: Duration::from_secs(300),
            api: OpenAiApi::default(),
            stall_timeout: Some(Duration::from_secs(DEFAULT_STALL_SECS)),
            web_search: false,
            reasoning_effort: OpenAiReasoningEffort::default(),
        }
    }

    /// Builds a config from `OPENAI_API_KEY`, optional `OPENAI_BASE_URL` and
    /// `OPENAI_STREAM_STALL_SECS` (`0` disables the stall watchdog).
    pub fn from_env() -> Result<Self, HarnessError> {
        let api_key = env_non_empty("OPENAI_API_KEY").ok_or_else(|| {
            HarnessError::Config("missing OPENAI_API_KEY for OpenAI provider".into())
        })?;
        let mut config = Self::new(api_key);
        if let Some(base_url) = env_non_empty("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(raw) = env_non_empty("OPENAI_STREAM_STALL_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                HarnessError::Config(format!("OPENAI_STREAM_STALL_SECS must be an integer, got {raw:?}"))
            })?;
            config = config.stall_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Overrides the API base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn api(mut self, api: OpenAiApi) -> Self {
        self.api = api;
        self
    }

    /// Sets the stall window; zero disables the watchdog.
    pub fn stall_timeout(mut self, window: Duration) -> Self {
        self.stall_timeout = (!window.is_zero()).then_some(window);
        self
    }

    pub fn web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub fn reasoning_effort(mut self, effort: OpenAiReasoningEffort) -> Self {
        self.reasoning_effort = effort;
        self
    }

    /// Effort to request for `reasoning`, if reasoning is enabled.
    pub(crate) fn effort_for(&self, reasoning: &ReasoningConfig) -> Option<OpenAiReasoningEffort> {
        if !reasoning.enabled {
            return None;
        }
        Some(
            reasoning
                .budget_tokens
                .map(OpenAiReasoningEffort::from_budget)
                .unwrap_or(self.reasoning_effort),
        )
    }

    pub(crate) fn responses_url(&self) -> String {
        format!("{}/v1/responses", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
