use std::fmt;

use crate::errors::HarnessError;

/// Recursion bound of the tool resolution cycle.
pub const MAX_TOOL_DEPTH: usize = 10;

/// Stable identifier for a provider implementation (for example `anthropic`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Creates a provider id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the provider id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Reasoning ("thinking") toggle and optional explicit budget.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReasoningConfig {
    pub enabled: bool,
    /// Explicit token budget. Vendors that need one derive it from
    /// `max_tokens` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

/// Per-request generation parameters.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GenerationConfig {
    /// Provider-specific model name.
    pub model: String,
    /// Maximum output tokens.
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
}

impl GenerationConfig {
    /// Creates a config for `model` with an 8192 token output limit.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: 8192,
            temperature: None,
            reasoning: ReasoningConfig::default(),
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Enables reasoning, optionally with an explicit budget.
    pub fn reasoning(mut self, budget_tokens: Option<u32>) -> Self {
        self.reasoning = ReasoningConfig {
            enabled: true,
            budget_tokens,
        };
        self
    }
}

/// Stream plumbing options shared by every adapter.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StreamOptions {
    /// Bounded event buffer size used by the streaming channel.
    pub stream_buffer_capacity: usize,
    /// Depth at which the tool cycle stops re-invoking the provider.
    pub max_tool_depth: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            stream_buffer_capacity: 128,
            max_tool_depth: MAX_TOOL_DEPTH,
        }
    }
}

impl StreamOptions {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.stream_buffer_capacity == 0 {
            return Err(HarnessError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        if self.max_tool_depth == 0 {
            return Err(HarnessError::Validation(
                "max_tool_depth must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
