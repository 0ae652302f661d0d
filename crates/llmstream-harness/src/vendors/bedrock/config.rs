use std::time::Duration;

use crate::errors::HarnessError;
use crate::vendors::env_non_empty;

const DEFAULT_REGION: &str = "us-east-1";

/// Configuration for the Bedrock runtime client.
///
/// Authentication uses a Bedrock API key sent as a bearer token.
#[derive(Clone, Debug)]
pub struct BedrockClientConfig {
    pub bearer_token: String,
    pub region: String,
    /// Overrides the regional `bedrock-runtime` endpoint.
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl BedrockClientConfig {
    pub fn new(bearer_token: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bearer_token: bearer_token.into(),
            region: region.into(),
            base_url: None,
            timeout: Duration::from_secs(300),
        }
    }

    /// Reads `AWS_BEARER_TOKEN_BEDROCK`, `AWS_REGION` (default `us-east-1`) and
    /// optional `BEDROCK_BASE_URL`.
    pub fn from_env() -> Result<Self, HarnessError> {
        let token = env_non_empty("AWS_BEARER_TOKEN_BEDROCK").ok_or_else(|| {
            HarnessError::Config("missing AWS_BEARER_TOKEN_BEDROCK for Bedrock provider".into())
        })?;
        let region = env_non_empty("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut config = Self::new(token, region);
        config.base_url = env_non_empty("BEDROCK_BASE_URL");
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        match &self.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{}.amazonaws.com", self.region),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_to_regional_runtime() {
        let config = BedrockClientConfig::new("t", "eu-west-1");
        assert_eq!(config.endpoint(), "https://bedrock-runtime.eu-west-1.amazonaws.com");
        assert_eq!(config.base_url("http://localhost:9/").endpoint(), "http://localhost:9");
    }
}
