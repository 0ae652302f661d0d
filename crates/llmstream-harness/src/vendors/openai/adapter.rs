use tracing::debug;

use crate::errors::{HarnessError, ProviderError};
use crate::model::ProviderId;
use crate::provider::{CompletionRequest, ProviderAdapter, ProviderStreamHandle};
use crate::transport::sse::SseDecoder;
use crate::transport::{response_bytes, translate_byte_stream};
use crate::vendors::{http_client, send_checked};

use super::chat::{self, ChatTranslator};
use super::config::OpenAiClientConfig;
use super::options::OpenAiApi;
use super::responses::{self, ResponsesTranslator};

const OPENAI_PROVIDER: &str = "openai";

/// Provider adapter for OpenAI streaming (Responses or Chat Completions).
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiClientConfig,
}

impl OpenAiProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: OpenAiClientConfig) -> Result<Self, HarnessError> {
        if config.api_key.trim().is_empty() {
            return Err(HarnessError::Config(
                "OpenAI client config api_key must not be empty".into(),
            ));
        }
        let client = http_client(config.timeout, "OpenAI")?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(OpenAiClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(OPENAI_PROVIDER)
    }

    async fn start_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        let provider_id = self.id();
        let effort = self.config.effort_for(&request.config.reasoning);
        let (url, body) = match self.config.api {
            OpenAiApi::ChatCompletions => (
                self.config.chat_completions_url(),
                chat::build_request_body(request, effort),
            ),
            OpenAiApi::Responses => (
                self.config.responses_url(),
                responses::build_request_body(request, effort, self.config.web_search),
            ),
        };
        debug!(model = %request.config.model, api = ?self.config.api, "starting OpenAI stream");

        let http_req = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&body);
        let response = send_checked(&provider_id, http_req).await?;
        let bytes = response_bytes(response);

        let stream = match self.config.api {
            OpenAiApi::ChatCompletions => translate_byte_stream(
                provider_id.clone(),
                bytes,
                SseDecoder::default(),
                ChatTranslator::new(provider_id),
            ),
            OpenAiApi::Responses => translate_byte_stream(
                provider_id.clone(),
                bytes,
                SseDecoder::default(),
                ResponsesTranslator::new(provider_id),
            ),
        };
        Ok(ProviderStreamHandle {
            stream,
            stall_timeout: self.config.stall_timeout,
        })
    }
}
