use base64::Engine as _;
use serde_json::{Value, json};
use tracing::debug;

use crate::conversation::{Role, Turn};
use crate::errors::{HarnessError, ProviderError};
use crate::model::ProviderId;
use crate::provider::{CompletionRequest, ProviderAdapter, ProviderStreamHandle};
use crate::transport::eventstream::EventStreamDecoder;
use crate::transport::{response_bytes, translate_byte_stream};
use crate::vendors::{http_client, send_checked, tool_result_content};

use super::config::BedrockClientConfig;
use super::translate::BedrockTranslator;

const BEDROCK_PROVIDER: &str = "bedrock";

/// Provider adapter for Bedrock's ConverseStream API.
///
/// Reasoning is not requested from this vendor; reasoning settings in the
/// generation config are ignored.
pub struct BedrockProvider {
    client: reqwest::Client,
    config: BedrockClientConfig,
}

impl BedrockProvider {
    pub fn new(config: BedrockClientConfig) -> Result<Self, HarnessError> {
        if config.bearer_token.trim().is_empty() {
            return Err(HarnessError::Config(
                "Bedrock client config bearer_token must not be empty".into(),
            ));
        }
        if config.region.trim().is_empty() {
            return Err(HarnessError::Config(
                "Bedrock client config region must not be empty".into(),
            ));
        }
        let client = http_client(config.timeout, "Bedrock")?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(BedrockClientConfig::from_env()?)
    }

    fn stream_url(&self, model: &str) -> Result<reqwest::Url, ProviderError> {
        let invalid = |detail: String| {
            ProviderError::provider(
                ProviderId::new(BEDROCK_PROVIDER),
                format!("invalid Bedrock endpoint: {detail}"),
                None,
            )
        };
        let mut url = reqwest::Url::parse(&self.config.endpoint()).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("endpoint cannot be a base".into()))?
            .pop_if_empty()
            .extend(["model", model, "converse-stream"]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for BedrockProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(BEDROCK_PROVIDER)
    }

    async fn start_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        let provider_id = self.id();
        let url = self.stream_url(&request.config.model)?;
        let body = build_request_body(request);
        debug!(model = %request.config.model, region = %self.config.region, "starting Bedrock converse stream");

        let http_req = self
            .client
            .post(url)
            .bearer_auth(&self.config.bearer_token)
            .header("accept", "application/vnd.amazon.eventstream")
            .json(&body);
        let response = send_checked(&provider_id, http_req).await?;

        Ok(ProviderStreamHandle {
            stream: translate_byte_stream(
                provider_id.clone(),
                response_bytes(response),
                EventStreamDecoder::default(),
                BedrockTranslator::new(provider_id),
            ),
            stall_timeout: None,
        })
    }
}

pub(crate) fn build_request_body(request: &CompletionRequest) -> Value {
    let config = &request.config;
    let mut inference = json!({ "maxTokens": config.max_tokens });
    if let Some(temperature) = config.temperature {
        inference["temperature"] = json!(temperature);
    }

    let mut body = json!({
        "messages": render_messages(request),
        "inferenceConfig": inference,
    });
    if let Some(system) = request.conversation.system_prompt() {
        body["system"] = json!([{ "text": system }]);
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "toolSpec": {
                        "name": tool.name,
                        "description": tool.description,
                        "inputSchema": { "json": tool.parameters },
                    }
                })
            })
            .collect();
        body["toolConfig"] = json!({ "tools": tools });
    }
    body
}

fn render_messages(request: &CompletionRequest) -> Vec<Value> {
    let mut messages: Vec<(&'static str, Vec<Value>)> = Vec::new();
    let mut push = |role: &'static str, blocks: Vec<Value>| {
        if blocks.is_empty() {
            return;
        }
        match messages.last_mut() {
            Some((last_role, content)) if *last_role == role => content.extend(blocks),
            _ => messages.push((role, blocks)),
        }
    };

    for turn in request.conversation.dialogue() {
        match turn.role {
            Role::User => push("user", user_blocks(turn)),
            Role::Assistant => {
                let mut blocks = Vec::new();
                if !turn.message.is_empty() {
                    blocks.push(json!({ "text": turn.message }));
                }
                if let Some(round) = &turn.tool_round {
                    blocks.extend(round.calls.iter().map(|call| {
                        json!({
                            "toolUse": {
                                "toolUseId": call.id,
                                "name": call.name,
                                "input": call.arguments,
                            }
                        })
                    }));
                }
                push("assistant", blocks);
                if let Some(round) = &turn.tool_round {
                    let results = round
                        .calls
                        .iter()
                        .map(|call| {
                            let (content, is_error) = tool_result_content(call);
                            json!({
                                "toolResult": {
                                    "toolUseId": call.id,
                                    "content": [{ "text": content }],
                                    "status": if is_error { "error" } else { "success" },
                                }
                            })
                        })
                        .collect();
                    push("user", results);
                }
            }
            Role::System => {}
        }
    }

    messages
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect()
}

fn user_blocks(turn: &Turn) -> Vec<Value> {
    let mut blocks = Vec::new();
    for file in &turn.files {
        if let Some(bytes) = file.image_bytes() {
            let format = file.mime_type.trim_start_matches("image/");
            blocks.push(json!({
                "image": {
                    "format": format,
                    "source": { "bytes": base64::engine::general_purpose::STANDARD.encode(bytes) },
                }
            }));
        } else if let Some(text) = file.inline_text() {
            blocks.push(json!({ "text": text }));
        }
    }
    if !turn.message.is_empty() {
        blocks.push(json!({ "text": turn.message }));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Attachment, Conversation, ToolDefinition, ToolRound};
    use crate::model::{GenerationConfig, StreamOptions};
    use crate::stream::{Terminal, ToolCall, ToolCallStatus};
    use crate::transport::eventstream::encode_message;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn body_uses_converse_shapes() {
        let mut call = ToolCall::pending("tu_1", "lookup", json!({"q": 1}));
        call.status = ToolCallStatus::Error;
        call.result = "boom".into();
        let mut req = CompletionRequest::new(
            Conversation::new()
                .with_turn(Turn::system("sys"))
                .with_turn(
                    Turn::user("describe").with_file(Attachment::image("a.png", "image/png", vec![1, 2])),
                ),
            GenerationConfig::new("anthropic.claude-3-haiku").temperature(0.5).reasoning(None),
        )
        .with_tools(vec![ToolDefinition::new("lookup", "d", json!({"type": "object"}))]);
        req.append_tool_round("checking", ToolRound { calls: vec![call], reasoning: None });

        let body = build_request_body(&req);
        assert_eq!(body["system"], json!([{ "text": "sys" }]));
        assert_eq!(body["inferenceConfig"], json!({ "maxTokens": 8192, "temperature": 0.5 }));
        assert_eq!(body["messages"][0]["content"][0]["image"]["format"], json!("png"));
        assert_eq!(body["messages"][1]["content"][1]["toolUse"]["toolUseId"], json!("tu_1"));
        assert_eq!(body["messages"][2]["content"][0]["toolResult"]["status"], json!("error"));
        assert_eq!(
            body["toolConfig"]["tools"][0]["toolSpec"]["inputSchema"]["json"],
            json!({"type": "object"})
        );
        assert!(body.get("additionalModelRequestFields").is_none());
    }

    #[tokio::test]
    async fn streams_event_stream_frames_from_a_mock_server() {
        let server = MockServer::start().await;
        let event = |kind: &str, payload: Value| {
            encode_message(
                &[(":message-type", "event"), (":event-type", kind)],
                payload.to_string().as_bytes(),
            )
        };
        let mut wire = event("messageStart", json!({"role": "assistant"}));
        wire.extend(event("contentBlockDelta", json!({"contentBlockIndex": 0, "delta": {"text": "Hola"}})));
        wire.extend(event("messageStop", json!({"stopReason": "end_turn"})));
        wire.extend(event("metadata", json!({"usage": {"inputTokens": 5, "outputTokens": 1}})));

        Mock::given(method("POST"))
            .and(path("/model/anthropic.claude-3-haiku-20240307-v1:0/converse-stream"))
            .and(header("authorization", "Bearer token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(wire, "application/vnd.amazon.eventstream"),
            )
            .mount(&server)
            .await;

        let provider = std::sync::Arc::new(
            BedrockProvider::new(BedrockClientConfig::new("token", "us-east-1").base_url(server.uri()))
                .unwrap(),
        );
        let collected = crate::pump::stream_completion(
            provider,
            CompletionRequest::new(
                Conversation::new().with_turn(Turn::user("hi")),
                GenerationConfig::new("anthropic.claude-3-haiku-20240307-v1:0"),
            ),
            0,
            &StreamOptions::default(),
        )
        .collect()
        .await;
        assert_eq!(collected.text, "Hola");
        assert_eq!(collected.terminal, Terminal::End);
        assert_eq!(collected.usage.map(|u| u.input_tokens), Some(5));
    }
}
