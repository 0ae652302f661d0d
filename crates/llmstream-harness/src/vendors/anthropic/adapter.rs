use base64::Engine as _;
use serde_json::{Value, json};
use tracing::debug;

use crate::conversation::{Role, Turn};
use crate::errors::{HarnessError, ProviderError};
use crate::model::{GenerationConfig, ProviderId};
use crate::provider::{CompletionRequest, ProviderAdapter, ProviderStreamHandle};
use crate::transport::sse::SseDecoder;
use crate::transport::{response_bytes, translate_byte_stream};
use crate::vendors::{http_client, send_checked, tool_result_content};

use super::config::AnthropicClientConfig;
use super::translate::AnthropicTranslator;

const ANTHROPIC_PROVIDER: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MIN_THINKING_BUDGET: u32 = 1024;
const MAX_DERIVED_THINKING_BUDGET: u32 = 8192;

/// Provider adapter for the Anthropic Messages API (streaming).
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicClientConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicClientConfig) -> Result<Self, HarnessError> {
        if config.api_key.trim().is_empty() {
            return Err(HarnessError::Config(
                "Anthropic client config api_key must not be empty".into(),
            ));
        }
        let client = http_client(config.timeout, "Anthropic")?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(AnthropicClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(ANTHROPIC_PROVIDER)
    }

    async fn start_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        let provider_id = self.id();
        let body = build_request_body(request, self.config.web_search);
        debug!(model = %request.config.model, turns = request.conversation.turns.len(), "starting Anthropic messages stream");

        let http_req = self
            .client
            .post(self.config.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let response = send_checked(&provider_id, http_req).await?;

        Ok(ProviderStreamHandle {
            stream: translate_byte_stream(
                provider_id.clone(),
                response_bytes(response),
                SseDecoder::default(),
                AnthropicTranslator::new(provider_id),
            ),
            stall_timeout: None,
        })
    }
}

/// Thinking budget, or `None` when reasoning is off or would not fit.
pub(crate) fn thinking_budget(config: &GenerationConfig) -> Option<u32> {
    if !config.reasoning.enabled {
        return None;
    }
    let budget = match config.reasoning.budget_tokens {
        Some(explicit) => explicit.max(MIN_THINKING_BUDGET),
        None => (config.max_tokens / 4).clamp(MIN_THINKING_BUDGET, MAX_DERIVED_THINKING_BUDGET),
    };
    (budget < config.max_tokens).then_some(budget)
}

pub(crate) fn build_request_body(request: &CompletionRequest, web_search: bool) -> Value {
    let config = &request.config;
    let mut body = json!({
        "model": config.model,
        "max_tokens": config.max_tokens,
        "stream": true,
        "messages": render_messages(request),
    });

    if let Some(system) = request.conversation.system_prompt() {
        body["system"] = json!(system);
    }

    match thinking_budget(config) {
        Some(budget) => {
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
        }
        None => {
            if let Some(temperature) = config.temperature {
                body["temperature"] = json!(temperature);
            }
        }
    }

    let mut tools: Vec<Value> = request
        .tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.parameters,
            })
        })
        .collect();
    if web_search {
        tools.push(json!({
            "type": "web_search_20250305",
            "name": "web_search",
            "max_uses": 5,
        }));
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools);
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
                push("assistant", assistant_blocks(turn));
                if let Some(round) = &turn.tool_round {
                    let results = round
                        .calls
                        .iter()
                        .map(|call| {
                            let (content, is_error) = tool_result_content(call);
                            json!({
                                "type": "tool_result",
                                "tool_use_id": call.id,
                                "content": content,
                                "is_error": is_error,
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
            blocks.push(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": file.mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                },
            }));
        } else if let Some(text) = file.inline_text() {
            blocks.push(json!({ "type": "text", "text": text }));
        }
    }
    if !turn.message.is_empty() {
        blocks.push(json!({ "type": "text", "text": turn.message }));
    }
    blocks
}

fn assistant_blocks(turn: &Turn) -> Vec<Value> {
    let mut blocks = Vec::new();
    if let Some(reasoning) = turn.tool_round.as_ref().and_then(|r| r.reasoning.as_ref()) {
        if reasoning.text.is_empty() && !reasoning.signature.is_empty() {
            blocks.push(json!({ "type": "redacted_thinking", "data": reasoning.signature }));
        } else if !reasoning.signature.is_empty() {
            blocks.push(json!({
                "type": "thinking",
                "thinking": reasoning.text,
                "signature": reasoning.signature,
            }));
        }
    }
    if !turn.message.is_empty() {
        blocks.push(json!({ "type": "text", "text": turn.message }));
    }
    if let Some(round) = &turn.tool_round {
        for call in &round.calls {
            blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.arguments,
            }));
        }
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Attachment, Conversation, ToolDefinition, ToolRound};
    use crate::stream::{ReasoningData, StreamEvent, ToolCall, ToolCallStatus};
    use crate::stream::Terminal;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(config: GenerationConfig) -> CompletionRequest {
        CompletionRequest::new(
            Conversation::new()
                .with_turn(Turn::system("Be terse."))
                .with_turn(Turn::user("hi")),
            config,
        )
    }

    #[test]
    fn thinking_budget_is_derived_and_clamped() {
        let base = GenerationConfig::new("claude").max_tokens(8192);
        assert_eq!(thinking_budget(&base), None);
        assert_eq!(thinking_budget(&base.clone().reasoning(None)), Some(2048));
        assert_eq!(
            thinking_budget(&GenerationConfig::new("claude").max_tokens(64_000).reasoning(None)),
            Some(8192)
        );
        assert_eq!(
            thinking_budget(&GenerationConfig::new("claude").max_tokens(2000).reasoning(None)),
            Some(1024)
        );
        // budget would not leave room for output
        assert_eq!(
            thinking_budget(&GenerationConfig::new("claude").max_tokens(1024).reasoning(None)),
            None
        );
        assert_eq!(thinking_budget(&base.reasoning(Some(10))), Some(1024));
    }

    #[test]
    fn temperature_is_omitted_when_thinking() {
        let body = build_request_body(
            &request(GenerationConfig::new("claude").temperature(0.2).reasoning(None)),
            false,
        );
        assert!(body.get("temperature").is_none());
        assert_eq!(body["thinking"]["budget_tokens"], json!(2048));
        assert_eq!(body["system"], json!("Be terse."));

        let body = build_request_body(&request(GenerationConfig::new("claude").temperature(0.5)), false);
        assert_eq!(body["temperature"], json!(0.5));
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn tool_rounds_replay_thinking_tool_use_and_results() {
        let mut call = ToolCall::pending("toolu_1", "lookup", json!({"q": "rust"}));
        call.result = "found".into();
        call.status = ToolCallStatus::Success;
        let mut req = CompletionRequest::new(
            Conversation::new().with_turn(
                Turn::user("look it up").with_file(Attachment::text("a.txt", "ctx")),
            ),
            GenerationConfig::new("claude"),
        )
        .with_tools(vec![ToolDefinition::new("lookup", "Look up", json!({"type": "object"}))]);
        req.append_tool_round(
            "",
            ToolRound {
                calls: vec![call],
                reasoning: Some(ReasoningData {
                    text: "need data".into(),
                    signature: "sig".into(),
                }),
            },
        );

        let body = build_request_body(&req, true);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["content"][0]["text"], json!("File: a.txt\nctx"));
        let assistant = messages[1]["content"].as_array().unwrap();
        assert_eq!(assistant[0]["type"], json!("thinking"));
        assert_eq!(assistant[1]["type"], json!("tool_use"));
        assert_eq!(assistant[1]["input"], json!({"q": "rust"}));
        assert_eq!(messages[2]["role"], json!("user"));
        assert_eq!(messages[2]["content"][0]["tool_use_id"], json!("toolu_1"));
        assert_eq!(messages[2]["content"][0]["is_error"], json!(false));

        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools[0]["input_schema"], json!({"type": "object"}));
        assert_eq!(tools[1]["type"], json!("web_search_20250305"));
    }

    #[test]
    fn consecutive_user_turns_are_merged() {
        let req = CompletionRequest::new(
            Conversation::new()
                .with_turn(Turn::user("one"))
                .with_turn(Turn::user("two")),
            GenerationConfig::new("claude"),
        );
        let body = build_request_body(&req, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["content"].as_array().unwrap().len(), 2);
    }

    fn sse(events: &[Value]) -> String {
        events
            .iter()
            .map(|e| format!("event: {}\ndata: {}\n\n", e["type"].as_str().unwrap_or(""), e))
            .collect()
    }

    #[tokio::test]
    async fn streams_text_from_a_mock_server() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"type":"message_start","message":{"usage":{"input_tokens":3,"output_tokens":0}}}),
            json!({"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}),
            json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}),
            json!({"type":"content_block_stop","index":0}),
            json!({"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}),
            json!({"type":"message_stop"}),
        ]);
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let provider = std::sync::Arc::new(
            AnthropicProvider::new(AnthropicClientConfig::new("test-key").base_url(server.uri()))
                .unwrap(),
        );
        let collected = crate::pump::stream_completion(
            provider,
            request(GenerationConfig::new("claude")),
            0,
            &crate::model::StreamOptions::default(),
        )
        .collect()
        .await;
        assert_eq!(collected.text, "Hello");
        assert_eq!(collected.usage.map(|u| (u.input_tokens, u.output_tokens)), Some((3, 2)));
        assert_eq!(collected.terminal, Terminal::End);
    }

    #[tokio::test]
    async fn http_errors_surface_as_provider_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;
        let provider = std::sync::Arc::new(
            AnthropicProvider::new(AnthropicClientConfig::new("k").base_url(server.uri())).unwrap(),
        );
        let mut stream = crate::pump::stream_completion(
            provider,
            request(GenerationConfig::new("claude")),
            0,
            &crate::model::StreamOptions::default(),
        );
        match stream.next_event().await {
            Some(StreamEvent::Error(ProviderError::Provider { status_code, .. })) => {
                assert_eq!(status_code, Some(529));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(stream.next_event().await.is_none());
    }
}
