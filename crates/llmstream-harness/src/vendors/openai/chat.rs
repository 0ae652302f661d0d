//! Chat Completions chunk stream.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::conversation::{Role, Turn};
use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::provider::CompletionRequest;
use crate::stream::{StreamEvent, ToolCall, Usage};
use crate::transport::WireTranslator;
use crate::transport::sse::SseFrame;
use crate::vendors::{parse_tool_arguments, tool_result_content};

use super::options::OpenAiReasoningEffort;

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<ChoiceDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

#[derive(Debug, Default)]
struct PendingTool {
    id: String,
    name: String,
    arguments: String,
}

pub(crate) struct ChatTranslator {
    provider: ProviderId,
    tools: BTreeMap<usize, PendingTool>,
    finish_reason: Option<String>,
    terminated: bool,
}

impl ChatTranslator {
    pub(crate) fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            tools: BTreeMap::new(),
            finish_reason: None,
            terminated: false,
        }
    }

    fn terminal(&mut self) -> Result<StreamEvent, ProviderError> {
        self.terminated = true;
        if self.finish_reason.as_deref() != Some("tool_calls") || self.tools.is_empty() {
            return Ok(StreamEvent::End);
        }
        let mut calls = Vec::with_capacity(self.tools.len());
        for (_, tool) in std::mem::take(&mut self.tools) {
            let arguments = parse_tool_arguments(&self.provider, &tool.name, &tool.arguments)?;
            // some compatible servers omit ids; the id must round-trip in the tool result
            let id = if tool.id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4().simple())
            } else {
                tool.id
            };
            calls.push(ToolCall::pending(id, tool.name, arguments));
        }
        Ok(StreamEvent::ToolCalls(calls))
    }
}

impl WireTranslator for ChatTranslator {
    type Frame = SseFrame;

    fn translate(&mut self, frame: SseFrame) -> Result<Vec<StreamEvent>, ProviderError> {
        if self.terminated || frame.data.trim().is_empty() {
            return Ok(Vec::new());
        }
        if frame.is_done_sentinel() {
            return Ok(vec![self.terminal()?]);
        }
        let chunk: Chunk = serde_json::from_str(&frame.data).map_err(|e| {
            ProviderError::accumulation(self.provider.clone(), format!("invalid chunk JSON: {e}"))
        })?;
        if let Some(error) = chunk.error {
            return Err(ProviderError::provider(self.provider.clone(), error.message, None));
        }

        let mut out = Vec::new();
        for choice in chunk.choices {
            let delta = choice.delta.unwrap_or_default();
            if let Some(reasoning) = delta.reasoning_content {
                out.push(StreamEvent::Reasoning(reasoning));
            }
            if let Some(content) = delta.content {
                out.push(StreamEvent::Text(content));
            }
            for call in delta.tool_calls {
                let pending = self.tools.entry(call.index).or_default();
                if let Some(id) = call.id {
                    pending.id = id;
                }
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        pending.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        pending.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                debug!(provider = %self.provider, finish_reason = %reason, "choice finished");
                self.finish_reason = Some(reason);
            }
        }
        if let Some(usage) = chunk.usage {
            out.push(StreamEvent::Usage(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            }));
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError> {
        if !self.terminated && self.finish_reason.is_some() {
            warn!(provider = %self.provider, "stream ended without [DONE]");
            return Ok(vec![self.terminal()?]);
        }
        Ok(Vec::new())
    }
}

pub(crate) fn build_request_body(
    request: &CompletionRequest,
    effort: Option<OpenAiReasoningEffort>,
) -> Value {
    let config = &request.config;
    let mut body = json!({
        "model": config.model,
        "stream": true,
        "stream_options": { "include_usage": true },
        "max_completion_tokens": config.max_tokens,
        "messages": render_messages(request),
    });
    match effort {
        Some(effort) => body["reasoning_effort"] = json!(effort),
        None => {
            if let Some(temperature) = config.temperature {
                body["temperature"] = json!(temperature);
            }
        }
    }
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
    }
    body
}

fn render_messages(request: &CompletionRequest) -> Vec<Value> {
    let mut messages = Vec::new();
    if let Some(system) = request.conversation.system_prompt() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for turn in request.conversation.dialogue() {
        match turn.role {
            Role::User => messages.push(json!({ "role": "user", "content": user_content(turn) })),
            Role::Assistant => {
                let mut message = json!({ "role": "assistant", "content": turn.message });
                if let Some(round) = &turn.tool_round {
                    if turn.message.is_empty() {
                        message["content"] = Value::Null;
                    }
                    message["tool_calls"] = round
                        .calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": { "name": call.name, "arguments": call.arguments_json() },
                            })
                        })
                        .collect();
                    messages.push(message);
                    for call in &round.calls {
                        let (content, _) = tool_result_content(call);
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": call.id,
                            "content": content,
                        }));
                    }
                } else {
                    messages.push(message);
                }
            }
            Role::System => {}
        }
    }
    messages
}

/// Plain string unless the turn carries images.
fn user_content(turn: &Turn) -> Value {
    let mut text_parts: Vec<String> = turn.files.iter().filter_map(|f| f.inline_text()).collect();
    if !turn.message.is_empty() {
        text_parts.push(turn.message.clone());
    }
    let text = text_parts.join("\n\n");

    let images: Vec<Value> = turn
        .files
        .iter()
        .filter_map(|file| {
            file.image_bytes().map(|bytes| {
                json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!(
                            "data:{};base64,{}",
                            file.mime_type,
                            base64::engine::general_purpose::STANDARD.encode(bytes)
                        ),
                    },
                })
            })
        })
        .collect();
    if images.is_empty() {
        return Value::String(text);
    }
    let mut parts = vec![json!({ "type": "text", "text": text })];
    parts.extend(images);
    Value::Array(parts)
}
