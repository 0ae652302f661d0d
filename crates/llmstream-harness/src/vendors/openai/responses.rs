//! Responses API event stream.

use std::collections::{BTreeMap, HashMap};

use base64::Engine as _;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::conversation::{Role, Turn};
use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::provider::CompletionRequest;
use crate::stream::{
    Annotation, AnnotationType, ReasoningData, StreamEvent, ToolCall, Usage,
};
use crate::transport::WireTranslator;
use crate::transport::sse::SseFrame;
use crate::vendors::{CitationNumbering, parse_tool_arguments, tool_result_content};

use super::options::OpenAiReasoningEffort;

#[derive(Debug, Default)]
struct PendingCall {
    call_id: String,
    name: String,
    arguments: String,
}

/// Reasoning summary text of one output item; parts are joined by a blank line.
#[derive(Debug, Default)]
struct SummaryBuffer {
    text: String,
    part_closed: bool,
}

pub(crate) struct ResponsesTranslator {
    provider: ProviderId,
    /// Bytes of answer text emitted so far.
    text_len: usize,
    /// Byte offset at which each `(output_index, content_index)` text part began.
    part_starts: HashMap<(u64, u64), usize>,
    pending_calls: BTreeMap<u64, PendingCall>,
    completed_calls: Vec<ToolCall>,
    reasoning: BTreeMap<u64, SummaryBuffer>,
    numbering: CitationNumbering,
    terminated: bool,
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or_default()
}

/// Byte offset of the `char_index`-th character of `text`.
fn char_to_byte(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(byte, _)| byte)
        .unwrap_or(text.len())
}

impl ResponsesTranslator {
    pub(crate) fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            text_len: 0,
            part_starts: HashMap::new(),
            pending_calls: BTreeMap::new(),
            completed_calls: Vec::new(),
            reasoning: BTreeMap::new(),
            numbering: CitationNumbering::default(),
            terminated: false,
        }
    }

    fn usage_event(response: &Value) -> Option<StreamEvent> {
        let usage = response.get("usage")?;
        Some(StreamEvent::Usage(Usage {
            input_tokens: u64_field(usage, "input_tokens"),
            output_tokens: u64_field(usage, "output_tokens"),
        }))
    }

    fn error_message(error: &Value) -> String {
        let message = str_field(error, "message").unwrap_or("unknown error");
        match str_field(error, "code") {
            Some(code) => format!("{code}: {message}"),
            None => message.to_string(),
        }
    }

    fn output_item_added(&mut self, value: &Value) {
        let Some(item) = value.get("item") else { return };
        let output_index = u64_field(value, "output_index");
        match str_field(item, "type") {
            Some("function_call") => {
                self.pending_calls.insert(
                    output_index,
                    PendingCall {
                        call_id: str_field(item, "call_id").unwrap_or_default().to_string(),
                        name: str_field(item, "name").unwrap_or_default().to_string(),
                        arguments: str_field(item, "arguments").unwrap_or_default().to_string(),
                    },
                );
            }
            Some("web_search_call") => {
                debug!(provider = %self.provider, output_index, "web search started");
            }
            _ => {}
        }
    }

    fn output_item_done(&mut self, value: &Value) -> Result<Vec<StreamEvent>, ProviderError> {
        let Some(item) = value.get("item") else {
            return Ok(Vec::new());
        };
        let output_index = u64_field(value, "output_index");
        match str_field(item, "type") {
            Some("function_call") => {
                let mut call = self.pending_calls.remove(&output_index).unwrap_or_default();
                if let Some(call_id) = str_field(item, "call_id") {
                    call.call_id = call_id.to_string();
                }
                if let Some(name) = str_field(item, "name") {
                    call.name = name.to_string();
                }
                if let Some(arguments) = str_field(item, "arguments") {
                    call.arguments = arguments.to_string();
                }
                let arguments = parse_tool_arguments(&self.provider, &call.name, &call.arguments)?;
                self.completed_calls
                    .push(ToolCall::pending(call.call_id, call.name, arguments));
                Ok(Vec::new())
            }
            Some("reasoning") => {
                let streamed = self
                    .reasoning
                    .remove(&output_index)
                    .map(|buffer| buffer.text)
                    .unwrap_or_default();
                let text = if streamed.is_empty() {
                    item.get("summary")
                        .and_then(Value::as_array)
                        .map(|parts| {
                            parts
                                .iter()
                                .filter_map(|part| str_field(part, "text"))
                                .collect::<Vec<_>>()
                                .join("\n\n")
                        })
                        .unwrap_or_default()
                } else {
                    streamed
                };
                let signature = str_field(item, "encrypted_content")
                    .unwrap_or_default()
                    .to_string();
                Ok(vec![StreamEvent::ReasoningDone(ReasoningData { text, signature })])
            }
            Some("web_search_call") => {
                debug!(provider = %self.provider, output_index, "web search finished");
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    fn content_part_done(&mut self, value: &Value) -> Vec<StreamEvent> {
        let Some(part) = value.get("part") else {
            return Vec::new();
        };
        if str_field(part, "type") != Some("output_text") {
            return Vec::new();
        }
        let key = (u64_field(value, "output_index"), u64_field(value, "content_index"));
        let text = str_field(part, "text").unwrap_or_default();
        let start = self
            .part_starts
            .remove(&key)
            .unwrap_or_else(|| self.text_len.saturating_sub(text.len()));

        let annotations: Vec<Annotation> = part
            .get("annotations")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|annotation| str_field(annotation, "type") == Some("url_citation"))
            .filter_map(|annotation| {
                let url = str_field(annotation, "url")?.to_string();
                let start_char = u64_field(annotation, "start_index") as usize;
                let end_char = u64_field(annotation, "end_index") as usize;
                let start_byte = char_to_byte(text, start_char);
                let end_byte = char_to_byte(text, end_char);
                Some(Annotation {
                    annotation_type: AnnotationType::UrlCitation,
                    start_index: start + start_byte,
                    end_index: start + end_byte,
                    display_index: self.numbering.display_index(&url),
                    title: str_field(annotation, "title").unwrap_or_default().to_string(),
                    cited_text: text.get(start_byte..end_byte).unwrap_or_default().to_string(),
                    url,
                })
            })
            .collect();
        if annotations.is_empty() {
            Vec::new()
        } else {
            vec![StreamEvent::Annotations(annotations)]
        }
    }

    fn terminal(&mut self) -> StreamEvent {
        self.terminated = true;
        if self.completed_calls.is_empty() {
            StreamEvent::End
        } else {
            StreamEvent::ToolCalls(std::mem::take(&mut self.completed_calls))
        }
    }

    fn handle(&mut self, kind: &str, value: &Value) -> Result<Vec<StreamEvent>, ProviderError> {
        match kind {
            "response.output_item.added" => {
                self.output_item_added(value);
                Ok(Vec::new())
            }
            "response.output_item.done" => self.output_item_done(value),
            "response.content_part.added" => {
                let is_text = value
                    .get("part")
                    .is_some_and(|part| str_field(part, "type") == Some("output_text"));
                if is_text {
                    let key = (u64_field(value, "output_index"), u64_field(value, "content_index"));
                    self.part_starts.insert(key, self.text_len);
                }
                Ok(Vec::new())
            }
            "response.content_part.done" => Ok(self.content_part_done(value)),
            "response.output_text.delta" => {
                let delta = str_field(value, "delta").unwrap_or_default();
                self.text_len += delta.len();
                Ok(vec![StreamEvent::Text(delta.to_string())])
            }
            "response.function_call_arguments.delta" => {
                let output_index = u64_field(value, "output_index");
                let delta = str_field(value, "delta").unwrap_or_default();
                self.pending_calls
                    .entry(output_index)
                    .or_default()
                    .arguments
                    .push_str(delta);
                Ok(Vec::new())
            }
            "response.function_call_arguments.done" => {
                if let Some(arguments) = str_field(value, "arguments") {
                    self.pending_calls
                        .entry(u64_field(value, "output_index"))
                        .or_default()
                        .arguments = arguments.to_string();
                }
                Ok(Vec::new())
            }
            "response.reasoning_summary_text.delta" => {
                let delta = str_field(value, "delta").unwrap_or_default();
                let buffer = self
                    .reasoning
                    .entry(u64_field(value, "output_index"))
                    .or_default();
                let piece = if buffer.part_closed && !buffer.text.is_empty() {
                    format!("\n\n{delta}")
                } else {
                    delta.to_string()
                };
                buffer.part_closed = false;
                buffer.text.push_str(&piece);
                Ok(vec![StreamEvent::Reasoning(piece)])
            }
            "response.reasoning_summary_text.done" => {
                self.reasoning
                    .entry(u64_field(value, "output_index"))
                    .or_default()
                    .part_closed = true;
                Ok(Vec::new())
            }
            "response.completed" => {
                let response = value.get("response").unwrap_or(value);
                let mut out: Vec<StreamEvent> = Self::usage_event(response).into_iter().collect();
                out.push(self.terminal());
                Ok(out)
            }
            "response.incomplete" => {
                let response = value.get("response").unwrap_or(value);
                let reason = response
                    .get("incomplete_details")
                    .and_then(|details| str_field(details, "reason"))
                    .unwrap_or("unknown");
                warn!(provider = %self.provider, reason = %reason, "response incomplete");
                let mut out: Vec<StreamEvent> = Self::usage_event(response).into_iter().collect();
                self.completed_calls.clear();
                out.push(self.terminal());
                Ok(out)
            }
            "response.failed" => {
                let response = value.get("response").unwrap_or(value);
                let message = response
                    .get("error")
                    .map(Self::error_message)
                    .unwrap_or_else(|| "response failed".to_string());
                Err(ProviderError::provider(self.provider.clone(), message, None))
            }
            "error" => Err(ProviderError::provider(
                self.provider.clone(),
                Self::error_message(value),
                None,
            )),
            "response.web_search_call.in_progress"
            | "response.web_search_call.searching"
            | "response.web_search_call.completed" => {
                debug!(provider = %self.provider, kind = %kind, "web search progress");
                Ok(Vec::new())
            }
            "response.created"
            | "response.in_progress"
            | "response.queued"
            | "response.output_text.done"
            | "response.output_text.annotation.added"
            | "response.reasoning_summary_part.added"
            | "response.reasoning_summary_part.done" => Ok(Vec::new()),
            other => {
                warn!(provider = %self.provider, kind = %other, "ignoring unknown stream event");
                Ok(Vec::new())
            }
        }
    }
}

impl WireTranslator for ResponsesTranslator {
    type Frame = SseFrame;

    fn translate(&mut self, frame: SseFrame) -> Result<Vec<StreamEvent>, ProviderError> {
        if self.terminated || frame.data.trim().is_empty() || frame.is_done_sentinel() {
            return Ok(Vec::new());
        }
        let value: Value = serde_json::from_str(&frame.data).map_err(|e| {
            ProviderError::accumulation(self.provider.clone(), format!("invalid SSE JSON frame: {e}"))
        })?;
        let Some(kind) = str_field(&value, "type").or(frame.event.as_deref()) else {
            return Ok(Vec::new());
        };
        let kind = kind.to_string();
        self.handle(&kind, &value)
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError> {
        Ok(Vec::new())
    }
}

pub(crate) fn build_request_body(
    request: &CompletionRequest,
    effort: Option<OpenAiReasoningEffort>,
    web_search: bool,
) -> Value {
    let config = &request.config;
    let mut body = json!({
        "model": config.model,
        "input": render_input(request),
        "stream": true,
        "store": false,
        "max_output_tokens": config.max_tokens,
    });

    match effort {
        Some(effort) => {
            body["reasoning"] = json!({ "effort": effort, "summary": "auto" });
            body["include"] = json!(["reasoning.encrypted_content"]);
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
                "type": "function",
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect();
    if web_search {
        tools.push(json!({ "type": "web_search_preview" }));
    }
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools);
    }
    body
}

fn render_input(request: &CompletionRequest) -> Vec<Value> {
    let mut input = Vec::new();
    if let Some(system) = request.conversation.system_prompt() {
        input.push(json!({ "role": "system", "content": system }));
    }
    for turn in request.conversation.dialogue() {
        match turn.role {
            Role::User => input.push(json!({ "role": "user", "content": user_parts(turn) })),
            Role::Assistant => {
                if let Some(reasoning) = turn.tool_round.as_ref().and_then(|r| r.reasoning.as_ref())
                    && !reasoning.signature.is_empty()
                {
                    let summary: Vec<Value> = if reasoning.text.is_empty() {
                        Vec::new()
                    } else {
                        vec![json!({ "type": "summary_text", "text": reasoning.text })]
                    };
                    input.push(json!({
                        "type": "reasoning",
                        "summary": summary,
                        "encrypted_content": reasoning.signature,
                    }));
                }
                if !turn.message.is_empty() {
                    input.push(json!({
                        "role": "assistant",
                        "content": [{ "type": "output_text", "text": turn.message }],
                    }));
                }
                if let Some(round) = &turn.tool_round {
                    for call in &round.calls {
                        input.push(json!({
                            "type": "function_call",
                            "call_id": call.id,
                            "name": call.name,
                            "arguments": call.arguments_json(),
                        }));
                    }
                    for call in &round.calls {
                        let (output, _) = tool_result_content(call);
                        input.push(json!({
                            "type": "function_call_output",
                            "call_id": call.id,
                            "output": output,
                        }));
                    }
                }
            }
            Role::System => {}
        }
    }
    input
}

fn user_parts(turn: &Turn) -> Vec<Value> {
    let mut parts = Vec::new();
    for file in &turn.files {
        if let Some(bytes) = file.image_bytes() {
            parts.push(json!({
                "type": "input_image",
                "image_url": format!(
                    "data:{};base64,{}",
                    file.mime_type,
                    base64::engine::general_purpose::STANDARD.encode(bytes)
                ),
            }));
        } else if let Some(text) = file.inline_text() {
            parts.push(json!({ "type": "input_text", "text": text }));
        }
    }
    if !turn.message.is_empty() {
        parts.push(json!({ "type": "input_text", "text": turn.message }));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Conversation, ToolRound};
    use crate::model::GenerationConfig;

    fn run(events: Vec<Value>) -> Result<Vec<StreamEvent>, ProviderError> {
        let mut translator = ResponsesTranslator::new(ProviderId::new("openai"));
        let mut out = Vec::new();
        for event in events {
            out.extend(translator.translate(SseFrame {
                event: event["type"].as_str().map(str::to_string),
                data: event.to_string(),
            })?);
        }
        out.extend(translator.finish()?);
        Ok(out)
    }

    #[test]
    fn text_with_url_citation_gets_byte_offsets() {
        let events = run(vec![
            json!({"type":"response.created","response":{}}),
            json!({"type":"response.output_item.added","output_index":0,"item":{"type":"message"}}),
            json!({"type":"response.content_part.added","output_index":0,"content_index":0,"part":{"type":"output_text","text":""}}),
            json!({"type":"response.output_text.delta","output_index":0,"content_index":0,"delta":"Intro. "}),
            json!({"type":"response.output_text.delta","output_index":0,"content_index":0,"delta":"Café facts."}),
            json!({"type":"response.content_part.done","output_index":0,"content_index":0,"part":{
                "type":"output_text",
                "text":"Intro. Café facts.",
                "annotations":[{"type":"url_citation","start_index":7,"end_index":18,"url":"https://cafe.example","title":"Cafe"}]
            }}),
            json!({"type":"response.completed","response":{"usage":{"input_tokens":10,"output_tokens":4}}}),
        ])
        .unwrap();
        let annotation = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::Annotations(a) => a.first().cloned(),
                _ => None,
            })
            .expect("annotation");
        assert_eq!(annotation.start_index, 7);
        // "Café facts." is 11 chars and 12 bytes
        assert_eq!(annotation.end_index, 19);
        assert_eq!(annotation.cited_text, "Café facts.");
        assert_eq!(annotation.display_index, 1);
        assert_eq!(
            &events[events.len() - 2..],
            &[
                StreamEvent::Usage(Usage { input_tokens: 10, output_tokens: 4 }),
                StreamEvent::End
            ]
        );
    }

    #[test]
    fn function_calls_and_reasoning_items() {
        let events = run(vec![
            json!({"type":"response.output_item.added","output_index":0,"item":{"type":"reasoning","id":"rs_1"}}),
            json!({"type":"response.reasoning_summary_text.delta","output_index":0,"summary_index":0,"delta":"Need the time."}),
            json!({"type":"response.output_item.done","output_index":0,"item":{"type":"reasoning","id":"rs_1","encrypted_content":"enc"}}),
            json!({"type":"response.output_item.added","output_index":1,"item":{"type":"function_call","call_id":"call_1","name":"current_time","arguments":""}}),
            json!({"type":"response.function_call_arguments.delta","output_index":1,"delta":"{\"tz\":"}),
            json!({"type":"response.function_call_arguments.delta","output_index":1,"delta":"\"UTC\"}"}),
            json!({"type":"response.function_call_arguments.done","output_index":1,"arguments":"{\"tz\":\"UTC\"}"}),
            json!({"type":"response.output_item.done","output_index":1,"item":{"type":"function_call","call_id":"call_1","name":"current_time"}}),
            json!({"type":"response.completed","response":{}}),
        ])
        .unwrap();
        assert_eq!(
            events,
            vec![
                StreamEvent::Reasoning("Need the time.".into()),
                StreamEvent::ReasoningDone(ReasoningData {
                    text: "Need the time.".into(),
                    signature: "enc".into(),
                }),
                StreamEvent::ToolCalls(vec![ToolCall::pending(
                    "call_1",
                    "current_time",
                    json!({"tz": "UTC"})
                )]),
            ]
        );
    }

    #[test]
    fn web_search_lifecycle_is_silent() {
        let events = run(vec![
            json!({"type":"response.output_item.added","output_index":0,"item":{"type":"web_search_call","id":"ws_1"}}),
            json!({"type":"response.web_search_call.in_progress","output_index":0}),
            json!({"type":"response.web_search_call.searching","output_index":0}),
            json!({"type":"response.web_search_call.completed","output_index":0}),
            json!({"type":"response.output_item.done","output_index":0,"item":{"type":"web_search_call","id":"ws_1"}}),
            json!({"type":"response.completed","response":{}}),
        ])
        .unwrap();
        assert_eq!(events, vec![StreamEvent::End]);
    }

    #[test]
    fn incomplete_ends_and_failed_errors() {
        let events = run(vec![
            json!({"type":"response.output_text.delta","delta":"cut"}),
            json!({"type":"response.incomplete","response":{"incomplete_details":{"reason":"max_output_tokens"}}}),
        ])
        .unwrap();
        assert_eq!(events, vec![StreamEvent::Text("cut".into()), StreamEvent::End]);

        let err = run(vec![json!({"type":"response.failed","response":{"error":{"code":"server_error","message":"boom"}}})])
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::provider(ProviderId::new("openai"), "server_error: boom", None)
        );

        let err = run(vec![json!({"type":"error","message":"bad key"})]).unwrap_err();
        assert!(matches!(err, ProviderError::Provider { .. }));
    }

    #[test]
    fn body_includes_reasoning_replay_and_function_outputs() {
        let mut call = ToolCall::pending("call_1", "current_time", json!({}));
        call.result = "12:00".into();
        let mut req = CompletionRequest::new(
            Conversation::new().with_turn(Turn::user("time?")),
            GenerationConfig::new("o4-mini").reasoning(None),
        );
        req.append_tool_round(
            "",
            ToolRound {
                calls: vec![call],
                reasoning: Some(ReasoningData { text: "think".into(), signature: "enc".into() }),
            },
        );
        let body = build_request_body(&req, Some(OpenAiReasoningEffort::Medium), true);
        let input = body["input"].as_array().unwrap();
        assert_eq!(input[0]["content"][0], json!({"type": "input_text", "text": "time?"}));
        assert_eq!(input[1]["type"], json!("reasoning"));
        assert_eq!(input[1]["encrypted_content"], json!("enc"));
        assert_eq!(input[2]["type"], json!("function_call"));
        assert_eq!(input[3], json!({"type": "function_call_output", "call_id": "call_1", "output": "12:00"}));
        assert_eq!(body["store"], json!(false));
        assert_eq!(body["reasoning"], json!({"effort": "medium", "summary": "auto"}));
        assert_eq!(body["include"], json!(["reasoning.encrypted_content"]));
        assert_eq!(body["tools"], json!([{"type": "web_search_preview"}]));
    }
}
