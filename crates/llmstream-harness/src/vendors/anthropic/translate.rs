use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::stream::{Annotation, AnnotationType, ReasoningData, StreamEvent, ToolCall, Usage};
use crate::transport::WireTranslator;
use crate::transport::sse::SseFrame;
use crate::vendors::{CitationNumbering, parse_tool_arguments};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: MessageInfo,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
        #[serde(default)]
        citations: Option<Vec<WireCitation>>,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default)]
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    ServerToolUse,
    WebSearchToolResult,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    InputJsonDelta { partial_json: String },
    CitationsDelta { citation: WireCitation },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
struct WireCitation {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    cited_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    message: String,
}

/// What the block at a given index is, set on `content_block_start`.
#[derive(Debug)]
enum BlockState {
    Text {
        start: usize,
        citations: Vec<WireCitation>,
    },
    Thinking {
        text: String,
        signature: String,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: String,
    },
    /// Server tool blocks and unknown kinds: deltas are swallowed.
    Passthrough,
}

pub(crate) struct AnthropicTranslator {
    provider: ProviderId,
    blocks: BTreeMap<usize, BlockState>,
    /// Bytes of answer text emitted so far.
    text_len: usize,
    numbering: CitationNumbering,
    annotations: Vec<Annotation>,
    tool_calls: Vec<ToolCall>,
    stop_reason: Option<String>,
}

impl AnthropicTranslator {
    pub(crate) fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            blocks: BTreeMap::new(),
            text_len: 0,
            numbering: CitationNumbering::default(),
            annotations: Vec::new(),
            tool_calls: Vec::new(),
            stop_reason: None,
        }
    }

    fn handle(&mut self, event: WireEvent) -> Result<Vec<StreamEvent>, ProviderError> {
        match event {
            WireEvent::MessageStart { message } => Ok(message
                .usage
                .map(|usage| {
                    vec![StreamEvent::Usage(Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    })]
                })
                .unwrap_or_default()),
            WireEvent::ContentBlockStart {
                index,
                content_block,
            } => Ok(self.start_block(index, content_block)),
            WireEvent::ContentBlockDelta { index, delta } => Ok(self.apply_delta(index, delta)),
            WireEvent::ContentBlockStop { index } => self.stop_block(index),
            WireEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                Ok(usage
                    .map(|usage| {
                        vec![StreamEvent::Usage(Usage {
                            input_tokens: usage.input_tokens,
                            output_tokens: usage.output_tokens,
                        })]
                    })
                    .unwrap_or_default())
            }
            WireEvent::MessageStop => Ok(self.finish_message()),
            WireEvent::Ping => Ok(Vec::new()),
            WireEvent::Error { error } => {
                let message = match error.error_type {
                    Some(kind) => format!("{kind}: {}", error.message),
                    None => error.message,
                };
                Err(ProviderError::provider(self.provider.clone(), message, None))
            }
            WireEvent::Unknown => Ok(Vec::new()),
        }
    }

    fn start_block(&mut self, index: usize, block: ContentBlock) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        let state = match block {
            ContentBlock::Text { text, citations } => {
                let start = self.text_len;
                if !text.is_empty() {
                    self.text_len += text.len();
                    out.push(StreamEvent::Text(text));
                }
                BlockState::Text {
                    start,
                    citations: citations.unwrap_or_default(),
                }
            }
            ContentBlock::Thinking {
                thinking,
                signature,
            } => {
                if !thinking.is_empty() {
                    out.push(StreamEvent::Reasoning(thinking.clone()));
                }
                BlockState::Thinking {
                    text: thinking,
                    signature,
                }
            }
            ContentBlock::RedactedThinking { data } => BlockState::RedactedThinking { data },
            ContentBlock::ToolUse { id, name } => BlockState::ToolUse {
                id,
                name,
                input: String::new(),
            },
            ContentBlock::ServerToolUse | ContentBlock::WebSearchToolResult => {
                debug!(provider = %self.provider, index, "server tool block");
                BlockState::Passthrough
            }
            ContentBlock::Unknown => {
                warn!(provider = %self.provider, index, "ignoring unknown content block kind");
                BlockState::Passthrough
            }
        };
        self.blocks.insert(index, state);
        out
    }

    fn apply_delta(&mut self, index: usize, delta: Delta) -> Vec<StreamEvent> {
        let Some(block) = self.blocks.get_mut(&index) else {
            warn!(provider = %self.provider, index, "delta for unknown content block");
            return Vec::new();
        };
        match (block, delta) {
            (BlockState::Text { .. }, Delta::TextDelta { text }) => {
                self.text_len += text.len();
                vec![StreamEvent::Text(text)]
            }
            (BlockState::Text { citations, .. }, Delta::CitationsDelta { citation }) => {
                citations.push(citation);
                Vec::new()
            }
            (BlockState::Thinking { text, .. }, Delta::ThinkingDelta { thinking }) => {
                text.push_str(&thinking);
                vec![StreamEvent::Reasoning(thinking)]
            }
            (BlockState::Thinking { signature, .. }, Delta::SignatureDelta { signature: part }) => {
                signature.push_str(&part);
                Vec::new()
            }
            (BlockState::ToolUse { input, .. }, Delta::InputJsonDelta { partial_json }) => {
                input.push_str(&partial_json);
                Vec::new()
            }
            (BlockState::Passthrough, _) => Vec::new(),
            (block, delta) => {
                warn!(provider = %self.provider, index, ?block, ?delta, "delta does not match block kind");
                Vec::new()
            }
        }
    }

    fn stop_block(&mut self, index: usize) -> Result<Vec<StreamEvent>, ProviderError> {
        let Some(block) = self.blocks.remove(&index) else {
            return Ok(Vec::new());
        };
        match block {
            BlockState::Text { start, citations } => {
                for citation in citations {
                    let Some(url) = citation.url else { continue };
                    let display_index = self.numbering.display_index(&url);
                    self.annotations.push(Annotation {
                        annotation_type: AnnotationType::UrlCitation,
                        start_index: start,
                        end_index: self.text_len,
                        url,
                        title: citation.title.unwrap_or_default(),
                        cited_text: citation.cited_text.unwrap_or_default(),
                        display_index,
                    });
                }
                Ok(Vec::new())
            }
            BlockState::Thinking { text, signature } => {
                Ok(vec![StreamEvent::ReasoningDone(ReasoningData {
                    text,
                    signature,
                })])
            }
            BlockState::RedactedThinking { data } => {
                Ok(vec![StreamEvent::ReasoningDone(ReasoningData {
                    text: String::new(),
                    signature: data,
                })])
            }
            BlockState::ToolUse { id, name, input } => {
                let arguments = parse_tool_arguments(&self.provider, &name, &input)?;
                self.tool_calls.push(ToolCall::pending(id, name, arguments));
                Ok(Vec::new())
            }
            BlockState::Passthrough => Ok(Vec::new()),
        }
    }

    fn finish_message(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if !self.annotations.is_empty() {
            out.push(StreamEvent::Annotations(std::mem::take(
                &mut self.annotations,
            )));
        }
        let wants_tools = self.stop_reason.as_deref() == Some("tool_use");
        if wants_tools && !self.tool_calls.is_empty() {
            out.push(StreamEvent::ToolCalls(std::mem::take(&mut self.tool_calls)));
        } else {
            if !self.tool_calls.is_empty() {
                debug!(provider = %self.provider, stop_reason = ?self.stop_reason, "dropping tool calls without tool_use stop");
            }
            out.push(StreamEvent::End);
        }
        out
    }
}

impl WireTranslator for AnthropicTranslator {
    type Frame = SseFrame;

    fn translate(&mut self, frame: SseFrame) -> Result<Vec<StreamEvent>, ProviderError> {
        if frame.data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: serde_json::Value = serde_json::from_str(&frame.data).map_err(|e| {
            ProviderError::accumulation(self.provider.clone(), format!("invalid SSE JSON frame: {e}"))
        })?;
        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let event: WireEvent = serde_json::from_value(value).map_err(|e| {
            ProviderError::accumulation(
                self.provider.clone(),
                format!("malformed {kind} event: {e}"),
            )
        })?;
        if matches!(event, WireEvent::Unknown) {
            warn!(provider = %self.provider, kind = %kind, "ignoring unknown stream event");
        }
        self.handle(event)
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(translator: &mut AnthropicTranslator, events: Vec<serde_json::Value>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        for event in events {
            let frame = SseFrame {
                event: event["type"].as_str().map(str::to_string),
                data: event.to_string(),
            };
            out.extend(translator.translate(frame).expect("translate"));
        }
        out
    }

    fn translator() -> AnthropicTranslator {
        AnthropicTranslator::new(ProviderId::new("anthropic"))
    }

    #[test]
    fn text_stream_with_usage_ends() {
        let events = feed(
            &mut translator(),
            vec![
                json!({"type":"message_start","message":{"usage":{"input_tokens":12,"output_tokens":1}}}),
                json!({"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}),
                json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}),
                json!({"type":"ping"}),
                json!({"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}),
                json!({"type":"content_block_stop","index":0}),
                json!({"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":5}}),
                json!({"type":"message_stop"}),
            ],
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::Usage(Usage { input_tokens: 12, output_tokens: 1 }),
                StreamEvent::Text("Hel".into()),
                StreamEvent::Text("lo".into()),
                StreamEvent::Usage(Usage { input_tokens: 0, output_tokens: 5 }),
                StreamEvent::End,
            ]
        );
    }

    #[test]
    fn citation_spans_the_cited_text_block() {
        let mut t = translator();
        let events = feed(
            &mut t,
            vec![
                json!({"type":"content_block_start","index":0,"content_block":{"type":"server_tool_use","id":"srv_1","name":"web_search"}}),
                json!({"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"query\":\"x\"}"}}),
                json!({"type":"content_block_stop","index":0}),
                json!({"type":"content_block_start","index":1,"content_block":{"type":"web_search_tool_result","tool_use_id":"srv_1","content":[]}}),
                json!({"type":"content_block_stop","index":1}),
                json!({"type":"content_block_start","index":2,"content_block":{"type":"text","text":"","citations":[]}}),
                json!({"type":"content_block_delta","index":2,"delta":{"type":"citations_delta","citation":{"type":"web_search_result_location","url":"https://example.com/a","title":"A","cited_text":"first"}}}),
                json!({"type":"content_block_delta","index":2,"delta":{"type":"text_delta","text":"First paragraph with citation."}}),
                json!({"type":"content_block_stop","index":2}),
                json!({"type":"content_block_start","index":3,"content_block":{"type":"text","text":""}}),
                json!({"type":"content_block_delta","index":3,"delta":{"type":"text_delta","text":" More."}}),
                json!({"type":"content_block_stop","index":3}),
                json!({"type":"message_delta","delta":{"stop_reason":"end_turn"}}),
                json!({"type":"message_stop"}),
            ],
        );
        let annotations = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::Annotations(a) => Some(a.clone()),
                _ => None,
            })
            .expect("annotations");
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].start_index, 0);
        assert_eq!(annotations[0].end_index, 30);
        assert_eq!(annotations[0].url, "https://example.com/a");
        assert_eq!(annotations[0].display_index, 1);
        assert_eq!(events.last(), Some(&StreamEvent::End));
    }

    #[test]
    fn thinking_block_completes_with_signature() {
        let events = feed(
            &mut translator(),
            vec![
                json!({"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}),
                json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"let me "}}),
                json!({"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"think"}}),
                json!({"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"sig=="}}),
                json!({"type":"content_block_stop","index":0}),
                json!({"type":"content_block_start","index":1,"content_block":{"type":"redacted_thinking","data":"opaque"}}),
                json!({"type":"content_block_stop","index":1}),
            ],
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::Reasoning("let me ".into()),
                StreamEvent::Reasoning("think".into()),
                StreamEvent::ReasoningDone(ReasoningData {
                    text: "let me think".into(),
                    signature: "sig==".into(),
                }),
                StreamEvent::ReasoningDone(ReasoningData {
                    text: String::new(),
                    signature: "opaque".into(),
                }),
            ]
        );
    }

    #[test]
    fn tool_use_stop_reason_yields_tool_calls() {
        let events = feed(
            &mut translator(),
            vec![
                json!({"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"lookup","input":{}}}),
                json!({"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"q\":"}}),
                json!({"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"rust\"}"}}),
                json!({"type":"content_block_stop","index":0}),
                json!({"type":"message_delta","delta":{"stop_reason":"tool_use"}}),
                json!({"type":"message_stop"}),
            ],
        );
        assert_eq!(
            events,
            vec![StreamEvent::ToolCalls(vec![ToolCall::pending(
                "toolu_1",
                "lookup",
                json!({"q": "rust"})
            )])]
        );
    }

    #[test]
    fn error_event_fails_the_stream() {
        let mut t = translator();
        let frame = SseFrame {
            event: Some("error".into()),
            data: json!({"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}).to_string(),
        };
        let err = t.translate(frame).unwrap_err();
        assert_eq!(
            err,
            ProviderError::provider(ProviderId::new("anthropic"), "overloaded_error: Overloaded", None)
        );
    }

    #[test]
    fn unknown_event_kinds_are_ignored() {
        let events = feed(
            &mut translator(),
            vec![json!({"type":"brand_new_event","payload":1})],
        );
        assert!(events.is_empty());
    }

    #[test]
    fn broken_tool_arguments_are_an_accumulation_error() {
        let mut t = translator();
        feed(
            &mut t,
            vec![
                json!({"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t","name":"lookup"}}),
                json!({"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"q\""}}),
            ],
        );
        let frame = SseFrame {
            event: None,
            data: json!({"type":"content_block_stop","index":0}).to_string(),
        };
        assert!(matches!(
            t.translate(frame),
            Err(ProviderError::Accumulation { .. })
        ));
    }
}
