use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;

use crate::errors::ProviderError;
use crate::sanitize::sanitize_json;

/// Lifecycle of a tool call. Adapters only ever produce `Pending`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Error,
    Success,
}

/// A model-requested invocation of an external function.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    /// Vendor-assigned id, opaque to this crate.
    pub id: String,
    pub name: String,
    /// Raw structured arguments, sanitized at construction.
    pub arguments: serde_json::Value,
    /// Resolver output; empty until resolved.
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub status: ToolCallStatus,
}

impl ToolCall {
    /// Creates an unresolved call with sanitized arguments.
    pub fn pending(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: sanitize_json(arguments),
            result: String::new(),
            status: ToolCallStatus::Pending,
        }
    }

    /// Arguments rendered as a compact JSON string (what vendors echo back).
    pub fn arguments_json(&self) -> String {
        self.arguments.to_string()
    }
}

/// Intermediate reasoning text plus the opaque signature some vendors require
/// to be replayed unmodified.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReasoningData {
    pub text: String,
    #[serde(default)]
    pub signature: String,
}

impl ReasoningData {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.signature.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationType {
    #[default]
    UrlCitation,
}

/// A citation over a byte range of the fully assembled response text.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Annotation {
    #[serde(rename = "type")]
    pub annotation_type: AnnotationType,
    pub start_index: usize,
    pub end_index: usize,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cited_text: String,
    /// 1-based citation number, shared by annotations pointing at the same url.
    pub display_index: usize,
}

/// Token accounting for one stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Folds a later partial report into this one; non-zero fields win.
    pub fn merge(&mut self, other: Usage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
    }

    /// Adds the counts of another round.
    pub fn accumulate(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Provider-agnostic stream event.
///
/// Exactly one of `End`, `Error`, `ToolCalls` terminates a stream and no event
/// follows it.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// Incremental answer text, in display order.
    Text(String),
    /// Incremental reasoning text.
    Reasoning(String),
    /// Reasoning finished; precedes the first answer text that follows it.
    ReasoningDone(ReasoningData),
    /// Terminal: the model requested tool calls (all `Pending`).
    ToolCalls(Vec<ToolCall>),
    Annotations(Vec<Annotation>),
    /// At most once, after content and before the terminal event.
    Usage(Usage),
    /// Terminal failure.
    Error(ProviderError),
    /// Terminal success.
    End,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::End | StreamEvent::Error(_) | StreamEvent::ToolCalls(_)
        )
    }
}

/// Receiving end of the event channel for one request.
///
/// The producer closes the channel right after its terminal event.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self { rx }
    }

    /// Builds an already-closed stream replaying `events`.
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // capacity covers every event
            let _ = tx.try_send(event);
        }
        Self { rx }
    }

    /// Creates a bounded stream fed by a caller-owned producer.
    ///
    /// The producer must send exactly one terminal event and then drop the
    /// sender.
    pub fn channel(capacity: usize) -> (mpsc::Sender<StreamEvent>, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Waits for the next event; `None` once the channel is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drains the stream into an aggregate.
    pub async fn collect(mut self) -> CollectedResponse {
        let mut collected = CollectedResponse::default();
        while let Some(event) = self.rx.recv().await {
            match event {
                StreamEvent::Text(text) => collected.text.push_str(&text),
                StreamEvent::Reasoning(text) => collected.reasoning_text.push_str(&text),
                StreamEvent::ReasoningDone(data) => collected.reasoning.push(data),
                StreamEvent::Annotations(annotations) => {
                    collected.annotations.extend(annotations)
                }
                StreamEvent::Usage(usage) => collected.usage = Some(usage),
                StreamEvent::ToolCalls(calls) => {
                    collected.terminal = Terminal::ToolCalls(calls);
                    break;
                }
                StreamEvent::Error(err) => {
                    collected.terminal = Terminal::Error(err);
                    break;
                }
                StreamEvent::End => {
                    collected.terminal = Terminal::End;
                    break;
                }
            }
        }
        collected
    }
}

impl futures::Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// How a collected stream ended.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Terminal {
    End,
    ToolCalls(Vec<ToolCall>),
    Error(ProviderError),
    /// The channel closed without a terminal event.
    #[default]
    Closed,
}

/// Aggregate of a fully drained [`EventStream`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectedResponse {
    pub text: String,
    /// Concatenated incremental reasoning deltas.
    pub reasoning_text: String,
    /// Completed reasoning segments, in order.
    pub reasoning: Vec<ReasoningData>,
    pub annotations: Vec<Annotation>,
    pub usage: Option<Usage>,
    pub terminal: Terminal,
}
