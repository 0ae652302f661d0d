use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::ProviderError;
use crate::model::{ProviderId, StreamOptions};
use crate::provider::{CompletionRequest, ProviderAdapter, ProviderStreamHandle};
use crate::stream::{EventStream, ReasoningData, StreamEvent, Usage};

/// Enforces the event protocol on top of whatever an adapter produced:
///
/// - empty text/reasoning deltas are dropped,
/// - buffered reasoning without an explicit end is closed with a synthesized
///   `ReasoningDone` before the next `Text` or the terminal event,
/// - usage reports are merged and emitted once, right before the terminal,
/// - nothing passes after the first terminal event.
#[derive(Debug, Default)]
pub(crate) struct EventSequencer {
    reasoning: String,
    usage: Option<Usage>,
    terminated: bool,
}

impl EventSequencer {
    pub(crate) fn push(&mut self, event: StreamEvent) -> Vec<StreamEvent> {
        if self.terminated {
            debug!(?event, "dropping event after terminal");
            return Vec::new();
        }
        match event {
            StreamEvent::Text(text) => {
                if text.is_empty() {
                    return Vec::new();
                }
                let mut out = self.close_reasoning();
                out.push(StreamEvent::Text(text));
                out
            }
            StreamEvent::Reasoning(text) => {
                if text.is_empty() {
                    return Vec::new();
                }
                self.reasoning.push_str(&text);
                vec![StreamEvent::Reasoning(text)]
            }
            StreamEvent::ReasoningDone(data) => {
                self.reasoning.clear();
                if data.is_empty() {
                    Vec::new()
                } else {
                    vec![StreamEvent::ReasoningDone(data)]
                }
            }
            StreamEvent::Annotations(annotations) => {
                if annotations.is_empty() {
                    Vec::new()
                } else {
                    vec![StreamEvent::Annotations(annotations)]
                }
            }
            StreamEvent::Usage(usage) => {
                self.usage.get_or_insert_with(Usage::default).merge(usage);
                Vec::new()
            }
            terminal @ (StreamEvent::End | StreamEvent::Error(_) | StreamEvent::ToolCalls(_)) => {
                let mut out = self.close_reasoning();
                if let Some(usage) = self.usage.take() {
                    out.push(StreamEvent::Usage(usage));
                }
                out.push(terminal);
                self.terminated = true;
                out
            }
        }
    }

    /// Called when the adapter stream is exhausted.
    pub(crate) fn finish(&mut self, provider: &ProviderId) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.push(StreamEvent::Error(ProviderError::protocol(
            provider.clone(),
            "stream ended without a terminal event",
        )))
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn close_reasoning(&mut self) -> Vec<StreamEvent> {
        if self.reasoning.is_empty() {
            return Vec::new();
        }
        vec![StreamEvent::ReasoningDone(ReasoningData {
            text: std::mem::take(&mut self.reasoning),
            signature: String::new(),
        })]
    }
}

/// Starts one provider invocation at tool-cycle `depth`.
///
/// At `depth >= options.max_tool_depth` the provider is not called and the
/// returned stream holds a single `Error(DepthExceeded)`. Otherwise a producer
/// task is spawned that owns the only sender and closes the channel right
/// after the terminal event.
pub fn stream_completion(
    provider: Arc<dyn ProviderAdapter>,
    request: CompletionRequest,
    depth: usize,
    options: &StreamOptions,
) -> EventStream {
    if depth >= options.max_tool_depth {
        warn!(provider = %provider.id(), depth, max_depth = options.max_tool_depth, "tool call depth exhausted");
        return EventStream::from_events(vec![StreamEvent::Error(
            ProviderError::DepthExceeded {
                max_depth: options.max_tool_depth,
            },
        )]);
    }

    let (tx, rx) = mpsc::channel(options.stream_buffer_capacity.max(1));
    tokio::spawn(async move {
        let provider_id = provider.id();
        info!(provider = %provider_id, model = %request.config.model, depth, "starting provider stream");
        match provider.start_stream(&request).await {
            Ok(handle) => pump(provider_id, handle, tx).await,
            Err(err) => {
                warn!(provider = %provider_id, error = %err, "provider stream failed to start");
                let _ = tx.send(StreamEvent::Error(err)).await;
            }
        }
    });
    EventStream::new(rx)
}

async fn pump(provider: ProviderId, mut handle: ProviderStreamHandle, tx: mpsc::Sender<StreamEvent>) {
    let mut sequencer = EventSequencer::default();
    loop {
        let next = match handle.stall_timeout {
            Some(window) => match tokio::time::timeout(window, handle.stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(provider = %provider, window_ms = window.as_millis() as u64, "provider stream stalled");
                    Some(Err(ProviderError::Stalled {
                        provider: provider.clone(),
                        after: window,
                    }))
                }
            },
            None => handle.stream.next().await,
        };

        let batch = match next {
            Some(Ok(events)) => events
                .into_iter()
                .flat_map(|event| sequencer.push(event))
                .collect::<Vec<_>>(),
            Some(Err(err)) => sequencer.push(StreamEvent::Error(err)),
            None => sequencer.finish(&provider),
        };

        for event in batch {
            if tx.send(event).await.is_err() {
                debug!(provider = %provider, "event receiver dropped; abandoning stream");
                return;
            }
        }
        if sequencer.is_terminated() {
            debug!(provider = %provider, "provider stream finished");
            // dropping `handle` here cancels the underlying transport
            return;
        }
    }
}
