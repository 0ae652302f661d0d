use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::conversation::ToolRound;
use crate::errors::{HarnessError, ProviderError};
use crate::harness::validate_request;
use crate::model::StreamOptions;
use crate::provider::{CompletionRequest, ProviderAdapter};
use crate::pump::stream_completion;
use crate::stream::{EventStream, ReasoningData, StreamEvent, ToolCall, ToolCallStatus, Usage};
use crate::vendors::CitationNumbering;

/// Outcome of resolving one tool call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolResolution {
    Success(String),
    Error(String),
    /// Declined (for example by the user). An empty reason gets a default message.
    Rejected(String),
}

impl ToolResolution {
    fn apply(self, call: &mut ToolCall) {
        let (status, result) = match self {
            Self::Success(result) => (ToolCallStatus::Success, result),
            Self::Error(result) => (ToolCallStatus::Error, result),
            Self::Rejected(result) => (ToolCallStatus::Rejected, result),
        };
        call.status = status;
        call.result = result;
    }
}

/// Executes tool calls requested by the model.
#[async_trait::async_trait]
pub trait ToolResolver: Send + Sync {
    async fn resolve(&self, call: &ToolCall) -> ToolResolution;
}

/// States of one tool resolution cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleState {
    Init,
    Streaming { depth: usize },
    ToolsPending { depth: usize, calls: Vec<ToolCall> },
    Done,
    Failed,
    Cancelled,
}

impl CycleState {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// Drives provider invocations until the model stops asking for tools.
///
/// Each `ToolCalls` terminal is resolved through the [`ToolResolver`], appended
/// to the conversation as a [`ToolRound`], and the provider is re-invoked one
/// level deeper. The outward stream carries every round's text and reasoning,
/// a single accumulated `Usage`, and exactly one final `End` or `Error`.
///
/// Annotations from later rounds are shifted to index the concatenated text of
/// all rounds, and citation numbers are shared across rounds.
#[derive(Clone)]
pub struct ToolCycle {
    provider: Arc<dyn ProviderAdapter>,
    resolver: Arc<dyn ToolResolver>,
    options: StreamOptions,
}

impl ToolCycle {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        resolver: Arc<dyn ToolResolver>,
        options: StreamOptions,
    ) -> Self {
        Self {
            provider,
            resolver,
            options,
        }
    }

    /// Starts the cycle at depth 0.
    pub fn run(&self, request: CompletionRequest) -> Result<EventStream, HarnessError> {
        validate_request(&request)?;
        Ok(self.spawn(request, 0))
    }

    /// Continues after an out-of-band resolved round produced at `depth`.
    pub fn resume(
        &self,
        mut request: CompletionRequest,
        text: impl Into<String>,
        round: ToolRound,
        depth: usize,
    ) -> Result<EventStream, HarnessError> {
        validate_request(&request)?;
        request.append_tool_round(text, round);
        Ok(self.spawn(request, depth + 1))
    }

    fn spawn(&self, request: CompletionRequest, depth: usize) -> EventStream {
        let (tx, rx) = mpsc::channel(self.options.stream_buffer_capacity.max(1));
        let cycle = self.clone();
        tokio::spawn(async move {
            let provider = cycle.provider.id();
            let final_state = cycle.drive(request, depth, tx).await;
            info!(provider = %provider, state = ?final_state, "tool cycle finished");
        });
        EventStream::new(rx)
    }

    async fn drive(
        &self,
        mut request: CompletionRequest,
        start_depth: usize,
        tx: mpsc::Sender<StreamEvent>,
    ) -> CycleState {
        let mut usage: Option<Usage> = None;
        let mut round_text = String::new();
        let mut round_reasoning: Option<ReasoningData> = None;
        let mut forwarded_len = 0usize;
        let mut numbering = CitationNumbering::default();
        let mut state = CycleState::Init;

        loop {
            debug!(state = ?state, "tool cycle state");
            state = match state {
                CycleState::Init => CycleState::Streaming { depth: start_depth },
                CycleState::Streaming { depth } => {
                    round_text.clear();
                    round_reasoning = None;
                    let round_offset = forwarded_len;
                    let mut stream = stream_completion(
                        self.provider.clone(),
                        request.clone(),
                        depth,
                        &self.options,
                    );
                    let mut next = None;
                    while next.is_none() {
                        let event = tokio::select! {
                            _ = tx.closed() => {
                                next = Some(CycleState::Cancelled);
                                break;
                            }
                            event = stream.next_event() => event,
                        };
                        let Some(event) = event else {
                            let error = ProviderError::protocol(
                                self.provider.id(),
                                "provider stream closed without a terminal event",
                            );
                            next = Some(finish(&tx, usage.take(), StreamEvent::Error(error), CycleState::Failed).await);
                            break;
                        };
                        match event {
                            StreamEvent::Usage(round) => {
                                usage.get_or_insert_with(Usage::default).accumulate(round);
                            }
                            StreamEvent::ToolCalls(calls) => {
                                next = Some(CycleState::ToolsPending { depth, calls });
                            }
                            StreamEvent::End => {
                                next = Some(finish(&tx, usage.take(), StreamEvent::End, CycleState::Done).await);
                            }
                            StreamEvent::Error(err) => {
                                next = Some(
                                    finish(&tx, usage.take(), StreamEvent::Error(err), CycleState::Failed).await,
                                );
                            }
                            other => {
                                let other = match other {
                                    StreamEvent::Text(text) => {
                                        round_text.push_str(&text);
                                        forwarded_len += text.len();
                                        StreamEvent::Text(text)
                                    }
                                    StreamEvent::ReasoningDone(data) => {
                                        round_reasoning = Some(data.clone());
                                        StreamEvent::ReasoningDone(data)
                                    }
                                    StreamEvent::Annotations(mut annotations) => {
                                        for annotation in &mut annotations {
                                            annotation.start_index += round_offset;
                                            annotation.end_index += round_offset;
                                            annotation.display_index = numbering.display_index(&annotation.url);
                                        }
                                        StreamEvent::Annotations(annotations)
                                    }
                                    other => other,
                                };
                                if tx.send(other).await.is_err() {
                                    next = Some(CycleState::Cancelled);
                                }
                            }
                        }
                    }
                    next.unwrap_or(CycleState::Cancelled)
                }
                CycleState::ToolsPending { depth, mut calls } => {
                    info!(depth, count = calls.len(), "resolving tool calls");
                    let mut cancelled = false;
                    for call in &mut calls {
                        let resolution = tokio::select! {
                            _ = tx.closed() => {
                                cancelled = true;
                                break;
                            }
                            resolution = self.resolver.resolve(call) => resolution,
                        };
                        debug!(tool = %call.name, id = %call.id, ?resolution, "tool call resolved");
                        resolution.apply(call);
                    }
                    if cancelled {
                        CycleState::Cancelled
                    } else {
                        request.append_tool_round(
                            std::mem::take(&mut round_text),
                            ToolRound {
                                calls,
                                reasoning: round_reasoning.take(),
                            },
                        );
                        CycleState::Streaming { depth: depth + 1 }
                    }
                }
                done @ (CycleState::Done | CycleState::Failed | CycleState::Cancelled) => {
                    if done == CycleState::Cancelled {
                        warn!("tool cycle cancelled: event receiver dropped");
                    }
                    return done;
                }
            };
        }
    }
}

/// Emits the accumulated usage (if any) and the final terminal event.
async fn finish(
    tx: &mpsc::Sender<StreamEvent>,
    usage: Option<Usage>,
    terminal: StreamEvent,
    state: CycleState,
) -> CycleState {
    if let Some(usage) = usage
        && tx.send(StreamEvent::Usage(usage)).await.is_err()
    {
        return CycleState::Cancelled;
    }
    if tx.send(terminal).await.is_err() {
        return CycleState::Cancelled;
    }
    state
}
