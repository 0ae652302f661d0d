use std::sync::Arc;

use llmstream_harness::{
    AbortHandle, AbortSignal, Annotation, EventStream, ProviderError, ReasoningData, StreamEvent,
    ToolCall,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::artifacts::{Artifact, ArtifactDetector, DetectorAction, extract_artifacts, remove_markers_mapped};
use crate::metering::UsageMeter;
use crate::notices::Notices;
use crate::notify::{ArtifactUpdate, ControlSignal, PostUpdate, ReasoningPhase, UpdateSink};
use crate::post::{
    PROP_ANNOTATIONS, PROP_ARTIFACTS, PROP_PENDING_TOOL_CALL, PROP_REASONING_SIGNATURE,
    PROP_REASONING_SUMMARY, Post,
};
use crate::registry::{RegistryError, StreamGuard, StreamRegistry};
use crate::store::{PostStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a stream into a post ended.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamStatus {
    Completed,
    /// The model asked for tools; the calls are stored as pending on the post.
    ToolCallsPending(Vec<ToolCall>),
    Failed(ProviderError),
    Cancelled,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StreamOutcome {
    /// The post as persisted.
    pub post: Post,
    pub status: StreamStatus,
}

/// Applies an [`EventStream`] to a post, publishing live updates and
/// persisting the result.
///
/// Only one stream may write to a given post at a time; the shared
/// [`StreamRegistry`] enforces this and lets other tasks cancel by post id.
#[derive(Clone)]
pub struct PostStreamer {
    store: Arc<dyn PostStore>,
    sink: Arc<dyn UpdateSink>,
    meter: Arc<dyn UsageMeter>,
    registry: StreamRegistry,
    notices: Notices,
}

impl PostStreamer {
    pub fn new(
        store: Arc<dyn PostStore>,
        sink: Arc<dyn UpdateSink>,
        meter: Arc<dyn UsageMeter>,
    ) -> Self {
        Self {
            store,
            sink,
            meter,
            registry: StreamRegistry::new(),
            notices: Notices::default(),
        }
    }

    pub fn with_notices(mut self, notices: Notices) -> Self {
        self.notices = notices;
        self
    }

    /// Shares an existing registry, e.g. between several streamers.
    pub fn with_registry(mut self, registry: StreamRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Requests cancellation of the stream writing to `post_id`.
    pub fn stop(&self, post_id: &str) -> bool {
        self.registry.cancel(post_id)
    }

    /// Consumes `stream` into `post` on the current task.
    pub async fn stream_to_post(
        &self,
        post: Post,
        stream: EventStream,
    ) -> Result<StreamOutcome, ConsumerError> {
        let guard = self.registry.register(&post.id)?;
        self.consume(guard, post, stream).await
    }

    /// Registers the post and consumes `stream` on a new task.
    ///
    /// Registration happens before this returns, so a concurrent stream to the
    /// same post fails here rather than inside the task.
    pub fn spawn(
        &self,
        post: Post,
        stream: EventStream,
    ) -> Result<(AbortHandle, JoinHandle<Result<StreamOutcome, ConsumerError>>), ConsumerError> {
        let guard = self.registry.register(&post.id)?;
        let handle = guard.handle();
        let streamer = self.clone();
        let task = tokio::spawn(async move { streamer.consume(guard, post, stream).await });
        Ok((handle, task))
    }

    async fn consume(
        &self,
        mut guard: StreamGuard,
        post: Post,
        mut stream: EventStream,
    ) -> Result<StreamOutcome, ConsumerError> {
        let mut signal: AbortSignal = guard.signal();
        let post_id = post.id.clone();
        info!(post_id = %post_id, "post stream started");
        self.publish_control(&post_id, ControlSignal::Start).await;

        let mut run = PostRun::new(post);
        let status = loop {
            let event = tokio::select! {
                biased;
                _ = signal.aborted() => break StreamStatus::Cancelled,
                event = stream.next_event() => event,
            };
            let Some(event) = event else {
                break StreamStatus::Failed(ProviderError::protocol(
                    "stream",
                    "event stream closed without a terminal event",
                ));
            };
            if let Some(status) = self.apply(&mut run, event).await? {
                break status;
            }
        };
        drop(stream);

        let outcome = self.finish(run, status).await;
        guard.release();
        match &outcome {
            Ok(outcome) => info!(post_id = %post_id, status = ?outcome.status, "post stream finished"),
            Err(err) => error!(post_id = %post_id, error = %err, "post stream could not be persisted"),
        }
        outcome
    }

    /// Applies one non-terminal event, or maps a terminal event to a status.
    async fn apply(
        &self,
        run: &mut PostRun,
        event: StreamEvent,
    ) -> Result<Option<StreamStatus>, ConsumerError> {
        let post_id = run.post.id.clone();
        match event {
            StreamEvent::Text(delta) => {
                debug!(post_id = %post_id, len = delta.len(), "text delta");
                run.post.message.push_str(&delta);
                let actions = run.detector.update(&run.post.message);
                for action in actions {
                    self.sink.publish(detector_update(&post_id, action)).await;
                }
            }
            StreamEvent::Reasoning(delta) => {
                run.reasoning.push_str(&delta);
                self.sink
                    .publish(PostUpdate::Reasoning {
                        post_id,
                        text: run.reasoning.clone(),
                        phase: ReasoningPhase::Streaming,
                    })
                    .await;
            }
            StreamEvent::ReasoningDone(data) => {
                self.complete_reasoning(run, data).await?;
                self.persist_progress(&run.post).await;
            }
            StreamEvent::Annotations(annotations) => {
                run.annotations.extend(annotations);
                set_prop(&mut run.post, PROP_ANNOTATIONS, &run.annotations)?;
                self.persist_progress(&run.post).await;
                self.sink
                    .publish(PostUpdate::Annotations {
                        post_id,
                        annotations: run.annotations.clone(),
                    })
                    .await;
            }
            StreamEvent::Usage(usage) => self.meter.record(&post_id, usage).await,
            StreamEvent::ToolCalls(calls) => {
                let calls: Vec<ToolCall> = calls
                    .into_iter()
                    .map(|call| ToolCall::pending(call.id, call.name, call.arguments))
                    .collect();
                return Ok(Some(StreamStatus::ToolCallsPending(calls)));
            }
            StreamEvent::Error(err) => return Ok(Some(StreamStatus::Failed(err))),
            StreamEvent::End => return Ok(Some(StreamStatus::Completed)),
        }
        Ok(None)
    }

    async fn finish(
        &self,
        mut run: PostRun,
        status: StreamStatus,
    ) -> Result<StreamOutcome, ConsumerError> {
        let post_id = run.post.id.clone();
        self.flush_reasoning(&mut run).await?;
        finalize_artifacts(&mut run.post, &mut run.annotations)?;

        match &status {
            StreamStatus::Completed | StreamStatus::Cancelled => {
                if run.post.message.trim().is_empty() {
                    run.post.message = self.notices.no_result.clone();
                }
            }
            StreamStatus::ToolCallsPending(calls) => {
                set_prop(&mut run.post, PROP_PENDING_TOOL_CALL, calls)?;
            }
            StreamStatus::Failed(err) => {
                warn!(post_id = %post_id, error = %err, "stream failed");
                if run.post.message.trim().is_empty() {
                    run.post.message = self.notices.failure.clone();
                } else {
                    run.post.message.push_str("\n\n");
                    run.post.message.push_str(&self.notices.interrupted);
                }
            }
        }

        self.store.update(&run.post).await?;

        if let StreamStatus::ToolCallsPending(calls) = &status {
            self.sink
                .publish(PostUpdate::ToolCall {
                    post_id: post_id.clone(),
                    calls: calls.clone(),
                })
                .await;
        }
        self.sink
            .publish(PostUpdate::Message {
                post_id: post_id.clone(),
                message: run.post.message.clone(),
            })
            .await;
        let control = match status {
            StreamStatus::Cancelled => ControlSignal::Cancel,
            _ => ControlSignal::End,
        };
        self.publish_control(&post_id, control).await;

        Ok(StreamOutcome {
            post: run.post,
            status,
        })
    }

    async fn complete_reasoning(
        &self,
        run: &mut PostRun,
        data: ReasoningData,
    ) -> Result<(), ConsumerError> {
        let buffered = std::mem::take(&mut run.reasoning);
        let text = if data.text.is_empty() {
            buffered
        } else {
            data.text
        };
        self.sink
            .publish(PostUpdate::Reasoning {
                post_id: run.post.id.clone(),
                text: text.clone(),
                phase: ReasoningPhase::Done,
            })
            .await;

        if !text.is_empty() {
            let summary = match run.post.prop::<String>(PROP_REASONING_SUMMARY) {
                Some(previous) if !previous.is_empty() => format!("{previous}\n\n{text}"),
                _ => text,
            };
            set_prop(&mut run.post, PROP_REASONING_SUMMARY, &summary)?;
        }
        if !data.signature.is_empty() {
            set_prop(&mut run.post, PROP_REASONING_SIGNATURE, &data.signature)?;
        }
        Ok(())
    }

    /// Treats reasoning left in the buffer as a finished block.
    async fn flush_reasoning(&self, run: &mut PostRun) -> Result<(), ConsumerError> {
        if run.reasoning.is_empty() {
            return Ok(());
        }
        self.complete_reasoning(run, ReasoningData::default()).await
    }

    /// Intermediate write; the final write reports failures instead.
    async fn persist_progress(&self, post: &Post) {
        if let Err(err) = self.store.update(post).await {
            warn!(post_id = %post.id, error = %err, "failed to persist post progress");
        }
    }

    async fn publish_control(&self, post_id: &str, control: ControlSignal) {
        self.sink
            .publish(PostUpdate::Control {
                post_id: post_id.to_string(),
                control,
            })
            .await;
    }
}

struct PostRun {
    post: Post,
    reasoning: String,
    annotations: Vec<Annotation>,
    detector: ArtifactDetector,
}

impl PostRun {
    fn new(post: Post) -> Self {
        let annotations = post.prop(PROP_ANNOTATIONS).unwrap_or_default();
        Self {
            post,
            reasoning: String::new(),
            annotations,
            detector: ArtifactDetector::new(),
        }
    }
}

fn set_prop<T: Serialize>(post: &mut Post, field: &'static str, value: &T) -> Result<(), StoreError> {
    post.set_prop(field, value)
        .map_err(|source| StoreError::Encode { field, source })
}

/// Moves artifact blocks out of the message into the artifacts prop.
/// Annotations are re-pointed at the rewritten message; those that only
/// covered removed text are dropped.
fn finalize_artifacts(post: &mut Post, annotations: &mut Vec<Annotation>) -> Result<(), StoreError> {
    let extracted = extract_artifacts(&post.message);
    if !extracted.is_empty() {
        let mut artifacts: Vec<Artifact> = post.prop(PROP_ARTIFACTS).unwrap_or_default();
        artifacts.extend(extracted);
        set_prop(post, PROP_ARTIFACTS, &artifacts)?;
    }
    let (message, offsets) = remove_markers_mapped(&post.message);
    post.message = message;
    if !annotations.is_empty() {
        annotations.retain_mut(|annotation| {
            match offsets.range(annotation.start_index, annotation.end_index) {
                Some((start, end)) => {
                    annotation.start_index = start;
                    annotation.end_index = end;
                    true
                }
                None => false,
            }
        });
        set_prop(post, PROP_ANNOTATIONS, annotations)?;
    }
    Ok(())
}

fn detector_update(post_id: &str, action: DetectorAction) -> PostUpdate {
    let post_id = post_id.to_string();
    match action {
        DetectorAction::Message(message) => PostUpdate::Message { post_id, message },
        DetectorAction::Generating { language, title } => PostUpdate::Artifact {
            post_id,
            update: ArtifactUpdate::Generating { language, title },
        },
        DetectorAction::Chunk(content) => PostUpdate::Artifact {
            post_id,
            update: ArtifactUpdate::Chunk { content },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::TracingMeter;
    use crate::notify::testing::RecordingSink;
    use crate::store::MemoryPostStore;
    use llmstream_harness::{ToolCallStatus, Usage};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingMeter {
        records: Mutex<Vec<(String, Usage)>>,
    }

    #[async_trait::async_trait]
    impl UsageMeter for RecordingMeter {
        async fn record(&self, post_id: &str, usage: Usage) {
            self.records.lock().unwrap().push((post_id.to_string(), usage));
        }
    }

    struct Fixture {
        store: Arc<MemoryPostStore>,
        sink: Arc<RecordingSink>,
        meter: Arc<RecordingMeter>,
        streamer: PostStreamer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryPostStore::new());
        let sink = Arc::new(RecordingSink::default());
        let meter = Arc::new(RecordingMeter::default());
        let streamer = PostStreamer::new(store.clone(), sink.clone(), meter.clone());
        Fixture {
            store,
            sink,
            meter,
            streamer,
        }
    }

    fn post() -> Post {
        Post::new("p1", "c1", "bot")
    }

    #[tokio::test]
    async fn end_with_empty_text_writes_no_result_notice() {
        let fx = fixture();
        let outcome = fx
            .streamer
            .stream_to_post(post(), EventStream::from_events(vec![StreamEvent::End]))
            .await
            .unwrap();

        assert_eq!(outcome.status, StreamStatus::Completed);
        assert_eq!(outcome.post.message, Notices::default().no_result);
        assert_eq!(fx.store.snapshot("p1").unwrap().message, Notices::default().no_result);
        assert_eq!(fx.sink.controls(), vec![ControlSignal::Start, ControlSignal::End]);
        assert!(!fx.streamer.registry().is_streaming("p1"));
    }

    #[tokio::test]
    async fn completed_stream_extracts_artifacts_and_meters_usage() {
        let fx = fixture();
        let events = vec![
            StreamEvent::Text("Here you go.\n```artifact:python title=\"Hello\"\n".into()),
            StreamEvent::Text("print('hi')\n```\nEnjoy.".into()),
            StreamEvent::Usage(Usage {
                input_tokens: 5,
                output_tokens: 7,
            }),
            StreamEvent::End,
        ];
        let outcome = fx
            .streamer
            .stream_to_post(post(), EventStream::from_events(events))
            .await
            .unwrap();

        assert_eq!(outcome.post.message, "Here you go.\nEnjoy.");
        let artifacts: Vec<Artifact> = outcome.post.prop(PROP_ARTIFACTS).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].title, "Hello");
        assert_eq!(artifacts[0].content, "print('hi')");

        let updates = fx.sink.updates();
        assert!(updates.iter().any(|update| matches!(
            update,
            PostUpdate::Artifact { update: ArtifactUpdate::Generating { language, .. }, .. } if language == "python"
        )));
        assert!(fx.sink.messages().iter().all(|message| !message.contains("```")));
        assert_eq!(
            fx.meter.records.lock().unwrap().as_slice(),
            &[(
                "p1".to_string(),
                Usage {
                    input_tokens: 5,
                    output_tokens: 7
                }
            )]
        );
    }

    #[tokio::test]
    async fn error_keeps_partial_text_and_reasoning() {
        let fx = fixture();
        let events = vec![
            StreamEvent::Reasoning("thinking".into()),
            StreamEvent::Text("Partial answer".into()),
            StreamEvent::Error(ProviderError::transport("openai", "connection reset")),
        ];
        let outcome = fx
            .streamer
            .stream_to_post(post(), EventStream::from_events(events))
            .await
            .unwrap();

        assert!(matches!(outcome.status, StreamStatus::Failed(ProviderError::Transport { .. })));
        assert_eq!(
            outcome.post.message,
            format!("Partial answer\n\n{}", Notices::default().interrupted)
        );
        assert_eq!(
            outcome.post.prop::<String>(PROP_REASONING_SUMMARY).as_deref(),
            Some("thinking")
        );
    }

    #[tokio::test]
    async fn error_without_text_writes_failure_notice() {
        let fx = fixture();
        let notices = Notices {
            failure: "Nope".into(),
            ..Notices::default()
        };
        let streamer = fx.streamer.clone().with_notices(notices);
        let outcome = streamer
            .stream_to_post(
                post(),
                EventStream::from_events(vec![StreamEvent::Error(ProviderError::DepthExceeded {
                    max_depth: 10,
                })]),
            )
            .await
            .unwrap();
        assert_eq!(outcome.post.message, "Nope");
    }

    #[tokio::test]
    async fn tool_calls_are_persisted_as_pending() {
        let fx = fixture();
        let mut call = ToolCall::pending("t1", "lookup", json!({"q": "a\u{202E}b"}));
        call.status = ToolCallStatus::Success;
        let events = vec![
            StreamEvent::ReasoningDone(ReasoningData {
                text: "need a lookup".into(),
                signature: "sig".into(),
            }),
            StreamEvent::ToolCalls(vec![call]),
        ];
        let outcome = fx
            .streamer
            .stream_to_post(post(), EventStream::from_events(events))
            .await
            .unwrap();

        let StreamStatus::ToolCallsPending(calls) = &outcome.status else {
            panic!("expected pending tool calls, got {:?}", outcome.status);
        };
        assert_eq!(calls[0].status, ToolCallStatus::Pending);
        assert_eq!(calls[0].arguments, json!({"q": "a\\u{202e}b"}));

        let stored = fx.store.snapshot("p1").unwrap();
        let persisted: Vec<ToolCall> = stored.prop(PROP_PENDING_TOOL_CALL).unwrap();
        assert_eq!(&persisted, calls);
        assert_eq!(stored.prop::<String>(PROP_REASONING_SIGNATURE).as_deref(), Some("sig"));
        assert!(fx
            .sink
            .updates()
            .iter()
            .any(|update| matches!(update, PostUpdate::ToolCall { calls, .. } if calls.len() == 1)));
    }

    #[tokio::test]
    async fn annotations_are_persisted_and_published() {
        let fx = fixture();
        let annotation = Annotation {
            annotation_type: Default::default(),
            start_index: 0,
            end_index: 4,
            url: "https://example.com".into(),
            title: "Example".into(),
            cited_text: String::new(),
            display_index: 1,
        };
        let events = vec![
            StreamEvent::Text("Rust".into()),
            StreamEvent::Annotations(vec![annotation.clone()]),
            StreamEvent::End,
        ];
        let outcome = fx
            .streamer
            .stream_to_post(post(), EventStream::from_events(events))
            .await
            .unwrap();
        let stored: Vec<Annotation> = outcome.post.prop(PROP_ANNOTATIONS).unwrap();
        assert_eq!(stored, vec![annotation]);
    }

    #[tokio::test]
    async fn citations_after_an_artifact_point_into_the_stored_message() {
        let fx = fixture();
        let text = "Summary:\n```artifact:python title=\"Demo\"\nprint(1)\n```\n\nPython is popular.";
        let cite = |start: usize, end: usize| Annotation {
            annotation_type: Default::default(),
            start_index: start,
            end_index: end,
            url: "https://example.com".into(),
            title: String::new(),
            cited_text: String::new(),
            display_index: 1,
        };
        let popular = text.find("popular").unwrap();
        let inside = text.find("print").unwrap();
        let events = vec![
            StreamEvent::Text(text.into()),
            StreamEvent::Annotations(vec![cite(popular, popular + 7), cite(inside, inside + 8)]),
            StreamEvent::End,
        ];
        fx.streamer
            .stream_to_post(post(), EventStream::from_events(events))
            .await
            .unwrap();

        let stored = fx.store.snapshot("p1").unwrap();
        assert_eq!(stored.message, "Summary:\n\nPython is popular.");
        let annotations: Vec<Annotation> = stored.prop(PROP_ANNOTATIONS).unwrap();
        assert_eq!(annotations.len(), 1);
        let kept = &annotations[0];
        assert_eq!(&stored.message[kept.start_index..kept.end_index], "popular");
    }

    #[tokio::test]
    async fn duplicate_stream_to_same_post_is_rejected() {
        let fx = fixture();
        let (_tx, stream) = EventStream::channel(4);
        let (handle, task) = fx.streamer.spawn(post(), stream).unwrap();

        let second = fx
            .streamer
            .stream_to_post(post(), EventStream::from_events(vec![StreamEvent::End]))
            .await;
        assert!(matches!(
            second,
            Err(ConsumerError::Registry(RegistryError::AlreadyStreamingToPost { .. }))
        ));

        handle.abort();
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.status, StreamStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_persists_reasoning_and_partial_text() {
        let fx = fixture();
        let (tx, stream) = EventStream::channel(8);
        tx.send(StreamEvent::Reasoning("weighing options".into()))
            .await
            .unwrap();
        tx.send(StreamEvent::Text("So far".into())).await.unwrap();

        let (_handle, task) = fx.streamer.spawn(post(), stream).unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !fx.sink.messages().iter().any(|m| m == "So far") {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(fx.streamer.stop("p1"));

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome.status, StreamStatus::Cancelled);
        assert_eq!(outcome.post.message, "So far");
        assert_eq!(
            outcome.post.prop::<String>(PROP_REASONING_SUMMARY).as_deref(),
            Some("weighing options")
        );
        assert_eq!(fx.sink.controls().last(), Some(&ControlSignal::Cancel));
        assert!(!fx.streamer.stop("p1"));
        drop(tx);
    }
}
