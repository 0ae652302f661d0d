use llmstream_harness::{Annotation, ToolCall};
use serde::Serialize;

/// Lifecycle point of the reasoning panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPhase {
    /// Cumulative text so far.
    Streaming,
    /// Final text; no further reasoning updates follow for this block.
    Done,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactUpdate {
    /// Sent once per block when its opening fence is confirmed.
    Generating { language: String, title: String },
    /// Cumulative inner content of the block being generated.
    Chunk { content: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    Start,
    End,
    Cancel,
}

/// A live update for clients watching one post.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PostUpdate {
    /// Full visible message text, with speculative and artifact fencing removed.
    Message { post_id: String, message: String },
    Reasoning {
        post_id: String,
        text: String,
        phase: ReasoningPhase,
    },
    ToolCall {
        post_id: String,
        calls: Vec<ToolCall>,
    },
    Annotations {
        post_id: String,
        annotations: Vec<Annotation>,
    },
    Artifact {
        post_id: String,
        #[serde(flatten)]
        update: ArtifactUpdate,
    },
    Control {
        post_id: String,
        control: ControlSignal,
    },
}

impl PostUpdate {
    pub fn post_id(&self) -> &str {
        match self {
            PostUpdate::Message { post_id, .. }
            | PostUpdate::Reasoning { post_id, .. }
            | PostUpdate::ToolCall { post_id, .. }
            | PostUpdate::Annotations { post_id, .. }
            | PostUpdate::Artifact { post_id, .. }
            | PostUpdate::Control { post_id, .. } => post_id,
        }
    }
}

/// Fire-and-forget channel to clients; delivery failures are the sink's concern.
#[async_trait::async_trait]
pub trait UpdateSink: Send + Sync {
    async fn publish(&self, update: PostUpdate);
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn updates_serialize_with_event_tag() {
        let update = PostUpdate::Artifact {
            post_id: "p1".into(),
            update: ArtifactUpdate::Generating {
                language: "rust".into(),
                title: "Main".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"event": "artifact", "post_id": "p1", "kind": "generating", "language": "rust", "title": "Main"})
        );

        let control = PostUpdate::Control {
            post_id: "p1".into(),
            control: ControlSignal::Cancel,
        };
        assert_eq!(
            serde_json::to_value(&control).unwrap(),
            json!({"event": "control", "post_id": "p1", "control": "cancel"})
        );
        assert_eq!(control.post_id(), "p1");
    }
}
