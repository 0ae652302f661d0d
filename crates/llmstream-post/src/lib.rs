//! Applies a streamed completion to a destination post.
//!
//! [`PostStreamer`] consumes an [`llmstream_harness::EventStream`], publishes
//! live [`PostUpdate`]s, moves artifact blocks out of the visible text, and
//! persists the final or partial post through a [`PostStore`].

pub mod artifacts;
pub mod consumer;
pub mod metering;
pub mod notices;
pub mod notify;
pub mod observability;
pub mod post;
pub mod registry;
pub mod store;

pub use artifacts::{
    Artifact, ArtifactDetector, ArtifactType, DetectorAction, DetectorState, OffsetMap,
    extract_artifacts, remove_markers, remove_markers_mapped, visible_text,
};
pub use consumer::{ConsumerError, PostStreamer, StreamOutcome, StreamStatus};
pub use metering::{TracingMeter, UsageMeter};
pub use notices::Notices;
pub use notify::{ArtifactUpdate, ControlSignal, PostUpdate, ReasoningPhase, UpdateSink};
pub use observability::init_observability;
pub use post::Post;
pub use registry::{RegistryError, StreamGuard, StreamRegistry};
pub use store::{MemoryPostStore, PostStore, StoreError};
