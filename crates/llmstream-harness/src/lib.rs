//! Provider-agnostic streaming core for LLM completions.
//!
//! Each vendor's wire protocol is translated into one ordered sequence of
//! [`StreamEvent`]s delivered over an [`EventStream`]. Vendor-specific APIs are
//! namespaced under `vendors::*`.
//!
//! # Streaming a completion
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use llmstream_harness::prelude::*;
//! use llmstream_harness::vendors::anthropic::AnthropicProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), HarnessError> {
//! let harness = Harness::builder()
//!     .register_provider(Arc::new(AnthropicProvider::from_env()?))
//!     .build()?;
//!
//! let request = CompletionRequest::new(
//!     Conversation::new()
//!         .with_turn(Turn::system("Answer briefly."))
//!         .with_turn(Turn::user("Say hello")),
//!     GenerationConfig::new("claude-sonnet-4-5"),
//! );
//!
//! let mut stream = harness.stream(&ProviderId::new("anthropic"), request)?;
//! while let Some(event) = stream.next_event().await {
//!     if let StreamEvent::Text(text) = event {
//!         print!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Cooperative cancellation handles.
pub mod abort;
/// Conversation turns, attachments, and tool definitions.
pub mod conversation;
/// Bounded tool-call resolution cycle.
pub mod cycle;
/// Public error types.
pub mod errors;
/// Harness entry point and provider registry.
pub mod harness;
/// Provider ids, generation config, and stream options.
pub mod model;
/// Common imports for typical usage.
pub mod prelude;
/// Provider adapter contract.
pub mod provider;
/// Producer task that sequences adapter output onto the event channel.
pub mod pump;
/// Sanitization of untrusted tool-call text.
pub mod sanitize;
/// The shared event protocol.
pub mod stream;
/// Wire-level frame decoders shared by the vendor adapters.
pub(crate) mod transport;
/// Vendor-specific stream adapters.
pub mod vendors;

pub use abort::{AbortHandle, AbortSignal};
pub use conversation::{
    Attachment, AttachmentData, Conversation, Role, ToolDefinition, ToolRound, Turn,
};
pub use cycle::{CycleState, ToolCycle, ToolResolution, ToolResolver};
pub use errors::{HarnessError, ProviderError};
pub use harness::{Harness, HarnessBuilder};
pub use model::{GenerationConfig, ProviderId, ReasoningConfig, StreamOptions};
pub use provider::{CompletionRequest, EventBatchStream, ProviderAdapter, ProviderStreamHandle};
pub use pump::stream_completion;
pub use stream::{
    Annotation, AnnotationType, CollectedResponse, EventStream, ReasoningData, StreamEvent,
    Terminal, ToolCall, ToolCallStatus, Usage,
};
