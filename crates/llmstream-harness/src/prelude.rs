//! Common imports for typical harness usage.
pub use crate::{
    AbortHandle, AbortSignal, Attachment, CollectedResponse, CompletionRequest, Conversation,
    EventStream, GenerationConfig, Harness, HarnessBuilder, HarnessError, ProviderError,
    ProviderId, Role, StreamEvent, StreamOptions, Terminal, ToolCall, ToolCycle,
    ToolDefinition, ToolResolution, ToolResolver, ToolRound, Turn,
};
