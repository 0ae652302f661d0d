use std::pin::Pin;
use std::time::Duration;

use crate::conversation::{Conversation, ToolDefinition, ToolRound, Turn};
use crate::errors::ProviderError;
use crate::model::{GenerationConfig, ProviderId};
use crate::stream::StreamEvent;

/// Translated adapter output: one batch per wire-level chunk (possibly empty).
pub type EventBatchStream =
    Pin<Box<dyn futures::Stream<Item = Result<Vec<StreamEvent>, ProviderError>> + Send + 'static>>;

/// Everything an adapter needs to issue one streaming call.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub conversation: Conversation,
    pub tools: Vec<ToolDefinition>,
    pub config: GenerationConfig,
}

impl CompletionRequest {
    pub fn new(conversation: Conversation, config: GenerationConfig) -> Self {
        Self {
            conversation,
            tools: Vec::new(),
            config,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Appends the synthetic assistant turn carrying a resolved tool round.
    pub fn append_tool_round(&mut self, text: impl Into<String>, round: ToolRound) {
        self.conversation
            .push(Turn::assistant(text).with_tool_round(round));
    }
}

/// Stream returned by an adapter together with its watchdog setting.
pub struct ProviderStreamHandle {
    pub stream: EventBatchStream,
    /// When set, the pump fails the stream with `ProviderError::Stalled` if
    /// no wire chunk arrives within this window.
    pub stall_timeout: Option<Duration>,
}

/// Contract implemented by each vendor integration.
///
/// Adapters translate their vendor's wire protocol into [`StreamEvent`]
/// batches. Ordering guarantees (usage placement, reasoning completion,
/// terminal uniqueness) are enforced afterwards by the shared pump.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider id used for registration and error attribution.
    fn id(&self) -> ProviderId;

    /// Issues the vendor call and returns the translated wire stream.
    async fn start_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderStreamHandle, ProviderError>;
}
