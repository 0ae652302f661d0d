use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::stream::{StreamEvent, ToolCall, Usage};
use crate::transport::WireTranslator;
use crate::transport::eventstream::EventStreamFrame;
use crate::vendors::parse_tool_arguments;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentBlockStart {
    content_block_index: usize,
    #[serde(default)]
    start: Option<BlockStart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockStart {
    #[serde(default)]
    tool_use: Option<ToolUseStart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolUseStart {
    tool_use_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentBlockDelta {
    content_block_index: usize,
    delta: BlockDelta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool_use: Option<ToolUseDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolUseDelta {
    #[serde(default)]
    input: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStop {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ExceptionBody {
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

#[derive(Debug, Default)]
struct PendingTool {
    id: String,
    name: String,
    input: String,
}

pub(crate) struct BedrockTranslator {
    provider: ProviderId,
    tools: BTreeMap<usize, PendingTool>,
    stop_reason: Option<String>,
    terminated: bool,
}

impl BedrockTranslator {
    pub(crate) fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            tools: BTreeMap::new(),
            stop_reason: None,
            terminated: false,
        }
    }

    fn parse<T: DeserializeOwned>(&self, kind: &str, payload: &[u8]) -> Result<T, ProviderError> {
        serde_json::from_slice(payload).map_err(|e| {
            ProviderError::accumulation(self.provider.clone(), format!("malformed {kind} event: {e}"))
        })
    }

    fn terminal(&mut self) -> Result<StreamEvent, ProviderError> {
        self.terminated = true;
        if self.stop_reason.as_deref() != Some("tool_use") {
            return Ok(StreamEvent::End);
        }
        let mut calls = Vec::with_capacity(self.tools.len());
        for (_, tool) in std::mem::take(&mut self.tools) {
            let arguments = parse_tool_arguments(&self.provider, &tool.name, &tool.input)?;
            calls.push(ToolCall::pending(tool.id, tool.name, arguments));
        }
        if calls.is_empty() {
            warn!(provider = %self.provider, "tool_use stop without tool blocks");
            return Ok(StreamEvent::End);
        }
        Ok(StreamEvent::ToolCalls(calls))
    }
}

impl WireTranslator for BedrockTranslator {
    type Frame = EventStreamFrame;

    fn translate(&mut self, frame: EventStreamFrame) -> Result<Vec<StreamEvent>, ProviderError> {
        if frame.is_exception() {
            let kind = frame.exception_type.as_deref().unwrap_or("exception");
            let detail = serde_json::from_slice::<ExceptionBody>(&frame.payload)
                .ok()
                .and_then(|body| body.message)
                .unwrap_or_else(|| String::from_utf8_lossy(&frame.payload).into_owned());
            return Err(ProviderError::provider(
                self.provider.clone(),
                format!("{kind}: {detail}"),
                None,
            ));
        }
        if self.terminated {
            return Ok(Vec::new());
        }

        let kind = frame.event_type.as_deref().unwrap_or_default();
        match kind {
            "messageStart" | "contentBlockStop" => Ok(Vec::new()),
            "contentBlockStart" => {
                let start: ContentBlockStart = self.parse(kind, &frame.payload)?;
                if let Some(tool) = start.start.and_then(|s| s.tool_use) {
                    let entry = self.tools.entry(start.content_block_index).or_default();
                    entry.id = tool.tool_use_id;
                    entry.name = tool.name;
                }
                Ok(Vec::new())
            }
            "contentBlockDelta" => {
                let delta: ContentBlockDelta = self.parse(kind, &frame.payload)?;
                let mut out = Vec::new();
                if let Some(text) = delta.delta.text {
                    out.push(StreamEvent::Text(text));
                }
                if let Some(tool) = delta.delta.tool_use {
                    self.tools
                        .entry(delta.content_block_index)
                        .or_default()
                        .input
                        .push_str(&tool.input);
                }
                Ok(out)
            }
            "messageStop" => {
                let stop: MessageStop = self.parse(kind, &frame.payload)?;
                debug!(provider = %self.provider, stop_reason = ?stop.stop_reason, "message stop");
                self.stop_reason = Some(stop.stop_reason.unwrap_or_default());
                Ok(Vec::new())
            }
            "metadata" => {
                let metadata: Metadata = self.parse(kind, &frame.payload)?;
                let mut out = Vec::new();
                if let Some(usage) = metadata.usage {
                    out.push(StreamEvent::Usage(Usage {
                        input_tokens: usage.input_tokens,
                        output_tokens: usage.output_tokens,
                    }));
                }
                if self.stop_reason.is_some() {
                    out.push(self.terminal()?);
                }
                Ok(out)
            }
            other => {
                warn!(provider = %self.provider, kind = %other, "ignoring unknown stream event");
                Ok(Vec::new())
            }
        }
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError> {
        if !self.terminated && self.stop_reason.is_some() {
            return Ok(vec![self.terminal()?]);
        }
        Ok(Vec::new())
    }
}
