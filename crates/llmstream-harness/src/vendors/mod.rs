//! Vendor-specific stream adapters.
//!
//! Each vendor module owns its client config, request body construction and
//! wire translator. Everything leaves the module as [`StreamEvent`] batches.
//!
//! [`StreamEvent`]: crate::StreamEvent

pub mod anthropic;
pub mod bedrock;
pub mod openai;

use std::time::Duration;

use crate::errors::{HarnessError, ProviderError};
use crate::model::ProviderId;
use crate::stream::{ToolCall, ToolCallStatus};

const REJECTED_RESULT: &str = "Tool call was rejected by the user.";

pub(crate) fn http_client(timeout: Duration, vendor: &str) -> Result<reqwest::Client, HarnessError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| HarnessError::Config(format!("failed to build {vendor} client: {e}")))
}

pub(crate) fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Sends the request and turns a non-2xx answer into a `Provider` error.
pub(crate) async fn send_checked(
    provider: &ProviderId,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    let response = request.send().await.map_err(|e| {
        ProviderError::transport(provider.clone(), format!("request failed: {e}"))
    })?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ProviderError::provider(
        provider.clone(),
        format!("request failed with status {status}: {body}"),
        Some(status.as_u16()),
    ))
}

/// Result text reported back to the model, and whether it is an error.
pub(crate) fn tool_result_content(call: &ToolCall) -> (String, bool) {
    match call.status {
        ToolCallStatus::Rejected if call.result.is_empty() => (REJECTED_RESULT.to_string(), true),
        ToolCallStatus::Rejected | ToolCallStatus::Error => (call.result.clone(), true),
        _ => (call.result.clone(), false),
    }
}

/// Assigns 1-based citation numbers, one per distinct url in first-seen order.
#[derive(Default, Debug)]
pub(crate) struct CitationNumbering {
    urls: Vec<String>,
}

impl CitationNumbering {
    pub fn display_index(&mut self, url: &str) -> usize {
        if let Some(pos) = self.urls.iter().position(|seen| seen == url) {
            return pos + 1;
        }
        self.urls.push(url.to_string());
        self.urls.len()
    }
}

/// Parses accumulated tool arguments; an empty buffer means `{}`.
pub(crate) fn parse_tool_arguments(
    provider: &ProviderId,
    tool: &str,
    raw: &str,
) -> Result<serde_json::Value, ProviderError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| {
        ProviderError::accumulation(
            provider.clone(),
            format!("invalid arguments for tool {tool}: {e}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_numbers_are_shared_per_url() {
        let mut numbering = CitationNumbering::default();
        assert_eq!(numbering.display_index("https://a"), 1);
        assert_eq!(numbering.display_index("https://b"), 2);
        assert_eq!(numbering.display_index("https://a"), 1);
    }

    #[test]
    fn rejected_calls_report_a_default_reason() {
        let mut call = ToolCall::pending("1", "lookup", serde_json::json!({}));
        call.status = ToolCallStatus::Rejected;
        let (text, is_error) = tool_result_content(&call);
        assert!(is_error);
        assert_eq!(text, REJECTED_RESULT);

        call.status = ToolCallStatus::Success;
        call.result = "42".into();
        assert_eq!(tool_result_content(&call), ("42".to_string(), false));
    }

    #[test]
    fn empty_arguments_parse_as_empty_object() {
        let provider = ProviderId::new("test");
        assert_eq!(
            parse_tool_arguments(&provider, "t", "  ").unwrap(),
            serde_json::json!({})
        );
        let err = parse_tool_arguments(&provider, "t", "{\"a\":").unwrap_err();
        assert!(matches!(err, ProviderError::Accumulation { .. }));
    }
}
