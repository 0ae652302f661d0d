use std::time::Duration;

use crate::model::ProviderId;

/// Stream-level failure cause carried by `StreamEvent::Error`.
///
/// Every variant terminates the stream it occurs on; none are retried inside
/// the streaming core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Provider returned an application-level failure (HTTP status, vendor error event).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// No wire data arrived within the stall window.
    #[error("stream stalled ({provider}): no data received for {}ms", .after.as_millis())]
    Stalled {
        provider: ProviderId,
        after: Duration,
    },
    /// A partial vendor message (frame, tool arguments) could not be reassembled.
    #[error("accumulation error ({provider}): {message}")]
    Accumulation {
        provider: ProviderId,
        message: String,
    },
    /// Provider event sequencing was invalid (for example no terminal event).
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
    /// The tool cycle ran past its recursion bound.
    #[error("tool call depth limit of {max_depth} reached")]
    DepthExceeded { max_depth: usize },
}

impl ProviderError {
    /// Creates a provider-level error.
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates an accumulation error.
    pub fn accumulation(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Accumulation {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns true when the stream was cut by the stall watchdog.
    pub fn is_stall(&self) -> bool {
        matches!(self, Self::Stalled { .. })
    }

    /// Returns the provider associated with this error, if any.
    pub fn provider_id(&self) -> Option<&ProviderId> {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Stalled { provider, .. }
            | Self::Accumulation { provider, .. }
            | Self::Protocol { provider, .. } => Some(provider),
            Self::DepthExceeded { .. } => None,
        }
    }
}

/// Errors raised before a stream exists (configuration, validation, lookup).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// Invalid harness/provider configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid request input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Requested provider is not registered in the harness.
    #[error("provider not found: {provider}")]
    ProviderNotFound { provider: ProviderId },
    /// Provider failure surfaced outside an event stream.
    #[error(transparent)]
    Provider(ProviderError),
}

impl From<ProviderError> for HarnessError {
    fn from(value: ProviderError) -> Self {
        HarnessError::Provider(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stall_is_distinguishable_from_transport() {
        let stalled = ProviderError::Stalled {
            provider: ProviderId::new("openai"),
            after: Duration::from_secs(30),
        };
        let transport = ProviderError::transport("openai", "connection reset");
        assert!(stalled.is_stall());
        assert!(!transport.is_stall());
        assert_eq!(
            stalled.to_string(),
            "stream stalled (openai): no data received for 30000ms"
        );
    }

    #[test]
    fn depth_exceeded_has_no_provider() {
        let err = ProviderError::DepthExceeded { max_depth: 10 };
        assert!(err.provider_id().is_none());
        assert!(err.to_string().contains("10"));
    }
}
