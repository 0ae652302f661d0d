use llmstream_harness::Usage;
use tracing::info;

/// Receives token usage for finished streams.
#[async_trait::async_trait]
pub trait UsageMeter: Send + Sync {
    async fn record(&self, post_id: &str, usage: Usage);
}

/// Meter that only logs usage.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMeter;

#[async_trait::async_trait]
impl UsageMeter for TracingMeter {
    async fn record(&self, post_id: &str, usage: Usage) {
        info!(
            post_id,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "token usage"
        );
    }
}
