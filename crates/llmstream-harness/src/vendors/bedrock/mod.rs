//! Amazon Bedrock ConverseStream (pre-aggregated chunks over AWS event-stream framing).
mod adapter;
mod config;
mod translate;

pub use adapter::BedrockProvider;
pub use config::BedrockClientConfig;
