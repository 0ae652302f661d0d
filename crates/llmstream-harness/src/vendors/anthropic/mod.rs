//! Anthropic Messages API (content-block-delta streaming).
mod adapter;
mod config;
mod translate;

pub use adapter::AnthropicProvider;
pub use config::AnthropicClientConfig;
