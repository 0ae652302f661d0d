//! OpenAI provider integration: Chat Completions and Responses streaming.
//!
//! Vendor-specific configuration lives here so the root harness API can remain
//! provider-agnostic.
mod adapter;
mod chat;
mod config;
mod options;
mod responses;

pub use adapter::OpenAiProvider;
pub use config::OpenAiClientConfig;
pub use options::{OpenAiApi, OpenAiReasoningEffort};
