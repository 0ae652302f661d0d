use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Tool calls awaiting resolution, as a JSON array of `ToolCall`.
pub const PROP_PENDING_TOOL_CALL: &str = "pending_tool_call";
/// Final reasoning text shown alongside the answer.
pub const PROP_REASONING_SUMMARY: &str = "reasoning_summary";
/// Opaque reasoning signature replayed on the next turn.
pub const PROP_REASONING_SIGNATURE: &str = "reasoning_signature";
/// Citations over the final message text.
pub const PROP_ANNOTATIONS: &str = "annotations";
/// Artifacts extracted from the message.
pub const PROP_ARTIFACTS: &str = "artifacts";

/// The destination message a stream is written into.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub root_id: String,
    pub user_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub props: Map<String, Value>,
}

impl Post {
    pub fn new(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_root(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = root_id.into();
        self
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set_prop<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.props.insert(key.to_string(), value);
        Ok(())
    }

    /// Reads `key` back as `T`; `None` when absent or of a different shape.
    pub fn prop<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.props
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn remove_prop(&mut self, key: &str) -> Option<Value> {
        self.props.remove(key)
    }
}
