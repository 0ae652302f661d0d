use chrono::{SecondsFormat, Utc};
use llmstream_harness::{ToolCall, ToolDefinition, ToolResolution, ToolResolver};
use serde_json::json;
use tracing::debug;

const CURRENT_TIME: &str = "current_time";

pub fn definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition::new(
        CURRENT_TIME,
        "Returns the current date and time. Pass a UTC offset in hours to get local time.",
        json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "integer",
                    "description": "Offset from UTC in hours, between -12 and 14."
                }
            }
        }),
    )]
}

/// Resolves the built-in tools in-process.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinTools;

impl BuiltinTools {
    fn current_time(call: &ToolCall) -> ToolResolution {
        let offset_hours = call
            .arguments
            .get("utc_offset_hours")
            .and_then(|value| value.as_i64())
            .unwrap_or(0);
        if !(-12..=14).contains(&offset_hours) {
            return ToolResolution::Error(format!("utc_offset_hours out of range: {offset_hours}"));
        }
        let Some(offset) = chrono::FixedOffset::east_opt((offset_hours * 3600) as i32) else {
            return ToolResolution::Error("invalid utc offset".to_string());
        };
        let now = Utc::now().with_timezone(&offset);
        ToolResolution::Success(now.to_rfc3339_opts(SecondsFormat::Secs, false))
    }
}

#[async_trait::async_trait]
impl ToolResolver for BuiltinTools {
    async fn resolve(&self, call: &ToolCall) -> ToolResolution {
        debug!(tool = %call.name, id = %call.id, "resolving built-in tool");
        match call.name.as_str() {
            CURRENT_TIME => Self::current_time(call),
            other => ToolResolution::Error(format!("unknown tool: {other}")),
        }
    }
}
