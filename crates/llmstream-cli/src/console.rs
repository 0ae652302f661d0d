use std::io::Write;
use std::sync::{Mutex, PoisonError};

use llmstream_post::{ArtifactUpdate, PostUpdate, ReasoningPhase, UpdateSink};

#[derive(Default)]
struct Printed {
    message: String,
    reasoning_len: usize,
}

/// Renders live post updates to the terminal.
///
/// Answer text goes to stdout as it grows; reasoning, tool calls and artifact
/// notices go to stderr.
#[derive(Default)]
pub struct ConsoleSink {
    printed: Mutex<Printed>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Returns what to print to move the terminal from `shown` to `next`.
fn message_delta<'a>(shown: &str, next: &'a str) -> Option<&'a str> {
    next.strip_prefix(shown).filter(|delta| !delta.is_empty())
}

#[async_trait::async_trait]
impl UpdateSink for ConsoleSink {
    async fn publish(&self, update: PostUpdate) {
        let mut printed = self.printed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stdout = std::io::stdout().lock();
        let mut stderr = std::io::stderr().lock();
        match update {
            PostUpdate::Message { message, .. } => {
                if let Some(delta) = message_delta(&printed.message, &message) {
                    let _ = write!(stdout, "{delta}");
                } else if !message.starts_with(printed.message.as_str()) {
                    // the visible text was rewritten (artifact removed, notice added)
                    let _ = write!(stdout, "\n{message}");
                }
                printed.message = message;
                let _ = stdout.flush();
            }
            PostUpdate::Reasoning { text, phase, .. } => {
                if let Some(delta) = text.get(printed.reasoning_len..) {
                    let _ = write!(stderr, "{delta}");
                }
                printed.reasoning_len = text.len();
                if phase == ReasoningPhase::Done {
                    let _ = writeln!(stderr);
                    printed.reasoning_len = 0;
                }
            }
            PostUpdate::ToolCall { calls, .. } => {
                for call in calls {
                    let _ = writeln!(stderr, "[tool call] {}({})", call.name, call.arguments_json());
                }
            }
            PostUpdate::Annotations { annotations, .. } => {
                for annotation in annotations {
                    let _ = writeln!(stderr, "[{}] {}", annotation.display_index, annotation.url);
                }
            }
            PostUpdate::Artifact {
                update: ArtifactUpdate::Generating { language, title },
                ..
            } => {
                let _ = writeln!(stderr, "[artifact] {title} ({language})");
            }
            PostUpdate::Artifact { .. } | PostUpdate::Control { .. } => {}
        }
    }
}
