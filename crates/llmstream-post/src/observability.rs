use once_cell::sync::OnceCell;
use std::{env, io};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const ENABLED_ENV: &str = "LLMSTREAM_OBSERVABILITY_ENABLED";
const LOG_LEVEL_ENV: &str = "LLMSTREAM_LOG_LEVEL";
const JSON_LOG_PATH_ENV: &str = "LLMSTREAM_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "llmstream.logs.jsonl";

static INIT: OnceCell<Option<WorkerGuard>> = OnceCell::new();

fn parse_bool_env(value: Option<String>) -> bool {
    value.is_some_and(|raw| {
        matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn resolve_env_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes process-wide tracing once.
///
/// With `LLMSTREAM_OBSERVABILITY_ENABLED` set, events are written as JSON lines
/// to `LLMSTREAM_JSON_LOG_PATH` (default `llmstream.logs.jsonl`); otherwise a
/// compact layer writes to stderr so stdout stays free for streamed output.
/// `RUST_LOG` takes precedence over `LLMSTREAM_LOG_LEVEL`.
pub fn init_observability() {
    let _ = INIT.get_or_init(|| {
        let enabled = parse_bool_env(env::var(ENABLED_ENV).ok());
        let filter = resolve_env_filter();

        if enabled {
            let path = env::var(JSON_LOG_PATH_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
            let file_path = std::path::Path::new(&path);
            let directory = file_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = file_path
                .file_name()
                .and_then(|v| v.to_str())
                .unwrap_or(DEFAULT_LOG_FILE);
            let file_appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            let json_layer = fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
                .with_writer(writer);

            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .try_init();
            return Some(guard);
        }

        let console_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(io::stderr);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .try_init();
        None
    });
}
