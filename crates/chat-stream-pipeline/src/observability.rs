use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const ENABLED_VAR: &str = "CHAT_STREAM_OBSERVABILITY_ENABLED";
const LEVEL_VAR: &str = "CHAT_STREAM_LOG_LEVEL";
const JSON_LOG_PATH_VAR: &str = "CHAT_STREAM_JSON_LOG_PATH";
const DEFAULT_LOG_FILE: &str = "chat-stream.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    /// Filter directive; falls back to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// JSONL output file. Console output when unset.
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilitySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            enabled: lookup(ENABLED_VAR)
                .map(|value| parse_bool(&value).unwrap_or(true))
                .unwrap_or(true),
            level: lookup(LEVEL_VAR).filter(|level| !level.trim().is_empty()),
            json_log_path: lookup(JSON_LOG_PATH_VAR)
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Splits a log path into the directory and file name the appender wants,
/// creating the directory if needed.
fn log_file_target(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&dir);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Initialises the `tracing` subscriber once per process.
///
/// Environment variables:
/// - `CHAT_STREAM_OBSERVABILITY_ENABLED`: enable/disable flag (default enabled).
/// - `CHAT_STREAM_LOG_LEVEL`: filter override (`info`, `chat_stream_pipeline=debug`, ...).
/// - `CHAT_STREAM_JSON_LOG_PATH`: JSONL log file; console output when unset.
/// - `RUST_LOG`: fallback filter.
pub fn init_observability() {
    init_with(ObservabilitySettings::from_env());
}

/// Same as [`init_observability`] with explicit settings. Only the first call
/// in a process has any effect.
pub fn init_with(settings: ObservabilitySettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let env_filter = settings.env_filter();
        match &settings.json_log_path {
            Some(path) => {
                let (dir, file_name) = log_file_target(path);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stdout);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}
