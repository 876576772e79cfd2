//! Structured logging setup on top of `tracing-subscriber`.
//!
//! Three output formats:
//! - **pretty**: multi-line, for a terminal
//! - **json**: one object per event, for log shipping
//! - **compact**: one short line per event

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("unknown log format: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive, e.g. "info" or "barvault_core=debug".
    /// `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
    /// Emit span open/close events (useful with `#[instrument]`).
    pub with_span_events: bool,
    pub with_file: bool,
    pub with_thread_ids: bool,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file: false,
            with_thread_ids: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // Logs go to stderr so command output on stdout stays clean.
    match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_thread_ids(config.with_thread_ids)
                .with_target(config.with_target)
                .with_span_events(span_events);
            tracing_subscriber::registry().with(env_filter).with(layer).try_init()?;
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_thread_ids(config.with_thread_ids)
                .with_target(config.with_target)
                .with_span_events(span_events);
            tracing_subscriber::registry().with(env_filter).with(layer).try_init()?;
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_thread_ids(config.with_thread_ids)
                .with_target(config.with_target)
                .with_span_events(span_events);
            tracing_subscriber::registry().with(env_filter).with(layer).try_init()?;
        }
    }

    tracing::debug!(format = ?config.format, level = %config.level, "logging initialized");
    Ok(())
}
