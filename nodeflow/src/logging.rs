//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. the `level` argument (if provided)
//! 2. `NODEFLOW_LOG` environment variable (e.g. "info", "nodeflow=debug")
//! 3. default to `info`
//!
//! Logs go to stderr, as text or as one JSON object per line.

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable read when no level is passed.
pub const LOG_ENV: &str = "NODEFLOW_LOG";

/// Output format of the global subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Installs the global logging subscriber.
///
/// # Errors
///
/// Fails on an invalid filter directive or when a global subscriber is
/// already installed.
pub fn init_logging(level: Option<&str>, format: LogFormat) -> Result<()> {
    let directive = filter_directive(level, std::env::var(LOG_ENV).ok());
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| anyhow::anyhow!("invalid log filter '{directive}': {e}"))?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

/// Like [`init_logging`], but returns false instead of failing. Tests call
/// this from every case.
pub fn try_init_logging(level: Option<&str>, format: LogFormat) -> bool {
    init_logging(level, format).is_ok()
}

fn filter_directive(level: Option<&str>, env: Option<String>) -> String {
    level
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| env.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "info".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_priority() {
        assert_eq!(filter_directive(Some("debug"), Some("warn".into())), "debug");
        assert_eq!(filter_directive(None, Some(" nodeflow=trace ".into())), "nodeflow=trace");
        assert_eq!(filter_directive(Some("  "), None), "info");
        assert_eq!(filter_directive(None, None), "info");
    }

    #[test]
    fn test_try_init_is_repeatable() {
        try_init_logging(Some("warn"), LogFormat::Text);
        assert!(!try_init_logging(Some("warn"), LogFormat::Json));
    }
}
