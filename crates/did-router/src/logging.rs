//! Tracing subscriber setup

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};
use std::str::FromStr;

use crate::config::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` directives take precedence over
/// the configured level. Calling this twice is harmless.
pub fn setup_logging(config: &LoggingConfig) {
    let level = parse_log_level(&config.level);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Parse a log level, falling back to INFO for unknown values
pub fn parse_log_level(level: &str) -> Level {
    Level::from_str(level).unwrap_or(Level::INFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), Level::DEBUG);
        assert_eq!(parse_log_level("WARN"), Level::WARN);
        assert_eq!(parse_log_level("chatty"), Level::INFO);
    }
}
