//! Structured logging setup
//!
//! All modules emit `tracing` events. This module installs the process-wide
//! subscriber once at startup, choosing the output format and the default
//! level from the loaded configuration. `RUST_LOG` always takes precedence.

use crate::error::{AppError, Result};
use crate::models::Config;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing_subscriber::EnvFilter;

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console format
    #[default]
    Console,
    /// JSON format for structured logging
    Json,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Console => "console",
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "console" | "text" | "pretty" => Ok(LogFormat::Console),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(AppError::parse(format!("Invalid log format: {}", s))),
        }
    }
}

/// Default filter directive when `RUST_LOG` is not set
pub fn default_directive(config: &Config) -> &'static str {
    if config.debug {
        "trace"
    } else if config.verbose {
        "debug"
    } else {
        "info"
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(config.debug);

    let installed = match config.log_format {
        LogFormat::Console => builder.with_ansi(config.enable_color).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Compact => builder.compact().with_ansi(false).try_init(),
    };

    installed.map_err(|e| AppError::internal(format!("Failed to initialise logging: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!(LogFormat::from_str("console").unwrap(), LogFormat::Console);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::from_str(" compact ").unwrap(), LogFormat::Compact);
        assert!(LogFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_default_directive_levels() {
        let mut config = Config::default();
        assert_eq!(default_directive(&config), "info");

        config.verbose = true;
        assert_eq!(default_directive(&config), "debug");

        // Debug wins over verbose
        config.debug = true;
        assert_eq!(default_directive(&config), "trace");
    }

    #[test]
    fn test_log_format_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            log_format: LogFormat,
        }

        let source = ::config::Config::builder()
            .set_override("log_format", "json")
            .unwrap()
            .build()
            .unwrap();
        let parsed: Wrapper = source.try_deserialize().unwrap();
        assert_eq!(parsed.log_format, LogFormat::Json);
    }
}
