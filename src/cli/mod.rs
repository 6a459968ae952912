//! Command-line interface

use crate::logging::LogFormat;
use clap::Parser;
use std::path::PathBuf;

/// Network Prober - periodic ICMP, TCP and DNS probing with Prometheus metrics
#[derive(Parser, Debug, Clone)]
#[command(name = "nprober")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML, TOML or JSON, inferred from the extension)
    #[arg(long, env = "PROBER_CONFIG", default_value = crate::defaults::DEFAULT_CONFIG_PATH)]
    pub config_path: PathBuf,

    /// Port of the metrics endpoint
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address the metrics endpoint binds to
    #[arg(long, value_name = "ADDR")]
    pub listen_address: Option<String>,

    /// Seconds between ticks
    #[arg(long, value_name = "SECS", value_parser = parse_duration)]
    pub interval: Option<u64>,

    /// Per-attempt timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_duration)]
    pub timeout: Option<u64>,

    /// Log output format (console, json, compact)
    #[arg(long, value_name = "FMT", value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,

    /// Force colored output
    #[arg(long, conflicts_with = "no_color")]
    pub color: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(long)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// Validate the configuration, print the probe plan and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Explicit color choice from the command line, if any
    pub fn color_override(&self) -> Option<bool> {
        if self.color {
            Some(true)
        } else if self.no_color {
            Some(false)
        } else {
            None
        }
    }

    /// Check if colors should be enabled
    pub fn use_colors(&self) -> bool {
        self.color_override().unwrap_or_else(supports_color)
    }
}

fn parse_duration(s: &str) -> Result<u64, String> {
    // Reject strings with leading + sign or other invalid formats
    if s.starts_with('+') || s.starts_with("0x") || s.starts_with("0X") {
        return Err(format!("Invalid duration: {}", s));
    }

    s.parse::<u64>()
        .map_err(|_| format!("Invalid duration: {}", s))
        .and_then(|secs| {
            if secs == 0 {
                Err("Duration must be greater than 0".to_string())
            } else if secs > 3600 {
                Err("Duration cannot exceed 3600 seconds".to_string())
            } else {
                Ok(secs)
            }
        })
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse::<LogFormat>().map_err(|e| e.to_string())
}

fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    // Default to true on Unix-like systems, false on Windows
    cfg!(unix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing_basic() {
        let cli = Cli::parse_from(["nprober", "--config-path", "/tmp/probes.yml"]);
        assert_eq!(cli.config_path, PathBuf::from("/tmp/probes.yml"));
        assert_eq!(cli.port, None);
        assert_eq!(cli.interval, None);
        assert!(!cli.check_config);
    }

    #[test]
    fn test_cli_parsing_all_options() {
        let cli = Cli::parse_from([
            "nprober",
            "--config-path",
            "probes.toml",
            "-p",
            "9100",
            "--listen-address",
            "127.0.0.1",
            "--interval",
            "30",
            "--timeout",
            "3",
            "--log-format",
            "json",
            "--no-color",
            "--verbose",
            "--debug",
            "--check-config",
        ]);

        assert_eq!(cli.port, Some(9100));
        assert_eq!(cli.listen_address.as_deref(), Some("127.0.0.1"));
        assert_eq!(cli.interval, Some(30));
        assert_eq!(cli.timeout, Some(3));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert_eq!(cli.color_override(), Some(false));
        assert!(!cli.use_colors());
        assert!(cli.verbose);
        assert!(cli.debug);
        assert!(cli.check_config);
    }

    #[test]
    fn test_invalid_arguments_rejected() {
        assert!(Cli::try_parse_from(["nprober", "--interval", "0"]).is_err());
        assert!(Cli::try_parse_from(["nprober", "--timeout", "+5"]).is_err());
        assert!(Cli::try_parse_from(["nprober", "--log-format", "xml"]).is_err());
        assert!(Cli::try_parse_from(["nprober", "--port", "70000"]).is_err());
        assert!(Cli::try_parse_from(["nprober", "--color", "--no-color"]).is_err());
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!(parse_duration("15"), Ok(15));
        assert_eq!(parse_duration("3600"), Ok(3600));
        assert!(parse_duration("3601").is_err());
        assert!(parse_duration("0x10").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1").is_err());
    }
}
