//! Error handling for the network prober
//!
//! Only startup and infrastructure failures surface as [`AppError`]. Failures of
//! individual probe attempts are never errors: they are classified into a
//! [`crate::models::FailureReason`] inside the executor and recorded as metrics.

use thiserror::Error;

/// Custom error types for the network prober
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Parsing errors (hosts, numbers, etc.)
    #[error("Parsing error: {0}")]
    Parse(String),

    /// A configured probe variant needs a privilege the process does not hold
    #[error("Privilege error: {0}")]
    Privilege(String),

    /// Network setup errors (not per-attempt failures)
    #[error("Network error: {0}")]
    Network(String),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Exposition server errors
    #[error("Server error: {0}")]
    Server(String),

    /// Metric registry errors
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new parsing error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse(message.into())
    }

    /// Create a new privilege error
    pub fn privilege<S: Into<String>>(message: S) -> Self {
        Self::Privilege(message.into())
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network(message.into())
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io(message.into())
    }

    /// Create a new server error
    pub fn server<S: Into<String>>(message: S) -> Self {
        Self::Server(message.into())
    }

    /// Create a new metrics error
    pub fn metrics<S: Into<String>>(message: S) -> Self {
        Self::Metrics(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Parse(_) => "PARSE",
            Self::Privilege(_) => "PRIVILEGE",
            Self::Network(_) => "NETWORK",
            Self::Io(_) => "IO",
            Self::Server(_) => "SERVER",
            Self::Metrics(_) => "METRICS",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Get user-friendly error message with suggestions
    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::Config(msg) => {
                format!("Configuration problem: {}\n\nSuggestion: Check the config file passed with --config-path, PROBER_* environment variables and command line arguments.", msg)
            }
            Self::Parse(msg) => {
                format!("Failed to parse data: {}\n\nSuggestion: Check the format of hosts, ports and durations in the configuration.", msg)
            }
            Self::Privilege(msg) => {
                format!("Missing privilege: {}\n\nSuggestion: Run as root, grant CAP_NET_RAW (setcap cap_net_raw+ep), widen net.ipv4.ping_group_range, or remove icmp-echo probes.", msg)
            }
            Self::Network(msg) => {
                format!("Network setup failed: {}\n\nSuggestion: Check that the listen address exists on this host.", msg)
            }
            Self::Io(msg) => {
                format!("File operation failed: {}\n\nSuggestion: Check file permissions and paths.", msg)
            }
            Self::Server(msg) => {
                format!("Metrics server failed: {}\n\nSuggestion: Check that the port is free (--port) and permitted.", msg)
            }
            Self::Metrics(msg) => {
                format!("Metric registry failed: {}\n\nSuggestion: Check histogram_buckets in the configuration.", msg)
            }
            Self::Internal(msg) => {
                format!("Internal error: {}\n\nThis is likely a bug. Please report this issue with the error details.", msg)
            }
        }
    }

    /// Get exit code for this error type
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Parse(_) => 1, // Invalid configuration/usage
            Self::Network(_) => 2,
            Self::Privilege(_) => 4,
            Self::Io(_) | Self::Server(_) => 5,
            Self::Metrics(_) => 6,
            Self::Internal(_) => 99,
        }
    }

    /// Format error for console display with color coding
    pub fn format_for_console(&self, use_color: bool) -> String {
        let category = self.category();
        let message = self.to_string();

        if use_color {
            use colored::Colorize;
            match self {
                Self::Config(_) | Self::Parse(_) => {
                    format!("[{}] {}", category.red().bold(), message.red())
                }
                Self::Network(_) | Self::Server(_) => {
                    format!("[{}] {}", category.yellow().bold(), message.yellow())
                }
                Self::Privilege(_) => {
                    format!("[{}] {}", category.magenta().bold(), message.magenta())
                }
                Self::Io(_) | Self::Metrics(_) => {
                    format!("[{}] {}", category.cyan().bold(), message.cyan())
                }
                Self::Internal(_) => {
                    format!("[{}] {}", category.bright_red().bold(), message.bright_red())
                }
            }
        } else {
            format!("[{}] {}", category, message)
        }
    }
}

// Standard library error conversions
impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::io(error.to_string())
    }
}

impl From<std::fmt::Error> for AppError {
    fn from(error: std::fmt::Error) -> Self {
        Self::internal(format!("Formatting error: {}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        Self::config(error.to_string())
    }
}

impl From<dotenv::Error> for AppError {
    fn from(error: dotenv::Error) -> Self {
        Self::config(format!("Environment file error: {}", error))
    }
}

impl From<prometheus::Error> for AppError {
    fn from(error: prometheus::Error) -> Self {
        Self::metrics(error.to_string())
    }
}

impl From<trust_dns_resolver::error::ResolveError> for AppError {
    fn from(error: trust_dns_resolver::error::ResolveError) -> Self {
        Self::network(format!("DNS resolution error: {}", error))
    }
}

/// Custom Result type for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Error reporter for fatal diagnostics on stderr
pub struct ErrorReporter {
    pub use_color: bool,
    pub verbose: bool,
}

impl ErrorReporter {
    /// Create a new error reporter
    pub fn new(use_color: bool, verbose: bool) -> Self {
        Self { use_color, verbose }
    }

    /// Report an error to the user
    pub fn report_error(&self, error: &AppError) {
        eprintln!("{}", error.format_for_console(self.use_color));

        if self.verbose {
            eprintln!();
            eprintln!("{}", error.user_friendly_message());
        }
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}
