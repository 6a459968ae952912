//! Network Prober
//!
//! Periodically probes network hosts over ICMP echo, TCP handshake and DNS
//! queries (UDP or TCP), aggregates outcomes into per-destination counters and
//! histograms, and serves them in the Prometheus text exposition format.

pub mod app;
pub mod cli;
pub mod config;
pub mod dns;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod output;
pub mod probe;
pub mod scheduler;
pub mod server;

// Re-export commonly used types
pub use error::{AppError, Result};
pub use metrics::MetricRegistry;
pub use models::{Config, FailureReason, ProbeOutcome, ProbeSpec, ProbeVariant};
pub use probe::Probe;
pub use scheduler::Scheduler;

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Build metadata set by build.rs
pub const BUILD_TIME: &str = env!("BUILD_TIME");
pub const GIT_COMMIT: Option<&str> = option_env!("GIT_COMMIT");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    pub const DEFAULT_CONFIG_PATH: &str = "/etc/prober/config.yml";
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 8000;
    pub const DEFAULT_HISTOGRAM_BUCKETS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
    ];
    pub const DEFAULT_PUBLIC_IP_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_ENABLE_COLOR: bool = true;
}
