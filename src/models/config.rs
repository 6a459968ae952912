//! Configuration data model and validation

use crate::logging::LogFormat;
use crate::models::probe::{ProbeSpec, ProbeVariant};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// One `probes:` entry as written in the configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeEntry {
    /// Host name or IP address
    pub host: String,

    /// Optional display name used as the destination label
    #[serde(default)]
    pub name: Option<String>,

    /// Single probe type
    #[serde(default, rename = "type")]
    pub kind: Option<ProbeVariant>,

    /// Several probe types against the same host
    #[serde(default)]
    pub types: Vec<ProbeVariant>,

    /// Destination port
    #[serde(default)]
    pub port: Option<u16>,
}

impl ProbeEntry {
    pub fn new(host: impl Into<String>, variant: ProbeVariant) -> Self {
        Self {
            host: host.into(),
            name: None,
            kind: Some(variant),
            types: Vec::new(),
            port: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Variants of this entry in declaration order, without duplicates
    pub fn variants(&self) -> Vec<ProbeVariant> {
        let mut variants = Vec::new();
        for variant in self.kind.iter().chain(self.types.iter()) {
            if !variants.contains(variant) {
                variants.push(*variant);
            }
        }
        variants
    }

    fn validate(&self) -> Result<()> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(AppError::config("Probe host cannot be empty"));
        }

        if host.parse::<IpAddr>().is_err() {
            match url::Host::parse(host) {
                Ok(url::Host::Domain(_)) | Ok(url::Host::Ipv4(_)) => {}
                Ok(url::Host::Ipv6(_)) => {
                    return Err(AppError::config(format!("Probe host '{}' must be written without brackets", host)));
                }
                Err(e) => {
                    return Err(AppError::config(format!("Invalid probe host '{}': {}", host, e)));
                }
            }
        }

        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(AppError::config(format!("Probe name for host '{}' cannot be empty", host)));
            }
        }

        let variants = self.variants();
        if variants.is_empty() {
            return Err(AppError::config(format!("Probe for host '{}' has no type", host)));
        }

        for variant in variants {
            if variant.requires_port() && self.port.is_none() {
                return Err(AppError::config(format!("Probe {} for host '{}' requires a port", variant, host)));
            }
            if !variant.accepts_port() && self.port.is_some() {
                return Err(AppError::config(format!("Probe {} for host '{}' does not take a port", variant, host)));
            }
            if variant == ProbeVariant::IcmpEcho && matches!(host.parse::<IpAddr>(), Ok(IpAddr::V6(_))) {
                return Err(AppError::config(format!("Probe icmp-echo only supports IPv4 destinations, got '{}'", host)));
            }
        }

        Ok(())
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Probe targets
    #[serde(default)]
    pub probes: Vec<ProbeEntry>,

    /// Tick interval, start to start
    #[serde(default = "default_interval_secs")]
    pub interval_seconds: u64,

    /// Per-attempt timeout, strictly shorter than the interval
    #[serde(default = "default_timeout_secs")]
    pub timeout_seconds: u64,

    /// Address the metrics endpoint binds to
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port of the metrics endpoint
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bounds of the duration histogram buckets, in seconds
    #[serde(default = "default_histogram_buckets")]
    pub histogram_buckets: Vec<f64>,

    /// Publish the public IP address as a metric
    #[serde(default, alias = "ip")]
    pub public_ip: bool,

    /// Period of the public IP lookup
    #[serde(default = "default_public_ip_interval_secs")]
    pub public_ip_interval_seconds: u64,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Enable colored terminal output
    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    /// Enable verbose output
    #[serde(default)]
    pub verbose: bool,

    /// Enable debug output
    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probes: Vec::new(),
            interval_seconds: default_interval_secs(),
            timeout_seconds: default_timeout_secs(),
            listen_address: default_listen_address(),
            port: default_port(),
            histogram_buckets: default_histogram_buckets(),
            public_ip: false,
            public_ip_interval_seconds: default_public_ip_interval_secs(),
            log_format: LogFormat::default(),
            enable_color: default_enable_color(),
            verbose: false,
            debug: false,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Get tick interval as Duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Get per-attempt timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Get public IP lookup period as Duration
    pub fn public_ip_interval(&self) -> Duration {
        Duration::from_secs(self.public_ip_interval_seconds)
    }

    /// Socket address of the metrics endpoint
    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.listen_address.trim().parse().map_err(|e| {
            AppError::config(format!("Invalid listen address '{}': {}", self.listen_address, e))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Whether any configured probe needs an ICMP socket
    pub fn uses_icmp(&self) -> bool {
        self.probes
            .iter()
            .any(|entry| entry.variants().contains(&ProbeVariant::IcmpEcho))
    }

    /// Expand the probe entries into one spec per (host, variant)
    pub fn probe_specs(&self) -> Result<Vec<ProbeSpec>> {
        let mut specs = Vec::new();
        let mut seen = HashSet::new();

        for entry in &self.probes {
            entry.validate()?;

            for variant in entry.variants() {
                let mut spec = ProbeSpec::new(entry.host.trim(), variant, entry.port);
                if let Some(name) = &entry.name {
                    spec = spec.with_name(name.trim());
                }

                if !seen.insert((spec.variant, spec.label().to_string())) {
                    return Err(AppError::config(format!(
                        "Duplicate probe {} for destination '{}'; set distinct names",
                        spec.variant,
                        spec.label()
                    )));
                }
                specs.push(spec);
            }
        }

        Ok(specs)
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Result<()> {
        if self.probes.is_empty() && !self.public_ip {
            return Err(AppError::config("No probes configured"));
        }

        self.probe_specs()?;

        if self.interval_seconds == 0 {
            return Err(AppError::config("Interval must be greater than 0"));
        }

        if self.timeout_seconds == 0 {
            return Err(AppError::config("Timeout must be greater than 0"));
        }

        if self.timeout_seconds >= self.interval_seconds {
            return Err(AppError::config(format!(
                "Timeout ({}s) must be shorter than the interval ({}s)",
                self.timeout_seconds, self.interval_seconds
            )));
        }

        if self.public_ip && self.public_ip_interval_seconds == 0 {
            return Err(AppError::config("Public IP interval must be greater than 0"));
        }

        if self.port == 0 {
            return Err(AppError::config("Metrics port must be greater than 0"));
        }

        self.listen_socket_addr()?;

        validate_buckets(&self.histogram_buckets)?;

        Ok(())
    }
}

/// Bucket bounds must be finite, positive and strictly increasing
pub fn validate_buckets(buckets: &[f64]) -> Result<()> {
    if buckets.is_empty() {
        return Err(AppError::config("Histogram buckets cannot be empty"));
    }

    for bound in buckets {
        if !bound.is_finite() || *bound <= 0.0 {
            return Err(AppError::config(format!("Invalid histogram bucket bound: {}", bound)));
        }
    }

    if buckets.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(AppError::config("Histogram buckets must be strictly increasing"));
    }

    Ok(())
}

// Default value functions for serde
fn default_interval_secs() -> u64 {
    crate::defaults::DEFAULT_INTERVAL.as_secs()
}

fn default_timeout_secs() -> u64 {
    crate::defaults::DEFAULT_TIMEOUT.as_secs()
}

fn default_listen_address() -> String {
    crate::defaults::DEFAULT_LISTEN_ADDRESS.to_string()
}

fn default_port() -> u16 {
    crate::defaults::DEFAULT_PORT
}

fn default_histogram_buckets() -> Vec<f64> {
    crate::defaults::DEFAULT_HISTOGRAM_BUCKETS.to_vec()
}

fn default_public_ip_interval_secs() -> u64 {
    crate::defaults::DEFAULT_PUBLIC_IP_INTERVAL.as_secs()
}

fn default_enable_color() -> bool {
    crate::defaults::DEFAULT_ENABLE_COLOR
}
