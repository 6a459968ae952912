//! Configuration validation utilities and rules
//!
//! [`Config::validate`] rejects configurations the prober cannot run. The
//! checks here go further and produce non-fatal warnings, shown by
//! `--check-config` and logged at startup.

use crate::{
    error::Result,
    models::{Config, ProbeSpec, ProbeVariant},
};
use std::net::IpAddr;

/// Probe sets larger than this are probably a configuration mistake
pub const MAX_RECOMMENDED_PROBES: usize = 256;

/// Intervals shorter than this put noticeable load on the targets
pub const MIN_RECOMMENDED_INTERVAL_SECS: u64 = 5;

/// Configuration validator with advanced validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate configuration with comprehensive checks
    pub fn validate_comprehensive(config: &Config) -> Result<Vec<ValidationWarning>> {
        let mut warnings = Vec::new();

        // Basic validation first, fatal on error
        config.validate()?;
        let specs = config.probe_specs()?;

        warnings.extend(Self::validate_probe_targets(&specs));
        warnings.extend(Self::validate_timing_settings(config));

        if specs.len() > MAX_RECOMMENDED_PROBES {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Configuration expands to {} probes (recommended: <= {})",
                    specs.len(),
                    MAX_RECOMMENDED_PROBES
                ),
            ));
        }

        Ok(warnings)
    }

    /// Per-target checks
    fn validate_probe_targets(specs: &[ProbeSpec]) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        for spec in specs {
            if spec.port == Some(0) {
                warnings.push(ValidationWarning::new(
                    ValidationLevel::Warning,
                    format!("Probe {} uses port 0, which no server listens on", spec),
                ));
            }

            if let Ok(ip) = spec.destination.parse::<IpAddr>() {
                if Self::is_local_address(&ip) {
                    warnings.push(ValidationWarning::new(
                        ValidationLevel::Info,
                        format!("Probe {} targets a private or loopback address", spec),
                    ));
                }

                if matches!(spec.variant, ProbeVariant::UdpDnsQuery | ProbeVariant::TcpDnsQuery)
                    && Self::is_known_public_dns(&ip)
                {
                    warnings.push(ValidationWarning::new(
                        ValidationLevel::Info,
                        format!("Probe {} targets a well-known public DNS server", spec),
                    ));
                }
            }
        }

        warnings
    }

    /// Cadence related checks
    fn validate_timing_settings(config: &Config) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if config.interval_seconds < MIN_RECOMMENDED_INTERVAL_SECS {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Warning,
                format!(
                    "Interval of {}s is shorter than the recommended {}s",
                    config.interval_seconds, MIN_RECOMMENDED_INTERVAL_SECS
                ),
            ));
        }

        // A slow tick may then still be running when the next one fires
        if config.timeout_seconds * 2 > config.interval_seconds {
            warnings.push(ValidationWarning::new(
                ValidationLevel::Info,
                format!(
                    "Timeout of {}s is more than half the {}s interval, ticks may overlap",
                    config.timeout_seconds, config.interval_seconds
                ),
            ));
        }

        warnings
    }

    fn is_local_address(ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(ipv4) => ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local(),
            // Unique local fc00::/7
            IpAddr::V6(ipv6) => ipv6.is_loopback() || (ipv6.segments()[0] & 0xfe00) == 0xfc00,
        }
    }

    /// Check if IP is a known public DNS server
    fn is_known_public_dns(ip: &IpAddr) -> bool {
        let known_dns = [
            "8.8.8.8",         // Google DNS
            "8.8.4.4",         // Google DNS
            "1.1.1.1",         // Cloudflare DNS
            "1.0.0.1",         // Cloudflare DNS
            "208.67.222.222",  // OpenDNS
            "208.67.220.220",  // OpenDNS
            "9.9.9.9",         // Quad9 DNS
            "149.112.112.112", // Quad9 DNS
            "2001:4860:4860::8888",
            "2001:4860:4860::8844",
            "2606:4700:4700::1111",
            "2606:4700:4700::1001",
            "2620:fe::fe",
            "2620:fe::9",
        ];

        known_dns
            .iter()
            .filter_map(|known| known.parse::<IpAddr>().ok())
            .any(|known| known == *ip)
    }
}

/// Validation warning levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLevel {
    Info,
    Warning,
}

impl ValidationLevel {
    /// Get display string for level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }
}

/// Configuration validation warning
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    pub level: ValidationLevel,
    pub message: String,
}

impl ValidationWarning {
    /// Create a new validation warning
    pub fn new(level: ValidationLevel, message: String) -> Self {
        Self { level, message }
    }

    /// Format warning for display
    pub fn format(&self, use_color: bool) -> String {
        if use_color {
            use colored::Colorize;
            let label = match self.level {
                ValidationLevel::Info => self.level.as_str().blue().bold(),
                ValidationLevel::Warning => self.level.as_str().yellow().bold(),
            };
            format!("[{}] {}", label, self.message)
        } else {
            format!("[{}] {}", self.level.as_str(), self.message)
        }
    }
}

/// Convenience function for comprehensive configuration validation
pub fn validate_config(config: &Config) -> Result<Vec<ValidationWarning>> {
    ConfigValidator::validate_comprehensive(config)
}
