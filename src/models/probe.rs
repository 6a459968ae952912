//! Probe target and outcome data models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default destination port for both DNS variants
pub const DNS_PORT: u16 = 53;

/// Measurement protocol of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeVariant {
    /// ICMP echo request / reply
    #[serde(alias = "icmp", alias = "icmp-ping")]
    IcmpEcho,
    /// TCP connection establishment, no payload
    #[serde(alias = "tcp", alias = "tcp-ping")]
    TcpHandshake,
    /// One DNS query over UDP
    #[serde(alias = "dns-udp", alias = "udp-dns-ping")]
    UdpDnsQuery,
    /// One DNS query over TCP
    #[serde(alias = "dns-tcp", alias = "tcp-dns-ping")]
    TcpDnsQuery,
}

impl ProbeVariant {
    /// All variants, in exposition order
    pub const ALL: [ProbeVariant; 4] = [
        ProbeVariant::IcmpEcho,
        ProbeVariant::TcpHandshake,
        ProbeVariant::UdpDnsQuery,
        ProbeVariant::TcpDnsQuery,
    ];

    /// Identifier used in configuration and as the `variant` metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeVariant::IcmpEcho => "icmp-echo",
            ProbeVariant::TcpHandshake => "tcp-handshake",
            ProbeVariant::UdpDnsQuery => "udp-dns-query",
            ProbeVariant::TcpDnsQuery => "tcp-dns-query",
        }
    }

    /// Whether a destination port must be configured
    pub fn requires_port(&self) -> bool {
        matches!(self, ProbeVariant::TcpHandshake)
    }

    /// Whether a destination port may be configured at all
    pub fn accepts_port(&self) -> bool {
        !matches!(self, ProbeVariant::IcmpEcho)
    }

    /// Port used when none is configured
    pub fn default_port(&self) -> Option<u16> {
        match self {
            ProbeVariant::UdpDnsQuery | ProbeVariant::TcpDnsQuery => Some(DNS_PORT),
            ProbeVariant::IcmpEcho | ProbeVariant::TcpHandshake => None,
        }
    }
}

impl fmt::Display for ProbeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProbeVariant {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "icmp-echo" | "icmp" | "icmp-ping" => Ok(ProbeVariant::IcmpEcho),
            "tcp-handshake" | "tcp" | "tcp-ping" => Ok(ProbeVariant::TcpHandshake),
            "udp-dns-query" | "dns-udp" | "udp-dns-ping" => Ok(ProbeVariant::UdpDnsQuery),
            "tcp-dns-query" | "dns-tcp" | "tcp-dns-ping" => Ok(ProbeVariant::TcpDnsQuery),
            other => Err(crate::error::AppError::parse(format!("Unknown probe type: {}", other))),
        }
    }
}

/// Immutable description of one measurement target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeSpec {
    /// Host name or IP address
    pub destination: String,
    /// Measurement protocol
    pub variant: ProbeVariant,
    /// Destination port, already defaulted for DNS variants
    pub port: Option<u16>,
    /// Optional display name, used as the `destination` label when present
    pub name: Option<String>,
}

impl ProbeSpec {
    pub fn new(destination: impl Into<String>, variant: ProbeVariant, port: Option<u16>) -> Self {
        Self {
            destination: destination.into(),
            variant,
            port: port.or_else(|| variant.default_port()),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Value of the `destination` metric label
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.destination)
    }

    /// `host:port` style target used in log lines
    pub fn target(&self) -> String {
        match self.port {
            Some(port) if self.destination.contains(':') => format!("[{}]:{}", self.destination, port),
            Some(port) => format!("{}:{}", self.destination, port),
            None => self.destination.clone(),
        }
    }
}

impl fmt::Display for ProbeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.variant, self.target())
    }
}

/// Classified reason of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    Timeout,
    Unreachable,
    Refused,
    MalformedResponse,
    PermissionDenied,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Unreachable => "unreachable",
            FailureReason::Refused => "refused",
            FailureReason::MalformedResponse => "malformed-response",
            FailureReason::PermissionDenied => "permission-denied",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of exactly one probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success { duration: Duration },
    Failure { reason: FailureReason },
}

impl ProbeOutcome {
    pub fn success(duration: Duration) -> Self {
        Self::Success { duration }
    }

    pub fn failure(reason: FailureReason) -> Self {
        Self::Failure { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }

    /// Duration in seconds for successful outcomes
    pub fn duration_secs(&self) -> Option<f64> {
        match self {
            ProbeOutcome::Success { duration } => Some(duration.as_secs_f64()),
            ProbeOutcome::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ProbeOutcome::Success { .. } => None,
            ProbeOutcome::Failure { reason } => Some(*reason),
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Success { duration } => write!(f, "success in {:.3}ms", duration.as_secs_f64() * 1000.0),
            ProbeOutcome::Failure { reason } => write!(f, "failure ({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_identifiers() {
        for variant in ProbeVariant::ALL {
            let parsed: ProbeVariant = variant.as_str().parse().unwrap();
            assert_eq!(parsed, variant);
        }
    }

    #[test]
    fn test_variant_aliases() {
        assert_eq!("icmp".parse::<ProbeVariant>().unwrap(), ProbeVariant::IcmpEcho);
        assert_eq!("tcp-ping".parse::<ProbeVariant>().unwrap(), ProbeVariant::TcpHandshake);
        assert_eq!("dns-udp".parse::<ProbeVariant>().unwrap(), ProbeVariant::UdpDnsQuery);
        assert_eq!("DNS-TCP".parse::<ProbeVariant>().unwrap(), ProbeVariant::TcpDnsQuery);
        assert!("http".parse::<ProbeVariant>().is_err());
    }

    #[test]
    fn test_port_rules() {
        assert!(ProbeVariant::TcpHandshake.requires_port());
        assert!(!ProbeVariant::TcpDnsQuery.requires_port());
        assert!(!ProbeVariant::IcmpEcho.accepts_port());
        assert_eq!(ProbeVariant::UdpDnsQuery.default_port(), Some(DNS_PORT));
        assert_eq!(ProbeVariant::TcpHandshake.default_port(), None);
    }

    #[test]
    fn test_spec_defaults_dns_port() {
        let spec = ProbeSpec::new("9.9.9.9", ProbeVariant::UdpDnsQuery, None);
        assert_eq!(spec.port, Some(53));
        assert_eq!(spec.target(), "9.9.9.9:53");

        let spec = ProbeSpec::new("9.9.9.9", ProbeVariant::TcpDnsQuery, Some(5353));
        assert_eq!(spec.port, Some(5353));
    }

    #[test]
    fn test_spec_label_prefers_name() {
        let spec = ProbeSpec::new("1.1.1.1", ProbeVariant::IcmpEcho, None);
        assert_eq!(spec.label(), "1.1.1.1");

        let spec = spec.with_name("cloudflare");
        assert_eq!(spec.label(), "cloudflare");
    }

    #[test]
    fn test_ipv6_target_formatting() {
        let spec = ProbeSpec::new("2606:4700:4700::1111", ProbeVariant::TcpHandshake, Some(443));
        assert_eq!(spec.target(), "[2606:4700:4700::1111]:443");
    }

    #[test]
    fn test_outcome_accessors() {
        let success = ProbeOutcome::success(Duration::from_millis(20));
        assert!(success.is_success());
        assert!((success.duration_secs().unwrap() - 0.020).abs() < 1e-9);
        assert_eq!(success.failure_reason(), None);

        let failure = ProbeOutcome::failure(FailureReason::MalformedResponse);
        assert!(!failure.is_success());
        assert_eq!(failure.duration_secs(), None);
        assert_eq!(failure.failure_reason(), Some(FailureReason::MalformedResponse));
        assert_eq!(failure.to_string(), "failure (malformed-response)");
    }
}
