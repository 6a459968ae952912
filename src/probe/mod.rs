//! Probe executors
//!
//! A probe performs exactly one measurement attempt against its target and
//! classifies the result. Attempts never return errors: every I/O problem is
//! mapped to a [`FailureReason`]. The set of executors is closed over
//! [`ProbeVariant`]; the [`Probe`] trait is the seam the scheduler works with.

pub mod dns;
pub mod icmp;
pub mod tcp;

pub use dns::{DnsProbe, DnsTransport};
pub use icmp::{IcmpMode, IcmpProbe};
pub use tcp::TcpProbe;

use crate::error::Result;
use crate::models::{FailureReason, ProbeOutcome, ProbeSpec, ProbeVariant};
use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One measurement attempt against a fixed target
#[async_trait]
pub trait Probe: Send + Sync {
    /// Target description this probe was built from
    fn spec(&self) -> &ProbeSpec;

    /// Perform one attempt, returning within `timeout`
    async fn attempt(&self, timeout: Duration) -> ProbeOutcome;
}

/// Closed set of executors, one per probe variant
#[derive(Debug)]
pub enum ProbeExecutor {
    Icmp(IcmpProbe),
    Tcp(TcpProbe),
    Dns(DnsProbe),
}

impl ProbeExecutor {
    /// Build the executor for one spec. ICMP specs need the mode selected at startup.
    pub fn from_spec(spec: ProbeSpec, icmp_mode: Option<IcmpMode>) -> Result<Self> {
        let executor = match spec.variant {
            ProbeVariant::IcmpEcho => {
                let mode = match icmp_mode {
                    Some(mode) => mode,
                    None => IcmpMode::detect()?,
                };
                ProbeExecutor::Icmp(IcmpProbe::new(spec, mode))
            }
            ProbeVariant::TcpHandshake => ProbeExecutor::Tcp(TcpProbe::new(spec)?),
            ProbeVariant::UdpDnsQuery => ProbeExecutor::Dns(DnsProbe::new(spec, DnsTransport::Udp)?),
            ProbeVariant::TcpDnsQuery => ProbeExecutor::Dns(DnsProbe::new(spec, DnsTransport::Tcp)?),
        };
        Ok(executor)
    }
}

#[async_trait]
impl Probe for ProbeExecutor {
    fn spec(&self) -> &ProbeSpec {
        match self {
            ProbeExecutor::Icmp(probe) => probe.spec(),
            ProbeExecutor::Tcp(probe) => probe.spec(),
            ProbeExecutor::Dns(probe) => probe.spec(),
        }
    }

    async fn attempt(&self, timeout: Duration) -> ProbeOutcome {
        match self {
            ProbeExecutor::Icmp(probe) => probe.attempt(timeout).await,
            ProbeExecutor::Tcp(probe) => probe.attempt(timeout).await,
            ProbeExecutor::Dns(probe) => probe.attempt(timeout).await,
        }
    }
}

/// Build one executor per spec.
///
/// The ICMP socket mode is detected once, and only when an `icmp-echo` spec is
/// present. Missing privilege is reported here, before any tick runs.
pub fn build_probes(specs: &[ProbeSpec]) -> Result<Vec<Arc<dyn Probe>>> {
    build_probes_with(specs, IcmpMode::detect)
}

/// [`build_probes`] with a custom ICMP mode detection
pub fn build_probes_with<D>(specs: &[ProbeSpec], detect_icmp: D) -> Result<Vec<Arc<dyn Probe>>>
where
    D: FnOnce() -> Result<IcmpMode>,
{
    let icmp_mode = if specs.iter().any(|spec| spec.variant == ProbeVariant::IcmpEcho) {
        let mode = detect_icmp()?;
        info!(mode = %mode, "ICMP socket available");
        Some(mode)
    } else {
        None
    };

    specs
        .iter()
        .cloned()
        .map(|spec| {
            ProbeExecutor::from_spec(spec, icmp_mode).map(|executor| Arc::new(executor) as Arc<dyn Probe>)
        })
        .collect()
}

/// Map an I/O error from a probe attempt to a failure reason
pub fn classify_io_error(error: &io::Error) -> FailureReason {
    match error.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => FailureReason::Refused,
        io::ErrorKind::PermissionDenied => FailureReason::PermissionDenied,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => FailureReason::Timeout,
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => FailureReason::MalformedResponse,
        _ => FailureReason::Unreachable,
    }
}

/// Resolve a destination inside an attempt. Failed resolution is `unreachable`.
pub(crate) async fn resolve(host: &str, port: u16, ipv4_only: bool) -> std::result::Result<SocketAddr, FailureReason> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        if ipv4_only && !ip.is_ipv4() {
            return Err(FailureReason::Unreachable);
        }
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        debug!(host, error = %e, "name resolution failed");
        FailureReason::Unreachable
    })?;

    let mut fallback = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Ok(addr);
        }
        if !ipv4_only && fallback.is_none() {
            fallback = Some(addr);
        }
    }

    fallback.ok_or(FailureReason::Unreachable)
}

/// Run a measurement under a hard deadline and turn it into an outcome
pub(crate) async fn run_with_timeout<F>(timeout: Duration, measurement: F) -> ProbeOutcome
where
    F: Future<Output = std::result::Result<Duration, FailureReason>>,
{
    match tokio::time::timeout(timeout, measurement).await {
        Ok(Ok(duration)) => ProbeOutcome::success(duration),
        Ok(Err(reason)) => ProbeOutcome::failure(reason),
        Err(_) => ProbeOutcome::failure(FailureReason::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_error() {
        let cases = [
            (io::ErrorKind::ConnectionRefused, FailureReason::Refused),
            (io::ErrorKind::ConnectionReset, FailureReason::Refused),
            (io::ErrorKind::PermissionDenied, FailureReason::PermissionDenied),
            (io::ErrorKind::TimedOut, FailureReason::Timeout),
            (io::ErrorKind::UnexpectedEof, FailureReason::MalformedResponse),
            (io::ErrorKind::InvalidData, FailureReason::MalformedResponse),
            (io::ErrorKind::AddrNotAvailable, FailureReason::Unreachable),
            (io::ErrorKind::Other, FailureReason::Unreachable),
        ];

        for (kind, expected) in cases {
            let error = io::Error::new(kind, "test");
            assert_eq!(classify_io_error(&error), expected, "{:?}", kind);
        }
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let addr = resolve("127.0.0.1", 53, true).await.unwrap();
        assert_eq!(addr, "127.0.0.1:53".parse().unwrap());

        let addr = resolve("::1", 53, false).await.unwrap();
        assert_eq!(addr, "[::1]:53".parse().unwrap());

        assert_eq!(resolve("::1", 0, true).await, Err(FailureReason::Unreachable));
    }

    #[tokio::test]
    async fn test_resolve_failure_is_unreachable() {
        let result = resolve("does-not-exist.invalid", 80, false).await;
        assert_eq!(result, Err(FailureReason::Unreachable));
    }

    #[tokio::test]
    async fn test_run_with_timeout() {
        let outcome = run_with_timeout(Duration::from_millis(50), async { Ok(Duration::from_millis(3)) }).await;
        assert_eq!(outcome, ProbeOutcome::success(Duration::from_millis(3)));

        let outcome = run_with_timeout(Duration::from_millis(50), async { Err(FailureReason::Refused) }).await;
        assert_eq!(outcome, ProbeOutcome::failure(FailureReason::Refused));

        let outcome = run_with_timeout(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Duration::ZERO)
        })
        .await;
        assert_eq!(outcome, ProbeOutcome::failure(FailureReason::Timeout));
    }

    #[test]
    fn test_build_probes_without_icmp() {
        let specs = vec![
            ProbeSpec::new("127.0.0.1", ProbeVariant::TcpHandshake, Some(80)),
            ProbeSpec::new("127.0.0.1", ProbeVariant::UdpDnsQuery, None),
            ProbeSpec::new("127.0.0.1", ProbeVariant::TcpDnsQuery, None),
        ];
        let probes = build_probes_with(&specs, || panic!("no icmp-echo spec, no detection")).unwrap();
        assert_eq!(probes.len(), 3);
        assert_eq!(probes[1].spec().variant, ProbeVariant::UdpDnsQuery);
    }

    #[test]
    fn test_build_probes_stops_without_icmp_privilege() {
        let specs = vec![
            ProbeSpec::new("127.0.0.1", ProbeVariant::TcpHandshake, Some(80)),
            ProbeSpec::new("127.0.0.1", ProbeVariant::IcmpEcho, None),
        ];
        let denied = || IcmpMode::detect_with(|_| Err(io::Error::from(io::ErrorKind::PermissionDenied)));

        let error = build_probes_with(&specs, denied).err().unwrap();
        assert_eq!(error.category(), "PRIVILEGE");
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn test_build_probes_uses_detected_icmp_mode() {
        let specs = vec![
            ProbeSpec::new("127.0.0.1", ProbeVariant::IcmpEcho, None),
            ProbeSpec::new("127.0.0.2", ProbeVariant::IcmpEcho, None),
        ];
        let mut detections = 0;
        let probes = build_probes_with(&specs, || {
            detections += 1;
            Ok(IcmpMode::Datagram)
        })
        .unwrap();

        assert_eq!(detections, 1);
        assert_eq!(probes.len(), 2);
        assert!(probes.iter().all(|probe| probe.spec().variant == ProbeVariant::IcmpEcho));
    }
}
