//! Public IP lookup
//!
//! Google's `ns1.google.com` answers a TXT query for `o-o.myaddr.l.google.com`
//! with the address the query came from. The job asks it over TCP every period
//! and publishes the answer as `prober_public_ip_info{ip}`.

use crate::error::{AppError, Result};
use crate::metrics::MetricRegistry;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use trust_dns_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use trust_dns_resolver::{system_conf, TokioAsyncResolver};

/// Authoritative server that reflects the client address
pub const SELF_IP_SERVER: &str = "ns1.google.com.";
/// TXT name answered with the client address
pub const SELF_IP_NAME: &str = "o-o.myaddr.l.google.com.";

/// Anything that can tell us our public address
#[async_trait]
pub trait PublicIpSource: Send + Sync {
    async fn lookup(&self) -> Result<IpAddr>;
}

/// Looks up the public address through Google's reflecting name server
pub struct GooglePublicIp {
    system_resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl GooglePublicIp {
    /// Use the system resolver to find the reflecting server
    pub fn new(timeout: Duration) -> Result<Self> {
        let (config, mut opts) = match system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                warn!(error = %e, "cannot read system DNS config, using Google resolvers");
                (ResolverConfig::google(), ResolverOpts::default())
            }
        };
        opts.timeout = timeout;

        Ok(Self {
            system_resolver: TokioAsyncResolver::tokio(config, opts),
            timeout,
        })
    }

    /// Resolver that talks to one name server over TCP, without retries
    fn direct_resolver(&self, server: IpAddr) -> TokioAsyncResolver {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(SocketAddr::new(server, 53), Protocol::Tcp));

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 1;
        opts.cache_size = 0;

        TokioAsyncResolver::tokio(config, opts)
    }
}

#[async_trait]
impl PublicIpSource for GooglePublicIp {
    async fn lookup(&self) -> Result<IpAddr> {
        let addresses = self.system_resolver.lookup_ip(SELF_IP_SERVER).await?;
        let server = addresses
            .iter()
            .find(IpAddr::is_ipv4)
            .or_else(|| addresses.iter().next())
            .ok_or_else(|| AppError::network(format!("No address for {}", SELF_IP_SERVER)))?;
        debug!(%server, "resolved public ip server");

        let answer = self.direct_resolver(server).txt_lookup(SELF_IP_NAME).await?;
        let strings = answer.iter().flat_map(|txt| {
            txt.txt_data()
                .iter()
                .map(|data| String::from_utf8_lossy(data).into_owned())
                .collect::<Vec<_>>()
        });

        parse_public_ip(strings)
    }
}

/// First TXT string that is an IP address
pub fn parse_public_ip<I>(strings: I) -> Result<IpAddr>
where
    I: IntoIterator<Item = String>,
{
    strings
        .into_iter()
        .find_map(|value| value.trim().trim_matches('"').parse::<IpAddr>().ok())
        .ok_or_else(|| AppError::network("Public IP answer contained no address"))
}

/// Periodically publish the public address until `shutdown` turns true
pub async fn run_public_ip_job(
    source: Arc<dyn PublicIpSource>,
    metrics: Arc<MetricRegistry>,
    period: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut current: Option<IpAddr> = None;

    info!(period_s = period.as_secs(), "public ip job started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        match tokio::time::timeout(timeout, source.lookup()).await {
            Ok(Ok(ip)) => {
                if current != Some(ip) {
                    info!(%ip, previous = ?current, "public ip changed");
                    current = Some(ip);
                }
                metrics.set_public_ip(&ip.to_string());
            }
            Ok(Err(e)) => {
                warn!(error = %e, "public ip lookup failed");
                metrics.public_ip_lookup_failed();
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "public ip lookup timed out");
                metrics.public_ip_lookup_failed();
            }
        }
    }

    info!("public ip job stopped");
}
