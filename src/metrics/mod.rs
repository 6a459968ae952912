//! Metric registry and aggregation
//!
//! [`MetricRegistry`] owns a private prometheus [`Registry`] and every metric
//! family the prober exports. It is constructed once in the application and
//! shared by `Arc` with the scheduler, the public IP job and the HTTP server.
//!
//! All updates go through prometheus' atomic per-series counters, so recording
//! from many attempt tasks at once never takes a lock across a tick. Recording
//! never fails: label errors are logged and counted as dropped samples.

use crate::error::{AppError, Result};
use crate::models::{config::validate_buckets, ProbeOutcome, ProbeSpec, ProbeVariant};
use prometheus::proto::MetricFamily;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::error;

pub const ATTEMPTS_TOTAL: &str = "probe_attempts_total";
pub const FAILURES_TOTAL: &str = "probe_failures_total";
pub const FAILURE_REASONS_TOTAL: &str = "probe_failure_reasons_total";
pub const DURATION_SECONDS: &str = "probe_duration_seconds";
pub const TICKS_TOTAL: &str = "probe_ticks_total";
pub const TICKS_IN_FLIGHT: &str = "probe_ticks_in_flight";
pub const TICK_DURATION_SECONDS: &str = "probe_tick_duration_seconds";
pub const SAMPLES_DROPPED_TOTAL: &str = "probe_samples_dropped_total";
pub const PUBLIC_IP_INFO: &str = "prober_public_ip_info";
pub const PUBLIC_IP_LOOKUP_FAILURES_TOTAL: &str = "prober_public_ip_lookup_failures_total";

const SERIES_LABELS: &[&str] = &["variant", "destination"];

/// Current values of one `(variant, destination)` series
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesSnapshot {
    pub attempts: u64,
    pub failures: u64,
    pub duration_count: u64,
    pub duration_sum: f64,
}

/// Process-wide metric store, injected where needed
#[derive(Clone)]
pub struct MetricRegistry {
    registry: Registry,
    attempts: IntCounterVec,
    failures: IntCounterVec,
    failure_reasons: IntCounterVec,
    duration: HistogramVec,
    ticks: IntCounter,
    ticks_in_flight: IntGauge,
    tick_duration: Histogram,
    samples_dropped: IntCounter,
    public_ip: IntGaugeVec,
    public_ip_failures: IntCounter,
    /// Label value of the published `prober_public_ip_info` series
    current_public_ip: Arc<Mutex<Option<String>>>,
}

impl MetricRegistry {
    /// Create the registry with fixed histogram bucket bounds
    pub fn new(buckets: Vec<f64>) -> Result<Self> {
        validate_buckets(&buckets)?;
        let registry = Registry::new();

        let attempts = IntCounterVec::new(
            Opts::new(ATTEMPTS_TOTAL, "Probe attempts, successful or not"),
            SERIES_LABELS,
        )?;
        let failures = IntCounterVec::new(Opts::new(FAILURES_TOTAL, "Failed probe attempts"), SERIES_LABELS)?;
        let failure_reasons = IntCounterVec::new(
            Opts::new(FAILURE_REASONS_TOTAL, "Failed probe attempts by reason"),
            &["variant", "destination", "reason"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(DURATION_SECONDS, "Duration of successful probe attempts").buckets(buckets.clone()),
            SERIES_LABELS,
        )?;
        let ticks = IntCounter::new(TICKS_TOTAL, "Scheduler ticks fired")?;
        let ticks_in_flight = IntGauge::new(TICKS_IN_FLIGHT, "Scheduler ticks still awaiting completion")?;
        let tick_duration = Histogram::with_opts(
            HistogramOpts::new(TICK_DURATION_SECONDS, "Time from tick start until its last outcome").buckets(buckets),
        )?;
        let samples_dropped = IntCounter::new(SAMPLES_DROPPED_TOTAL, "Probe outcomes that could not be recorded")?;
        let public_ip = IntGaugeVec::new(Opts::new(PUBLIC_IP_INFO, "Current public IP address"), &["ip"])?;
        let public_ip_failures = IntCounter::new(PUBLIC_IP_LOOKUP_FAILURES_TOTAL, "Failed public IP lookups")?;

        registry.register(Box::new(attempts.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(failure_reasons.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(ticks.clone()))?;
        registry.register(Box::new(ticks_in_flight.clone()))?;
        registry.register(Box::new(tick_duration.clone()))?;
        registry.register(Box::new(samples_dropped.clone()))?;
        registry.register(Box::new(public_ip.clone()))?;
        registry.register(Box::new(public_ip_failures.clone()))?;

        Ok(Self {
            registry,
            attempts,
            failures,
            failure_reasons,
            duration,
            ticks,
            ticks_in_flight,
            tick_duration,
            samples_dropped,
            public_ip,
            public_ip_failures,
            current_public_ip: Arc::new(Mutex::new(None)),
        })
    }

    /// Create the per-key series at zero so every configured probe is visible before its first outcome
    pub fn register_series(&self, specs: &[ProbeSpec]) -> Result<()> {
        for spec in specs {
            let labels = [spec.variant.as_str(), spec.label()];
            self.attempts.get_metric_with_label_values(&labels)?;
            self.failures.get_metric_with_label_values(&labels)?;
            self.duration.get_metric_with_label_values(&labels)?;
        }
        Ok(())
    }

    /// Fold one outcome into its series
    pub fn record(&self, variant: ProbeVariant, destination: &str, outcome: &ProbeOutcome) {
        if let Err(e) = self.try_record(variant, destination, outcome) {
            error!(variant = %variant, destination, error = %e, "dropping probe sample");
            self.samples_dropped.inc();
        }
    }

    fn try_record(&self, variant: ProbeVariant, destination: &str, outcome: &ProbeOutcome) -> prometheus::Result<()> {
        let labels = [variant.as_str(), destination];
        let attempts = self.attempts.get_metric_with_label_values(&labels)?;

        match outcome {
            ProbeOutcome::Success { duration } => {
                let histogram = self.duration.get_metric_with_label_values(&labels)?;
                attempts.inc();
                histogram.observe(duration.as_secs_f64());
            }
            ProbeOutcome::Failure { reason } => {
                let failures = self.failures.get_metric_with_label_values(&labels)?;
                let reasons = self
                    .failure_reasons
                    .get_metric_with_label_values(&[variant.as_str(), destination, reason.as_str()])?;
                attempts.inc();
                failures.inc();
                reasons.inc();
            }
        }

        Ok(())
    }

    /// Count a sample lost outside of label resolution (e.g. a panicked attempt)
    pub fn record_dropped(&self) {
        self.samples_dropped.inc();
    }

    pub fn tick_started(&self) {
        self.ticks.inc();
    }

    pub fn set_ticks_in_flight(&self, ticks: usize) {
        self.ticks_in_flight.set(i64::try_from(ticks).unwrap_or(i64::MAX));
    }

    pub fn tick_completed(&self, elapsed: Duration) {
        self.tick_duration.observe(elapsed.as_secs_f64());
    }

    /// Publish the current public address, replacing any previous one.
    ///
    /// The new series is set before the old one is removed, so a scrape always
    /// sees at least one address once the first lookup succeeded.
    pub fn set_public_ip(&self, ip: &str) {
        let mut current = self.current_public_ip.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() == Some(ip) {
            return;
        }

        match self.public_ip.get_metric_with_label_values(&[ip]) {
            Ok(gauge) => gauge.set(1),
            Err(e) => {
                error!(ip, error = %e, "cannot publish public ip");
                return;
            }
        }

        if let Some(previous) = current.replace(ip.to_string()) {
            if let Err(e) = self.public_ip.remove_label_values(&[previous.as_str()]) {
                error!(ip = %previous, error = %e, "cannot remove previous public ip");
            }
        }
    }

    pub fn public_ip_lookup_failed(&self) {
        self.public_ip_failures.inc();
    }

    /// Point-in-time metric families
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Render the registry in the Prometheus text format
    pub fn snapshot(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| AppError::metrics(format!("Exposition is not UTF-8: {}", e)))
    }

    /// Content type of [`Self::snapshot`]
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Read back one series without creating it
    pub fn series(&self, variant: ProbeVariant, destination: &str) -> SeriesSnapshot {
        let families = self.gather();
        let labels = [("variant", variant.as_str()), ("destination", destination)];
        let mut snapshot = SeriesSnapshot::default();

        for family in &families {
            let Some(metric) = family.get_metric().iter().find(|metric| {
                labels.iter().all(|(name, value)| {
                    metric
                        .get_label()
                        .iter()
                        .any(|pair| pair.get_name() == *name && pair.get_value() == *value)
                }) && metric.get_label().len() == labels.len()
            }) else {
                continue;
            };

            match family.get_name() {
                ATTEMPTS_TOTAL => snapshot.attempts = metric.get_counter().get_value() as u64,
                FAILURES_TOTAL => snapshot.failures = metric.get_counter().get_value() as u64,
                DURATION_SECONDS => {
                    snapshot.duration_count = metric.get_histogram().get_sample_count();
                    snapshot.duration_sum = metric.get_histogram().get_sample_sum();
                }
                _ => {}
            }
        }

        snapshot
    }

    pub fn ticks_total(&self) -> u64 {
        self.ticks.get()
    }

    pub fn ticks_in_flight(&self) -> i64 {
        self.ticks_in_flight.get()
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.get()
    }

    pub fn public_ip_lookup_failures(&self) -> u64 {
        self.public_ip_failures.get()
    }
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("ticks", &self.ticks.get())
            .field("samples_dropped", &self.samples_dropped.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::DEFAULT_HISTOGRAM_BUCKETS;
    use crate::models::FailureReason;

    fn registry() -> MetricRegistry {
        MetricRegistry::new(DEFAULT_HISTOGRAM_BUCKETS.to_vec()).unwrap()
    }

    #[test]
    fn test_invalid_buckets_rejected() {
        assert!(MetricRegistry::new(vec![]).is_err());
        assert!(MetricRegistry::new(vec![1.0, 0.5]).is_err());
    }

    #[test]
    fn test_success_updates_histogram() {
        let metrics = registry();
        let outcome = ProbeOutcome::success(Duration::from_millis(20));
        metrics.record(ProbeVariant::TcpHandshake, "1.1.1.1", &outcome);

        let series = metrics.series(ProbeVariant::TcpHandshake, "1.1.1.1");
        assert_eq!(series.attempts, 1);
        assert_eq!(series.failures, 0);
        assert_eq!(series.duration_count, 1);
        assert!((series.duration_sum - 0.020).abs() < 1e-9);
    }

    #[test]
    fn test_failure_skips_histogram() {
        let metrics = registry();
        let outcome = ProbeOutcome::failure(FailureReason::Timeout);
        metrics.record(ProbeVariant::IcmpEcho, "203.0.113.1", &outcome);

        let series = metrics.series(ProbeVariant::IcmpEcho, "203.0.113.1");
        assert_eq!(series.attempts, 1);
        assert_eq!(series.failures, 1);
        assert_eq!(series.duration_count, 0);
        assert_eq!(series.duration_sum, 0.0);

        let text = metrics.snapshot().unwrap();
        assert!(text.contains(
            r#"probe_failure_reasons_total{destination="203.0.113.1",reason="timeout",variant="icmp-echo"} 1"#
        ));
    }

    #[test]
    fn test_preregistered_series_are_zero() {
        let metrics = registry();
        let specs = vec![
            ProbeSpec::new("1.1.1.1", ProbeVariant::IcmpEcho, None),
            ProbeSpec::new("8.8.8.8", ProbeVariant::UdpDnsQuery, None).with_name("google"),
        ];
        metrics.register_series(&specs).unwrap();

        let text = metrics.snapshot().unwrap();
        assert!(text.contains(r#"probe_attempts_total{destination="1.1.1.1",variant="icmp-echo"} 0"#));
        assert!(text.contains(r#"probe_failures_total{destination="google",variant="udp-dns-query"} 0"#));
        assert!(text.contains(r#"probe_duration_seconds_count{destination="google",variant="udp-dns-query"} 0"#));
        assert!(text.contains(r#"probe_duration_seconds_bucket{destination="1.1.1.1",variant="icmp-echo",le="0.005"} 0"#));
    }

    #[test]
    fn test_series_lookup_does_not_create() {
        let metrics = registry();
        assert_eq!(metrics.series(ProbeVariant::IcmpEcho, "nowhere"), SeriesSnapshot::default());
        assert!(!metrics.snapshot().unwrap().contains("nowhere"));
    }

    #[test]
    fn test_scheduler_metrics() {
        let metrics = registry();
        metrics.tick_started();
        metrics.set_ticks_in_flight(1);
        metrics.tick_completed(Duration::from_millis(40));
        metrics.set_ticks_in_flight(0);
        metrics.record_dropped();

        assert_eq!(metrics.ticks_total(), 1);
        assert_eq!(metrics.ticks_in_flight(), 0);
        assert_eq!(metrics.samples_dropped(), 1);
        assert!(metrics.snapshot().unwrap().contains("probe_tick_duration_seconds_count 1"));
    }

    #[test]
    fn test_public_ip_replaces_previous() {
        let metrics = registry();
        metrics.set_public_ip("198.51.100.7");
        metrics.set_public_ip("198.51.100.8");
        metrics.public_ip_lookup_failed();

        let text = metrics.snapshot().unwrap();
        assert!(!text.contains("198.51.100.7"));
        assert!(text.contains(r#"prober_public_ip_info{ip="198.51.100.8"} 1"#));
        assert_eq!(metrics.public_ip_lookup_failures(), 1);

        // Same address again keeps the series
        metrics.set_public_ip("198.51.100.8");
        assert!(metrics.snapshot().unwrap().contains(r#"prober_public_ip_info{ip="198.51.100.8"} 1"#));
    }

    #[test]
    fn test_public_ip_never_missing_while_changing() {
        let metrics = registry();
        metrics.set_public_ip("198.51.100.1");

        let writer = {
            let metrics = metrics.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    metrics.set_public_ip(if i % 2 == 0 { "198.51.100.2" } else { "198.51.100.1" });
                }
            })
        };

        for _ in 0..500 {
            let text = metrics.snapshot().unwrap();
            assert!(text.contains("prober_public_ip_info{ip="), "public ip series vanished");
        }
        writer.join().unwrap();

        let text = metrics.snapshot().unwrap();
        assert_eq!(text.matches("prober_public_ip_info{ip=").count(), 1);
    }

    #[test]
    fn test_content_type() {
        let metrics = registry();
        assert!(metrics.content_type().starts_with("text/plain"));
        assert!(metrics.content_type().contains("0.0.4"));
    }

    #[test]
    fn test_concurrent_records() {
        let metrics = std::sync::Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.record(
                            ProbeVariant::TcpHandshake,
                            "10.0.0.1",
                            &ProbeOutcome::success(Duration::from_millis(1)),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let series = metrics.series(ProbeVariant::TcpHandshake, "10.0.0.1");
        assert_eq!(series.attempts, 2000);
        assert_eq!(series.duration_count, 2000);
    }
}
