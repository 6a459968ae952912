//! Fixed-rate probe scheduler
//!
//! The coordinating loop fires a tick every `interval`, anchored to the start
//! instant, and never waits for a tick to finish. Each tick is its own task: it
//! spawns one task per probe, enforces the attempt timeout as a ceiling, and
//! records every outcome as soon as that attempt completes. A panicking attempt
//! is caught in its task and counted as a dropped sample.
//!
//! ```text
//! Idle -> FanningOut -> AwaitingCompletion -> Idle ... -> Stopped
//! ```

use crate::error::{AppError, Result};
use crate::metrics::MetricRegistry;
use crate::models::{FailureReason, ProbeOutcome, ProbeVariant};
use crate::probe::Probe;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    FanningOut { tick: u64 },
    AwaitingCompletion { tick: u64 },
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Idle => f.write_str("idle"),
            SchedulerState::FanningOut { tick } => write!(f, "fanning-out (tick {})", tick),
            SchedulerState::AwaitingCompletion { tick } => write!(f, "awaiting-completion (tick {})", tick),
            SchedulerState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Outcome of one attempt within a tick
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub variant: ProbeVariant,
    pub destination: String,
    pub outcome: ProbeOutcome,
}

/// Summary of one completed tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcomes: Vec<AttemptRecord>,
    pub successes: usize,
    pub failures: usize,
    /// Attempts whose task panicked or was cancelled
    pub dropped: usize,
}

impl TickReport {
    /// Recorded outcome for one key, if any
    pub fn outcome_for(&self, variant: ProbeVariant, destination: &str) -> Option<ProbeOutcome> {
        self.outcomes
            .iter()
            .find(|record| record.variant == variant && record.destination == destination)
            .map(|record| record.outcome)
    }
}

/// Totals returned when the scheduler stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ticks_started: u64,
    pub ticks_completed: u64,
}

/// Shared by the loop and every tick task
struct TickContext {
    probes: Vec<Arc<dyn Probe>>,
    metrics: Arc<MetricRegistry>,
    timeout: Duration,
    state: watch::Sender<SchedulerState>,
    in_flight: AtomicUsize,
    reports: Option<mpsc::UnboundedSender<TickReport>>,
}

/// Drives all probes at a fixed cadence
pub struct Scheduler {
    context: Arc<TickContext>,
    interval: Duration,
}

impl Scheduler {
    /// Create a scheduler. The attempt timeout must be shorter than the interval.
    pub fn new(
        probes: Vec<Arc<dyn Probe>>,
        metrics: Arc<MetricRegistry>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        if interval.is_zero() || timeout.is_zero() {
            return Err(AppError::config("Interval and timeout must be greater than 0"));
        }
        if timeout >= interval {
            return Err(AppError::config(format!(
                "Timeout ({:?}) must be shorter than the interval ({:?})",
                timeout, interval
            )));
        }

        let (state, _) = watch::channel(SchedulerState::Idle);
        Ok(Self {
            context: Arc::new(TickContext {
                probes,
                metrics,
                timeout,
                state,
                in_flight: AtomicUsize::new(0),
                reports: None,
            }),
            interval,
        })
    }

    /// Also deliver every tick report on `reports`
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<TickReport>) -> Self {
        if let Some(context) = Arc::get_mut(&mut self.context) {
            context.reports = Some(reports);
        }
        self
    }

    /// Watch the scheduler state
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.context.state.subscribe()
    }

    pub fn state(&self) -> SchedulerState {
        *self.context.state.borrow()
    }

    pub fn probe_count(&self) -> usize {
        self.context.probes.len()
    }

    /// Run one tick to completion outside of the timed loop
    pub async fn run_tick(&self, tick: u64) -> TickReport {
        execute_tick(self.context.clone(), tick).await
    }

    /// Fire ticks until `shutdown` turns true, then drain in-flight ticks
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> RunReport {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ticks = JoinSet::new();
        let mut report = RunReport::default();

        info!(
            probes = self.probe_count(),
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.context.timeout.as_millis() as u64,
            "scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    report.ticks_started += 1;
                    ticks.spawn(execute_tick(self.context.clone(), report.ticks_started));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone, nobody can stop us anymore
                        break;
                    }
                }
                Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                    report.ticks_completed += tick_finished(joined);
                }
            }
        }

        info!(in_flight = ticks.len(), "scheduler stopping, draining in-flight ticks");
        while let Some(joined) = ticks.join_next().await {
            report.ticks_completed += tick_finished(joined);
        }

        self.context.state.send_replace(SchedulerState::Stopped);
        info!(
            ticks_started = report.ticks_started,
            ticks_completed = report.ticks_completed,
            "scheduler stopped"
        );
        report
    }
}

fn tick_finished(joined: std::result::Result<TickReport, JoinError>) -> u64 {
    match joined {
        Ok(_) => 1,
        Err(e) => {
            error!(error = %e, "tick task failed");
            0
        }
    }
}

/// Count a tick as started and publish `FanningOut`, as one state update
fn begin_tick(context: &TickContext, tick: u64) -> usize {
    let mut in_flight = 0;
    context.state.send_modify(|state| {
        in_flight = context.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        context.metrics.set_ticks_in_flight(in_flight);
        *state = SchedulerState::FanningOut { tick };
    });
    in_flight
}

/// Count a tick as finished; the last one out publishes `Idle`
fn finish_tick(context: &TickContext) -> usize {
    let mut remaining = 0;
    context.state.send_if_modified(|state| {
        remaining = context.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        context.metrics.set_ticks_in_flight(remaining);
        if remaining == 0 && *state != SchedulerState::Idle {
            *state = SchedulerState::Idle;
            true
        } else {
            false
        }
    });
    remaining
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

async fn execute_tick(context: Arc<TickContext>, tick: u64) -> TickReport {
    let started_at = Utc::now();
    let start = Instant::now();

    context.metrics.tick_started();
    let in_flight = begin_tick(&context, tick);
    if in_flight > 1 {
        warn!(tick, in_flight, "previous tick still running");
    }

    let timeout = context.timeout;
    let mut attempts = JoinSet::new();
    for (index, probe) in context.probes.iter().enumerate() {
        let probe = probe.clone();
        attempts.spawn(async move {
            let attempt = async {
                // Ceiling for executors that overrun their own deadline
                match tokio::time::timeout(timeout, probe.attempt(timeout)).await {
                    Ok(outcome) => outcome,
                    Err(_) => ProbeOutcome::failure(FailureReason::Timeout),
                }
            };
            (index, AssertUnwindSafe(attempt).catch_unwind().await)
        });
    }

    context.state.send_if_modified(|state| {
        if *state == (SchedulerState::FanningOut { tick }) {
            *state = SchedulerState::AwaitingCompletion { tick };
            true
        } else {
            false
        }
    });

    let mut outcomes = Vec::with_capacity(context.probes.len());
    let mut dropped = 0;
    while let Some(joined) = attempts.join_next().await {
        match joined {
            Ok((index, Ok(outcome))) => {
                let spec = context.probes[index].spec();
                debug!(tick, variant = %spec.variant, destination = spec.label(), %outcome, "probe attempt");
                context.metrics.record(spec.variant, spec.label(), &outcome);
                outcomes.push(AttemptRecord {
                    variant: spec.variant,
                    destination: spec.label().to_string(),
                    outcome,
                });
            }
            Ok((index, Err(payload))) => {
                let spec = context.probes[index].spec();
                error!(
                    tick,
                    variant = %spec.variant,
                    destination = spec.label(),
                    panic = panic_message(payload.as_ref()),
                    "probe attempt panicked"
                );
                context.metrics.record_dropped();
                dropped += 1;
            }
            Err(e) => {
                error!(tick, error = %e, "probe attempt task cancelled");
                context.metrics.record_dropped();
                dropped += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    let successes = outcomes.iter().filter(|record| record.outcome.is_success()).count();
    let report = TickReport {
        tick,
        started_at,
        elapsed,
        failures: outcomes.len() - successes,
        successes,
        outcomes,
        dropped,
    };

    context.metrics.tick_completed(elapsed);
    finish_tick(&context);

    info!(
        tick,
        started_at = %report.started_at.to_rfc3339(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        successes = report.successes,
        failures = report.failures,
        dropped = report.dropped,
        "tick completed"
    );

    if let Some(reports) = &context.reports {
        let _ = reports.send(report.clone());
    }

    report
}
