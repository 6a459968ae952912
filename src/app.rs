//! Main application orchestration and execution

use crate::{
    cli::Cli,
    config::{display_config_summary, load_config, LoadedConfig, ValidationLevel},
    dns::{run_public_ip_job, GooglePublicIp, PublicIpSource},
    error::{AppError, Result},
    logging::init_logging,
    metrics::MetricRegistry,
    models::Config,
    output::PlanFormatter,
    probe::build_probes,
    scheduler::{RunReport, Scheduler},
    server::MetricsServer,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Log panics through tracing, then hand them to the default hook.
///
/// The process keeps running: a panicking probe attempt only loses its
/// sample, and a panic on the application task ends in [`run_guarded`].
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!(panic = %info, "task panicked");
        default_hook(info);
    }));
}

/// Run the application on its own task so a panic becomes an internal error (exit 99)
pub async fn run_guarded<F>(application: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    match tokio::spawn(application).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(AppError::internal(format!("Application panic: {}", e))),
        Err(e) => Err(AppError::internal(format!("Application task cancelled: {}", e))),
    }
}

/// Main application struct that coordinates all components
pub struct App {
    cli: Cli,
}

impl App {
    /// Create a new application instance with CLI configuration
    pub fn new(cli: Cli) -> Result<Self> {
        Ok(Self { cli })
    }

    /// Run the application until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        let loaded = load_config(self.cli.clone())?;

        if self.cli.check_config {
            let plan = PlanFormatter::new(loaded.config.enable_color).format_plan(&loaded)?;
            print!("{}", plan);
            return Ok(());
        }

        init_logging(&loaded.config)?;
        log_loaded_config(&loaded);

        let prober = Prober::build(loaded.config).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signals = tokio::spawn(async move {
            match shutdown_signal().await {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => warn!(error = %e, "cannot listen for shutdown signals, stopping"),
            }
            let _ = shutdown_tx.send(true);
        });

        let report = prober.run(shutdown_rx).await;
        signals.abort();

        let report = report?;
        info!(
            ticks_started = report.ticks_started,
            ticks_completed = report.ticks_completed,
            "prober stopped"
        );
        Ok(())
    }
}

fn log_loaded_config(loaded: &LoadedConfig) {
    info!(
        service = crate::PKG_NAME,
        version = crate::VERSION,
        commit = crate::GIT_COMMIT.unwrap_or("unknown"),
        built = crate::BUILD_TIME,
        sources = %loaded.sources.join(" < "),
        "configuration loaded"
    );
    for line in display_config_summary(&loaded.config).lines() {
        debug!("{}", line);
    }
    for warning in &loaded.warnings {
        match warning.level {
            ValidationLevel::Warning => warn!("{}", warning.message),
            ValidationLevel::Info => info!("{}", warning.message),
        }
    }
}

/// Every long-running part of the prober, built and ready to run
pub struct Prober {
    metrics: Arc<MetricRegistry>,
    scheduler: Option<Scheduler>,
    server: MetricsServer,
    public_ip: Option<PublicIpJob>,
}

struct PublicIpJob {
    source: Arc<dyn PublicIpSource>,
    period: std::time::Duration,
    timeout: std::time::Duration,
}

impl Prober {
    /// Build the registry, the executors and bind the metrics endpoint.
    ///
    /// Missing ICMP privilege and bind failures are reported here, before any
    /// tick runs.
    pub async fn build(config: Config) -> Result<Self> {
        let specs = config.probe_specs()?;
        let metrics = Arc::new(MetricRegistry::new(config.histogram_buckets.clone())?);
        metrics.register_series(&specs)?;

        let scheduler = if specs.is_empty() {
            None
        } else {
            let probes = build_probes(&specs)?;
            Some(Scheduler::new(probes, metrics.clone(), config.interval(), config.timeout())?)
        };

        let public_ip = if config.public_ip {
            Some(PublicIpJob {
                source: Arc::new(GooglePublicIp::new(config.timeout())?),
                period: config.public_ip_interval(),
                timeout: config.timeout(),
            })
        } else {
            None
        };

        let server = MetricsServer::bind(config.listen_socket_addr()?, metrics.clone()).await?;

        Ok(Self {
            metrics,
            scheduler,
            server,
            public_ip,
        })
    }

    pub fn metrics(&self) -> Arc<MetricRegistry> {
        self.metrics.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    /// Run until `shutdown` turns true. In-flight ticks are drained before returning.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<RunReport> {
        let server: JoinHandle<Result<()>> = tokio::spawn(self.server.serve(shutdown.clone()));

        let public_ip = self.public_ip.map(|job| {
            tokio::spawn(run_public_ip_job(
                job.source,
                self.metrics.clone(),
                job.period,
                job.timeout,
                shutdown.clone(),
            ))
        });

        let report = match self.scheduler {
            Some(scheduler) => scheduler.run(shutdown.clone()).await,
            None => {
                let mut shutdown = shutdown.clone();
                let _ = shutdown.wait_for(|stop| *stop).await;
                RunReport::default()
            }
        };

        if let Some(job) = public_ip {
            job.await
                .map_err(|e| AppError::internal(format!("Public IP job failed: {}", e)))?;
        }

        server
            .await
            .map_err(|e| AppError::internal(format!("Metrics endpoint task failed: {}", e)))??;

        Ok(report)
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
