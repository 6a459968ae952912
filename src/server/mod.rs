//! HTTP exposition endpoint
//!
//! `GET /metrics` renders the registry in the Prometheus text format and
//! `GET /healthz` answers 200. Everything else is 404.

use crate::error::{AppError, Result};
use crate::metrics::MetricRegistry;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Build the exposition router over a shared registry
pub fn router(metrics: Arc<MetricRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<MetricRegistry>>) -> Response {
    match metrics.snapshot() {
        Ok(body) => ([(header::CONTENT_TYPE, metrics.content_type())], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics\n").into_response()
        }
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Bound exposition server, ready to serve
pub struct MetricsServer {
    listener: TcpListener,
    router: Router,
}

impl MetricsServer {
    /// Bind the listening socket. Failure here is fatal at startup.
    pub async fn bind(addr: SocketAddr, metrics: Arc<MetricRegistry>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AppError::server(format!("Cannot bind metrics endpoint on {}: {}", addr, e)))?;

        Ok(Self {
            listener,
            router: router(metrics),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` turns true
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.local_addr()?;
        info!(%addr, "serving metrics on http://{}/metrics", addr);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .map_err(|e| AppError::server(format!("Metrics endpoint failed: {}", e)))?;

        info!("metrics endpoint stopped");
        Ok(())
    }
}
