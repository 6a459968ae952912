//! TCP handshake probe

use super::{classify_io_error, resolve, run_with_timeout};
use crate::error::{AppError, Result};
use crate::models::{FailureReason, ProbeOutcome, ProbeSpec};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::trace;

/// Measures the time to establish a TCP connection. No payload is sent.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    spec: ProbeSpec,
    port: u16,
}

impl TcpProbe {
    pub fn new(spec: ProbeSpec) -> Result<Self> {
        let port = spec
            .port
            .ok_or_else(|| AppError::config(format!("Probe {} requires a port", spec)))?;
        Ok(Self { spec, port })
    }

    pub fn spec(&self) -> &ProbeSpec {
        &self.spec
    }

    pub async fn attempt(&self, timeout: Duration) -> ProbeOutcome {
        run_with_timeout(timeout, self.measure()).await
    }

    async fn measure(&self) -> std::result::Result<Duration, FailureReason> {
        let addr = resolve(&self.spec.destination, self.port, false).await?;

        let start = Instant::now();
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            trace!(target = %addr, error = %e, "tcp connect failed");
            classify_io_error(&e)
        })?;
        let elapsed = start.elapsed();

        // Close immediately, the handshake is the measurement
        drop(stream);
        Ok(elapsed)
    }
}
