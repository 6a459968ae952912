//! DNS query probes over UDP and TCP

use super::{classify_io_error, resolve, run_with_timeout};
use crate::error::{AppError, Result};
use crate::models::{FailureReason, ProbeOutcome, ProbeSpec, DNS_PORT};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::trace;
use trust_dns_proto::op::{Message, MessageType, OpCode, Query};
use trust_dns_proto::rr::{Name, RecordType};

/// Largest DNS message accepted over either transport
const MAX_MESSAGE_LEN: usize = 65_535;

/// Transport used for the query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsTransport {
    Udp,
    Tcp,
}

impl fmt::Display for DnsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsTransport::Udp => f.write_str("udp"),
            DnsTransport::Tcp => f.write_str("tcp"),
        }
    }
}

/// Encode the liveness query: root `NS`, recursion desired
pub fn build_query(id: u16) -> Result<Vec<u8>> {
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(Name::root(), RecordType::NS));

    message
        .to_vec()
        .map_err(|e| AppError::internal(format!("Failed to encode DNS query: {}", e)))
}

/// Accept any well-formed response carrying our ID, whatever its rcode
pub fn check_response(bytes: &[u8], id: u16) -> std::result::Result<(), FailureReason> {
    let message = Message::from_vec(bytes).map_err(|_| FailureReason::MalformedResponse)?;

    if message.message_type() != MessageType::Response || message.id() != id {
        return Err(FailureReason::MalformedResponse);
    }

    Ok(())
}

/// Sends one query and waits for the matching response
#[derive(Debug, Clone)]
pub struct DnsProbe {
    spec: ProbeSpec,
    port: u16,
    transport: DnsTransport,
    query: Vec<u8>,
}

impl DnsProbe {
    pub fn new(spec: ProbeSpec, transport: DnsTransport) -> Result<Self> {
        let port = spec.port.unwrap_or(DNS_PORT);
        // The ID in the first two bytes is replaced on every attempt
        let query = build_query(0)?;
        Ok(Self {
            spec,
            port,
            transport,
            query,
        })
    }

    pub fn spec(&self) -> &ProbeSpec {
        &self.spec
    }

    pub async fn attempt(&self, timeout: Duration) -> ProbeOutcome {
        run_with_timeout(timeout, self.measure()).await
    }

    async fn measure(&self) -> std::result::Result<Duration, FailureReason> {
        let addr = resolve(&self.spec.destination, self.port, false).await?;

        let id: u16 = rand::random();
        let mut query = self.query.clone();
        query[..2].copy_from_slice(&id.to_be_bytes());

        let start = Instant::now();
        let response = match self.transport {
            DnsTransport::Udp => exchange_udp(addr, &query).await,
            DnsTransport::Tcp => exchange_tcp(addr, &query).await,
        }
        .map_err(|e| {
            trace!(target = %addr, transport = %self.transport, error = %e, "dns exchange failed");
            classify_io_error(&e)
        })?;
        let elapsed = start.elapsed();

        check_response(&response, id)?;
        Ok(elapsed)
    }
}

async fn exchange_udp(addr: SocketAddr, query: &[u8]) -> std::io::Result<Vec<u8>> {
    let bind: SocketAddr = if addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = UdpSocket::bind(bind).await?;
    // Connected, so ICMP port unreachable surfaces as ConnectionRefused
    socket.connect(addr).await?;
    socket.send(query).await?;

    let mut buf = vec![0u8; MAX_MESSAGE_LEN];
    let len = socket.recv(&mut buf).await?;
    buf.truncate(len);
    Ok(buf)
}

async fn exchange_tcp(addr: SocketAddr, query: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(addr).await?;

    let len = u16::try_from(query.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "query too large"))?;
    let mut framed = Vec::with_capacity(query.len() + 2);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(query);
    stream.write_all(&framed).await?;

    let mut prefix = [0u8; 2];
    stream.read_exact(&mut prefix).await?;
    let len = u16::from_be_bytes(prefix) as usize;
    if len == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "empty dns message"));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
