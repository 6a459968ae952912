//! ICMP echo probe (IPv4)
//!
//! Two socket flavours are supported. A raw socket needs `CAP_NET_RAW` and
//! receives every ICMP packet addressed to the host, IPv4 header included. The
//! unprivileged datagram socket (Linux `net.ipv4.ping_group_range`) receives only
//! replies to its own requests, and the kernel rewrites the echo identifier.
//! The mode is chosen once at startup; each attempt then opens its own socket.

use super::{classify_io_error, resolve, run_with_timeout};
use crate::error::{AppError, Result};
use crate::models::{FailureReason, ProbeOutcome, ProbeSpec};
use socket2::{Domain, Protocol, Socket, Type};
use std::fmt;
use std::io;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_DEST_UNREACHABLE: u8 = 3;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_TIME_EXCEEDED: u8 = 11;

const ICMP_HEADER_LEN: usize = 8;
const TOKEN_LEN: usize = 8;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPPROTO_ICMP: u8 = 1;
const RECV_BUFFER_LEN: usize = 1500;

/// Kind of ICMP socket the process may open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpMode {
    Raw,
    Datagram,
}

impl IcmpMode {
    /// Pick the socket kind, preferring raw. Lack of privilege for both is fatal.
    pub fn detect() -> Result<Self> {
        Self::detect_with(open_socket)
    }

    /// Same as [`IcmpMode::detect`] with a custom socket opener
    pub fn detect_with<F>(open: F) -> Result<Self>
    where
        F: Fn(IcmpMode) -> io::Result<Socket>,
    {
        let raw_error = match open(IcmpMode::Raw) {
            Ok(_) => return Ok(IcmpMode::Raw),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => e,
            Err(e) => return Err(AppError::network(format!("Cannot open raw ICMP socket: {}", e))),
        };
        debug!(error = %raw_error, "raw ICMP socket denied, trying datagram ICMP socket");

        match open(IcmpMode::Datagram) {
            Ok(_) => Ok(IcmpMode::Datagram),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => Err(AppError::privilege(format!(
                "icmp-echo probes need a raw ICMP socket ({}) or an unprivileged ICMP socket ({})",
                raw_error, e
            ))),
            Err(e) => Err(AppError::network(format!("Cannot open datagram ICMP socket: {}", e))),
        }
    }
}

impl fmt::Display for IcmpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IcmpMode::Raw => f.write_str("raw"),
            IcmpMode::Datagram => f.write_str("datagram"),
        }
    }
}

fn open_socket(mode: IcmpMode) -> io::Result<Socket> {
    let kind = match mode {
        IcmpMode::Raw => Type::RAW,
        IcmpMode::Datagram => Type::DGRAM,
    };
    Socket::new(Domain::IPV4, kind, Some(Protocol::ICMPV4))
}

fn open_async_socket(mode: IcmpMode) -> io::Result<UdpSocket> {
    let socket = open_socket(mode)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(std::net::UdpSocket::from(socket))
}

/// Identity of one echo request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoRequest {
    pub identifier: u16,
    pub sequence: u16,
    pub token: [u8; TOKEN_LEN],
}

impl EchoRequest {
    pub fn random() -> Self {
        Self {
            identifier: rand::random(),
            sequence: rand::random(),
            token: rand::random::<u64>().to_be_bytes(),
        }
    }

    /// Encode as an ICMP echo request with a valid checksum
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(ICMP_HEADER_LEN + TOKEN_LEN);
        packet.extend_from_slice(&[ICMP_ECHO_REQUEST, 0, 0, 0]);
        packet.extend_from_slice(&self.identifier.to_be_bytes());
        packet.extend_from_slice(&self.sequence.to_be_bytes());
        packet.extend_from_slice(&self.token);

        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
        packet
    }
}

/// Internet checksum (RFC 1071). Summing a packet that carries a valid checksum gives 0.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// How a received packet relates to an outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMatch {
    /// Valid echo reply to our request
    Reply,
    /// Echo reply for our request with a bad checksum, code or token
    Malformed,
    /// Destination unreachable or time exceeded quoting our request
    Unreachable,
    /// Someone else's traffic
    Unrelated,
}

/// Strip a leading IPv4 header when the packet carries one
fn strip_ipv4_header(packet: &[u8]) -> Option<&[u8]> {
    if packet.first().map(|b| b >> 4) != Some(4) {
        return Some(packet);
    }
    if packet.len() < IPV4_MIN_HEADER_LEN || packet[9] != IPPROTO_ICMP {
        return None;
    }
    let header_len = usize::from(packet[0] & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN || packet.len() < header_len {
        return None;
    }
    Some(&packet[header_len..])
}

fn header_ids(icmp: &[u8]) -> (u16, u16) {
    (
        u16::from_be_bytes([icmp[4], icmp[5]]),
        u16::from_be_bytes([icmp[6], icmp[7]]),
    )
}

/// Match a received packet against our request.
///
/// `check_identifier` is false for datagram sockets, where the kernel owns the
/// identifier and only delivers our own replies.
pub fn match_reply(packet: &[u8], request: &EchoRequest, check_identifier: bool) -> ReplyMatch {
    let icmp = match strip_ipv4_header(packet) {
        Some(icmp) if icmp.len() >= ICMP_HEADER_LEN => icmp,
        _ => return ReplyMatch::Unrelated,
    };

    let is_ours = |identifier: u16, sequence: u16| {
        sequence == request.sequence && (!check_identifier || identifier == request.identifier)
    };

    match icmp[0] {
        ICMP_ECHO_REPLY => {
            let (identifier, sequence) = header_ids(icmp);
            if !is_ours(identifier, sequence) {
                return ReplyMatch::Unrelated;
            }
            let token_ok = icmp.len() == ICMP_HEADER_LEN + TOKEN_LEN && icmp[ICMP_HEADER_LEN..] == request.token;
            if icmp[1] != 0 || checksum(icmp) != 0 || !token_ok {
                return ReplyMatch::Malformed;
            }
            ReplyMatch::Reply
        }
        ICMP_DEST_UNREACHABLE | ICMP_TIME_EXCEEDED => {
            // Error messages quote the original IPv4 header and 8 bytes of our request
            let quoted = match strip_ipv4_header(&icmp[ICMP_HEADER_LEN..]) {
                Some(quoted) if quoted.len() >= ICMP_HEADER_LEN => quoted,
                _ => return ReplyMatch::Unrelated,
            };
            let (identifier, sequence) = header_ids(quoted);
            if quoted[0] == ICMP_ECHO_REQUEST && is_ours(identifier, sequence) {
                ReplyMatch::Unreachable
            } else {
                ReplyMatch::Unrelated
            }
        }
        _ => ReplyMatch::Unrelated,
    }
}

/// Sends one echo request and waits for the matching reply
#[derive(Debug, Clone)]
pub struct IcmpProbe {
    spec: ProbeSpec,
    mode: IcmpMode,
}

impl IcmpProbe {
    pub fn new(spec: ProbeSpec, mode: IcmpMode) -> Self {
        Self { spec, mode }
    }

    pub fn spec(&self) -> &ProbeSpec {
        &self.spec
    }

    pub async fn attempt(&self, timeout: Duration) -> ProbeOutcome {
        run_with_timeout(timeout, self.measure()).await
    }

    async fn measure(&self) -> std::result::Result<Duration, FailureReason> {
        let target = resolve(&self.spec.destination, 0, true).await?;
        let socket = open_async_socket(self.mode).map_err(|e| classify_io_error(&e))?;

        let request = EchoRequest::random();
        let packet = request.encode();
        let check_identifier = self.mode == IcmpMode::Raw;

        let start = Instant::now();
        socket
            .send_to(&packet, target)
            .await
            .map_err(|e| classify_io_error(&e))?;

        let mut buf = [0u8; RECV_BUFFER_LEN];
        loop {
            // Datagram sockets report ICMP errors for our request as socket errors
            let (len, from) = socket.recv_from(&mut buf).await.map_err(|e| classify_io_error(&e))?;

            match match_reply(&buf[..len], &request, check_identifier) {
                ReplyMatch::Reply if from.ip() == target.ip() => return Ok(start.elapsed()),
                ReplyMatch::Malformed if from.ip() == target.ip() => {
                    return Err(FailureReason::MalformedResponse)
                }
                ReplyMatch::Unreachable => {
                    trace!(target = %target.ip(), from = %from.ip(), "icmp error for echo request");
                    return Err(FailureReason::Unreachable);
                }
                _ => continue,
            }
        }
    }
}
