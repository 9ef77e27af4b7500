use anyhow::{Result, anyhow};
use std::io::ErrorKind;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use crate::probe::icmp::{ReplyKind, build_echo_request, get_identifier, parse_reply};
use crate::probe::socket::EchoSocket;
use crate::probe::Prober;
use crate::state::{ProbeResult, ProbeStatus};

/// Outcome of one blocking echo exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    Reply { rtt: Duration, ttl: u8 },
    Unreachable,
    TimedOut,
}

impl EchoOutcome {
    /// Convert into a probe result stamped now
    pub fn into_result(self) -> ProbeResult {
        match self {
            // Sub-millisecond replies are real replies, not "no measurement"
            Self::Reply { rtt, ttl } => {
                let ms = rtt.as_millis().max(1).min(u32::MAX as u128) as u32;
                ProbeResult::success(ms, ttl)
            }
            Self::Unreachable => ProbeResult::failed(ProbeStatus::Unreachable),
            Self::TimedOut => ProbeResult::failed(ProbeStatus::Timeout),
        }
    }
}

/// ICMP echo prober: one request, one reply, one socket per probe
#[derive(Debug)]
pub struct IcmpProber {
    identifier: u16,
    sequence: AtomicU16,
}

impl Default for IcmpProber {
    fn default() -> Self {
        Self::new()
    }
}

impl IcmpProber {
    pub fn new() -> Self {
        Self {
            identifier: get_identifier(),
            sequence: AtomicU16::new(0),
        }
    }

    fn next_sequence(&self) -> u16 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl Prober for IcmpProber {
    async fn probe(&self, target: &str, timeout: Duration) -> ProbeResult {
        let deadline = Instant::now() + timeout;

        let ip = match resolve_target(target).await {
            Ok(ip) => ip,
            Err(e) => {
                tracing::debug!(host = target, error = %e, "failed to resolve target");
                return ProbeResult::failed(ProbeStatus::Error);
            }
        };

        let identifier = self.identifier;
        let sequence = self.next_sequence();
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return ProbeResult::failed(ProbeStatus::Timeout);
        }

        let exchange = tokio::task::spawn_blocking(move || {
            echo_blocking(ip, identifier, sequence, remaining)
        });

        match exchange.await {
            Ok(Ok(outcome)) => outcome.into_result(),
            Ok(Err(e)) => {
                let status = classify_error(&e);
                tracing::debug!(%ip, ?status, error = %e, "echo exchange failed");
                ProbeResult::failed(status)
            }
            Err(e) => {
                tracing::warn!(%ip, error = %e, "echo task did not complete");
                ProbeResult::failed(ProbeStatus::Unknown)
            }
        }
    }
}

/// Send one echo request and wait for the matching reply until `timeout`
pub fn echo_blocking(
    target: IpAddr,
    identifier: u16,
    sequence: u16,
    timeout: Duration,
) -> Result<EchoOutcome> {
    let ipv6 = target.is_ipv6();
    let socket = EchoSocket::open(ipv6)?;

    let packet = build_echo_request(identifier, sequence, ipv6);
    let sent_at = Instant::now();
    let deadline = sent_at + timeout;
    socket.send_to(&packet, target)?;

    let mut buffer = [0u8; 1500];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(EchoOutcome::TimedOut);
        }

        let received = match socket.recv(&mut buffer, remaining) {
            Ok(received) => received,
            Err(e) if is_timeout(&e) => return Ok(EchoOutcome::TimedOut),
            Err(e) => return Err(e),
        };

        let Some(parsed) = parse_reply(
            &buffer[..received.len],
            identifier,
            sequence,
            ipv6,
            socket.has_ip_header(),
            socket.is_dgram(),
        ) else {
            continue;
        };

        match parsed.kind {
            // Raw sockets see every echo reply on the host
            ReplyKind::EchoReply if received.source != target => continue,
            ReplyKind::EchoReply => {
                return Ok(EchoOutcome::Reply {
                    rtt: sent_at.elapsed(),
                    ttl: parsed.ttl.or(received.response_ttl).unwrap_or(0),
                });
            }
            // Errors come from routers but quote our request
            ReplyKind::DestUnreachable | ReplyKind::TimeExceeded => {
                return Ok(EchoOutcome::Unreachable);
            }
        }
    }
}

fn is_timeout(err: &anyhow::Error) -> bool {
    err.downcast_ref::<std::io::Error>()
        .is_some_and(|e| matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
}

/// Map a send/receive error onto a probe status
pub fn classify_error(err: &anyhow::Error) -> ProbeStatus {
    match err.downcast_ref::<std::io::Error>().map(|e| e.kind()) {
        Some(ErrorKind::WouldBlock | ErrorKind::TimedOut) => ProbeStatus::Timeout,
        Some(
            ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::ConnectionRefused
            | ErrorKind::AddrNotAvailable,
        ) => ProbeStatus::Unreachable,
        Some(_) => ProbeStatus::Error,
        None => ProbeStatus::Unknown,
    }
}

/// Resolve a host name or IP literal, preferring IPv4
pub async fn resolve_target(target: &str) -> Result<IpAddr> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((target, 0))
        .await?
        .map(|s| s.ip())
        .collect();

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| anyhow!("No addresses found for {}", target))
}
