//! Shared network plumbing for strategies: sockets with deadlines, loose
//! JSON fetching, and wire-format decoding helpers.

pub mod codec;
pub mod http;
pub mod tcp;
pub mod udp;

use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::error::{io_error, ProbeError};

/// Await a future under a deadline, mapping elapse to [`ProbeError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, ProbeError>
where
    F: std::future::Future<Output = Result<T, ProbeError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ProbeError::Timeout)?
}

/// Resolve a host name to an IP address (first A record wins).
pub async fn resolve_ip(host: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| io_error(&e))?
        .peekable();
    let first = addrs.peek().copied();
    addrs
        .find(std::net::SocketAddr::is_ipv4)
        .or(first)
        .map(|a| a.ip())
        .ok_or_else(|| ProbeError::transport(format!("no address records for {host}")))
}

/// Wall-clock ping measurement around a wire exchange.
pub struct Pinger(Instant);

impl Pinger {
    pub fn start() -> Self {
        Pinger(Instant::now())
    }

    pub fn millis(&self) -> u64 {
        u64::try_from(self.0.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
