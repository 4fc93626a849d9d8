//! UDP request/response client with per-operation deadlines.

use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::{io_error, ProbeError};

const RECV_BUFFER: usize = 65_536;

pub struct UdpClient {
    socket: UdpSocket,
    timeout: Duration,
}

impl UdpClient {
    /// Bind an ephemeral socket and connect it to the target endpoint.
    /// Host names are resolved by the connect call.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ProbeError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(|e| io_error(&e))?;
        tokio::time::timeout(timeout, socket.connect((host, port)))
            .await
            .map_err(|_| ProbeError::Timeout)?
            .map_err(|e| io_error(&e))?;
        Ok(UdpClient { socket, timeout })
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), ProbeError> {
        self.socket
            .send(payload)
            .await
            .map_err(|e| io_error(&e))?;
        Ok(())
    }

    /// Receive one datagram under the client deadline.
    pub async fn recv(&self) -> Result<Vec<u8>, ProbeError> {
        let mut buf = vec![0u8; RECV_BUFFER];
        let n = tokio::time::timeout(self.timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| ProbeError::Timeout)?
            .map_err(|e| io_error(&e))?;
        buf.truncate(n);
        Ok(buf)
    }

    /// One round trip.
    pub async fn request(&self, payload: &[u8]) -> Result<Vec<u8>, ProbeError> {
        self.send(payload).await?;
        self.recv().await
    }
}
