//! TCP helpers for the handful of stream-based query protocols.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{io_error, ProbeError};

pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ProbeError> {
    tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| ProbeError::Timeout)?
        .map_err(|e| io_error(&e))
}

pub async fn write_all(
    stream: &mut TcpStream,
    payload: &[u8],
    timeout: Duration,
) -> Result<(), ProbeError> {
    tokio::time::timeout(timeout, stream.write_all(payload))
        .await
        .map_err(|_| ProbeError::Timeout)?
        .map_err(|e| io_error(&e))
}

pub async fn read_exact(
    stream: &mut TcpStream,
    len: usize,
    timeout: Duration,
) -> Result<Vec<u8>, ProbeError> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(timeout, stream.read_exact(&mut buf))
        .await
        .map_err(|_| ProbeError::Timeout)?
        .map_err(|e| io_error(&e))?;
    Ok(buf)
}

/// Read one `\n`-terminated line (teamspeak-style query protocols).
pub async fn read_line<R>(
    reader: &mut BufReader<R>,
    timeout: Duration,
) -> Result<String, ProbeError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    let mut line = String::new();
    let n = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| ProbeError::Timeout)?
        .map_err(|e| io_error(&e))?;
    if n == 0 {
        return Err(ProbeError::transport("connection closed"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}
