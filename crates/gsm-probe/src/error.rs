//! Probe failure taxonomy.
//!
//! The scheduler treats every variant as "probe failed" for status purposes;
//! the distinction matters for logging and for directory-backed strategies,
//! where a lookup miss (`ServerNotFound`) is not a transport problem.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    /// Unknown game id or protocol name.
    #[error("invalid game: {0}")]
    InvalidGame(String),

    /// Directory lookup miss or multi-stage fallback exhaustion.
    #[error("server not found")]
    ServerNotFound,

    /// The probe exceeded its wall-clock budget.
    #[error("query timed out")]
    Timeout,

    /// Network, DNS, or HTTP-status failure.
    #[error("transport: {0}")]
    Transport(String),

    /// Response parse or validation failure.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Malformed or missing probe parameters (bad port, missing extra key).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ProbeError {
    pub(crate) fn transport(msg: impl Into<String>) -> Self {
        ProbeError::Transport(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        ProbeError::Protocol(msg.into())
    }
}

pub(crate) fn io_error(e: &std::io::Error) -> ProbeError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        ProbeError::Timeout
    } else {
        ProbeError::Transport(e.to_string())
    }
}

pub(crate) fn http_error(e: &reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Transport(e.to_string())
    }
}
