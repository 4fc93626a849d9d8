//! JSON-over-HTTP probe helpers.
//!
//! Game HTTP endpoints are sloppy about `Content-Type` (several return JSON
//! as `text/*`), so the body is always decoded from raw bytes rather than via
//! content-type negotiation.

use std::time::Duration;

use reqwest::Client;

use crate::error::{http_error, ProbeError};

/// Build the shared probe client.
pub fn client() -> Result<Client, ProbeError> {
    Client::builder()
        .user_agent(concat!("gsm-probe/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProbeError::transport(format!("http client init: {e}")))
}

/// Build a client that tolerates the self-signed certificates some game
/// servers present on their local HTTPS API.
pub fn insecure_client() -> Result<Client, ProbeError> {
    Client::builder()
        .user_agent(concat!("gsm-probe/", env!("CARGO_PKG_VERSION")))
        .danger_accept_invalid_certs(true)
        .build()
        .map_err(|e| ProbeError::transport(format!("http client init: {e}")))
}

/// GET a JSON document, sniffing the body regardless of content type.
pub async fn get_json(
    client: &Client,
    url: &str,
    timeout: Duration,
) -> Result<serde_json::Value, ProbeError> {
    let resp = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| http_error(&e))?;
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(|e| http_error(&e))?;

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProbeError::ServerNotFound);
    }
    if !status.is_success() {
        return Err(ProbeError::Transport(format!("http status {status}")));
    }

    serde_json::from_slice(&bytes).map_err(|e| {
        let preview: String = String::from_utf8_lossy(&bytes).chars().take(120).collect();
        ProbeError::Protocol(format!("invalid json: {e}; body preview: {preview}"))
    })
}

/// POST a JSON body and decode a JSON response, same sniffing rules.
pub async fn post_json(
    client: &Client,
    url: &str,
    body: &serde_json::Value,
    bearer: Option<&str>,
    timeout: Duration,
) -> Result<serde_json::Value, ProbeError> {
    let mut req = client.post(url).timeout(timeout).json(body);
    if let Some(token) = bearer {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await.map_err(|e| http_error(&e))?;
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(|e| http_error(&e))?;

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ProbeError::ServerNotFound);
    }
    if !status.is_success() {
        return Err(ProbeError::Transport(format!("http status {status}")));
    }

    serde_json::from_slice(&bytes).map_err(|e| {
        let preview: String = String::from_utf8_lossy(&bytes).chars().take(120).collect();
        ProbeError::Protocol(format!("invalid json: {e}; body preview: {preview}"))
    })
}
