//! Community master-server directory search, shared by the strategies whose
//! games expose no query port of their own (SCUM, The Front).
//!
//! `GET {base}/{game}/search?host={ip}&port={port}`; a 404 or empty body is
//! a directory miss, not a transport failure.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::error::ProbeError;
use crate::net::http::get_json;
use crate::net::resolve_ip;

const MASTER_SERVER_BASE: &str = "https://master-server.opengsq.com";

pub(super) async fn search(
    http: &Client,
    game: &str,
    address: &str,
    port: u16,
    timeout: Duration,
) -> Result<Value, ProbeError> {
    let ip = resolve_ip(address).await?;
    let url = format!("{MASTER_SERVER_BASE}/{game}/search?host={ip}&port={port}");
    let data = get_json(http, &url, timeout).await?;
    if data.is_null() {
        return Err(ProbeError::ServerNotFound);
    }
    Ok(data)
}
