//! G-Portal hosted-server query via the provider API.
//!
//! The monitor's `serverId` extra selects the server; the reported address
//! and port must match the configured endpoint, and an offline report is a
//! probe failure so the status flips.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProbeError;
use crate::net::http::get_json;
use crate::net::Pinger;
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

pub struct GPortal {
    http: reqwest::Client,
    timeout: Duration,
}

impl GPortal {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        GPortal { http, timeout }
    }
}

#[async_trait]
impl Strategy for GPortal {
    fn name(&self) -> &'static str {
        "gportal"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let server_id = target.require_extra("serverId")?;
        let url = format!("https://api.g-portal.com/gameserver/query/{server_id}");

        let pinger = Pinger::start();
        let data = get_json(&self.http, &url, self.timeout).await?;
        let ping_ms = pinger.millis();

        let ip = data["ipAddress"].as_str().unwrap_or_default();
        let port = data["port"].as_u64().unwrap_or(0);
        if ip != target.address || port != u64::from(target.query_port) {
            return Err(ProbeError::ServerNotFound);
        }
        if !data["online"].as_bool().unwrap_or(false) {
            return Err(ProbeError::transport("provider reports the server offline"));
        }

        Ok(Probe {
            name: data["name"].as_str().unwrap_or_default().to_owned(),
            map: String::new(),
            password: false,
            numplayers: data["currentPlayers"].as_i64().unwrap_or(0),
            numbots: 0,
            maxplayers: data["maxPlayers"].as_i64().unwrap_or(0),
            players: None,
            bots: None,
            connect: format!("{ip}:{port}"),
            ping_ms,
            raw: data,
            ..Probe::default()
        })
    }
}
