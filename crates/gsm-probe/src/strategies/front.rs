//! The Front query via the community master-server directory.
//!
//! The game's own A2S endpoint reports a placeholder server name, so the
//! directory entry (which carries the corrected name) is authoritative.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::ProbeError;
use crate::net::Pinger;
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

use super::master;

pub struct Front {
    http: Client,
    timeout: Duration,
}

impl Front {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Front { http, timeout }
    }
}

#[async_trait]
impl Strategy for Front {
    fn name(&self) -> &'static str {
        "front"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let pinger = Pinger::start();
        let data = master::search(
            &self.http,
            "thefront",
            &target.address,
            target.query_port,
            self.timeout,
        )
        .await?;
        let ping_ms = pinger.millis();

        let info = &data["info"];

        Ok(Probe {
            name: data["server_name"].as_str().unwrap_or_default().to_owned(),
            map: info["game_map"].as_str().unwrap_or_default().to_owned(),
            password: info["HasPWD"].as_bool().unwrap_or(false),
            numplayers: data["online"].as_i64().unwrap_or(0),
            numbots: 0,
            maxplayers: info["maxplayer"].as_i64().unwrap_or(0),
            players: None,
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms,
            raw: data,
            ..Probe::default()
        })
    }
}
