//! Assetto Corsa HTTP query: `/INFO` on the configured HTTP port.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::ProbeError;
use crate::net::http::get_json;
use crate::net::Pinger;
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

pub struct AssettoCorsa {
    http: Client,
    timeout: Duration,
}

impl AssettoCorsa {
    pub fn new(http: Client, timeout: Duration) -> Self {
        AssettoCorsa { http, timeout }
    }
}

#[async_trait]
impl Strategy for AssettoCorsa {
    fn name(&self) -> &'static str {
        "assettocorsa"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let url = format!("http://{}:{}/INFO", target.address, target.query_port);
        let pinger = Pinger::start();
        let data = get_json(&self.http, &url, self.timeout).await?;
        let ping_ms = pinger.millis();

        let game_port = data["port"].as_i64().map_or_else(
            || target.query_port.to_string(),
            |p| p.to_string(),
        );

        Ok(Probe {
            name: data["name"].as_str().unwrap_or_default().to_owned(),
            map: data["track"].as_str().unwrap_or_default().to_owned(),
            password: data["pass"].as_bool().unwrap_or(false),
            numplayers: data["clients"].as_i64().unwrap_or(0),
            numbots: 0,
            maxplayers: data["maxclients"].as_i64().unwrap_or(0),
            players: None,
            bots: None,
            connect: format!("{}:{game_port}", target.address),
            ping_ms,
            raw: data,
            ..Probe::default()
        })
    }
}
