//! SCUM query via the community master-server directory.
//!
//! The game port advertised by the directory sits two above the join port.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::ProbeError;
use crate::net::Pinger;
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

use super::master;

pub struct Scum {
    http: Client,
    timeout: Duration,
}

impl Scum {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Scum { http, timeout }
    }
}

#[async_trait]
impl Strategy for Scum {
    fn name(&self) -> &'static str {
        "scum"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let pinger = Pinger::start();
        let data = master::search(
            &self.http,
            "scum",
            &target.address,
            target.query_port,
            self.timeout,
        )
        .await?;
        let ping_ms = pinger.millis();

        let reported_port = data["port"].as_u64().unwrap_or(u64::from(target.query_port));
        let join_port = reported_port.saturating_sub(2);

        Ok(Probe {
            name: data["name"].as_str().unwrap_or_default().to_owned(),
            map: String::new(),
            password: data["password"].as_bool().unwrap_or(false),
            numplayers: data["num_players"].as_i64().unwrap_or(0),
            numbots: 0,
            maxplayers: data["max_players"].as_i64().unwrap_or(0),
            players: None,
            bots: None,
            connect: format!("{}:{join_port}", target.address),
            ping_ms,
            raw: data,
            ..Probe::default()
        })
    }
}
