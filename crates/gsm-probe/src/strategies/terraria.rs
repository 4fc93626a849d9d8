//! Terraria REST status query (tshock `/v2/server/status`).
//!
//! Requires the REST user token, carried in the secret `_token` extra.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::http::get_json;
use crate::net::Pinger;
use crate::probe::{Player, Probe};
use crate::target::ProbeTarget;
use crate::Strategy;

pub struct Terraria {
    http: Client,
    timeout: Duration,
}

impl Terraria {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Terraria { http, timeout }
    }
}

#[async_trait]
impl Strategy for Terraria {
    fn name(&self) -> &'static str {
        "terraria"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let token = target.require_extra("_token")?;
        let url = format!(
            "http://{}:{}/v2/server/status?players=true&rules=false&token={token}",
            target.address, target.query_port
        );

        let pinger = Pinger::start();
        let data = get_json(&self.http, &url, self.timeout).await?;
        let ping_ms = pinger.millis();

        let players: Vec<Player> = data["players"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|p| Player {
                        name: p["nickname"].as_str().unwrap_or_default().to_owned(),
                        raw: p.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let game_port = data["port"].as_i64().map_or_else(
            || target.query_port.to_string(),
            |p| p.to_string(),
        );

        Ok(Probe {
            name: data["name"].as_str().unwrap_or_default().to_owned(),
            map: data["world"].as_str().unwrap_or_default().to_owned(),
            password: data["serverpassword"].as_bool().unwrap_or(false),
            numplayers: players.len() as i64,
            numbots: 0,
            maxplayers: data["maxplayers"].as_i64().unwrap_or(0),
            players: Some(players),
            bots: None,
            connect: format!("{}:{game_port}", target.address),
            ping_ms,
            raw: json!({ "uptime": data["uptime"], "world": data["world"] }),
            ..Probe::default()
        })
    }
}
