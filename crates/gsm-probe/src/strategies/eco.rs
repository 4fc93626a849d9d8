//! Eco web-server query: `/info` on the game's web port.

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

pub struct Eco {
    http: Client,
    timeout: Duration,
}

impl Eco {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Eco { http, timeout }
    }
}

#[async_trait]
impl Strategy for Eco {
    fn name(&self) -> &'static str {
        "eco"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let url = format!("http://{}:{}/info", target.address, target.query_port);
        let pinger = Pinger::start();
        let data = get_json(&self.http, &url, self.timeout).await?;
        let ping_ms = pinger.millis();

        let players: Vec<Player> = data["OnlinePlayersNames"]
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .map(|n| Player::named(n.as_str().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Probe {
            name: data["Description"].as_str().unwrap_or_default().to_owned(),
            map: String::new(),
            password: data["HasPassword"].as_bool().unwrap_or(false),
            numplayers: data["OnlinePlayers"].as_i64().unwrap_or(players.len() as i64),
            numbots: 0,
            maxplayers: data["MaxActivePlayers"].as_i64().unwrap_or(0),
            players: Some(players),
            bots: None,
            connect: data["JoinUrl"].as_str().unwrap_or_default().to_owned(),
            ping_ms,
            raw: json!({
                "Language": data["Language"],
                "Version": data["Version"],
                "TimeLeft": data["TimeLeft"],
            }),
            ..Probe::default()
        })
    }
}
