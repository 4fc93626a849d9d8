//! Discord guild widget "probe".
//!
//! The monitored "server" is a guild id in the address field; the widget
//! JSON exposes the member presence list and an invite link. There is no
//! player cap, so `maxplayers` is -1.

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

pub struct Discord {
    http: Client,
    timeout: Duration,
}

impl Discord {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Discord { http, timeout }
    }
}

#[async_trait]
impl Strategy for Discord {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let guild_id = &target.address;
        let url = format!("https://discord.com/api/guilds/{guild_id}/widget.json");

        let pinger = Pinger::start();
        let data = get_json(&self.http, &url, self.timeout).await?;
        let ping_ms = pinger.millis();

        let players: Vec<Player> = data["members"]
            .as_array()
            .map(|members| {
                members
                    .iter()
                    .map(|m| Player {
                        name: m["username"].as_str().unwrap_or_default().to_owned(),
                        raw: m.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Probe {
            name: data["name"].as_str().unwrap_or_default().to_owned(),
            map: String::new(),
            password: false,
            numplayers: data["presence_count"].as_i64().unwrap_or(players.len() as i64),
            numbots: 0,
            maxplayers: -1,
            players: Some(players),
            bots: None,
            connect: data["instant_invite"].as_str().unwrap_or_default().to_owned(),
            ping_ms,
            raw: json!({ "id": data["id"], "channels": data["channels"] }),
            ..Probe::default()
        })
    }
}
