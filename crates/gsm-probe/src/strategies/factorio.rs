//! Factorio public-listing query via `multiplayer.factorio.com`.
//!
//! The `gameId` extra addresses the listing entry; the listing's
//! `host_address` must match the configured endpoint. Server names carry
//! rich-text tags, which are stripped.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::http::get_json;
use crate::net::Pinger;
use crate::probe::{Player, Probe};
use crate::strip::strip_rich_tags;
use crate::target::ProbeTarget;
use crate::Strategy;

pub struct Factorio {
    http: reqwest::Client,
    timeout: Duration,
}

impl Factorio {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Factorio { http, timeout }
    }
}

#[async_trait]
impl Strategy for Factorio {
    fn name(&self) -> &'static str {
        "factorio"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let game_id = target.require_extra("gameId")?.trim();
        let url = format!("https://multiplayer.factorio.com/get-game-details/{game_id}");

        let pinger = Pinger::start();
        let data = get_json(&self.http, &url, self.timeout).await?;
        let ping_ms = pinger.millis();

        if let Some(message) = data["message"].as_str() {
            // The listing answers 200 with a message body for unknown ids.
            return Err(ProbeError::Transport(message.to_owned()));
        }

        let expected = format!("{}:{}", target.address, target.query_port);
        let host_address = data["host_address"].as_str().unwrap_or_default();
        if host_address != expected {
            return Err(ProbeError::InvalidInput(format!(
                "listing reports host {host_address}, expected {expected}"
            )));
        }

        let players: Vec<Player> = data["players"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|p| Player::named(p.as_str().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Probe {
            name: strip_rich_tags(data["name"].as_str().unwrap_or_default()),
            map: String::new(),
            password: data["has_password"].as_bool().unwrap_or(false),
            numplayers: players.len() as i64,
            numbots: 0,
            maxplayers: data["max_players"].as_i64().unwrap_or(0),
            players: Some(players),
            bots: Some(Vec::new()),
            connect: host_address.to_owned(),
            ping_ms,
            raw: json!({
                "description": data["description"],
                "application_version": data["application_version"],
                "mod_count": data["mod_count"],
            }),
            ..Probe::default()
        })
    }
}
