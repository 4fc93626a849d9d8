//! GoldSource-era WON query (pre-Steam Half-Life and its mods).
//!
//! Same A2S exchange as `source`; the info response is the older 0x6D shape
//! that carries the server's own address string instead of a game port.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::Pinger;
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

use super::source::{split_players_and_bots, A2sClient, A2sInfo};

pub struct Won {
    timeout: Duration,
}

impl Won {
    pub fn new(timeout: Duration) -> Self {
        Won { timeout }
    }
}

#[async_trait]
impl Strategy for Won {
    fn name(&self) -> &'static str {
        "won"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let client = A2sClient::connect(&target.address, target.query_port, self.timeout).await?;
        let pinger = Pinger::start();
        let info = client.info().await?;
        let wire_players = client.players().await.unwrap_or_default();
        let ping_ms = pinger.millis();

        let A2sInfo::GoldSource(info) = info else {
            return Err(ProbeError::protocol(
                "source response on a goldsource query port",
            ));
        };

        let (players, bots) = split_players_and_bots(wire_players, info.bots as usize);
        let connect = if info.address.is_empty() {
            format!("{}:{}", target.address, target.query_port)
        } else {
            info.address.clone()
        };

        Ok(Probe {
            name: info.name,
            map: info.map,
            password: info.visibility == 1,
            numplayers: i64::from(info.players),
            numbots: i64::from(info.bots),
            maxplayers: i64::from(info.max_players),
            players: Some(players),
            bots: Some(bots),
            connect,
            ping_ms,
            raw: json!({ "folder": info.folder, "game": info.game }),
            ..Probe::default()
        })
    }
}
