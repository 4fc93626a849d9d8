//! GameSpy v1 text query.
//!
//! `\status\` in, `\key\value\...\final\` out, split over several datagrams
//! for large servers. Players arrive as indexed keys (`player_0`,
//! `frags_0`, `ping_0`).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::codec::parse_infostring;
use crate::net::udp::UdpClient;
use crate::net::Pinger;
use crate::probe::{Player, Probe};
use crate::target::ProbeTarget;
use crate::Strategy;

pub struct GameSpy1 {
    timeout: Duration,
}

impl GameSpy1 {
    pub fn new(timeout: Duration) -> Self {
        GameSpy1 { timeout }
    }
}

/// Collect indexed player keys out of the merged key/value map.
pub(super) fn collect_indexed_players(info: &BTreeMap<String, String>) -> Vec<Player> {
    let mut players = Vec::new();
    for index in 0.. {
        let Some(name) = info
            .get(&format!("player_{index}"))
            .or_else(|| info.get(&format!("playername_{index}")))
        else {
            break;
        };
        let mut raw = serde_json::Map::new();
        for field in ["frags", "score", "ping", "team", "deaths"] {
            if let Some(value) = info.get(&format!("{field}_{index}")) {
                raw.insert(field.to_owned(), json!(value));
            }
        }
        players.push(Player {
            name: name.clone(),
            raw: json!(raw),
        });
    }
    players
}

#[async_trait]
impl Strategy for GameSpy1 {
    fn name(&self) -> &'static str {
        "gamespy1"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;
        let pinger = Pinger::start();
        udp.send(b"\\status\\").await?;

        // Datagrams carry a \queryid\N.M cursor; \final\ closes the set.
        let mut merged = String::new();
        loop {
            let datagram = udp.recv().await?;
            merged.push_str(&String::from_utf8_lossy(&datagram));
            if merged.contains("\\final\\") {
                break;
            }
        }
        let ping_ms = pinger.millis();

        let mut info = parse_infostring(&merged);
        info.remove("final");
        info.remove("queryid");

        let players = collect_indexed_players(&info);
        let get = |key: &str| info.get(key).map(String::as_str).unwrap_or_default();
        let hostport = info
            .get("hostport")
            .cloned()
            .unwrap_or_else(|| target.query_port.to_string());

        Ok(Probe {
            name: get("hostname").to_owned(),
            map: get("mapname").to_owned(),
            password: matches!(get("password"), "1" | "True" | "true"),
            numplayers: get("numplayers").parse().unwrap_or(players.len() as i64),
            numbots: 0,
            maxplayers: get("maxplayers").parse().unwrap_or(0),
            players: Some(players),
            bots: None,
            connect: format!("{}:{hostport}", target.address),
            ping_ms,
            raw: json!(info),
            ..Probe::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_players_are_collected_in_order() {
        let info = parse_infostring(
            "\\hostname\\UT Classic\\player_0\\alpha\\frags_0\\10\\ping_0\\40\\player_1\\beta\\frags_1\\3",
        );
        let players = collect_indexed_players(&info);
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "alpha");
        assert_eq!(players[0].raw["frags"], "10");
        assert_eq!(players[1].name, "beta");
    }

    #[test]
    fn player_collection_stops_at_the_first_gap() {
        let info = parse_infostring("\\player_0\\a\\player_2\\c");
        assert_eq!(collect_indexed_players(&info).len(), 1);
    }
}
