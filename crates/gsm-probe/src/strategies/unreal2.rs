//! Unreal Engine 2 query (UT2004, Killing Floor, Red Orchestra).
//!
//! Two request types over UDP: 0 (server info) and 2 (players). Strings are
//! length-prefixed with the trailing null included in the count.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::codec::PacketReader;
use crate::net::udp::UdpClient;
use crate::net::Pinger;
use crate::probe::{Player, Probe};
use crate::target::ProbeTarget;
use crate::Strategy;

const QUERY_INFO: u8 = 0;
const QUERY_PLAYERS: u8 = 2;

pub struct Unreal2 {
    timeout: Duration,
}

impl Unreal2 {
    pub fn new(timeout: Duration) -> Self {
        Unreal2 { timeout }
    }
}

fn ue2_string(reader: &mut PacketReader<'_>, what: &str) -> Result<String, ProbeError> {
    let len = reader.u8(what)? as usize;
    if len == 0 {
        return Ok(String::new());
    }
    let raw = reader.take(len, what)?;
    let trimmed = raw.strip_suffix(&[0]).unwrap_or(raw);
    Ok(String::from_utf8_lossy(trimmed).into_owned())
}

struct Unreal2Info {
    game_port: u32,
    server_name: String,
    map: String,
    game_type: String,
    numplayers: u32,
    maxplayers: u32,
}

fn parse_info(payload: &[u8]) -> Result<Unreal2Info, ProbeError> {
    let mut reader = PacketReader::new(payload);
    reader.take(4, "response header")?;
    reader.u8("response type")?;
    reader.u32_le("server id")?;
    ue2_string(&mut reader, "server ip")?;
    let game_port = reader.u32_le("game port")?;
    reader.u32_le("query port")?;
    let server_name = ue2_string(&mut reader, "server name")?;
    let map = ue2_string(&mut reader, "map")?;
    let game_type = ue2_string(&mut reader, "game type")?;
    let numplayers = reader.u32_le("numplayers")?;
    let maxplayers = reader.u32_le("maxplayers")?;

    Ok(Unreal2Info {
        game_port,
        server_name,
        map,
        game_type,
        numplayers,
        maxplayers,
    })
}

fn parse_players(payload: &[u8]) -> Result<Vec<Player>, ProbeError> {
    let mut reader = PacketReader::new(payload);
    reader.take(4, "response header")?;
    reader.u8("response type")?;

    let mut players = Vec::new();
    while reader.remaining() > 0 {
        let id = reader.u32_le("player id")?;
        let name = ue2_string(&mut reader, "player name")?;
        let ping = reader.u32_le("player ping")?;
        let score = reader.i32_le("player score")?;
        reader.u32_le("stats id")?;
        players.push(Player {
            name,
            raw: json!({ "id": id, "ping": ping, "score": score }),
        });
    }
    Ok(players)
}

#[async_trait]
impl Strategy for Unreal2 {
    fn name(&self) -> &'static str {
        "unreal2"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;
        let pinger = Pinger::start();
        let info_raw = udp.request(&[0x79, 0x00, 0x00, 0x00, QUERY_INFO]).await?;
        let info = parse_info(&info_raw)?;
        // Player query is optional on busy servers; degrade to no list.
        let players = match udp.request(&[0x79, 0x00, 0x00, 0x00, QUERY_PLAYERS]).await {
            Ok(payload) => parse_players(&payload).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let ping_ms = pinger.millis();

        Ok(Probe {
            name: info.server_name,
            map: info.map,
            password: false,
            numplayers: i64::from(info.numplayers),
            numbots: 0,
            maxplayers: i64::from(info.maxplayers),
            players: Some(players),
            bots: None,
            connect: format!("{}:{}", target.address, info.game_port),
            ping_ms,
            raw: json!({ "game_type": info.game_type }),
            ..Probe::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_field(s: &str) -> Vec<u8> {
        let mut out = vec![u8::try_from(s.len() + 1).unwrap()];
        out.extend_from_slice(s.as_bytes());
        out.push(0);
        out
    }

    #[test]
    fn info_payload_parses() {
        let mut payload = vec![0x80, 0, 0, 0, QUERY_INFO];
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.extend_from_slice(&string_field("10.0.0.5"));
        payload.extend_from_slice(&7777u32.to_le_bytes());
        payload.extend_from_slice(&7778u32.to_le_bytes());
        payload.extend_from_slice(&string_field("KF Hard"));
        payload.extend_from_slice(&string_field("KF-Farm"));
        payload.extend_from_slice(&string_field("survival"));
        payload.extend_from_slice(&5u32.to_le_bytes());
        payload.extend_from_slice(&6u32.to_le_bytes());

        let info = parse_info(&payload).unwrap();
        assert_eq!(info.server_name, "KF Hard");
        assert_eq!(info.map, "KF-Farm");
        assert_eq!(info.game_port, 7777);
        assert_eq!(info.numplayers, 5);
        assert_eq!(info.maxplayers, 6);
    }

    #[test]
    fn players_payload_parses() {
        let mut payload = vec![0x80, 0, 0, 0, QUERY_PLAYERS];
        payload.extend_from_slice(&9u32.to_le_bytes());
        payload.extend_from_slice(&string_field("medic"));
        payload.extend_from_slice(&48u32.to_le_bytes());
        payload.extend_from_slice(&1200i32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());

        let players = parse_players(&payload).unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].name, "medic");
        assert_eq!(players[0].raw["score"], 1200);
    }
}
