//! All-Seeing Eye query (Multi Theft Auto and friends).
//!
//! Request is the single byte `s`; the response opens with `EYE1` followed
//! by length-prefixed fields where the length byte counts itself, fixed
//! header fields, free-form key/value pairs up to the 0x01 sentinel, then
//! per-player records gated by a flags byte.

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

const PLAYER_FLAG_NAME: u8 = 0x01;
const PLAYER_FLAG_TEAM: u8 = 0x02;
const PLAYER_FLAG_SKIN: u8 = 0x04;
const PLAYER_FLAG_SCORE: u8 = 0x08;
const PLAYER_FLAG_PING: u8 = 0x10;
const PLAYER_FLAG_TIME: u8 = 0x20;

pub struct Ase {
    timeout: Duration,
}

impl Ase {
    pub fn new(timeout: Duration) -> Self {
        Ase { timeout }
    }
}

/// Length-prefixed string where the length byte includes itself.
fn ase_string(reader: &mut PacketReader<'_>, what: &str) -> Result<String, ProbeError> {
    let len = reader.u8(what)? as usize;
    if len == 0 {
        return Err(ProbeError::protocol(format!("zero-length field {what}")));
    }
    let raw = reader.take(len - 1, what)?;
    Ok(String::from_utf8_lossy(raw).into_owned())
}

struct AseResponse {
    server_name: String,
    game_type: String,
    map: String,
    password: bool,
    numplayers: i64,
    maxplayers: i64,
    game_port: String,
    rules: serde_json::Map<String, serde_json::Value>,
    players: Vec<Player>,
}

fn parse_response(payload: &[u8]) -> Result<AseResponse, ProbeError> {
    let mut reader = PacketReader::new(payload);
    reader.expect(b"EYE1", "ase magic")?;

    let _game_name = ase_string(&mut reader, "game name")?;
    let game_port = ase_string(&mut reader, "game port")?;
    let server_name = ase_string(&mut reader, "server name")?;
    let game_type = ase_string(&mut reader, "game type")?;
    let map = ase_string(&mut reader, "map")?;
    let _version = ase_string(&mut reader, "version")?;
    let password = ase_string(&mut reader, "password")? == "1";
    let numplayers: i64 = ase_string(&mut reader, "numplayers")?.parse().unwrap_or(0);
    let maxplayers: i64 = ase_string(&mut reader, "maxplayers")?.parse().unwrap_or(0);

    let mut rules = serde_json::Map::new();
    while reader.remaining() > 0 {
        // 0x01 closes the rule section
        let peek = reader.u8("rule length or sentinel")?;
        if peek <= 0x01 {
            break;
        }
        let key_raw = reader.take(peek as usize - 1, "rule key")?;
        let key = String::from_utf8_lossy(key_raw).into_owned();
        let value = ase_string(&mut reader, "rule value")?;
        rules.insert(key, json!(value));
    }

    let mut players = Vec::new();
    while reader.remaining() > 0 {
        let flags = reader.u8("player flags")?;
        let mut name = String::new();
        let mut raw = serde_json::Map::new();
        if flags & PLAYER_FLAG_NAME != 0 {
            name = ase_string(&mut reader, "player name")?;
        }
        if flags & PLAYER_FLAG_TEAM != 0 {
            raw.insert("team".to_owned(), json!(ase_string(&mut reader, "team")?));
        }
        if flags & PLAYER_FLAG_SKIN != 0 {
            raw.insert("skin".to_owned(), json!(ase_string(&mut reader, "skin")?));
        }
        if flags & PLAYER_FLAG_SCORE != 0 {
            raw.insert("score".to_owned(), json!(ase_string(&mut reader, "score")?));
        }
        if flags & PLAYER_FLAG_PING != 0 {
            raw.insert("ping".to_owned(), json!(ase_string(&mut reader, "ping")?));
        }
        if flags & PLAYER_FLAG_TIME != 0 {
            raw.insert("time".to_owned(), json!(ase_string(&mut reader, "time")?));
        }
        players.push(Player {
            name,
            raw: json!(raw),
        });
    }

    Ok(AseResponse {
        server_name,
        game_type,
        map,
        password,
        numplayers,
        maxplayers,
        game_port,
        rules,
        players,
    })
}

#[async_trait]
impl Strategy for Ase {
    fn name(&self) -> &'static str {
        "ase"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;
        let pinger = Pinger::start();
        let datagram = udp.request(b"s").await?;
        let ping_ms = pinger.millis();

        let response = parse_response(&datagram)?;
        let mut raw = serde_json::Map::new();
        raw.insert("gametype".to_owned(), json!(response.game_type));
        raw.insert("rules".to_owned(), json!(response.rules));

        Ok(Probe {
            name: response.server_name,
            map: response.map,
            password: response.password,
            numplayers: response.numplayers,
            numbots: 0,
            maxplayers: response.maxplayers,
            players: Some(response.players),
            bots: None,
            connect: format!("{}:{}", target.address, response.game_port),
            ping_ms,
            raw: json!(raw),
            ..Probe::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(s: &str) -> Vec<u8> {
        let mut out = vec![u8::try_from(s.len() + 1).unwrap()];
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn full_response_parses() {
        let mut payload = b"EYE1".to_vec();
        for part in ["mta", "22003", "MTA Freeroam", "freeroam", "sanandreas", "1.6", "0", "2", "64"] {
            payload.extend_from_slice(&field(part));
        }
        payload.extend_from_slice(&field("tickrate"));
        payload.extend_from_slice(&field("60"));
        payload.push(0x01);
        payload.push(PLAYER_FLAG_NAME | PLAYER_FLAG_PING);
        payload.extend_from_slice(&field("driver"));
        payload.extend_from_slice(&field("35"));

        let response = parse_response(&payload).unwrap();
        assert_eq!(response.server_name, "MTA Freeroam");
        assert_eq!(response.map, "sanandreas");
        assert_eq!(response.numplayers, 2);
        assert_eq!(response.maxplayers, 64);
        assert!(!response.password);
        assert_eq!(response.game_port, "22003");
        assert_eq!(response.rules["tickrate"], "60");
        assert_eq!(response.players.len(), 1);
        assert_eq!(response.players[0].name, "driver");
        assert_eq!(response.players[0].raw["ping"], "35");
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(matches!(
            parse_response(b"EYE2rest"),
            Err(ProbeError::Protocol(_))
        ));
    }
}
