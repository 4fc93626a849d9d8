//! San Andreas Multiplayer query.
//!
//! The request header embeds the resolved IPv4 address and port; opcode `i`
//! returns server info with 32-bit length-prefixed strings, opcode `d` the
//! detailed player list, and opcode `r` the rule table, which carries the
//! actual map name (the info payload's gamemode field is a mode label, not
//! a map). Servers beyond ~100 players stop answering the player opcode, so
//! that stage degrades to an empty list; the rule stage degrades the same
//! way.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::codec::PacketReader;
use crate::net::udp::UdpClient;
use crate::net::{resolve_ip, Pinger};
use crate::probe::{Player, Probe};
use crate::target::ProbeTarget;
use crate::Strategy;

pub struct Samp {
    timeout: Duration,
}

impl Samp {
    pub fn new(timeout: Duration) -> Self {
        Samp { timeout }
    }
}

pub(super) fn request_header(
    magic: &[u8; 4],
    ip: IpAddr,
    port: u16,
    opcode: u8,
) -> Result<Vec<u8>, ProbeError> {
    let IpAddr::V4(v4) = ip else {
        return Err(ProbeError::InvalidInput(
            "query requires an IPv4 endpoint".to_owned(),
        ));
    };
    let mut request = magic.to_vec();
    request.extend_from_slice(&v4.octets());
    request.extend_from_slice(&port.to_le_bytes());
    request.push(opcode);
    Ok(request)
}

struct SampInfo {
    password: bool,
    players: u16,
    maxplayers: u16,
    hostname: String,
    gamemode: String,
    language: String,
}

fn parse_info(payload: &[u8]) -> Result<SampInfo, ProbeError> {
    let mut reader = PacketReader::new(payload);
    reader.take(11, "echoed request header")?;
    let password = reader.u8("password")? == 1;
    let players = reader.u16_le("players")?;
    let maxplayers = reader.u16_le("maxplayers")?;
    let hostname = reader.long_string("hostname")?;
    let gamemode = reader.long_string("gamemode")?;
    let language = reader.long_string("language")?;

    Ok(SampInfo {
        password,
        players,
        maxplayers,
        hostname,
        gamemode,
        language,
    })
}

fn parse_players(payload: &[u8]) -> Result<Vec<Player>, ProbeError> {
    let mut reader = PacketReader::new(payload);
    reader.take(11, "echoed request header")?;
    let count = reader.u16_le("player count")?;
    let mut players = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = reader.u8("player id")?;
        let name = reader.pascal_string("player name")?;
        let score = reader.i32_le("player score")?;
        let ping = reader.u32_le("player ping")?;
        players.push(Player {
            name,
            raw: json!({ "id": id, "score": score, "ping": ping }),
        });
    }
    Ok(players)
}

fn parse_rules(payload: &[u8]) -> Result<BTreeMap<String, String>, ProbeError> {
    let mut reader = PacketReader::new(payload);
    reader.take(11, "echoed request header")?;
    let count = reader.u16_le("rule count")?;
    let mut rules = BTreeMap::new();
    for _ in 0..count {
        let key = reader.pascal_string("rule key")?;
        let value = reader.pascal_string("rule value")?;
        rules.insert(key, value);
    }
    Ok(rules)
}

#[async_trait]
impl Strategy for Samp {
    fn name(&self) -> &'static str {
        "samp"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let ip = resolve_ip(&target.address).await?;
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;

        let pinger = Pinger::start();
        let info_raw = udp
            .request(&request_header(b"SAMP", ip, target.query_port, b'i')?)
            .await?;
        let info = parse_info(&info_raw)?;
        let players = match udp
            .request(&request_header(b"SAMP", ip, target.query_port, b'd')?)
            .await
        {
            Ok(payload) => parse_players(&payload).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let rules = match udp
            .request(&request_header(b"SAMP", ip, target.query_port, b'r')?)
            .await
        {
            Ok(payload) => parse_rules(&payload).unwrap_or_default(),
            Err(_) => BTreeMap::new(),
        };
        let ping_ms = pinger.millis();

        let map = rules.get("mapname").cloned().unwrap_or_default();

        Ok(Probe {
            name: info.hostname,
            map,
            password: info.password,
            numplayers: i64::from(info.players),
            numbots: 0,
            maxplayers: i64::from(info.maxplayers),
            players: Some(players),
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms,
            raw: json!({
                "gamemode": info.gamemode,
                "language": info.language,
                "rules": rules,
            }),
            ..Probe::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_string(s: &str) -> Vec<u8> {
        let mut out = (u32::try_from(s.len()).unwrap()).to_le_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn info_opcode_parses() {
        let mut payload = vec![0u8; 11];
        payload.push(1); // passworded
        payload.extend_from_slice(&23u16.to_le_bytes());
        payload.extend_from_slice(&100u16.to_le_bytes());
        payload.extend_from_slice(&long_string("Los Santos RP"));
        payload.extend_from_slice(&long_string("freeroam"));
        payload.extend_from_slice(&long_string("en"));

        let info = parse_info(&payload).unwrap();
        assert!(info.password);
        assert_eq!(info.players, 23);
        assert_eq!(info.maxplayers, 100);
        assert_eq!(info.hostname, "Los Santos RP");
        assert_eq!(info.gamemode, "freeroam");
    }

    #[test]
    fn player_opcode_parses() {
        let mut payload = vec![0u8; 11];
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.push(7);
        payload.push(4);
        payload.extend_from_slice(b"nova");
        payload.extend_from_slice(&55i32.to_le_bytes());
        payload.extend_from_slice(&31u32.to_le_bytes());

        let players = parse_players(&payload).unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].name, "nova");
        assert_eq!(players[0].raw["score"], 55);
    }

    #[test]
    fn rule_opcode_carries_the_map_name() {
        let mut payload = vec![0u8; 11];
        payload.extend_from_slice(&2u16.to_le_bytes());
        payload.push(7);
        payload.extend_from_slice(b"mapname");
        payload.push(10);
        payload.extend_from_slice(b"Los Santos");
        payload.push(7);
        payload.extend_from_slice(b"weather");
        payload.push(2);
        payload.extend_from_slice(b"10");

        let rules = parse_rules(&payload).unwrap();
        assert_eq!(rules.get("mapname").unwrap(), "Los Santos");
        assert_eq!(rules.get("weather").unwrap(), "10");
    }
}
