//! GameSpy v2 binary query.
//!
//! Request `FE FD 00` + 4-byte ping id + three want-flags (info, players,
//! teams). The response carries null-terminated key/value pairs up to an
//! empty key, then a player table: count byte, column headers up to an empty
//! header, then row-major values.

use std::collections::BTreeMap;
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

const PING_ID: [u8; 4] = [0x04, 0x05, 0x06, 0x07];

pub struct GameSpy2 {
    timeout: Duration,
}

impl GameSpy2 {
    pub fn new(timeout: Duration) -> Self {
        GameSpy2 { timeout }
    }
}

pub(super) fn parse_kv_section(
    reader: &mut PacketReader<'_>,
) -> Result<BTreeMap<String, String>, ProbeError> {
    let mut info = BTreeMap::new();
    loop {
        if reader.remaining() == 0 {
            break;
        }
        let key = reader.cstring("info key")?;
        if key.is_empty() {
            break;
        }
        let value = reader.cstring("info value")?;
        info.insert(key, value);
    }
    Ok(info)
}

pub(super) fn parse_player_table(
    reader: &mut PacketReader<'_>,
) -> Result<Vec<Player>, ProbeError> {
    if reader.remaining() == 0 {
        return Ok(Vec::new());
    }
    let count = reader.u8("player count")? as usize;

    let mut headers = Vec::new();
    loop {
        let header = reader.cstring("column header")?;
        if header.is_empty() {
            break;
        }
        headers.push(header.trim_end_matches('_').to_owned());
    }

    let mut players = Vec::new();
    'rows: for _ in 0..count {
        let mut raw = serde_json::Map::new();
        let mut name = String::new();
        for header in &headers {
            if reader.remaining() == 0 {
                break 'rows;
            }
            let value = reader.cstring("column value")?;
            if header == "player" {
                name.clone_from(&value);
            }
            raw.insert(header.clone(), json!(value));
        }
        players.push(Player {
            name,
            raw: json!(raw),
        });
    }
    Ok(players)
}

#[async_trait]
impl Strategy for GameSpy2 {
    fn name(&self) -> &'static str {
        "gamespy2"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;
        let mut request = vec![0xFE, 0xFD, 0x00];
        request.extend_from_slice(&PING_ID);
        request.extend_from_slice(&[0xFF, 0xFF, 0x00]); // info + players, no teams

        let pinger = Pinger::start();
        let datagram = udp.request(&request).await?;
        let ping_ms = pinger.millis();

        let mut reader = PacketReader::new(&datagram);
        reader.expect(&[0x00], "response type")?;
        reader.expect(&PING_ID, "ping id")?;

        let info = parse_kv_section(&mut reader)?;
        let players = parse_player_table(&mut reader)?;
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
    fn kv_and_player_table_parse() {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"hostname\0BFV 24/7\0mapname\0ia_drang\0maxplayers\032\0\0");
        payload.push(2); // players
        payload.extend_from_slice(b"player_\0score_\0\0");
        payload.extend_from_slice(b"alice\012\0bob\03\0");

        let mut reader = PacketReader::new(&payload);
        let info = parse_kv_section(&mut reader).unwrap();
        let players = parse_player_table(&mut reader).unwrap();

        assert_eq!(info.get("hostname").unwrap(), "BFV 24/7");
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "alice");
        assert_eq!(players[0].raw["score"], "12");
        assert_eq!(players[1].name, "bob");
    }

    #[test]
    fn truncated_player_rows_keep_the_complete_ones() {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"\0");
        payload.push(3);
        payload.extend_from_slice(b"player_\0\0");
        payload.extend_from_slice(b"only\0");

        let mut reader = PacketReader::new(&payload);
        parse_kv_section(&mut reader).unwrap();
        let players = parse_player_table(&mut reader).unwrap();
        assert_eq!(players.len(), 1);
    }
}
