//! Doom 3 engine (idTech 4) getInfo query, also used by Quake 4 and Prey.
//!
//! Binary little-endian payload: challenge, protocol version, cstring
//! key/value pairs terminated by an empty key, then player entries
//! terminated by the sentinel client id 32.

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

const MAX_CLIENT_SENTINEL: u8 = 32;

pub struct Doom3 {
    timeout: Duration,
}

impl Doom3 {
    pub fn new(timeout: Duration) -> Self {
        Doom3 { timeout }
    }
}

fn parse_info_response(payload: &[u8]) -> Result<(BTreeMap<String, String>, Vec<Player>), ProbeError> {
    let mut reader = PacketReader::new(payload);
    reader.expect(b"\xFF\xFF", "oob prefix")?;
    let marker = reader.cstring("response marker")?;
    if marker != "infoResponse" {
        return Err(ProbeError::protocol(format!(
            "unexpected response marker {marker:?}"
        )));
    }
    reader.u32_le("challenge")?;
    reader.u32_le("protocol version")?;

    let mut info = BTreeMap::new();
    loop {
        let key = reader.cstring("info key")?;
        if key.is_empty() {
            break;
        }
        let value = reader.cstring("info value")?;
        info.insert(key, value);
    }

    let mut players = Vec::new();
    while reader.remaining() > 0 {
        let id = reader.u8("player id")?;
        if id == MAX_CLIENT_SENTINEL {
            break;
        }
        let ping = reader.u16_le("player ping")?;
        let rate = reader.u32_le("player rate")?;
        let name = reader.cstring("player name")?;
        players.push(Player {
            name,
            raw: json!({ "id": id, "ping": ping, "rate": rate }),
        });
    }

    Ok((info, players))
}

#[async_trait]
impl Strategy for Doom3 {
    fn name(&self) -> &'static str {
        "doom3"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;
        let mut request = b"\xFF\xFFgetInfo\0".to_vec();
        request.extend_from_slice(&0u32.to_le_bytes());

        let pinger = Pinger::start();
        let datagram = udp.request(&request).await?;
        let ping_ms = pinger.millis();

        let (info, players) = parse_info_response(&datagram)?;
        let get = |key: &str| info.get(key).map(String::as_str).unwrap_or_default();
        let password = matches!(get("si_usePass"), "1") || matches!(get("si_needPass"), "1");

        Ok(Probe {
            name: get("si_name").to_owned(),
            map: get("si_map").to_owned(),
            password,
            numplayers: players.len() as i64,
            numbots: 0,
            maxplayers: get("si_maxPlayers").parse().unwrap_or(0),
            players: Some(players),
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
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
    fn info_response_parses_pairs_and_players() {
        let mut payload = b"\xFF\xFFinfoResponse\0".to_vec();
        payload.extend_from_slice(&7u32.to_le_bytes());
        payload.extend_from_slice(&41u32.to_le_bytes());
        payload.extend_from_slice(b"si_name\0Delta Labs\0si_map\0game/mp/d3dm1\0si_maxPlayers\08\0\0");
        payload.push(0); // player id
        payload.extend_from_slice(&55u16.to_le_bytes());
        payload.extend_from_slice(&20000u32.to_le_bytes());
        payload.extend_from_slice(b"marine\0");
        payload.push(MAX_CLIENT_SENTINEL);

        let (info, players) = parse_info_response(&payload).unwrap();
        assert_eq!(info.get("si_name").unwrap(), "Delta Labs");
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].name, "marine");
    }

    #[test]
    fn wrong_marker_is_a_protocol_error() {
        let payload = b"\xFF\xFFprint\0oops".to_vec();
        assert!(matches!(
            parse_info_response(&payload),
            Err(ProbeError::Protocol(_))
        ));
    }
}
