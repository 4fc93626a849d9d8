//! GameSpy v3 challenge-then-query protocol.
//!
//! `FE FD 09` obtains a numeric challenge; `FE FD 00` with the big-endian
//! challenge and the `FF FF FF 01` want-mask returns the payload: key/value
//! cstrings up to an empty key, then typed field blocks (`player_`,
//! `score_`, ...) holding one value per player up to an empty value.

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

const SESSION_ID: [u8; 4] = [0x10, 0x20, 0x30, 0x40];

pub struct GameSpy3 {
    timeout: Duration,
}

impl GameSpy3 {
    pub fn new(timeout: Duration) -> Self {
        GameSpy3 { timeout }
    }
}

pub(super) struct GameSpy3Payload {
    pub info: BTreeMap<String, String>,
    pub players: Vec<Player>,
    pub ping_ms: u64,
}

pub(super) async fn query_payload(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<GameSpy3Payload, ProbeError> {
    let udp = UdpClient::connect(host, port, timeout).await?;
    let pinger = Pinger::start();

    let mut challenge_request = vec![0xFE, 0xFD, 0x09];
    challenge_request.extend_from_slice(&SESSION_ID);
    let challenge_response = udp.request(&challenge_request).await?;

    let mut reader = PacketReader::new(&challenge_response);
    reader.expect(&[0x09], "challenge response type")?;
    reader.expect(&SESSION_ID, "session id")?;
    let challenge: i32 = reader
        .cstring("challenge")?
        .trim()
        .parse()
        .map_err(|_| ProbeError::protocol("non-numeric challenge"))?;

    let mut query = vec![0xFE, 0xFD, 0x00];
    query.extend_from_slice(&SESSION_ID);
    query.extend_from_slice(&challenge.to_be_bytes());
    query.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0x01]);
    let datagram = udp.request(&query).await?;
    let ping_ms = pinger.millis();

    let mut reader = PacketReader::new(&datagram);
    reader.expect(&[0x00], "query response type")?;
    reader.expect(&SESSION_ID, "session id")?;
    // splitnum marker + packet index byte
    reader.expect(b"splitnum\0", "splitnum marker")?;
    reader.u8("packet number")?;

    let (info, players) = parse_payload(&mut reader)?;
    Ok(GameSpy3Payload {
        info,
        players,
        ping_ms,
    })
}

fn parse_payload(
    reader: &mut PacketReader<'_>,
) -> Result<(BTreeMap<String, String>, Vec<Player>), ProbeError> {
    let mut info = BTreeMap::new();
    loop {
        if reader.remaining() == 0 {
            return Ok((info, Vec::new()));
        }
        let key = reader.cstring("info key")?;
        if key.is_empty() {
            break;
        }
        let value = reader.cstring("info value")?;
        info.insert(key, value);
    }

    // Player section: 0x01, then per-field blocks.
    let mut columns: Vec<(String, Vec<String>)> = Vec::new();
    if reader.remaining() > 0 {
        reader.u8("player section marker")?;
        while reader.remaining() > 0 {
            let field = reader.cstring("field name")?;
            if field.is_empty() {
                break;
            }
            reader.u8("field offset")?;
            let mut values = Vec::new();
            while reader.remaining() > 0 {
                let value = reader.cstring("field value")?;
                if value.is_empty() {
                    break;
                }
                values.push(value);
            }
            columns.push((field.trim_end_matches('_').to_owned(), values));
        }
    }

    let player_count = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
    let mut players = Vec::with_capacity(player_count);
    for index in 0..player_count {
        let mut raw = serde_json::Map::new();
        let mut name = String::new();
        for (field, values) in &columns {
            if let Some(value) = values.get(index) {
                if field == "player" {
                    name.clone_from(value);
                }
                raw.insert(field.clone(), json!(value));
            }
        }
        players.push(Player {
            name,
            raw: json!(raw),
        });
    }

    Ok((info, players))
}

#[async_trait]
impl Strategy for GameSpy3 {
    fn name(&self) -> &'static str {
        "gamespy3"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let payload = query_payload(&target.address, target.query_port, self.timeout).await?;
        let get = |key: &str| payload.info.get(key).map(String::as_str).unwrap_or_default();
        let hostport = payload
            .info
            .get("hostport")
            .cloned()
            .unwrap_or_else(|| target.query_port.to_string());
        let numplayers = get("numplayers")
            .parse()
            .unwrap_or(payload.players.len() as i64);

        Ok(Probe {
            name: get("hostname").to_owned(),
            map: get("mapname").to_owned(),
            password: matches!(get("password"), "1" | "True" | "true"),
            numplayers,
            numbots: 0,
            maxplayers: get("maxplayers").parse().unwrap_or(0),
            players: Some(payload.players),
            bots: None,
            connect: format!("{}:{hostport}", target.address),
            ping_ms: payload.ping_ms,
            raw: json!(payload.info),
            ..Probe::default()
        })
    }
}
