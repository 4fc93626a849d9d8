//! Frostbite RCON-style query (Battlefield 3/4, Bad Company 2).
//!
//! TCP packets carry a 12-byte header (sequence, total size, word count)
//! followed by words, each a 32-bit length, the bytes, and a null. The
//! `serverinfo` response is a fixed-position word list; `listPlayers all`
//! is a self-describing field table.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::net::TcpStream;

use crate::error::ProbeError;
use crate::net::codec::PacketReader;
use crate::net::{tcp, Pinger};
use crate::probe::{Player, Probe};
use crate::target::ProbeTarget;
use crate::Strategy;

const HEADER_LEN: usize = 12;

pub struct Battlefield {
    timeout: Duration,
}

impl Battlefield {
    pub fn new(timeout: Duration) -> Self {
        Battlefield { timeout }
    }
}

fn encode_request(sequence: u32, words: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    for word in words {
        body.extend_from_slice(&(u32::try_from(word.len()).unwrap_or(0)).to_le_bytes());
        body.extend_from_slice(word.as_bytes());
        body.push(0);
    }
    let total = HEADER_LEN + body.len();

    let mut packet = Vec::with_capacity(total);
    packet.extend_from_slice(&sequence.to_le_bytes());
    packet.extend_from_slice(&(u32::try_from(total).unwrap_or(0)).to_le_bytes());
    packet.extend_from_slice(&(u32::try_from(words.len()).unwrap_or(0)).to_le_bytes());
    packet.extend_from_slice(&body);
    packet
}

async fn round_trip(
    stream: &mut TcpStream,
    words: &[&str],
    sequence: u32,
    timeout: Duration,
) -> Result<Vec<String>, ProbeError> {
    tcp::write_all(stream, &encode_request(sequence, words), timeout).await?;

    let header = tcp::read_exact(stream, HEADER_LEN, timeout).await?;
    let mut reader = PacketReader::new(&header);
    reader.u32_le("sequence")?;
    let total = reader.u32_le("total size")? as usize;
    let word_count = reader.u32_le("word count")?;
    if total < HEADER_LEN {
        return Err(ProbeError::protocol("frostbite packet shorter than header"));
    }

    let body = tcp::read_exact(stream, total - HEADER_LEN, timeout).await?;
    let mut reader = PacketReader::new(&body);
    let mut out = Vec::with_capacity(word_count as usize);
    for _ in 0..word_count {
        let len = reader.u32_le("word length")? as usize;
        let raw = reader.take(len, "word")?;
        reader.u8("word null")?;
        out.push(String::from_utf8_lossy(raw).into_owned());
    }

    match out.first().map(String::as_str) {
        Some("OK") => Ok(out),
        Some(status) => Err(ProbeError::transport(format!("server said {status}"))),
        None => Err(ProbeError::protocol("empty frostbite response")),
    }
}

/// Decode the self-describing `listPlayers` table.
fn parse_player_table(words: &[String]) -> Vec<Player> {
    let mut cursor = 1; // skip OK
    let Some(field_count) = words.get(cursor).and_then(|w| w.parse::<usize>().ok()) else {
        return Vec::new();
    };
    cursor += 1;
    let fields: Vec<&String> = words.iter().skip(cursor).take(field_count).collect();
    cursor += field_count;
    let Some(player_count) = words.get(cursor).and_then(|w| w.parse::<usize>().ok()) else {
        return Vec::new();
    };
    cursor += 1;

    let mut players = Vec::with_capacity(player_count);
    for _ in 0..player_count {
        let row = &words[cursor.min(words.len())..(cursor + field_count).min(words.len())];
        if row.len() < field_count {
            break;
        }
        cursor += field_count;

        let mut raw = serde_json::Map::new();
        let mut name = String::new();
        for (field, value) in fields.iter().zip(row) {
            if field.as_str() == "name" {
                name.clone_from(value);
            }
            raw.insert((*field).clone(), json!(value));
        }
        players.push(Player {
            name,
            raw: json!(raw),
        });
    }
    players
}

#[async_trait]
impl Strategy for Battlefield {
    fn name(&self) -> &'static str {
        "battlefield"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let mut stream = tcp::connect(&target.address, target.query_port, self.timeout).await?;
        let pinger = Pinger::start();
        let info = round_trip(&mut stream, &["serverinfo"], 0, self.timeout).await?;
        let players_words =
            round_trip(&mut stream, &["listPlayers", "all"], 1, self.timeout)
                .await
                .unwrap_or_default();
        let ping_ms = pinger.millis();

        let word = |i: usize| info.get(i).map(String::as_str).unwrap_or_default();
        let players = parse_player_table(&players_words);

        Ok(Probe {
            name: word(1).to_owned(),
            map: word(5).to_owned(),
            password: info.iter().skip(6).any(|w| w == "true"),
            numplayers: word(2).parse().unwrap_or(0),
            numbots: 0,
            maxplayers: word(3).parse().unwrap_or(0),
            players: Some(players),
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms,
            raw: json!({ "gamemode": word(4), "words": info }),
            ..Probe::default()
        })
    }
}
