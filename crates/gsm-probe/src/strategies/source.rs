//! Source engine (A2S) query protocol, shared with the GoldSource-era `won`
//! strategy.
//!
//! Three request/response pairs over UDP: `info`, `players`, `rules`, each
//! subject to a challenge-then-retry exchange. Split responses are
//! reassembled (uncompressed source format only).

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

const INFO_REQUEST: &[u8] = b"\xFF\xFF\xFF\xFFTSource Engine Query\0";
const HEADER_SINGLE: i32 = -1;
const HEADER_SPLIT: i32 = -2;
const KIND_INFO_SOURCE: u8 = 0x49;
const KIND_INFO_GOLDSRC: u8 = 0x6D;
const KIND_CHALLENGE: u8 = 0x41;
const KIND_PLAYERS: u8 = 0x44;
const KIND_RULES: u8 = 0x45;

// ---------------------------------------------------------------------------
// Wire client
// ---------------------------------------------------------------------------

pub(super) struct A2sClient {
    udp: UdpClient,
}

#[derive(Debug, Clone)]
pub(super) struct SourceInfo {
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    pub visibility: u8,
    pub version: String,
    pub port: Option<u16>,
    pub keywords: Option<String>,
    pub game_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub(super) struct GoldSourceInfo {
    pub address: String,
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub players: u8,
    pub max_players: u8,
    pub visibility: u8,
    pub bots: u8,
}

pub(super) enum A2sInfo {
    Source(SourceInfo),
    GoldSource(GoldSourceInfo),
}

#[derive(Debug, Clone)]
pub(super) struct A2sPlayer {
    pub name: String,
    pub score: i32,
    pub duration: f32,
}

impl A2sClient {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, ProbeError> {
        Ok(A2sClient {
            udp: UdpClient::connect(host, port, timeout).await?,
        })
    }

    /// Send a request, follow one challenge round, reassemble the payload.
    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, ProbeError> {
        let mut payload = self.round_trip(request).await?;
        if payload.first() == Some(&KIND_CHALLENGE) {
            let mut reader = PacketReader::new(&payload[1..]);
            let challenge = reader.take(4, "challenge")?.to_vec();
            let mut retry = request.to_vec();
            if retry.ends_with(&[0xFF, 0xFF, 0xFF, 0xFF]) {
                retry.truncate(retry.len() - 4);
            }
            retry.extend_from_slice(&challenge);
            payload = self.round_trip(&retry).await?;
        }
        Ok(payload)
    }

    async fn round_trip(&self, request: &[u8]) -> Result<Vec<u8>, ProbeError> {
        let datagram = self.udp.request(request).await?;
        let mut reader = PacketReader::new(&datagram);
        match reader.i32_le("packet header")? {
            HEADER_SINGLE => Ok(reader.rest().to_vec()),
            HEADER_SPLIT => self.reassemble(&datagram).await,
            other => Err(ProbeError::protocol(format!(
                "unexpected packet header {other:#x}"
            ))),
        }
    }

    async fn reassemble(&self, first: &[u8]) -> Result<Vec<u8>, ProbeError> {
        let mut fragments: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        let mut datagram = first.to_vec();

        loop {
            let mut reader = PacketReader::new(&datagram);
            reader.i32_le("split header")?;
            let id = reader.u32_le("split id")?;
            if id & 0x8000_0000 != 0 {
                return Err(ProbeError::protocol("compressed split packets unsupported"));
            }
            let total = reader.u8("split total")?;
            let number = reader.u8("split number")?;
            reader.u16_le("split size")?;
            fragments.insert(number, reader.rest().to_vec());

            if fragments.len() >= total as usize {
                break;
            }
            datagram = self.udp.recv().await?;
        }

        let mut assembled: Vec<u8> = fragments.into_values().flatten().collect();
        let mut reader = PacketReader::new(&assembled);
        if reader.i32_le("inner header")? == HEADER_SINGLE {
            assembled = reader.rest().to_vec();
        }
        Ok(assembled)
    }

    pub async fn info(&self) -> Result<A2sInfo, ProbeError> {
        let payload = self.exchange(INFO_REQUEST).await?;
        let mut reader = PacketReader::new(&payload);
        match reader.u8("info kind")? {
            KIND_INFO_SOURCE => Ok(A2sInfo::Source(parse_source_info(&mut reader)?)),
            KIND_INFO_GOLDSRC => Ok(A2sInfo::GoldSource(parse_goldsrc_info(&mut reader)?)),
            other => Err(ProbeError::protocol(format!(
                "unexpected info response kind {other:#x}"
            ))),
        }
    }

    pub async fn players(&self) -> Result<Vec<A2sPlayer>, ProbeError> {
        let payload = self
            .exchange(b"\xFF\xFF\xFF\xFFU\xFF\xFF\xFF\xFF")
            .await?;
        let mut reader = PacketReader::new(&payload);
        reader.expect(&[KIND_PLAYERS], "players response kind")?;
        let count = reader.u8("player count")?;
        let mut players = Vec::with_capacity(count as usize);
        for _ in 0..count {
            reader.u8("player index")?;
            let name = reader.cstring("player name")?;
            let score = reader.i32_le("player score")?;
            let duration = f32::from_bits(reader.u32_le("player duration")?);
            players.push(A2sPlayer {
                name,
                score,
                duration,
            });
        }
        Ok(players)
    }

    pub async fn rules(&self) -> Result<BTreeMap<String, String>, ProbeError> {
        let payload = self
            .exchange(b"\xFF\xFF\xFF\xFFV\xFF\xFF\xFF\xFF")
            .await?;
        let mut reader = PacketReader::new(&payload);
        reader.expect(&[KIND_RULES], "rules response kind")?;
        let count = reader.u16_le("rule count")?;
        let mut rules = BTreeMap::new();
        for _ in 0..count {
            let key = reader.cstring("rule key")?;
            let value = reader.cstring("rule value")?;
            rules.insert(key, value);
        }
        Ok(rules)
    }
}

fn parse_source_info(reader: &mut PacketReader<'_>) -> Result<SourceInfo, ProbeError> {
    reader.u8("protocol version")?;
    let name = reader.cstring("server name")?;
    let map = reader.cstring("map")?;
    let folder = reader.cstring("folder")?;
    let game = reader.cstring("game")?;
    let app_id = reader.u16_le("app id")?;
    let players = reader.u8("players")?;
    let max_players = reader.u8("max players")?;
    let bots = reader.u8("bots")?;
    reader.u8("server type")?;
    reader.u8("environment")?;
    let visibility = reader.u8("visibility")?;
    reader.u8("vac")?;
    let version = reader.cstring("version")?;

    let mut info = SourceInfo {
        name,
        map,
        folder,
        game,
        app_id,
        players,
        max_players,
        bots,
        visibility,
        version,
        port: None,
        keywords: None,
        game_id: None,
    };

    if reader.remaining() > 0 {
        let edf = reader.u8("extra data flag")?;
        if edf & 0x80 != 0 {
            info.port = Some(reader.u16_le("game port")?);
        }
        if edf & 0x10 != 0 {
            reader.u64_le("steam id")?;
        }
        if edf & 0x40 != 0 {
            reader.u16_le("spectator port")?;
            reader.cstring("spectator name")?;
        }
        if edf & 0x20 != 0 {
            info.keywords = Some(reader.cstring("keywords")?);
        }
        if edf & 0x01 != 0 {
            info.game_id = Some(reader.u64_le("game id")?);
        }
    }

    Ok(info)
}

fn parse_goldsrc_info(reader: &mut PacketReader<'_>) -> Result<GoldSourceInfo, ProbeError> {
    let address = reader.cstring("address")?;
    let name = reader.cstring("server name")?;
    let map = reader.cstring("map")?;
    let folder = reader.cstring("folder")?;
    let game = reader.cstring("game")?;
    let players = reader.u8("players")?;
    let max_players = reader.u8("max players")?;
    reader.u8("protocol version")?;
    reader.u8("server type")?;
    reader.u8("environment")?;
    let visibility = reader.u8("visibility")?;
    let is_mod = reader.u8("mod flag")?;
    if is_mod == 1 {
        reader.cstring("mod link")?;
        reader.cstring("mod download link")?;
        reader.u8("mod nul")?;
        reader.u32_le("mod version")?;
        reader.u32_le("mod size")?;
        reader.u8("mod type")?;
        reader.u8("mod dll")?;
    }
    reader.u8("vac")?;
    let bots = reader.u8("bots")?;

    Ok(GoldSourceInfo {
        address,
        name,
        map,
        folder,
        game,
        players,
        max_players,
        visibility,
        bots,
    })
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Peel the bot entries off a duration-sorted player list.
///
/// The wire format counts bots but does not flag them; bots connect when the
/// server boots, so after sorting by connect duration (longest first) the
/// leading `numbots` entries are the bots.
pub(super) fn split_players_and_bots(
    mut players: Vec<A2sPlayer>,
    numbots: usize,
) -> (Vec<Player>, Vec<Player>) {
    players.sort_by(|a, b| {
        b.duration
            .partial_cmp(&a.duration)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let numbots = numbots.min(players.len());
    let humans = players.split_off(numbots);
    (to_players(humans), to_players(players))
}

fn to_players(raw: Vec<A2sPlayer>) -> Vec<Player> {
    raw.into_iter()
        .map(|p| Player {
            name: p.name,
            raw: json!({ "score": p.score, "time": p.duration }),
        })
        .collect()
}

/// App-id-specific fixes the wire data needs.
///
/// 629760 (MORDHAU) reports the live player count only in the `B:` keyword
/// tag; 252490 (Rust) reports max players in the `mp` tag; 346110 (ARK:SE)
/// reports a bogus player count, so the player list length wins.
pub(super) fn apply_appid_fixes(probe: &mut Probe, game_id: Option<u64>, tags: &[String]) {
    match game_id {
        Some(629_760) => {
            probe.numplayers = tags
                .iter()
                .find_map(|t| t.strip_prefix("B:"))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
        }
        Some(252_490) => {
            if let Some(mp) = tags
                .iter()
                .find_map(|t| t.strip_prefix("mp"))
                .and_then(|v| v.parse().ok())
            {
                probe.maxplayers = mp;
            }
        }
        Some(346_110) => {
            if let Some(players) = &probe.players {
                probe.numplayers = players.len() as i64;
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

pub struct Source {
    timeout: Duration,
}

impl Source {
    pub fn new(timeout: Duration) -> Self {
        Source { timeout }
    }
}

#[async_trait]
impl Strategy for Source {
    fn name(&self) -> &'static str {
        "source"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let client = A2sClient::connect(&target.address, target.query_port, self.timeout).await?;
        let pinger = Pinger::start();
        let info = client.info().await?;
        // Some games never answer the player query (CSGO with restricted
        // host_players_show, Conan Exiles); degrade to an empty list.
        let wire_players = client.players().await.unwrap_or_default();
        let ping_ms = pinger.millis();

        let A2sInfo::Source(info) = info else {
            return Err(ProbeError::protocol(
                "goldsource response on a source query port",
            ));
        };

        let (players, bots) = split_players_and_bots(wire_players, info.bots as usize);
        let tags: Vec<String> = info
            .keywords
            .as_deref()
            .map(|k| k.split(',').map(str::to_owned).collect())
            .unwrap_or_default();

        let mut raw = json!({
            "folder": info.folder,
            "game": info.game,
            "appid": info.app_id,
            "version": info.version,
        });
        if !tags.is_empty() {
            raw["tags"] = json!(tags);
        }

        let mut probe = Probe {
            name: info.name,
            map: info.map,
            password: info.visibility == 1,
            numplayers: i64::from(info.players),
            numbots: i64::from(info.bots),
            maxplayers: i64::from(info.max_players),
            players: Some(players),
            bots: Some(bots),
            connect: format!(
                "{}:{}",
                target.address,
                info.port.unwrap_or(target.query_port)
            ),
            ping_ms,
            raw,
            ..Probe::default()
        };
        apply_appid_fixes(&mut probe, info.game_id.or(Some(u64::from(info.app_id))), &tags);
        Ok(probe)
    }
}
