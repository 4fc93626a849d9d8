//! Vice City Multiplayer query: the SA-MP framing with the `VCMP` magic,
//! a version field in the info payload, and a plain name list for players.

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

use super::samp::request_header;

pub struct Vcmp {
    timeout: Duration,
}

impl Vcmp {
    pub fn new(timeout: Duration) -> Self {
        Vcmp { timeout }
    }
}

struct VcmpInfo {
    version: String,
    password: bool,
    players: u16,
    maxplayers: u16,
    hostname: String,
    gamemode: String,
    language: String,
}

fn parse_info(payload: &[u8]) -> Result<VcmpInfo, ProbeError> {
    let mut reader = PacketReader::new(payload);
    reader.take(11, "echoed request header")?;
    let version_raw = reader.take(12, "version")?;
    let version = String::from_utf8_lossy(version_raw)
        .trim_end_matches('\0')
        .to_owned();
    let password = reader.u8("password")? == 1;
    let players = reader.u16_le("players")?;
    let maxplayers = reader.u16_le("maxplayers")?;
    let hostname = reader.long_string("hostname")?;
    let gamemode = reader.long_string("gamemode")?;
    let language = reader.long_string("language")?;

    Ok(VcmpInfo {
        version,
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
        let name = reader.pascal_string("player name")?;
        players.push(Player::named(name));
    }
    Ok(players)
}

#[async_trait]
impl Strategy for Vcmp {
    fn name(&self) -> &'static str {
        "vcmp"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let ip = resolve_ip(&target.address).await?;
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;

        let pinger = Pinger::start();
        let info_raw = udp
            .request(&request_header(b"VCMP", ip, target.query_port, b'i')?)
            .await?;
        let info = parse_info(&info_raw)?;
        // Player list goes quiet on big servers; same degradation as SA-MP.
        let players = match udp
            .request(&request_header(b"VCMP", ip, target.query_port, b'c')?)
            .await
        {
            Ok(payload) => parse_players(&payload).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        let ping_ms = pinger.millis();

        Ok(Probe {
            name: info.hostname,
            map: info.language,
            password: info.password,
            numplayers: i64::from(info.players),
            numbots: 0,
            maxplayers: i64::from(info.maxplayers),
            players: Some(players),
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms,
            raw: json!({ "version": info.version, "gamemode": info.gamemode }),
            ..Probe::default()
        })
    }
}
