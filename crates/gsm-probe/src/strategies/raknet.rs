//! RakNet unconnected ping (Minecraft: Bedrock Edition).
//!
//! The pong payload is a `;`-separated status line:
//! `edition;motd;protocol;version;players;max;guid;motd2;gamemode;...;port4;port6`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::codec::PacketReader;
use crate::net::udp::UdpClient;
use crate::net::Pinger;
use crate::probe::Probe;
use crate::strip::strip_section_codes;
use crate::target::ProbeTarget;
use crate::Strategy;

const UNCONNECTED_PING: u8 = 0x01;
const UNCONNECTED_PONG: u8 = 0x1C;
const OFFLINE_MAGIC: [u8; 16] = [
    0x00, 0xFF, 0xFF, 0x00, 0xFE, 0xFE, 0xFE, 0xFE, 0xFD, 0xFD, 0xFD, 0xFD, 0x12, 0x34, 0x56,
    0x78,
];

pub struct Raknet {
    timeout: Duration,
}

impl Raknet {
    pub fn new(timeout: Duration) -> Self {
        Raknet { timeout }
    }
}

fn parse_pong(payload: &[u8]) -> Result<Vec<String>, ProbeError> {
    let mut reader = PacketReader::new(payload);
    reader.expect(&[UNCONNECTED_PONG], "pong id")?;
    reader.u64_le("pong time")?;
    reader.u64_le("server guid")?;
    reader.expect(&OFFLINE_MAGIC, "offline magic")?;
    let len = reader.u16_be("status length")? as usize;
    let raw = reader.take(len, "status line")?;
    Ok(String::from_utf8_lossy(raw)
        .split(';')
        .map(str::to_owned)
        .collect())
}

#[async_trait]
impl Strategy for Raknet {
    fn name(&self) -> &'static str {
        "raknet"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;
        let mut request = vec![UNCONNECTED_PING];
        request.extend_from_slice(&0u64.to_le_bytes());
        request.extend_from_slice(&OFFLINE_MAGIC);
        request.extend_from_slice(&0u64.to_le_bytes()); // client guid

        let pinger = Pinger::start();
        let datagram = udp.request(&request).await?;
        let ping_ms = pinger.millis();

        let fields = parse_pong(&datagram)?;
        let field = |i: usize| fields.get(i).map(String::as_str).unwrap_or_default();

        let numplayers: i64 = field(4).parse().unwrap_or(0);
        let maxplayers: i64 = field(5).parse().unwrap_or(0);
        let port_v4 = match field(10) {
            "" => target.query_port.to_string(),
            port => port.to_owned(),
        };

        Ok(Probe {
            name: strip_section_codes(field(1)),
            map: strip_section_codes(field(7)),
            password: false,
            numplayers,
            numbots: 0,
            maxplayers,
            players: Some(Vec::new()),
            bots: None,
            connect: format!("{}:{port_v4}", target.address),
            ping_ms,
            raw: json!({
                "edition": field(0),
                "protocol": field(2),
                "version": field(3),
                "gamemode": field(8),
            }),
            ..Probe::default()
        })
    }
}
