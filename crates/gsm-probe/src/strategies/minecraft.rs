//! Minecraft (Java Edition) server-list status over TCP.
//!
//! Varint-framed handshake + status request; the response is a JSON status
//! document whose `description` is a chat component (plain string, `text`
//! object, or `extra` fragment list) that gets flattened and stripped of
//! legacy `§` codes.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{io_error, ProbeError};
use crate::net::{tcp, Pinger};
use crate::probe::{Player, Probe};
use crate::strip::strip_section_codes;
use crate::target::ProbeTarget;
use crate::Strategy;

const STATUS_STATE: i32 = 1;
const PROTOCOL_VERSION: i32 = -1;
const MAX_STATUS_LEN: usize = 1 << 21;

pub struct Minecraft {
    timeout: Duration,
}

impl Minecraft {
    pub fn new(timeout: Duration) -> Self {
        Minecraft { timeout }
    }
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut remaining = value as u32;
    loop {
        let byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

async fn read_varint(stream: &mut TcpStream, timeout: Duration) -> Result<i32, ProbeError> {
    let mut value: u32 = 0;
    for shift in 0..5 {
        let byte = tokio::time::timeout(timeout, stream.read_u8())
            .await
            .map_err(|_| ProbeError::Timeout)?
            .map_err(|e| io_error(&e))?;
        value |= u32::from(byte & 0x7F) << (shift * 7);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProbeError::protocol("varint longer than five bytes"))
}

fn frame_packet(packet_id: i32, body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::new();
    write_varint(&mut packet, packet_id);
    packet.extend_from_slice(body);

    let mut framed = Vec::new();
    write_varint(&mut framed, i32::try_from(packet.len()).unwrap_or(i32::MAX));
    framed.extend_from_slice(&packet);
    framed
}

/// Flatten the chat-component `description` into plain text.
pub(super) fn flatten_description(description: &Value) -> String {
    let mut name = String::new();
    if let Some(text) = description.as_str() {
        name = text.to_owned();
    }
    if let Some(text) = description["text"].as_str() {
        name = text.to_owned();
    }
    if let Some(extra) = description["extra"].as_array() {
        name = extra
            .iter()
            .map(|part| part["text"].as_str().unwrap_or_default())
            .collect();
    }

    let name = name
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    strip_section_codes(&name)
}

#[async_trait]
impl Strategy for Minecraft {
    fn name(&self) -> &'static str {
        "minecraft"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let mut stream = tcp::connect(&target.address, target.query_port, self.timeout).await?;
        let pinger = Pinger::start();

        let mut handshake = Vec::new();
        write_varint(&mut handshake, PROTOCOL_VERSION);
        write_varint(
            &mut handshake,
            i32::try_from(target.address.len()).unwrap_or(0),
        );
        handshake.extend_from_slice(target.address.as_bytes());
        handshake.extend_from_slice(&target.query_port.to_be_bytes());
        write_varint(&mut handshake, STATUS_STATE);

        let mut request = frame_packet(0x00, &handshake);
        request.extend_from_slice(&frame_packet(0x00, &[]));
        tokio::time::timeout(self.timeout, stream.write_all(&request))
            .await
            .map_err(|_| ProbeError::Timeout)?
            .map_err(|e| io_error(&e))?;

        let _frame_len = read_varint(&mut stream, self.timeout).await?;
        let packet_id = read_varint(&mut stream, self.timeout).await?;
        if packet_id != 0x00 {
            return Err(ProbeError::protocol(format!(
                "unexpected status packet id {packet_id}"
            )));
        }
        let json_len = read_varint(&mut stream, self.timeout).await?;
        let json_len = usize::try_from(json_len)
            .ok()
            .filter(|&n| n <= MAX_STATUS_LEN)
            .ok_or_else(|| ProbeError::protocol("unreasonable status length"))?;

        let mut body = vec![0u8; json_len];
        tokio::time::timeout(self.timeout, stream.read_exact(&mut body))
            .await
            .map_err(|_| ProbeError::Timeout)?
            .map_err(|e| io_error(&e))?;
        let ping_ms = pinger.millis();

        let mut status: Value = serde_json::from_slice(&body)
            .map_err(|e| ProbeError::protocol(format!("invalid status json: {e}")))?;

        let name = flatten_description(&status["description"]);
        let numplayers = status["players"]["online"].as_i64().unwrap_or(0);
        let maxplayers = status["players"]["max"].as_i64().unwrap_or(0);
        let players = status["players"]["sample"]
            .as_array()
            .map(|sample| {
                sample
                    .iter()
                    .map(|p| Player {
                        name: p["name"].as_str().unwrap_or_default().to_owned(),
                        raw: p.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        // The favicon is a large base64 blob with no monitoring value.
        if let Some(obj) = status.as_object_mut() {
            obj.remove("favicon");
        }

        Ok(Probe {
            name,
            map: String::new(),
            password: false,
            numplayers,
            numbots: 0,
            maxplayers,
            players: Some(players),
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms,
            raw: status,
            ..Probe::default()
        })
    }
}
