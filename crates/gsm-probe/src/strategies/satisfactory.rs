//! Satisfactory dedicated-server query.
//!
//! Two stages: a lightweight UDP state poll (magic `0xF6D5`, cookie echo)
//! for liveness and the server name, then (when the server is in the
//! `Playing` state) the authenticated HTTPS API `QueryServerState` for
//! player counts. The API presents a self-signed certificate, so this
//! strategy owns the insecure client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::codec::PacketReader;
use crate::net::http::post_json;
use crate::net::udp::UdpClient;
use crate::net::Pinger;
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

const PROTOCOL_MAGIC: u16 = 0xF6D5;
const STATE_PLAYING: u8 = 3;

pub struct Satisfactory {
    insecure_http: reqwest::Client,
    timeout: Duration,
}

impl Satisfactory {
    pub fn new(insecure_http: reqwest::Client, timeout: Duration) -> Self {
        Satisfactory {
            insecure_http,
            timeout,
        }
    }
}

struct StatePoll {
    server_state: u8,
    server_name: String,
}

fn encode_poll(cookie: u64) -> Vec<u8> {
    let mut request = Vec::with_capacity(13);
    request.extend_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
    request.push(0); // message: poll server state
    request.push(1); // protocol version
    request.extend_from_slice(&cookie.to_le_bytes());
    request.push(1); // terminator
    request
}

fn parse_poll(payload: &[u8], cookie: u64) -> Result<StatePoll, ProbeError> {
    let mut reader = PacketReader::new(payload);
    let magic = reader.u16_le("protocol magic")?;
    if magic != PROTOCOL_MAGIC {
        return Err(ProbeError::protocol("bad protocol magic"));
    }
    reader.u8("message type")?;
    reader.u8("protocol version")?;
    let echoed = reader.u64_le("cookie")?;
    if echoed != cookie {
        return Err(ProbeError::protocol("cookie mismatch"));
    }
    let server_state = reader.u8("server state")?;
    reader.u32_le("server netcl")?;
    reader.u64_le("server flags")?;
    let num_substates = reader.u8("substate count")?;
    reader.take(usize::from(num_substates) * 3, "substates")?;
    let name_len = reader.u16_le("server name length")?;
    let raw = reader.take(name_len as usize, "server name")?;

    Ok(StatePoll {
        server_state,
        server_name: String::from_utf8_lossy(raw).into_owned(),
    })
}

#[async_trait]
impl Strategy for Satisfactory {
    fn name(&self) -> &'static str {
        "satisfactory"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let token = target.require_extra("_token")?;
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;

        // The cookie only has to distinguish this probe's response.
        let cookie = u64::from(target.query_port) << 32 | 0x5346_5354;
        let pinger = Pinger::start();
        let datagram = udp.request(&encode_poll(cookie)).await?;
        let ping_ms = pinger.millis();
        let poll = parse_poll(&datagram, cookie)?;

        let (numplayers, maxplayers, game_state) = if poll.server_state == STATE_PLAYING {
            let url = format!("https://{}:{}/api/v1/", target.address, target.query_port);
            let body = json!({ "function": "QueryServerState", "data": { "ServerGameState": {} } });
            let response = post_json(
                &self.insecure_http,
                &url,
                &body,
                Some(token),
                self.timeout,
            )
            .await?;
            let state = response["data"]["serverGameState"].clone();
            (
                state["numConnectedPlayers"].as_i64().unwrap_or(0),
                state["playerLimit"].as_i64().unwrap_or(0),
                state,
            )
        } else {
            (0, 0, serde_json::Value::Null)
        };

        Ok(Probe {
            name: poll.server_name,
            map: String::new(),
            password: false,
            numplayers,
            numbots: 0,
            maxplayers,
            players: None,
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms,
            raw: json!({ "server_state": poll.server_state, "game_state": game_state }),
            ..Probe::default()
        })
    }
}
