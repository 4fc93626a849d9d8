//! FiveM (Cfx.re) query: quake-style `getinfo` over UDP for the headline
//! fields plus the HTTP `players.json` listing served on the same port.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::http::get_json;
use crate::net::udp::UdpClient;
use crate::net::Pinger;
use crate::net::codec::parse_infostring;
use crate::probe::{Player, Probe};
use crate::strip::strip_quake_colors;
use crate::target::ProbeTarget;
use crate::Strategy;

pub struct FiveM {
    http: Client,
    timeout: Duration,
}

impl FiveM {
    pub fn new(http: Client, timeout: Duration) -> Self {
        FiveM { http, timeout }
    }
}

#[async_trait]
impl Strategy for FiveM {
    fn name(&self) -> &'static str {
        "fivem"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let udp = UdpClient::connect(&target.address, target.query_port, self.timeout).await?;
        let pinger = Pinger::start();
        let datagram = udp.request(b"\xFF\xFF\xFF\xFFgetinfo gsm").await?;

        let payload = datagram
            .strip_prefix(b"\xFF\xFF\xFF\xFFinfoResponse\n".as_slice())
            .ok_or_else(|| ProbeError::protocol("unexpected getinfo response"))?;
        let info = parse_infostring(&String::from_utf8_lossy(payload));

        let players_url = format!(
            "http://{}:{}/players.json",
            target.address, target.query_port
        );
        let players_json = get_json(&self.http, &players_url, self.timeout)
            .await
            .unwrap_or_else(|_| json!([]));
        let ping_ms = pinger.millis();

        let players: Vec<Player> = players_json
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|p| Player {
                        name: strip_quake_colors(p["name"].as_str().unwrap_or_default()),
                        raw: p.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let get = |key: &str| info.get(key).map(String::as_str).unwrap_or_default();
        let numplayers: i64 = get("clients").parse().unwrap_or(players.len() as i64);

        Ok(Probe {
            name: strip_quake_colors(get("hostname")),
            map: strip_quake_colors(get("mapname")),
            password: false,
            numplayers,
            numbots: 0,
            maxplayers: get("sv_maxclients").parse().unwrap_or(0),
            players: Some(players),
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms,
            raw: json!(info),
            ..Probe::default()
        })
    }
}
