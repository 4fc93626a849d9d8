//! BeamMP query via the backend server list.
//!
//! The backend exposes no per-server endpoint, so `pre_query` snapshots the
//! full list keyed by `ip:port` and probes resolve endpoints from the
//! snapshot. The backend intermittently returns partial lists; a partial
//! response merges into the existing snapshot instead of replacing it, and a
//! full-size response replaces it outright.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ProbeError;
use crate::net::http::get_json;
use crate::net::{resolve_ip, Pinger};
use crate::probe::{Player, Probe};
use crate::strip::{prettify_map_path, strip_beammp_codes};
use crate::target::ProbeTarget;
use crate::Strategy;

const SERVER_LIST_URL: &str = "https://backend.beammp.com/servers-info";

/// Responses at least this large are treated as the complete list.
const FULL_LIST_THRESHOLD: usize = 1000;

pub struct BeamMp {
    http: Client,
    timeout: Duration,
    master_servers: RwLock<Option<HashMap<String, Value>>>,
}

impl BeamMp {
    pub fn new(http: Client, timeout: Duration) -> Self {
        BeamMp {
            http,
            timeout,
            master_servers: RwLock::new(None),
        }
    }

    async fn refresh_snapshot(&self) -> Result<(), ProbeError> {
        let servers = get_json(&self.http, SERVER_LIST_URL, self.timeout).await?;
        let servers = servers
            .as_array()
            .ok_or_else(|| ProbeError::protocol("server list is not an array"))?;

        let mut snapshot = HashMap::with_capacity(servers.len());
        for server in servers {
            let ip = server["ip"].as_str().unwrap_or_default();
            let port = &server["port"];
            let port = port
                .as_str()
                .map(str::to_owned)
                .or_else(|| port.as_u64().map(|p| p.to_string()))
                .unwrap_or_default();
            snapshot.insert(format!("{ip}:{port}"), server.clone());
        }

        debug!(servers = servers.len(), "beammp server list refreshed");
        let mut guard = self.master_servers.write().await;
        match guard.as_mut() {
            Some(existing) if servers.len() < FULL_LIST_THRESHOLD => {
                existing.extend(snapshot);
            }
            _ => *guard = Some(snapshot),
        }
        Ok(())
    }

    async fn lookup(&self, key: &str) -> Result<Option<Value>, ProbeError> {
        if let Some(snapshot) = self.master_servers.read().await.as_ref() {
            return Ok(snapshot.get(key).cloned());
        }
        // Cold start: populate once, then read through.
        self.refresh_snapshot().await?;
        Ok(self
            .master_servers
            .read()
            .await
            .as_ref()
            .and_then(|snapshot| snapshot.get(key).cloned()))
    }
}

#[async_trait]
impl Strategy for BeamMp {
    fn name(&self) -> &'static str {
        "beammp"
    }

    fn pre_query_required(&self) -> bool {
        true
    }

    async fn pre_query(&self) -> Result<(), ProbeError> {
        self.refresh_snapshot().await
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let pinger = Pinger::start();
        let ip = resolve_ip(&target.address).await?;
        let key = format!("{ip}:{}", target.query_port);

        let server = self
            .lookup(&key)
            .await?
            .ok_or(ProbeError::ServerNotFound)?;
        let ping_ms = pinger.millis();

        let players: Vec<Player> = server["playerslist"]
            .as_str()
            .map(|list| {
                list.split(';')
                    .filter(|name| !name.is_empty())
                    .map(Player::named)
                    .collect()
            })
            .unwrap_or_default();

        let numplayers = server["players"]
            .as_i64()
            .or_else(|| server["players"].as_str().and_then(|v| v.parse().ok()))
            .unwrap_or(players.len() as i64);
        let maxplayers = server["maxplayers"]
            .as_i64()
            .or_else(|| server["maxplayers"].as_str().and_then(|v| v.parse().ok()))
            .unwrap_or(0);

        Ok(Probe {
            name: strip_beammp_codes(server["sname"].as_str().unwrap_or_default()),
            map: prettify_map_path(server["map"].as_str().unwrap_or_default()),
            password: server["private"]
                .as_bool()
                .or_else(|| server["private"].as_str().map(|v| v == "true"))
                .unwrap_or(false),
            numplayers,
            numbots: 0,
            maxplayers,
            players: Some(players),
            bots: None,
            connect: key,
            ping_ms,
            raw: server,
            ..Probe::default()
        })
    }
}
