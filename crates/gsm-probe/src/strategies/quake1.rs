//! QuakeWorld status query.
//!
//! Player rows are `id frags time ping "name" "skin" color1 color2`; the
//! wire format has no bot flag, but bots report a ping of zero.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::probe::{Player, Probe};
use crate::target::ProbeTarget;
use crate::Strategy;

use super::quake::{info_int, info_str, query_status, QuakeResponse};

pub struct Quake1 {
    timeout: Duration,
}

impl Quake1 {
    pub fn new(timeout: Duration) -> Self {
        Quake1 { timeout }
    }
}

/// Map a parsed status response to a probe; shared with hexen2.
pub(super) fn normalize_status(
    target: &ProbeTarget,
    response: QuakeResponse,
    ping_field_index: usize,
) -> Probe {
    let QuakeResponse {
        info,
        player_rows,
        ping_ms,
    } = response;

    let mut players = Vec::new();
    let mut bots = Vec::new();
    for row in &player_rows {
        let name = row
            .get(ping_field_index + 1)
            .cloned()
            .unwrap_or_default();
        let ping: i64 = row
            .get(ping_field_index)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let player = Player {
            name,
            raw: json!({ "fields": row }),
        };
        if ping == 0 {
            bots.push(player);
        } else {
            players.push(player);
        }
    }

    let name = info_str(&info, &["hostname", "sv_hostname"])
        .unwrap_or_default()
        .to_owned();
    let map = info_str(&info, &["map", "mapname"]).unwrap_or_default().to_owned();
    let maxplayers = info_int(&info, &["maxclients", "sv_maxclients"]);
    let numplayers = players.len() as i64;
    let numbots = bots.len() as i64;

    Probe {
        name,
        map,
        password: false,
        numplayers,
        numbots,
        maxplayers,
        players: Some(players),
        bots: Some(bots),
        connect: format!("{}:{}", target.address, target.query_port),
        ping_ms,
        raw: raw_info(info),
        ..Probe::default()
    }
}

pub(super) fn raw_info(info: BTreeMap<String, String>) -> serde_json::Value {
    json!(info)
}

#[async_trait]
impl Strategy for Quake1 {
    fn name(&self) -> &'static str {
        "quake1"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let response = query_status(
            &target.address,
            target.query_port,
            self.timeout,
            b"status\0",
            b"n",
        )
        .await?;
        // id frags time ping "name" ... -> ping is the fourth field
        Ok(normalize_status(target, response, 3))
    }
}
