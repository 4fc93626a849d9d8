//! Unreal Tournament 3 query: the GameSpy v3 exchange with UT3's numeric
//! property keys translated back to readable fields.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

use super::gamespy3::query_payload;

// UT3 publishes its settings as numbered properties.
const PROP_MAP: &str = "p1073741825";
const PROP_GAME_TYPE: &str = "p1073741826";
const PROP_DESCRIPTION: &str = "p1073741827";
const PROP_PASSWORD: &str = "s7";

pub struct Ut3 {
    timeout: Duration,
}

impl Ut3 {
    pub fn new(timeout: Duration) -> Self {
        Ut3 { timeout }
    }
}

#[async_trait]
impl Strategy for Ut3 {
    fn name(&self) -> &'static str {
        "ut3"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let payload = query_payload(&target.address, target.query_port, self.timeout).await?;
        let get = |key: &str| payload.info.get(key).map(String::as_str).unwrap_or_default();

        let name = match get("hostname") {
            "" => get(PROP_DESCRIPTION).to_owned(),
            hostname => hostname.to_owned(),
        };
        let map = match get("mapname") {
            "" => get(PROP_MAP).to_owned(),
            mapname => mapname.to_owned(),
        };

        let mut raw = json!(payload.info);
        raw["game_type"] = json!(get(PROP_GAME_TYPE));

        Ok(Probe {
            name,
            map,
            password: matches!(get(PROP_PASSWORD), "1"),
            numplayers: get("numplayers")
                .parse()
                .unwrap_or(payload.players.len() as i64),
            numbots: 0,
            maxplayers: get("maxplayers").parse().unwrap_or(0),
            players: Some(payload.players),
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms: payload.ping_ms,
            raw,
            ..Probe::default()
        })
    }
}
