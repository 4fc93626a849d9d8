//! SCP: Secret Laboratory query via the official serverinfo API.
//!
//! Authentication rides in the secret `_accountid`/`_token` extras; the
//! player count arrives as a `"current/max"` string.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProbeError;
use crate::net::http::get_json;
use crate::net::Pinger;
use crate::probe::{Player, Probe};
use crate::target::ProbeTarget;
use crate::Strategy;

pub struct ScpSl {
    http: reqwest::Client,
    timeout: Duration,
}

impl ScpSl {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        ScpSl { http, timeout }
    }
}

pub(super) fn split_players_field(field: &str) -> (i64, i64) {
    match field.split_once('/') {
        Some((current, max)) => (
            current.parse().unwrap_or(0),
            max.parse().unwrap_or(0),
        ),
        None => (0, 0),
    }
}

#[async_trait]
impl Strategy for ScpSl {
    fn name(&self) -> &'static str {
        "scpsl"
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let account_id = target.require_extra("_accountid")?;
        let token = target.require_extra("_token")?;
        let url = format!(
            "https://api.scpslgame.com/serverinfo.php?id={account_id}&key={token}&players=true&list=true&online=true"
        );

        let pinger = Pinger::start();
        let data = get_json(&self.http, &url, self.timeout).await?;
        let ping_ms = pinger.millis();

        let server = data["Servers"]
            .as_array()
            .and_then(|servers| servers.first())
            .cloned()
            .ok_or(ProbeError::ServerNotFound)?;

        let (numplayers, maxplayers) =
            split_players_field(server["Players"].as_str().unwrap_or_default());
        let players: Vec<Player> = server["PlayersList"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|p| Player::named(p.as_str().unwrap_or_default()))
                    .collect()
            })
            .unwrap_or_default();

        let server_id = server["ID"].as_u64().unwrap_or(0);

        Ok(Probe {
            name: format!("SCP:SL Server {server_id}"),
            map: String::new(),
            password: false,
            numplayers,
            numbots: 0,
            maxplayers,
            players: Some(players),
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms,
            raw: json!({ "ID": server_id, "Online": server["Online"] }),
            ..Probe::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn players_field_splits() {
        assert_eq!(split_players_field("17/30"), (17, 30));
        assert_eq!(split_players_field(""), (0, 0));
        assert_eq!(split_players_field("bad"), (0, 0));
    }
}
