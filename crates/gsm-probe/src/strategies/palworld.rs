//! Palworld query via the EOS directory (device-id auth flow).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::eos::{EosClient, EosCredentials};
use crate::error::ProbeError;
use crate::net::{resolve_ip, Pinger};
use crate::probe::Probe;
use crate::target::ProbeTarget;
use crate::Strategy;

const CREDENTIALS: EosCredentials = EosCredentials {
    client_id: "xyza78916PZ5DF0fAahu4tnrKKyFpqRE",
    client_secret: "j0NapLEPm3R3EOrlQiM8cRLKq3Rt02ZVVwT0SkZstSg",
    deployment_id: "0a18471f93d448e2a1f60e47e03d3413",
    grant_type: "external_auth",
    external_auth_type: Some("deviceid_access_token"),
};

pub struct Palworld {
    eos: EosClient,
}

impl Palworld {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Palworld {
            eos: EosClient::new(http, CREDENTIALS, timeout),
        }
    }
}

#[async_trait]
impl Strategy for Palworld {
    fn name(&self) -> &'static str {
        "palworld"
    }

    fn pre_query_required(&self) -> bool {
        true
    }

    async fn pre_query(&self) -> Result<(), ProbeError> {
        self.eos.refresh_token().await
    }

    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let pinger = Pinger::start();
        let ip = resolve_ip(&target.address).await?;
        let session = self
            .eos
            .find_session(&ip.to_string(), target.query_port)
            .await?;
        let ping_ms = pinger.millis();

        let attributes = &session["attributes"];
        let settings = &session["settings"];
        let numplayers = attributes["PLAYERS_l"]
            .as_i64()
            .or_else(|| session["totalPlayers"].as_i64())
            .unwrap_or(0);

        Ok(Probe {
            name: attributes["NAME_s"].as_str().unwrap_or_default().to_owned(),
            map: attributes["MAPNAME_s"].as_str().unwrap_or_default().to_owned(),
            password: attributes["ISPASSWORD_b"].as_bool().unwrap_or(false),
            numplayers,
            numbots: 0,
            maxplayers: settings["maxPublicPlayers"].as_i64().unwrap_or(0),
            players: None,
            bots: None,
            connect: format!("{}:{}", target.address, target.query_port),
            ping_ms,
            raw: session,
            ..Probe::default()
        })
    }
}
