//! ARK: Survival Ascended query via the EOS directory.

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
    client_id: "xyza7891muomRmynIIHaJB9COBKkwj6n",
    client_secret: "PP5UGxysEieNfSrEicaD1N2Bb3TdXuD7xHYcsdUHZ7s",
    deployment_id: "ad9a8feffb3b4b2ca315546f038c3ae2",
    grant_type: "client_credentials",
    external_auth_type: None,
};

pub struct Asa {
    eos: EosClient,
}

impl Asa {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Asa {
            eos: EosClient::new(http, CREDENTIALS, timeout),
        }
    }
}

#[async_trait]
impl Strategy for Asa {
    fn name(&self) -> &'static str {
        "asa"
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

        Ok(Probe {
            name: attributes["CUSTOMSERVERNAME_s"]
                .as_str()
                .unwrap_or("Unknown Server")
                .to_owned(),
            map: attributes["MAPNAME_s"].as_str().unwrap_or("Unknown Map").to_owned(),
            password: attributes["SERVERPASSWORD_b"].as_bool().unwrap_or(false),
            numplayers: session["totalPlayers"].as_i64().unwrap_or(0),
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
