//! Epic Online Services directory client.
//!
//! The EOS-listed games (ARK: Survival Ascended, Palworld) have no
//! server-side query port; the probe is a lookup against the EOS
//! matchmaking directory. The access token is strategy-shared state:
//! `pre_query` refreshes it once per tick and every concurrent probe in the
//! tick reads it. On a cold start the token is initialised lazily behind the
//! write lock so concurrent probes do not stampede the auth endpoint.

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{http_error, ProbeError};

const AUTH_URL: &str = "https://api.epicgames.dev/auth/v1/oauth/token";
const DEVICE_ID_URL: &str = "https://api.epicgames.dev/auth/v1/accounts/deviceid";
const MATCHMAKING_URL: &str = "https://api.epicgames.dev/matchmaking/v1";

/// Page size and hard cap for the last-resort paginated listing scan.
const LISTING_PAGE_SIZE: usize = 200;
const LISTING_PAGE_CAP: usize = 5;

/// Per-game EOS application credentials.
pub struct EosCredentials {
    pub client_id: &'static str,
    pub client_secret: &'static str,
    pub deployment_id: &'static str,
    pub grant_type: &'static str,
    /// Set for games that authenticate through an ephemeral device id.
    pub external_auth_type: Option<&'static str>,
}

pub struct EosClient {
    http: Client,
    creds: EosCredentials,
    timeout: Duration,
    access_token: RwLock<Option<String>>,
}

impl EosClient {
    pub fn new(http: Client, creds: EosCredentials, timeout: Duration) -> Self {
        EosClient {
            http,
            creds,
            timeout,
            access_token: RwLock::new(None),
        }
    }

    /// Force-refresh the shared access token (the pre-query step).
    pub async fn refresh_token(&self) -> Result<(), ProbeError> {
        let token = self.grant_access_token().await?;
        *self.access_token.write().await = Some(token);
        debug!(deployment = self.creds.deployment_id, "eos access token refreshed");
        Ok(())
    }

    /// Read the token, initialising it lazily on a cold start.
    async fn token(&self) -> Result<String, ProbeError> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }
        let mut guard = self.access_token.write().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.grant_access_token().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn grant_access_token(&self) -> Result<String, ProbeError> {
        let mut form = vec![
            ("grant_type", self.creds.grant_type.to_owned()),
            ("deployment_id", self.creds.deployment_id.to_owned()),
        ];
        if let Some(auth_type) = self.creds.external_auth_type {
            let external = self.grant_external_auth_token().await?;
            form.push(("external_auth_type", auth_type.to_owned()));
            form.push(("external_auth_token", external));
        }

        let resp = self
            .http
            .post(AUTH_URL)
            .basic_auth(self.creds.client_id, Some(self.creds.client_secret))
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| http_error(&e))?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| http_error(&e))?;
        if !status.is_success() {
            return Err(ProbeError::Transport(format!(
                "eos auth status {status}: {}",
                body["errorMessage"].as_str().unwrap_or("unknown")
            )));
        }

        body["access_token"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| ProbeError::protocol("eos auth response without access_token"))
    }

    async fn grant_external_auth_token(&self) -> Result<String, ProbeError> {
        let resp = self
            .http
            .post(DEVICE_ID_URL)
            .basic_auth(self.creds.client_id, Some(self.creds.client_secret))
            .form(&[("deviceModel", "PC")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| http_error(&e))?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| http_error(&e))?;
        if !status.is_success() {
            return Err(ProbeError::Transport(format!(
                "eos device auth status {status}"
            )));
        }

        body["access_token"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| ProbeError::protocol("eos device auth response without access_token"))
    }

    /// Locate one session by endpoint, trying progressively broader lookups:
    ///
    /// 1. direct address filter,
    /// 2. matchmaking filter on the game-server address/port attributes,
    /// 3. paginated deployment listing scanned client-side (capped pages).
    pub async fn find_session(&self, ip: &str, port: u16) -> Result<Value, ProbeError> {
        let direct = self
            .filter_sessions(vec![criterion("attributes.ADDRESS_s", ip)], 0)
            .await?;
        if let Some(session) = pick_session(&direct, ip, port) {
            return Ok(session);
        }

        let broad = self
            .filter_sessions(
                vec![
                    criterion("attributes.GAMESERVER_ADDRESS_s", ip),
                    criterion("attributes.GAMESERVER_PORT_l", port),
                ],
                0,
            )
            .await?;
        if let Some(session) = broad.first().cloned() {
            return Ok(session);
        }

        for page in 0..LISTING_PAGE_CAP {
            let listing = self.filter_sessions(Vec::new(), page).await?;
            if let Some(session) = pick_session(&listing, ip, port) {
                return Ok(session);
            }
            if listing.len() < LISTING_PAGE_SIZE {
                break;
            }
        }

        Err(ProbeError::ServerNotFound)
    }

    async fn filter_sessions(
        &self,
        criteria: Vec<Value>,
        page: usize,
    ) -> Result<Vec<Value>, ProbeError> {
        let url = format!("{MATCHMAKING_URL}/{}/filter", self.creds.deployment_id);
        let body = json!({
            "criteria": criteria,
            "maxResults": LISTING_PAGE_SIZE,
            "offset": page * LISTING_PAGE_SIZE,
        });
        let token = self.token().await?;

        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| http_error(&e))?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| http_error(&e))?;
        if !status.is_success() {
            return Err(ProbeError::Transport(format!(
                "eos matchmaking status {status}"
            )));
        }

        match body["sessions"].as_array() {
            Some(sessions) => Ok(sessions.clone()),
            None => Err(ProbeError::protocol("eos response without sessions")),
        }
    }
}

fn criterion(key: &str, value: impl Into<Value>) -> Value {
    json!({ "key": key, "op": "EQUAL", "value": value.into() })
}

/// Pick the session matching the endpoint out of a candidate list.
fn pick_session(sessions: &[Value], ip: &str, port: u16) -> Option<Value> {
    let matches = |session: &Value| {
        let attrs = &session["attributes"];
        let addr_ok = attrs["ADDRESS_s"] == ip || attrs["GAMESERVER_ADDRESS_s"] == ip;
        let bound = attrs["ADDRESSBOUND_s"]
            .as_str()
            .is_some_and(|b| b.ends_with(&format!(":{port}")));
        let game_port = attrs["GAMESERVER_PORT_l"]
            .as_u64()
            .is_some_and(|p| p == u64::from(port));
        addr_ok && (bound || game_port)
    };

    if let Some(session) = sessions.iter().find(|s| matches(s)) {
        return Some(session.clone());
    }
    // A single address-keyed hit without port attributes is unambiguous.
    match sessions {
        [only] => Some(only.clone()),
        _ => None,
    }
}
