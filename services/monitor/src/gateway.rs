//! The chat-platform boundary.
//!
//! Everything the pipeline needs from the platform sits behind
//! [`ChatGateway`]: message fetch/edit/send, channel purge for the resend
//! path, webhook execution for alerts, and the presence text sink. The
//! production implementation talks to the Discord REST API; tests plug in a
//! recording fake.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Message or channel is gone; callers clear the stored `message_id`.
    #[error("not found")]
    NotFound,
    /// Missing permission; callers evict cached state and stop retrying.
    #[error("forbidden")]
    Forbidden,
    #[error("rate limited")]
    RateLimited,
    #[error("timed out")]
    Timeout,
    #[error("transport: {0}")]
    Transport(String),
}

/// A platform message handle: enough to edit or delete it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i64,
    pub channel_id: i64,
}

#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn fetch_message(
        &self,
        channel_id: i64,
        message_id: i64,
    ) -> Result<ChatMessage, GatewayError>;

    async fn edit_message(
        &self,
        channel_id: i64,
        message_id: i64,
        embeds: &[Value],
    ) -> Result<(), GatewayError>;

    async fn send_message(
        &self,
        channel_id: i64,
        embeds: &[Value],
    ) -> Result<ChatMessage, GatewayError>;

    /// Delete this bot's previously published messages in a channel.
    async fn purge_channel(&self, channel_id: i64) -> Result<(), GatewayError>;

    async fn execute_webhook(
        &self,
        url: &str,
        content: Option<&str>,
        embed: &Value,
    ) -> Result<(), GatewayError>;

    /// Record the computed presence text; delivery rides on the platform
    /// session owned by the outer bot layer.
    async fn update_presence(&self, activity_type: u8, text: &str) -> Result<(), GatewayError>;
}

// ---------------------------------------------------------------------------
// Discord REST implementation
// ---------------------------------------------------------------------------

const API_BASE: &str = "https://discord.com/api/v10";

pub struct DiscordRest {
    http: reqwest::Client,
    token: String,
    application_id: Option<String>,
    presence: tokio::sync::watch::Sender<Option<(u8, String)>>,
}

impl DiscordRest {
    pub fn new(http: reqwest::Client, token: impl Into<String>) -> Self {
        let token = token.into();
        let application_id = decode_client_id(&token);
        let (presence, _) = tokio::sync::watch::channel(None);
        DiscordRest {
            http,
            token,
            application_id,
            presence,
        }
    }

    /// Latest presence computed by the pipeline, for the session layer.
    pub fn presence_rx(&self) -> tokio::sync::watch::Receiver<Option<(u8, String)>> {
        self.presence.subscribe()
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bot {}", self.token))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        match resp.status() {
            status if status.is_success() => Ok(resp),
            reqwest::StatusCode::NOT_FOUND => Err(GatewayError::NotFound),
            reqwest::StatusCode::FORBIDDEN => Err(GatewayError::Forbidden),
            reqwest::StatusCode::TOO_MANY_REQUESTS => Err(GatewayError::RateLimited),
            status => Err(GatewayError::Transport(format!("http status {status}"))),
        }
    }
}

fn request_error(e: &reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(e.to_string())
    }
}

fn decode_client_id(token: &str) -> Option<String> {
    use base64::Engine;

    let first = token.trim().split('.').next()?;
    let mut padded = first.to_owned();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(padded)
        .ok()?;
    String::from_utf8(decoded)
        .ok()
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
}

#[async_trait]
impl ChatGateway for DiscordRest {
    async fn fetch_message(
        &self,
        channel_id: i64,
        message_id: i64,
    ) -> Result<ChatMessage, GatewayError> {
        let url = format!("{API_BASE}/channels/{channel_id}/messages/{message_id}");
        let resp = self
            .auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        Self::check(resp).await?;
        Ok(ChatMessage {
            id: message_id,
            channel_id,
        })
    }

    async fn edit_message(
        &self,
        channel_id: i64,
        message_id: i64,
        embeds: &[Value],
    ) -> Result<(), GatewayError> {
        let url = format!("{API_BASE}/channels/{channel_id}/messages/{message_id}");
        let resp = self
            .auth(self.http.patch(&url))
            .json(&json!({ "embeds": embeds }))
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: i64,
        embeds: &[Value],
    ) -> Result<ChatMessage, GatewayError> {
        let url = format!("{API_BASE}/channels/{channel_id}/messages");
        let resp = self
            .auth(self.http.post(&url))
            .json(&json!({ "embeds": embeds }))
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        let resp = Self::check(resp).await?;
        let body: Value = resp.json().await.map_err(|e| request_error(&e))?;
        let id = body["id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| GatewayError::Transport("send response without id".to_owned()))?;
        Ok(ChatMessage { id, channel_id })
    }

    async fn purge_channel(&self, channel_id: i64) -> Result<(), GatewayError> {
        let url = format!("{API_BASE}/channels/{channel_id}/messages?limit=100");
        let resp = self
            .auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        let resp = Self::check(resp).await?;
        let messages: Vec<Value> = resp.json().await.map_err(|e| request_error(&e))?;

        let own: Vec<&str> = messages
            .iter()
            .filter(|m| {
                self.application_id.as_deref().is_some_and(|app_id| {
                    m["author"]["id"].as_str() == Some(app_id)
                })
            })
            .filter_map(|m| m["id"].as_str())
            .collect();

        match own.as_slice() {
            [] => Ok(()),
            [single] => {
                let url = format!("{API_BASE}/channels/{channel_id}/messages/{single}");
                let resp = self
                    .auth(self.http.delete(&url))
                    .send()
                    .await
                    .map_err(|e| request_error(&e))?;
                Self::check(resp).await.map(|_| ())
            }
            many => {
                let url = format!("{API_BASE}/channels/{channel_id}/messages/bulk-delete");
                let resp = self
                    .auth(self.http.post(&url))
                    .json(&json!({ "messages": many }))
                    .send()
                    .await
                    .map_err(|e| request_error(&e))?;
                Self::check(resp).await.map(|_| ())
            }
        }
    }

    async fn execute_webhook(
        &self,
        url: &str,
        content: Option<&str>,
        embed: &Value,
    ) -> Result<(), GatewayError> {
        let mut body = json!({ "embeds": [embed] });
        if let Some(content) = content.filter(|c| !c.is_empty()) {
            body["content"] = json!(content);
        }
        // Webhook urls authenticate themselves; no bot token attached.
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        Self::check(resp).await.map(|_| ())
    }

    async fn update_presence(&self, activity_type: u8, text: &str) -> Result<(), GatewayError> {
        debug!(activity_type, text, "presence updated");
        let _ = self.presence.send(Some((activity_type, text.to_owned())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_decodes_from_the_token() {
        assert_eq!(
            decode_client_id("MTIzNDU2Nzg5MA.x.y").as_deref(),
            Some("1234567890")
        );
        assert!(decode_client_id("not-base64!.x.y").is_none());
    }
}
