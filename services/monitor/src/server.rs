//! The durable monitor row and its grouping/sanitizing helpers.

use std::collections::BTreeMap;

use gsm_probe::{Probe, ProbeTarget};
use serde::{Deserialize, Serialize};

/// Keys with this prefix never cross the HTTP boundary.
const SECRET_PREFIX: char = '_';

/// One configured monitor: a server entry in a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub position: i32,
    pub guild_id: i64,
    pub channel_id: i64,
    pub message_id: Option<i64>,
    pub game_id: String,
    pub address: String,
    pub query_port: u16,
    pub query_extra: BTreeMap<String, String>,
    pub status: bool,
    pub result: Probe,
    pub style_id: String,
    pub style_data: BTreeMap<String, String>,
}

impl Server {
    /// A fresh row for the add-flow; id and position are assigned on insert.
    pub fn new(
        guild_id: i64,
        channel_id: i64,
        game_id: impl Into<String>,
        address: impl Into<String>,
        query_port: u16,
        query_extra: BTreeMap<String, String>,
        result: Probe,
    ) -> Self {
        Server {
            id: 0,
            position: 0,
            guild_id,
            channel_id,
            message_id: None,
            game_id: game_id.into(),
            address: address.into(),
            query_port,
            query_extra,
            status: true,
            result,
            style_id: "medium".to_owned(),
            style_data: BTreeMap::new(),
        }
    }

    /// The distinct-endpoint key this row probes under.
    pub fn distinct_key(&self) -> (String, String, u16, String) {
        (
            self.game_id.clone(),
            self.address.clone(),
            self.query_port,
            serde_json::to_string(&self.query_extra).unwrap_or_default(),
        )
    }

    pub fn to_target(&self) -> ProbeTarget {
        ProbeTarget {
            game_id: self.game_id.clone(),
            address: self.address.clone(),
            query_port: self.query_port,
            extra: self.query_extra.clone(),
        }
    }

    /// The single boundary-crossing filter: strips secret-prefixed keys and
    /// the free-text style description. Applied once, in the HTTP layer.
    pub fn sanitized(&self) -> Server {
        let mut out = self.clone();
        out.query_extra.retain(|key, _| !key.starts_with(SECRET_PREFIX));
        out.style_data.retain(|key, _| !key.starts_with(SECRET_PREFIX));
        out.style_data.remove("description");
        out
    }

    pub fn style_value(&self, key: &str) -> Option<&str> {
        self.style_data.get(key).map(String::as_str)
    }
}

/// Group by channel, keeping the per-channel `position` order of the input.
pub fn group_by_channel(servers: &[Server]) -> BTreeMap<i64, Vec<Server>> {
    let mut out: BTreeMap<i64, Vec<Server>> = BTreeMap::new();
    for server in servers {
        out.entry(server.channel_id).or_default().push(server.clone());
    }
    out
}

/// Group by outbound message id; rows without a message are skipped.
pub fn group_by_message(servers: &[Server]) -> BTreeMap<i64, Vec<Server>> {
    let mut out: BTreeMap<i64, Vec<Server>> = BTreeMap::new();
    for server in servers {
        if let Some(message_id) = server.message_id {
            out.entry(message_id).or_default().push(server.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_with_secrets() -> Server {
        let mut server = Server::new(1, 2, "teamspeak3", "ts.example.com", 9987, BTreeMap::new(), Probe::default());
        server
            .query_extra
            .insert("_token".to_owned(), "xyz".to_owned());
        server
            .query_extra
            .insert("voice_port".to_owned(), "9987".to_owned());
        server
            .style_data
            .insert("_alert_webhook_url".to_owned(), "https://example".to_owned());
        server
            .style_data
            .insert("description".to_owned(), "my desc".to_owned());
        server
            .style_data
            .insert("locale".to_owned(), "en-US".to_owned());
        server
    }

    #[test]
    fn sanitized_strips_secret_keys_and_description() {
        let clean = server_with_secrets().sanitized();
        assert_eq!(
            clean.query_extra.keys().collect::<Vec<_>>(),
            ["voice_port"]
        );
        assert_eq!(clean.style_data.keys().collect::<Vec<_>>(), ["locale"]);
    }

    #[test]
    fn sanitized_does_not_mutate_the_source_row() {
        let server = server_with_secrets();
        let _ = server.sanitized();
        assert!(server.query_extra.contains_key("_token"));
        assert!(server.style_data.contains_key("description"));
    }

    #[test]
    fn distinct_key_includes_the_extra_bag() {
        let a = server_with_secrets();
        let mut b = a.clone();
        assert_eq!(a.distinct_key(), b.distinct_key());
        b.query_extra.insert("x".to_owned(), "1".to_owned());
        assert_ne!(a.distinct_key(), b.distinct_key());
    }

    #[test]
    fn message_grouping_skips_unpublished_rows() {
        let mut published = server_with_secrets();
        published.message_id = Some(100);
        let unpublished = server_with_secrets();
        let groups = group_by_message(&[published, unpublished]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&100].len(), 1);
    }
}
