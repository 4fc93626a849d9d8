//! The normalized probe result every strategy must produce.

use serde::{Deserialize, Serialize};

/// One player (or bot) entry.
///
/// `raw` carries whatever per-player detail the wire format exposes (score,
/// connect duration, ping) without normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Player {
    pub fn named(name: impl Into<String>) -> Self {
        Player {
            name: name.into(),
            raw: serde_json::Value::Null,
        }
    }
}

/// Scheduler-owned bookkeeping embedded in the stored result.
///
/// Serialized under double-underscore keys so the fields round-trip through
/// the stored JSON without colliding with wire data; all of them default on
/// deserialize so rows written by older versions still load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tracking {
    /// Consecutive failed queries in the current down-run.
    #[serde(rename = "__fail_query_count", default)]
    pub fail_query_count: u32,

    /// Unix timestamp of the first failure in the current down-run.
    #[serde(rename = "__offline_since", default, skip_serializing_if = "Option::is_none")]
    pub offline_since: Option<i64>,

    /// Set once the offline alert for this down-run has been delivered;
    /// cleared when the online alert goes out.
    #[serde(rename = "__sent_offline_alert", default)]
    pub sent_offline_alert: bool,
}

/// A normalized probe result.
///
/// `players`/`bots` are `None` when the wire format exposes only counts,
/// and `Some(vec![])` when it exposes an (empty) list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Probe {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub password: bool,
    #[serde(default)]
    pub numplayers: i64,
    #[serde(default)]
    pub numbots: i64,
    #[serde(default)]
    pub maxplayers: i64,
    #[serde(default)]
    pub players: Option<Vec<Player>>,
    #[serde(default)]
    pub bots: Option<Vec<Player>>,
    #[serde(default)]
    pub connect: String,
    #[serde(default)]
    pub ping_ms: u64,
    #[serde(default)]
    pub raw: serde_json::Value,
    #[serde(flatten)]
    pub tracking: Tracking,
}

impl Probe {
    /// The game port advertised in `connect`, if it parses as `host:port`.
    pub fn game_port(&self) -> Option<u16> {
        let (_, port) = self.connect.rsplit_once(':')?;
        port.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_round_trips_under_dunder_keys() {
        let probe = Probe {
            name: "s".to_owned(),
            tracking: Tracking {
                fail_query_count: 3,
                offline_since: Some(1_700_000_000),
                sent_offline_alert: true,
            },
            ..Probe::default()
        };

        let json = serde_json::to_value(&probe).unwrap();
        assert_eq!(json["__fail_query_count"], 3);
        assert_eq!(json["__offline_since"], 1_700_000_000);
        assert_eq!(json["__sent_offline_alert"], true);

        let back: Probe = serde_json::from_value(json).unwrap();
        assert_eq!(back, probe);
    }

    #[test]
    fn legacy_results_without_tracking_fields_load() {
        let probe: Probe = serde_json::from_str(
            r#"{"name":"s","map":"de_dust2","password":false,"numplayers":3,
                "numbots":0,"maxplayers":16,"players":[],"bots":[],
                "connect":"1.2.3.4:27015","ping_ms":12,"raw":{}}"#,
        )
        .unwrap();
        assert_eq!(probe.tracking, Tracking::default());
        assert_eq!(probe.game_port(), Some(27015));
    }

    #[test]
    fn game_port_requires_host_port_shape() {
        let mut probe = Probe::default();
        probe.connect = "https://discord.gg/abc".to_owned();
        assert_eq!(probe.game_port(), None);
        probe.connect = String::new();
        assert_eq!(probe.game_port(), None);
    }
}
