//! Environment-variable configuration.
//!
//! Every recognized variable sits in one table with its description and
//! default; the same table backs the `/api/v1/environment-variables`
//! self-description endpoint.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Floor for the tick period; shorter values are clamped up.
pub const MIN_TICK_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseType {
    ServerCount,
    Individually,
    PlayerStats,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub app_token: String,
    pub whitelist_guilds: Vec<u64>,
    pub app_debug: bool,
    pub activity_type: u8,
    pub activity_name: Option<String>,
    pub advertise_type: AdvertiseType,
    pub tick_interval: Duration,
    pub probe_timeout: Duration,
    pub chunk_size: usize,
    pub disable_after_days: u64,
    pub edit_timeout: Duration,
    pub db_connection: Option<String>,
    pub database_url: Option<String>,
    pub postgres_ssl_mode: String,
    pub metrics_enable: bool,
    pub metrics_record_limit: usize,
    pub web_api_enable: bool,
    pub web_api_bind: String,
    pub heroku_app_name: Option<String>,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary lookup (test seam).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());

        let app_token = get("APP_TOKEN").ok_or(ConfigError::MissingVar("APP_TOKEN"))?;

        let whitelist_guilds = get("WHITELIST_GUILDS")
            .map(|raw| parse_id_list("WHITELIST_GUILDS", &raw))
            .transpose()?
            .unwrap_or_default();

        let tick_secs = parse_or("TASK_QUERY_SERVER", get("TASK_QUERY_SERVER"), 60)?;
        let tick_interval = Duration::from_secs(tick_secs.max(MIN_TICK_SECS));

        let advertise_type = match get("APP_ADVERTISE_TYPE").as_deref() {
            None | Some("0") | Some("server_count") => AdvertiseType::ServerCount,
            Some("1") | Some("individually") => AdvertiseType::Individually,
            Some("2") | Some("player_stats") => AdvertiseType::PlayerStats,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    name: "APP_ADVERTISE_TYPE",
                    reason: format!("unknown advertise type {other:?}"),
                })
            }
        };

        Ok(Config {
            app_token,
            whitelist_guilds,
            app_debug: flag(get("APP_DEBUG")),
            activity_type: u8::try_from(parse_or(
                "APP_ACTIVITY_TYPE",
                get("APP_ACTIVITY_TYPE"),
                3,
            )?)
            .unwrap_or(3),
            activity_name: get("APP_ACTIVITY_NAME"),
            advertise_type,
            tick_interval,
            probe_timeout: Duration::from_secs(parse_or(
                "TASK_QUERY_SERVER_TIMEOUT",
                get("TASK_QUERY_SERVER_TIMEOUT"),
                15,
            )?),
            chunk_size: usize::try_from(parse_or(
                "TASK_QUERY_CHUNK_SIZE",
                get("TASK_QUERY_CHUNK_SIZE"),
                50,
            )?)
            .unwrap_or(50)
            .max(1),
            disable_after_days: parse_or(
                "TASK_QUERY_DISABLE_AFTER_DAYS",
                get("TASK_QUERY_DISABLE_AFTER_DAYS"),
                0,
            )?,
            edit_timeout: Duration::from_secs(parse_or(
                "TASK_EDIT_MESSAGE_TIMEOUT",
                get("TASK_EDIT_MESSAGE_TIMEOUT"),
                3,
            )?),
            db_connection: get("DB_CONNECTION"),
            database_url: get("DATABASE_URL"),
            postgres_ssl_mode: get("POSTGRES_SSL_MODE").unwrap_or_else(|| "require".to_owned()),
            metrics_enable: flag(get("METRICS_ENABLE")),
            metrics_record_limit: usize::try_from(parse_or(
                "METRICS_RECORD_LIMIT",
                get("METRICS_RECORD_LIMIT"),
                1000,
            )?)
            .unwrap_or(1000)
            .max(1),
            web_api_enable: flag(get("WEB_API_ENABLE")),
            web_api_bind: get("WEB_API_BIND").unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            heroku_app_name: get("HEROKU_APP_NAME"),
        })
    }

    /// True when the postgres backend is selected.
    pub fn wants_postgres(&self) -> bool {
        let url_is_pg = self
            .database_url
            .as_deref()
            .is_some_and(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"));
        url_is_pg || self.db_connection.as_deref() == Some("pgsql")
    }

    /// Offline-alert hysteresis threshold for this tick period.
    pub fn alert_threshold(&self) -> u32 {
        let by_period = 120 / self.tick_interval.as_secs().max(1);
        u32::try_from(by_period.max(2)).unwrap_or(2)
    }
}

fn flag(value: Option<String>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn parse_or(
    name: &'static str,
    value: Option<String>,
    default: u64,
) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            reason: format!("{raw:?} is not a non-negative integer"),
        }),
    }
}

fn parse_id_list(name: &'static str, raw: &str) -> Result<Vec<u64>, ConfigError> {
    raw.replace(';', ",")
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse().map_err(|_| ConfigError::InvalidValue {
                name,
                reason: format!("{part:?} is not an id"),
            })
        })
        .collect()
}

/// Derive the OAuth invite link from the bot token's client-id segment.
pub fn invite_link(app_token: &str) -> Option<String> {
    use base64::Engine;

    let first = app_token.trim().split('.').next()?;
    let mut padded = first.to_owned();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(padded)
        .ok()?;
    let client_id = String::from_utf8(decoded).ok()?;
    if client_id.is_empty() || !client_id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    // Manage Channels, Send Messages, Manage Messages, external emojis and
    // stickers, reactions.
    let permissions = "137439225936";
    Some(format!(
        "https://discord.com/api/oauth2/authorize?client_id={client_id}&permissions={permissions}&scope=applications.commands%20bot"
    ))
}

/// One row of the recognized-variable table.
#[derive(Debug, Clone, Serialize)]
pub struct VariableSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub default: &'static str,
    pub required: bool,
}

/// The self-description served by `/api/v1/environment-variables`.
pub fn variables() -> &'static [VariableSpec] {
    const VARIABLES: &[VariableSpec] = &[
        VariableSpec {
            name: "APP_TOKEN",
            description: "Chat platform bot token.",
            default: "",
            required: true,
        },
        VariableSpec {
            name: "WHITELIST_GUILDS",
            description: "Guild ids, separated by a semicolon or comma.",
            default: "",
            required: false,
        },
        VariableSpec {
            name: "APP_DEBUG",
            description: "Enable verbose logging.",
            default: "false",
            required: false,
        },
        VariableSpec {
            name: "APP_ACTIVITY_TYPE",
            description: "Presence activity type override. playing = 0, listening = 2, watching = 3, competing = 5",
            default: "3",
            required: false,
        },
        VariableSpec {
            name: "APP_ACTIVITY_NAME",
            description: "Presence activity name override.",
            default: "",
            required: false,
        },
        VariableSpec {
            name: "APP_ADVERTISE_TYPE",
            description: "Presence advertise type. server_count = 0, individually = 1, player_stats = 2",
            default: "0",
            required: false,
        },
        VariableSpec {
            name: "TASK_QUERY_SERVER",
            description: "Query tick period in seconds (floor 15).",
            default: "60",
            required: false,
        },
        VariableSpec {
            name: "TASK_QUERY_SERVER_TIMEOUT",
            description: "Per-probe wall-clock limit in seconds.",
            default: "15",
            required: false,
        },
        VariableSpec {
            name: "TASK_QUERY_CHUNK_SIZE",
            description: "Probes in flight per chunk.",
            default: "50",
            required: false,
        },
        VariableSpec {
            name: "TASK_QUERY_DISABLE_AFTER_DAYS",
            description: "Skip targets offline for at least this many days (0 disables).",
            default: "0",
            required: false,
        },
        VariableSpec {
            name: "TASK_EDIT_MESSAGE_TIMEOUT",
            description: "Per-edit wall-clock limit in seconds.",
            default: "3",
            required: false,
        },
        VariableSpec {
            name: "DB_CONNECTION",
            description: "Database type. Accepted value: sqlite, pgsql",
            default: "sqlite",
            required: false,
        },
        VariableSpec {
            name: "DATABASE_URL",
            description: "Database connection url.",
            default: "",
            required: false,
        },
        VariableSpec {
            name: "POSTGRES_SSL_MODE",
            description: "Postgres SSL mode.",
            default: "require",
            required: false,
        },
        VariableSpec {
            name: "METRICS_ENABLE",
            description: "Record per-endpoint metric samples each tick.",
            default: "false",
            required: false,
        },
        VariableSpec {
            name: "METRICS_RECORD_LIMIT",
            description: "Metric samples kept per endpoint.",
            default: "1000",
            required: false,
        },
        VariableSpec {
            name: "WEB_API_ENABLE",
            description: "Expose the read-only HTTP API.",
            default: "false",
            required: false,
        },
        VariableSpec {
            name: "WEB_API_BIND",
            description: "Bind address for the HTTP API.",
            default: "0.0.0.0:8080",
            required: false,
        },
        VariableSpec {
            name: "HEROKU_APP_NAME",
            description: "Heroku application name; enables the keepalive ping.",
            default: "",
            required: false,
        },
    ];
    VARIABLES
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(
            config_with(&[]),
            Err(ConfigError::MissingVar("APP_TOKEN"))
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = config_with(&[("APP_TOKEN", "x")]).unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.probe_timeout, Duration::from_secs(15));
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.edit_timeout, Duration::from_secs(3));
        assert_eq!(config.metrics_record_limit, 1000);
        assert!(!config.metrics_enable);
        assert!(!config.web_api_enable);
        assert_eq!(config.advertise_type, AdvertiseType::ServerCount);
    }

    #[test]
    fn tick_period_is_floored_at_15s() {
        let config = config_with(&[("APP_TOKEN", "x"), ("TASK_QUERY_SERVER", "5")]).unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(15));
    }

    #[test]
    fn guild_list_accepts_both_separators() {
        let config = config_with(&[
            ("APP_TOKEN", "x"),
            ("WHITELIST_GUILDS", "123;456, 789"),
        ])
        .unwrap();
        assert_eq!(config.whitelist_guilds, [123, 456, 789]);
    }

    #[test]
    fn malformed_numbers_are_invalid_values() {
        assert!(matches!(
            config_with(&[("APP_TOKEN", "x"), ("TASK_QUERY_SERVER", "soon")]),
            Err(ConfigError::InvalidValue {
                name: "TASK_QUERY_SERVER",
                ..
            })
        ));
    }

    #[test]
    fn postgres_selection() {
        let by_url = config_with(&[
            ("APP_TOKEN", "x"),
            ("DATABASE_URL", "postgres://u:p@localhost/db"),
        ])
        .unwrap();
        assert!(by_url.wants_postgres());

        let by_kind =
            config_with(&[("APP_TOKEN", "x"), ("DB_CONNECTION", "pgsql")]).unwrap();
        assert!(by_kind.wants_postgres());

        let sqlite = config_with(&[("APP_TOKEN", "x")]).unwrap();
        assert!(!sqlite.wants_postgres());
    }

    #[test]
    fn alert_threshold_tracks_the_period() {
        let fast = config_with(&[("APP_TOKEN", "x"), ("TASK_QUERY_SERVER", "15")]).unwrap();
        assert_eq!(fast.alert_threshold(), 8);
        let slow = config_with(&[("APP_TOKEN", "x"), ("TASK_QUERY_SERVER", "300")]).unwrap();
        assert_eq!(slow.alert_threshold(), 2);
    }

    #[test]
    fn invite_link_decodes_the_client_id() {
        // base64("1234567890") == "MTIzNDU2Nzg5MA"
        let link = invite_link("MTIzNDU2Nzg5MA.x.y").unwrap();
        assert!(link.contains("client_id=1234567890"));
        assert!(invite_link("!!!.x.y").is_none());
    }
}
