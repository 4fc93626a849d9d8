//! Embed rendering.
//!
//! One rendering routine parameterized by a per-style fields config; the
//! style ids mirror the five historical sizes. Standalone styles occupy
//! their own message instead of sharing the ten-embed bucket.

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{json, Value};

use crate::server::Server;

const COLOR_ONLINE: u32 = 0x57F287;
const COLOR_OFFLINE: u32 = 0xED4245;

/// Most names a player-list field will render.
const PLAYER_LIST_CAP: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct FieldsConfig {
    pub id: &'static str,
    pub standalone: bool,
    show_game: bool,
    show_map: bool,
    show_players: bool,
    show_player_list: bool,
    show_ping: bool,
    show_footer: bool,
    show_image: bool,
}

const STYLES: &[FieldsConfig] = &[
    FieldsConfig {
        id: "extra-small",
        standalone: false,
        show_game: false,
        show_map: false,
        show_players: true,
        show_player_list: false,
        show_ping: false,
        show_footer: false,
        show_image: false,
    },
    FieldsConfig {
        id: "small",
        standalone: false,
        show_game: false,
        show_map: true,
        show_players: true,
        show_player_list: false,
        show_ping: false,
        show_footer: true,
        show_image: false,
    },
    FieldsConfig {
        id: "medium",
        standalone: false,
        show_game: true,
        show_map: true,
        show_players: true,
        show_player_list: false,
        show_ping: true,
        show_footer: true,
        show_image: false,
    },
    FieldsConfig {
        id: "large",
        standalone: true,
        show_game: true,
        show_map: true,
        show_players: true,
        show_player_list: true,
        show_ping: true,
        show_footer: true,
        show_image: true,
    },
    FieldsConfig {
        id: "extra-large",
        standalone: true,
        show_game: true,
        show_map: true,
        show_players: true,
        show_player_list: true,
        show_ping: true,
        show_footer: true,
        show_image: true,
    },
];

/// Resolve a style id, falling back to `medium` for unknown ids.
pub fn style_config(style_id: &str) -> &'static FieldsConfig {
    STYLES
        .iter()
        .find(|s| s.id == style_id)
        .unwrap_or_else(|| &STYLES[2])
}

/// Whether this server must sit alone in its outbound message.
pub fn is_standalone(server: &Server) -> bool {
    style_config(&server.style_id).standalone
}

/// The address line shown in embeds and alerts: the game port when the
/// probe learned one, with the query port annotated when they differ.
pub fn address_line(server: &Server) -> String {
    if server.game_id == "discord" {
        return format!("`{}`", server.address);
    }
    match server.result.game_port() {
        Some(game_port) if game_port != server.query_port => {
            format!(
                "`{}:{game_port} ({})`",
                server.address, server.query_port
            )
        }
        _ => format!("`{}:{}`", server.address, server.query_port),
    }
}

/// Footer query time in the monitor's configured utc offset and clock.
pub fn query_time_text(server: &Server, now: DateTime<Utc>) -> String {
    use chrono::Offset;

    let offset_hours: i32 = server
        .style_value("utc_offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let offset = FixedOffset::east_opt(offset_hours.clamp(-14, 14) * 3600)
        .unwrap_or_else(|| Utc.fix());
    let local = now.with_timezone(&offset);

    match server.style_value("clock_format") {
        Some("12") => local.format("%Y-%m-%d %I:%M:%S%p").to_string(),
        _ => local.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// Render one server into its embed.
pub fn render_embed(server: &Server, now: DateTime<Utc>) -> Value {
    let config = style_config(&server.style_id);
    let result = &server.result;

    let lock = if result.password { "🔒 " } else { "" };
    let title = format!("{lock}{}", result.name);
    let status_text = if server.status {
        "🟢 Online"
    } else {
        "🔴 Offline"
    };

    let mut fields = vec![
        json!({ "name": "Status", "value": status_text, "inline": true }),
        json!({ "name": "Address:Port", "value": address_line(server), "inline": true }),
    ];
    if config.show_game {
        let game = server
            .style_value("fullname")
            .unwrap_or(server.game_id.as_str());
        fields.push(json!({ "name": "Game", "value": game, "inline": true }));
    }
    if config.show_map && !result.map.is_empty() {
        fields.push(json!({ "name": "Current Map", "value": result.map, "inline": true }));
    }
    if config.show_players {
        let players_text = if result.maxplayers < 0 {
            format!("{}", result.numplayers)
        } else if result.numbots > 0 {
            format!(
                "{}({})/{}",
                result.numplayers, result.numbots, result.maxplayers
            )
        } else {
            format!("{}/{}", result.numplayers, result.maxplayers)
        };
        fields.push(json!({ "name": "Players", "value": players_text, "inline": true }));
    }
    if config.show_player_list {
        if let Some(players) = &result.players {
            if !players.is_empty() {
                let mut names: Vec<&str> = players
                    .iter()
                    .take(PLAYER_LIST_CAP)
                    .map(|p| p.name.as_str())
                    .filter(|name| !name.is_empty())
                    .collect();
                if players.len() > PLAYER_LIST_CAP {
                    names.push("…");
                }
                fields.push(json!({
                    "name": "Player List",
                    "value": names.join("\n"),
                    "inline": false,
                }));
            }
        }
    }
    if config.show_ping && server.status {
        fields.push(json!({
            "name": "Ping",
            "value": format!("{}ms", result.ping_ms),
            "inline": true,
        }));
    }

    let mut embed = json!({
        "author": { "name": title },
        "color": if server.status { COLOR_ONLINE } else { COLOR_OFFLINE },
        "fields": fields,
    });
    if let Some(description) = server.style_value("description") {
        if !description.is_empty() {
            embed["description"] = json!(description);
        }
    }
    if config.show_image {
        if let Some(url) = server.style_value("image_url").filter(|u| !u.is_empty()) {
            embed["image"] = json!({ "url": url });
        }
        if let Some(url) = server
            .style_value("thumbnail_url")
            .filter(|u| !u.is_empty())
        {
            embed["thumbnail"] = json!({ "url": url });
        }
    }
    if config.show_footer {
        embed["footer"] = json!({
            "text": format!("Query Time: {}", query_time_text(server, now)),
        });
    }

    embed
}
