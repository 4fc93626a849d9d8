//! Read-only JSON API, gated by `WEB_API_ENABLE`.
//!
//! Everything that leaves through this surface passes the sanitizing
//! boundary exactly once: secret-prefixed keys and the style description
//! never cross.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use gsm_catalog::GameCatalog;

use crate::config;
use crate::repo::{Repository, ServerFilter};
use crate::server::Server;

/// Frozen error envelope used by all non-2xx responses.
#[derive(Debug, Clone, Serialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub(crate) fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> Response {
    (
        status,
        Json(HttpErrorEnvelope {
            code: code.into(),
            message: message.into(),
            details: None,
        }),
    )
        .into_response()
}

pub fn internal_error(err: impl std::fmt::Display) -> Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        err.to_string(),
    )
}

pub fn not_found(message: impl Into<String>) -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

/// One command's metadata, served for integration tooling.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "queryserver", description: "Query server" },
    CommandSpec { name: "addserver", description: "Add server in current channel" },
    CommandSpec { name: "delserver", description: "Delete server in current channel" },
    CommandSpec { name: "refresh", description: "Refresh servers' messages manually in current channel" },
    CommandSpec { name: "factoryreset", description: "Delete all servers in current guild" },
    CommandSpec { name: "moveup", description: "Move the server message upward" },
    CommandSpec { name: "movedown", description: "Move the server message downward" },
    CommandSpec { name: "changestyle", description: "Change server message style" },
    CommandSpec { name: "editstyledata", description: "Edit server message style data" },
    CommandSpec { name: "settimezone", description: "Set server message time zone" },
    CommandSpec { name: "setalert", description: "Set server status alert settings" },
];

#[derive(Clone)]
pub struct ApiState {
    pub repo: Arc<Repository>,
    pub catalog: Arc<GameCatalog>,
    pub invite_link: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/games", get(games))
        .route("/api/v1/info", get(info))
        .route("/api/v1/commands", get(commands))
        .route("/api/v1/servers", get(server_counts))
        .route("/api/v1/servers/{game_id}", get(servers_for_game))
        .route("/api/v1/channels", get(channel_counts))
        .route("/api/v1/channels/{channel_id}", get(channel_servers))
        .route("/api/v1/environment-variables", get(environment_variables))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn sanitize_all(servers: Vec<Server>) -> Vec<Server> {
    servers.iter().map(Server::sanitized).collect()
}

async fn games(State(state): State<ApiState>) -> Response {
    let games: Vec<serde_json::Value> = state
        .catalog
        .entries()
        .map(|entry| {
            json!({
                "id": entry.id,
                "fullname": entry.fullname,
                "protocol": entry.protocol,
                "options": entry.options,
            })
        })
        .collect();
    Json(games).into_response()
}

async fn info(State(state): State<ApiState>) -> Response {
    match state.repo.statistics().await {
        Ok(statistics) => Json(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "invite_link": state.invite_link,
            "statistics": statistics,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

async fn commands() -> Response {
    Json(COMMANDS).into_response()
}

async fn server_counts(State(state): State<ApiState>) -> Response {
    match state.repo.count_per_game().await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn servers_for_game(
    State(state): State<ApiState>,
    Path(game_id): Path<String>,
) -> Response {
    if state.catalog.find(&game_id).is_err() {
        return not_found(format!("unknown game id {game_id}"));
    }
    match state
        .repo
        .all_servers(&ServerFilter::game(game_id))
        .await
    {
        Ok(servers) => Json(sanitize_all(servers)).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn channel_counts(State(state): State<ApiState>) -> Response {
    match state.repo.count_per_channel().await {
        Ok(counts) => {
            // JSON object keys are strings
            let counts: serde_json::Map<String, serde_json::Value> = counts
                .into_iter()
                .map(|(channel_id, n)| (channel_id.to_string(), json!(n)))
                .collect();
            Json(counts).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn channel_servers(
    State(state): State<ApiState>,
    Path(channel_id): Path<i64>,
) -> Response {
    match state
        .repo
        .all_servers(&ServerFilter::channel(channel_id))
        .await
    {
        Ok(servers) => Json(sanitize_all(servers)).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn environment_variables() -> Response {
    Json(config::variables()).into_response()
}
