//! Status-transition alerts with hysteresis.
//!
//! The threshold is `max(2, floor(120 / period))`: roughly two minutes of
//! consecutive failure, never fewer than two failed ticks. The offline alert
//! fires exactly when the failure counter hits the threshold, once per
//! down-run; the online alert fires on the first successful tick while the
//! offline flag is still set.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::gateway::ChatGateway;
use crate::repo::{RepoError, Repository, ServerFilter};
use crate::server::Server;
use crate::styles;

/// Webhook sends per pacing window.
const SEND_CHUNK: usize = 25;
const SEND_CHUNK_PAUSE: std::time::Duration = std::time::Duration::from_secs(1);

const COLOR_TEST: u32 = 0x303136;
const COLOR_ONLINE: u32 = 0x57F287;
const COLOR_OFFLINE: u32 = 0xED4245;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Test,
    Online,
    Offline,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AlertSummary {
    pub offline: usize,
    pub online: usize,
}

/// Build the alert payload embed.
pub fn alert_embed(server: &Server, kind: AlertKind, now: DateTime<Utc>) -> Value {
    let (description, color) = match kind {
        AlertKind::Test => ("🧪 This is a test alert!", COLOR_TEST),
        AlertKind::Online => ("✅ Your server is back online!", COLOR_ONLINE),
        AlertKind::Offline => ("🚨 Your server seems to be down!", COLOR_OFFLINE),
    };

    let lock = if server.result.password { "🔒 " } else { "" };
    let game = server
        .style_value("fullname")
        .unwrap_or(server.game_id.as_str());
    let address_name = if server.game_id == "discord" {
        "Guild ID"
    } else {
        "Address:Port"
    };

    json!({
        "author": { "name": format!("{lock}{}", server.result.name) },
        "description": description,
        "color": color,
        "fields": [
            { "name": "Game", "value": game, "inline": true },
            { "name": address_name, "value": styles::address_line(server), "inline": true },
        ],
        "footer": { "text": format!("Query Time: {}", styles::query_time_text(server, now)) },
    })
}

/// Which alert, if any, a row is eligible for this tick.
pub fn eligibility(server: &Server, threshold: u32) -> Option<AlertKind> {
    let tracking = server.result.tracking;
    if !server.status && tracking.fail_query_count == threshold {
        return Some(AlertKind::Offline);
    }
    if server.status && tracking.sent_offline_alert {
        return Some(AlertKind::Online);
    }
    None
}

/// Evaluate the full server list, deliver due alerts, persist flag changes.
///
/// Auto-disabled targets are out of the probe set, so their eligibility is
/// not evaluated either.
pub async fn run_alerts(
    repo: &Repository,
    gateway: &dyn ChatGateway,
    threshold: u32,
    disable_after_days: u64,
    now: DateTime<Utc>,
) -> Result<AlertSummary, RepoError> {
    let servers = repo.all_servers(&ServerFilter::all()).await?;

    let mut due: Vec<(Server, AlertKind)> = Vec::new();
    for server in servers {
        if crate::scheduler::auto_disabled(&server, disable_after_days, now.timestamp()) {
            continue;
        }
        if let Some(kind) = eligibility(&server, threshold) {
            due.push((server, kind));
        }
    }
    if due.is_empty() {
        return Ok(AlertSummary::default());
    }

    let mut summary = AlertSummary::default();
    let mut flagged: Vec<Server> = Vec::new();
    for (server, kind) in &mut due {
        match kind {
            AlertKind::Offline => {
                server.result.tracking.sent_offline_alert = true;
                summary.offline += 1;
            }
            AlertKind::Online => {
                server.result.tracking.sent_offline_alert = false;
                summary.online += 1;
            }
            AlertKind::Test => {}
        }
        flagged.push(server.clone());
    }

    // Deliver under the platform webhook budget.
    for chunk in due.chunks(SEND_CHUNK) {
        let sends = chunk
            .iter()
            .map(|(server, kind)| send_alert(gateway, server, *kind, now));
        futures_util::future::join_all(sends).await;
        if due.len() > SEND_CHUNK {
            tokio::time::sleep(SEND_CHUNK_PAUSE).await;
        }
    }

    // Flag changes ride the distinct tuple, so duplicate monitors follow.
    repo.update_servers(&flagged).await?;

    info!(
        offline = summary.offline,
        online = summary.online,
        "alerts evaluated"
    );
    Ok(summary)
}

/// Deliver one alert; an unset webhook url silently skips, failures are
/// logged and not retried this tick.
pub async fn send_alert(
    gateway: &dyn ChatGateway,
    server: &Server,
    kind: AlertKind,
    now: DateTime<Utc>,
) {
    let Some(url) = server
        .style_value("_alert_webhook_url")
        .filter(|url| !url.trim().is_empty())
    else {
        debug!(
            game_id = %server.game_id,
            address = %server.address,
            "no alert webhook configured"
        );
        return;
    };

    let content = server
        .style_value("_alert_content")
        .map(str::trim)
        .filter(|content| !content.is_empty());
    let embed = alert_embed(server, kind, now);

    match gateway.execute_webhook(url, content, &embed).await {
        Ok(()) => info!(
            game_id = %server.game_id,
            address = %server.address,
            port = server.query_port,
            alert = ?kind,
            "alert sent"
        ),
        Err(e) => warn!(
            game_id = %server.game_id,
            address = %server.address,
            port = server.query_port,
            alert = ?kind,
            error = %e,
            "alert delivery failed"
        ),
    }
}
