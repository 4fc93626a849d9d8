//! Aggregate activity text, recomputed once per tick.

use tracing::debug;

use crate::config::{AdvertiseType, Config};
use crate::gateway::ChatGateway;
use crate::repo::{RepoError, Repository, ServerFilter};
use crate::server::Server;

/// Compute this tick's presence text.
pub fn presence_text(
    advertise: AdvertiseType,
    unique_servers: i64,
    servers: &[Server],
    tick_index: u64,
) -> String {
    match advertise {
        AdvertiseType::ServerCount => format!("{unique_servers} servers"),
        AdvertiseType::Individually => {
            let online: Vec<&Server> = servers.iter().filter(|s| s.status).collect();
            if online.is_empty() {
                return format!("{unique_servers} servers");
            }
            let index = usize::try_from(tick_index).unwrap_or(0) % online.len();
            let server = online[index];
            format!(
                "{}/{} {}",
                server.result.numplayers, server.result.maxplayers, server.result.name
            )
        }
        AdvertiseType::PlayerStats => {
            let players: i64 = servers.iter().map(|s| s.result.numplayers).sum();
            let bots: i64 = servers.iter().map(|s| s.result.numbots).sum();
            let max: i64 = servers.iter().map(|s| s.result.maxplayers.max(0)).sum();
            let percent = if max > 0 { players * 100 / max } else { 0 };
            format!("{players}({bots})/{max} ({percent}%)")
        }
    }
}

/// Recompute presence and hand it to the gateway.
pub async fn update_presence(
    repo: &Repository,
    gateway: &dyn ChatGateway,
    config: &Config,
    tick_index: u64,
) -> Result<String, RepoError> {
    let statistics = repo.statistics().await?;
    let servers = repo.all_servers(&ServerFilter::all()).await?;

    let text = config.activity_name.clone().unwrap_or_else(|| {
        presence_text(
            config.advertise_type,
            statistics.unique_servers,
            &servers,
            tick_index,
        )
    });

    if let Err(e) = gateway.update_presence(config.activity_type, &text).await {
        debug!(error = %e, "presence update failed");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsm_probe::Probe;
    use std::collections::BTreeMap;

    fn server(name: &str, status: bool, players: i64, bots: i64, max: i64) -> Server {
        let mut server = Server::new(
            1,
            2,
            "css",
            "a",
            27015,
            BTreeMap::new(),
            Probe {
                name: name.to_owned(),
                numplayers: players,
                numbots: bots,
                maxplayers: max,
                ..Probe::default()
            },
        );
        server.status = status;
        server
    }

    #[test]
    fn server_count_text() {
        assert_eq!(
            presence_text(AdvertiseType::ServerCount, 3, &[], 0),
            "3 servers"
        );
    }

    #[test]
    fn individually_rotates_through_online_servers() {
        let servers = vec![
            server("alpha", true, 3, 0, 16),
            server("down", false, 0, 0, 16),
            server("bravo", true, 7, 0, 32),
        ];
        assert_eq!(
            presence_text(AdvertiseType::Individually, 3, &servers, 0),
            "3/16 alpha"
        );
        assert_eq!(
            presence_text(AdvertiseType::Individually, 3, &servers, 1),
            "7/32 bravo"
        );
        assert_eq!(
            presence_text(AdvertiseType::Individually, 3, &servers, 2),
            "3/16 alpha"
        );
    }

    #[test]
    fn individually_with_nothing_online_falls_back_to_the_count() {
        let servers = vec![server("down", false, 0, 0, 16)];
        assert_eq!(
            presence_text(AdvertiseType::Individually, 1, &servers, 5),
            "1 servers"
        );
    }

    #[test]
    fn player_stats_sums_and_percentages() {
        let servers = vec![
            server("a", true, 10, 2, 20),
            server("b", true, 5, 0, 30),
        ];
        assert_eq!(
            presence_text(AdvertiseType::PlayerStats, 2, &servers, 0),
            "15(2)/50 (30%)"
        );
    }

    #[test]
    fn player_stats_with_zero_capacity() {
        assert_eq!(
            presence_text(AdvertiseType::PlayerStats, 0, &[], 0),
            "0(0)/0 (0%)"
        );
    }
}
