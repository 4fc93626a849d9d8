//! Durable storage for monitor rows and the per-endpoint metric ring.
//!
//! The interface is storage-agnostic; each backend (sqlite, postgres)
//! implements the operation set natively; the distinct-endpoint aggregation
//! in particular is written per backend, not emulated.

pub mod postgres;
pub mod sqlite;

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::server::Server;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("server not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("postgres: {0}")]
    Postgres(#[from] sqlx::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Row selection for [`Repository::all_servers`]. Filters are mutually
/// exclusive; an empty filter selects everything ordered by position.
#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    pub channel_id: Option<i64>,
    pub guild_id: Option<i64>,
    pub message_id: Option<i64>,
    pub game_id: Option<String>,
}

impl ServerFilter {
    pub fn all() -> Self {
        ServerFilter::default()
    }

    pub fn channel(channel_id: i64) -> Self {
        ServerFilter {
            channel_id: Some(channel_id),
            ..ServerFilter::default()
        }
    }

    pub fn guild(guild_id: i64) -> Self {
        ServerFilter {
            guild_id: Some(guild_id),
            ..ServerFilter::default()
        }
    }

    pub fn message(message_id: i64) -> Self {
        ServerFilter {
            message_id: Some(message_id),
            ..ServerFilter::default()
        }
    }

    pub fn game(game_id: impl Into<String>) -> Self {
        ServerFilter {
            game_id: Some(game_id.into()),
            ..ServerFilter::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum DeleteFilter {
    Guild(i64),
    Channel(i64),
    Ids(Vec<i64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub messages: i64,
    pub channels: i64,
    pub guilds: i64,
    pub unique_servers: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricSample {
    pub status: bool,
    pub numplayers: i64,
    pub numbots: i64,
    pub maxplayers: i64,
    pub captured_at: i64,
}

/// The backend-dispatch front. All operations are cancel-safe: each is a
/// single statement or transaction.
pub enum Repository {
    Sqlite(sqlite::SqliteRepo),
    Postgres(postgres::PgRepo),
}

macro_rules! dispatch {
    ($self:ident, $repo:ident => $body:expr) => {
        match $self {
            Repository::Sqlite($repo) => $body,
            Repository::Postgres($repo) => $body,
        }
    };
}

impl Repository {
    pub async fn all_servers(&self, filter: &ServerFilter) -> Result<Vec<Server>, RepoError> {
        dispatch!(self, repo => repo.all_servers(filter).await)
    }

    /// One row per `(game_id, address, query_port, query_extra)`.
    pub async fn distinct_servers(&self) -> Result<Vec<Server>, RepoError> {
        dispatch!(self, repo => repo.distinct_servers().await)
    }

    pub async fn count_per_game(&self) -> Result<BTreeMap<String, i64>, RepoError> {
        dispatch!(self, repo => repo.count_per_game().await)
    }

    pub async fn count_per_channel(&self) -> Result<BTreeMap<i64, i64>, RepoError> {
        dispatch!(self, repo => repo.count_per_channel().await)
    }

    pub async fn statistics(&self) -> Result<Statistics, RepoError> {
        dispatch!(self, repo => repo.statistics().await)
    }

    pub async fn find_server(
        &self,
        channel_id: i64,
        address: &str,
        query_port: u16,
    ) -> Result<Server, RepoError> {
        dispatch!(self, repo => repo.find_server(channel_id, address, query_port).await)
    }

    /// Insert at the tail of the channel; duplicate endpoints in a channel
    /// are a conflict.
    pub async fn add_server(&self, server: &Server) -> Result<Server, RepoError> {
        dispatch!(self, repo => repo.add_server(server).await)
    }

    /// Batch-update `(status, result)` keyed by the distinct tuple, so every
    /// duplicate monitor row follows.
    pub async fn update_servers(&self, servers: &[Server]) -> Result<(), RepoError> {
        dispatch!(self, repo => repo.update_servers(servers).await)
    }

    pub async fn update_servers_message_id(&self, servers: &[Server]) -> Result<(), RepoError> {
        dispatch!(self, repo => repo.update_servers_message_id(servers).await)
    }

    pub async fn update_servers_style_data(&self, servers: &[Server]) -> Result<(), RepoError> {
        dispatch!(self, repo => repo.update_servers_style_data(servers).await)
    }

    pub async fn update_server_style_id(&self, server: &Server) -> Result<(), RepoError> {
        dispatch!(self, repo => repo.update_server_style_id(server).await)
    }

    /// Swap `(position, message_id)` with the adjacent row; empty diff at the
    /// boundaries or when either row is unpublished.
    pub async fn move_server(
        &self,
        server: &Server,
        direction: MoveDirection,
    ) -> Result<Vec<Server>, RepoError> {
        dispatch!(self, repo => repo.move_server(server, direction).await)
    }

    pub async fn move_servers_to_channel(
        &self,
        servers: &[Server],
        channel_id: i64,
    ) -> Result<(), RepoError> {
        dispatch!(self, repo => repo.move_servers_to_channel(servers, channel_id).await)
    }

    pub async fn delete_servers(&self, filter: &DeleteFilter) -> Result<(), RepoError> {
        dispatch!(self, repo => repo.delete_servers(filter).await)
    }

    /// Append one sample per distinct endpoint, pruning each ring to the
    /// configured limit.
    pub async fn update_metrics(
        &self,
        servers: &[Server],
        captured_at: i64,
    ) -> Result<(), RepoError> {
        dispatch!(self, repo => repo.update_metrics(servers, captured_at).await)
    }

    pub async fn metric_samples(&self, server: &Server) -> Result<Vec<MetricSample>, RepoError> {
        dispatch!(self, repo => repo.metric_samples(server).await)
    }
}

/// Dedupe rows down to one representative per distinct tuple, first wins.
pub(crate) fn dedupe_by_distinct_key(servers: &[Server]) -> Vec<&Server> {
    let mut seen = std::collections::BTreeSet::new();
    servers
        .iter()
        .filter(|s| seen.insert(s.distinct_key()))
        .collect()
}

/// Find the swap partner for a move within an ordered channel listing.
///
/// Returns `None` (an empty diff) at the channel boundaries and when either
/// row has no published message. The swap exists so the rendered message at
/// a given line keeps editing the same row, which needs both messages.
pub(crate) fn pick_swap_pair<'a>(
    channel: &'a [Server],
    moving_id: i64,
    direction: MoveDirection,
) -> Option<(&'a Server, &'a Server)> {
    let index = channel.iter().position(|s| s.id == moving_id)?;
    let other_index = match direction {
        MoveDirection::Up => index.checked_sub(1)?,
        MoveDirection::Down => {
            if index + 1 >= channel.len() {
                return None;
            }
            index + 1
        }
    };

    let moving = &channel[index];
    let other = &channel[other_index];
    if moving.message_id.is_none() || other.message_id.is_none() {
        return None;
    }
    Some((moving, other))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsm_probe::Probe;
    use std::collections::BTreeMap;

    fn row(id: i64, position: i32, message_id: Option<i64>) -> Server {
        Server {
            id,
            position,
            guild_id: 1,
            channel_id: 10,
            message_id,
            game_id: "css".to_owned(),
            address: "a".to_owned(),
            query_port: 27015,
            query_extra: BTreeMap::new(),
            status: true,
            result: Probe::default(),
            style_id: "medium".to_owned(),
            style_data: BTreeMap::new(),
        }
    }

    #[test]
    fn swap_pair_at_boundaries_is_none() {
        let channel = vec![row(1, 0, Some(100)), row(2, 1, Some(101))];
        assert!(pick_swap_pair(&channel, 1, MoveDirection::Up).is_none());
        assert!(pick_swap_pair(&channel, 2, MoveDirection::Down).is_none());
    }

    #[test]
    fn swap_pair_requires_published_messages() {
        let channel = vec![row(1, 0, Some(100)), row(2, 1, None)];
        assert!(pick_swap_pair(&channel, 2, MoveDirection::Up).is_none());
        assert!(pick_swap_pair(&channel, 1, MoveDirection::Down).is_none());
    }

    #[test]
    fn swap_pair_picks_the_adjacent_row() {
        let channel = vec![
            row(1, 0, Some(100)),
            row(2, 1, Some(101)),
            row(3, 2, Some(102)),
        ];
        let (moving, other) = pick_swap_pair(&channel, 2, MoveDirection::Up).unwrap();
        assert_eq!(moving.id, 2);
        assert_eq!(other.id, 1);
    }
}
