//! Outbound message maintenance.
//!
//! The first tick after boot fetches every known message to warm the cache
//! and shed dead ids; every later tick edits. Edits run in chunks of 25 per
//! wall-clock second to stay inside the platform rate budget. The resend
//! path (driven by user commands, not the scheduler) purges and republishes
//! a channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::gateway::{ChatGateway, ChatMessage, GatewayError};
use crate::repo::{RepoError, Repository, ServerFilter};
use crate::server::{group_by_message, Server};
use crate::styles;

/// Platform rule: at most this many embeds share one message.
pub const EMBEDS_PER_MESSAGE: usize = 10;

/// Edits (and fetches) per one-second pacing window.
const CHUNK_SIZE: usize = 25;
const CHUNK_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RefreshSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

pub struct Refresher {
    cache: Mutex<HashMap<i64, ChatMessage>>,
    fetched: AtomicBool,
}

impl Default for Refresher {
    fn default() -> Self {
        Self::new()
    }
}

impl Refresher {
    pub fn new() -> Self {
        Refresher {
            cache: Mutex::new(HashMap::new()),
            fetched: AtomicBool::new(false),
        }
    }

    pub async fn cached_messages(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// The scheduler's post-query entry point.
    pub async fn tick(
        &self,
        repo: &Repository,
        gateway: &dyn ChatGateway,
        edit_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<RefreshSummary, RepoError> {
        let servers = repo.all_servers(&ServerFilter::all()).await?;
        let groups: Vec<(i64, Vec<Server>)> = group_by_message(&servers).into_iter().collect();

        let summary = if self.fetched.swap(true, Ordering::SeqCst) {
            self.edit_pass(repo, gateway, &groups, edit_timeout, now)
                .await?
        } else {
            self.fetch_pass(repo, gateway, &groups).await?
        };

        let action = if summary.total == summary.success && summary.failed == 0 {
            "refreshed"
        } else {
            "refreshed with failures"
        };
        info!(
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            "messages {action}"
        );
        Ok(summary)
    }

    async fn fetch_pass(
        &self,
        repo: &Repository,
        gateway: &dyn ChatGateway,
        groups: &[(i64, Vec<Server>)],
    ) -> Result<RefreshSummary, RepoError> {
        let mut summary = RefreshSummary {
            total: groups.len(),
            ..RefreshSummary::default()
        };
        let mut lost_rows: Vec<Server> = Vec::new();

        for chunk in groups.chunks(CHUNK_SIZE) {
            let window = Instant::now();
            let fetches = chunk.iter().map(|(message_id, servers)| async move {
                let channel_id = servers[0].channel_id;
                (*message_id, gateway.fetch_message(channel_id, *message_id).await)
            });
            for (message_id, result) in futures_util::future::join_all(fetches).await {
                match result {
                    Ok(message) => {
                        summary.success += 1;
                        self.cache.lock().await.insert(message_id, message);
                    }
                    Err(GatewayError::NotFound | GatewayError::Forbidden) => {
                        summary.failed += 1;
                        debug!(message_id, "stale message id dropped on fetch");
                        if let Some((_, servers)) =
                            groups.iter().find(|(id, _)| *id == message_id)
                        {
                            for server in servers {
                                let mut cleared = server.clone();
                                cleared.message_id = None;
                                lost_rows.push(cleared);
                            }
                        }
                    }
                    Err(e) => {
                        summary.failed += 1;
                        debug!(message_id, error = %e, "message fetch failed");
                    }
                }
            }
            pace(window, groups.len()).await;
        }

        if !lost_rows.is_empty() {
            repo.update_servers_message_id(&lost_rows).await?;
        }
        Ok(summary)
    }

    async fn edit_pass(
        &self,
        repo: &Repository,
        gateway: &dyn ChatGateway,
        groups: &[(i64, Vec<Server>)],
        edit_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<RefreshSummary, RepoError> {
        let mut summary = RefreshSummary {
            total: groups.len(),
            ..RefreshSummary::default()
        };
        let mut lost_rows: Vec<Server> = Vec::new();

        for chunk in groups.chunks(CHUNK_SIZE) {
            let window = Instant::now();
            let edits = chunk.iter().map(|(message_id, servers)| async move {
                let channel_id = servers[0].channel_id;
                let embeds: Vec<serde_json::Value> = servers
                    .iter()
                    .map(|server| styles::render_embed(server, now))
                    .collect();
                let result = match tokio::time::timeout(
                    edit_timeout,
                    gateway.edit_message(channel_id, *message_id, &embeds),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout),
                };
                (*message_id, channel_id, result)
            });

            for (message_id, channel_id, result) in
                futures_util::future::join_all(edits).await
            {
                match result {
                    Ok(()) => {
                        summary.success += 1;
                        self.cache
                            .lock()
                            .await
                            .insert(message_id, ChatMessage { id: message_id, channel_id });
                    }
                    Err(GatewayError::NotFound) => {
                        summary.failed += 1;
                        self.cache.lock().await.remove(&message_id);
                        if let Some((_, servers)) =
                            groups.iter().find(|(id, _)| *id == message_id)
                        {
                            for server in servers {
                                let mut cleared = server.clone();
                                cleared.message_id = None;
                                lost_rows.push(cleared);
                            }
                        }
                        debug!(message_id, "message gone; id cleared for republish");
                    }
                    Err(e @ (GatewayError::Forbidden
                    | GatewayError::RateLimited
                    | GatewayError::Timeout)) => {
                        summary.failed += 1;
                        self.cache.lock().await.remove(&message_id);
                        debug!(message_id, error = %e, "edit failed; cache evicted");
                    }
                    Err(e) => {
                        summary.failed += 1;
                        debug!(message_id, error = %e, "edit failed");
                    }
                }
            }
            pace(window, groups.len()).await;
        }

        if !lost_rows.is_empty() {
            repo.update_servers_message_id(&lost_rows).await?;
        }
        Ok(summary)
    }

    /// Republish a channel: purge this bot's messages, send fresh ones in
    /// ≤10-embed chunks (standalone styles get their own message), and
    /// record the new message ids.
    pub async fn resend_channel(
        &self,
        repo: &Repository,
        gateway: &dyn ChatGateway,
        channel_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), RefreshError> {
        let mut servers = repo.all_servers(&ServerFilter::channel(channel_id)).await?;

        {
            let mut cache = self.cache.lock().await;
            for server in &servers {
                if let Some(message_id) = server.message_id {
                    cache.remove(&message_id);
                }
            }
        }
        gateway.purge_channel(channel_id).await?;

        for chunk in plan_message_chunks(&servers) {
            let embeds: Vec<serde_json::Value> = chunk
                .iter()
                .map(|&index| styles::render_embed(&servers[index], now))
                .collect();
            let message = gateway.send_message(channel_id, &embeds).await?;
            for index in chunk {
                servers[index].message_id = Some(message.id);
            }
            self.cache.lock().await.insert(message.id, message);
        }

        repo.update_servers_message_id(&servers).await?;
        Ok(())
    }
}

async fn pace(window: Instant, total: usize) {
    if total > CHUNK_SIZE {
        let elapsed = window.elapsed();
        if elapsed < CHUNK_WINDOW {
            tokio::time::sleep(CHUNK_WINDOW - elapsed).await;
        }
    }
}

/// Partition a channel's ordered servers into outbound messages: standalone
/// styles alone, everything else packed up to the embed cap.
pub fn plan_message_chunks(servers: &[Server]) -> Vec<Vec<usize>> {
    let mut chunks: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    for (index, server) in servers.iter().enumerate() {
        if styles::is_standalone(server) {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(vec![index]);
            continue;
        }
        current.push(index);
        if current.len() == EMBEDS_PER_MESSAGE {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsm_probe::Probe;
    use std::collections::BTreeMap;

    fn server(style_id: &str) -> Server {
        let mut server = Server::new(1, 2, "css", "a", 27015, BTreeMap::new(), Probe::default());
        server.style_id = style_id.to_owned();
        server
    }

    #[test]
    fn chunks_pack_up_to_ten_embeds() {
        let servers: Vec<Server> = (0..12).map(|_| server("medium")).collect();
        let chunks = plan_message_chunks(&servers);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[1].len(), 2);
    }

    #[test]
    fn standalone_styles_break_the_packing() {
        let servers = vec![
            server("medium"),
            server("large"),
            server("medium"),
            server("medium"),
        ];
        let chunks = plan_message_chunks(&servers);
        assert_eq!(chunks, vec![vec![0], vec![1], vec![2, 3]]);
    }

    #[test]
    fn all_standalone_channels_get_one_message_each() {
        let servers = vec![server("extra-large"), server("large")];
        let chunks = plan_message_chunks(&servers);
        assert_eq!(chunks, vec![vec![0], vec![1]]);
    }
}
