//! The periodic tick: pre-query → fan-out → persist → (alerts ∥ edit ∥
//! presence).
//!
//! Probe work runs as spawned tasks in bounded chunks; a panicking probe is
//! converted to a normal failure so every filtered target produces exactly
//! one result. The loop never backlogs: a tick that overruns its period
//! delays the next tick instead of piling up.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gsm_catalog::GameCatalog;
use gsm_probe::{Probe, ProbeError, ProbeTarget, Registry, Tracking};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::alerts;
use crate::config::Config;
use crate::gateway::ChatGateway;
use crate::presence;
use crate::refresher::Refresher;
use crate::repo::{RepoError, Repository};
use crate::server::Server;

/// Probe dispatch as the scheduler sees it (test seam).
#[async_trait]
pub trait Prober: Send + Sync {
    /// Names of strategies that need the once-per-tick pre-query.
    fn pre_query_names(&self) -> Vec<&'static str>;

    async fn pre_query(&self, strategy: &str) -> Result<(), ProbeError>;

    async fn probe(&self, target: &ProbeTarget) -> Result<Probe, ProbeError>;
}

/// Production prober: catalog lookup, registry dispatch, wall-clock budget.
pub struct RegistryProber {
    registry: Registry,
    catalog: Arc<GameCatalog>,
    timeout: Duration,
}

impl RegistryProber {
    pub fn new(registry: Registry, catalog: Arc<GameCatalog>, timeout: Duration) -> Self {
        RegistryProber {
            registry,
            catalog,
            timeout,
        }
    }
}

#[async_trait]
impl Prober for RegistryProber {
    fn pre_query_names(&self) -> Vec<&'static str> {
        self.registry
            .pre_query_strategies()
            .map(|s| s.name())
            .collect()
    }

    async fn pre_query(&self, strategy: &str) -> Result<(), ProbeError> {
        let strategy = self.registry.get(strategy)?;
        gsm_probe::net::with_timeout(self.timeout, strategy.pre_query()).await
    }

    async fn probe(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        let entry = self
            .catalog
            .find(&target.game_id)
            .map_err(|_| ProbeError::InvalidGame(target.game_id.clone()))?;
        let strategy = self.registry.get(&entry.protocol)?;
        gsm_probe::net::with_timeout(self.timeout, strategy.query(target)).await
    }
}

/// Everything one tick needs.
pub struct Pipeline {
    pub repo: Arc<Repository>,
    pub gateway: Arc<dyn ChatGateway>,
    pub prober: Arc<dyn Prober>,
    pub refresher: Arc<Refresher>,
    pub config: Arc<Config>,
    pub catalog: Arc<GameCatalog>,
}

/// Whether a target has been offline long enough to stop probing it.
pub fn auto_disabled(server: &Server, disable_after_days: u64, now: i64) -> bool {
    if disable_after_days == 0 {
        return false;
    }
    let Some(since) = server.result.tracking.offline_since else {
        return false;
    };
    let Ok(cutoff) = i64::try_from(disable_after_days * 86_400) else {
        return false;
    };
    now - since >= cutoff
}

/// Failure bookkeeping: bump the counter, pin the first-failure timestamp,
/// keep the alert flag for the hysteresis edge.
pub fn apply_probe_failure(server: &mut Server, now: i64) {
    server.status = false;
    let tracking = &mut server.result.tracking;
    tracking.fail_query_count = tracking.fail_query_count.saturating_add(1);
    tracking.offline_since = Some(tracking.offline_since.map_or(now, |since| since.min(now)));
}

/// Success bookkeeping: fresh result, counters cleared, alert flag carried
/// over so the online edge can fire.
pub fn apply_probe_success(server: &mut Server, mut probe: Probe) {
    probe.tracking = Tracking {
        fail_query_count: 0,
        offline_since: None,
        sent_offline_alert: server.result.tracking.sent_offline_alert,
    };
    server.status = true;
    server.result = probe;
}

impl Pipeline {
    /// One full tick. Every phase sits inside a recovery boundary: failures
    /// are logged and the remaining phases continue where that is sound.
    pub async fn tick(&self, tick_index: u64) {
        let now = Utc::now();

        if let Err(e) = self.pre_query_phase().await {
            warn!(error = %e, "pre-query phase failed");
        }

        let results = match self.fan_out_phase(now.timestamp()).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "fan-out phase failed; tick abandoned");
                return;
            }
        };

        // Persist before anything renders, so embeds never show data newer
        // than the store.
        if let Err(e) = self.repo.update_servers(&results).await {
            warn!(error = %e, "result persistence failed; tick abandoned");
            return;
        }
        if self.config.metrics_enable {
            if let Err(e) = self.repo.update_metrics(&results, now.timestamp()).await {
                warn!(error = %e, "metric persistence failed");
            }
        }

        let threshold = self.config.alert_threshold();
        let (alerts_result, refresh_result, presence_result) = tokio::join!(
            alerts::run_alerts(
                &self.repo,
                self.gateway.as_ref(),
                threshold,
                self.config.disable_after_days,
                now,
            ),
            self.refresher
                .tick(&self.repo, self.gateway.as_ref(), self.config.edit_timeout, now),
            presence::update_presence(&self.repo, self.gateway.as_ref(), &self.config, tick_index),
        );
        if let Err(e) = alerts_result {
            warn!(error = %e, "alert phase failed");
        }
        if let Err(e) = refresh_result {
            warn!(error = %e, "message refresh phase failed");
        }
        if let Err(e) = presence_result {
            warn!(error = %e, "presence phase failed");
        }
    }

    /// Invoke `pre_query` once per needed strategy, in parallel.
    async fn pre_query_phase(&self) -> Result<(), RepoError> {
        let game_counts = self.repo.count_per_game().await?;
        let mut protocol_counts: BTreeMap<String, i64> = BTreeMap::new();
        for (game_id, count) in &game_counts {
            if let Ok(entry) = self.catalog.find(game_id) {
                *protocol_counts.entry(entry.protocol.clone()).or_default() += count;
            }
        }

        let due: Vec<&'static str> = self
            .prober
            .pre_query_names()
            .into_iter()
            .filter(|name| protocol_counts.get(*name).copied().unwrap_or(0) > 0)
            .collect();
        if due.is_empty() {
            return Ok(());
        }

        let results = futures_util::future::join_all(
            due.iter().map(|name| self.prober.pre_query(name)),
        )
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        for (name, result) in due.iter().zip(&results) {
            if let Err(e) = result {
                warn!(strategy = %name, error = %e, "pre-query failed");
            }
        }
        info!(
            total = due.len(),
            success = due.len() - failed,
            failed,
            "pre-query strategies refreshed"
        );
        Ok(())
    }

    /// Probe every distinct endpoint that is not auto-disabled, in bounded
    /// chunks; one result per filtered target, always.
    async fn fan_out_phase(&self, now: i64) -> Result<Vec<Server>, RepoError> {
        let targets = self.repo.distinct_servers().await?;
        let disable_after_days = self.config.disable_after_days;
        let (skipped, active): (Vec<Server>, Vec<Server>) = targets
            .into_iter()
            .partition(|server| auto_disabled(server, disable_after_days, now));
        if !skipped.is_empty() {
            debug!(count = skipped.len(), "long-offline targets skipped");
        }

        let mut results = Vec::with_capacity(active.len());
        for chunk in active.chunks(self.config.chunk_size) {
            let handles: Vec<_> = chunk
                .iter()
                .map(|server| {
                    let prober = Arc::clone(&self.prober);
                    let fallback = server.clone();
                    let mut server = server.clone();
                    (
                        fallback,
                        tokio::spawn(async move {
                            match prober.probe(&server.to_target()).await {
                                Ok(probe) => apply_probe_success(&mut server, probe),
                                Err(e) => {
                                    debug!(
                                        game_id = %server.game_id,
                                        address = %server.address,
                                        port = server.query_port,
                                        error = %e,
                                        "probe failed"
                                    );
                                    apply_probe_failure(&mut server, now);
                                }
                            }
                            server
                        }),
                    )
                })
                .collect();

            for (fallback, handle) in handles {
                match handle.await {
                    Ok(server) => results.push(server),
                    Err(e) => {
                        warn!(
                            game_id = %fallback.game_id,
                            address = %fallback.address,
                            error = %e,
                            "probe task crashed"
                        );
                        let mut server = fallback;
                        apply_probe_failure(&mut server, now);
                        results.push(server);
                    }
                }
            }
        }

        let failed = results.iter().filter(|s| !s.status).count();
        let success = results.len() - failed;
        let percent = if results.is_empty() {
            0
        } else {
            failed * 100 / results.len()
        };
        info!(
            total = results.len(),
            success,
            failed,
            "query servers: {percent}% fail"
        );
        Ok(results)
    }
}

/// Supervisor: drives the tick loop until shutdown, restarting it if it
/// ever stops unexpectedly.
pub async fn run(pipeline: Arc<Pipeline>, mut shutdown: watch::Receiver<bool>) {
    loop {
        run_loop(&pipeline, &mut shutdown).await;
        if *shutdown.borrow() {
            return;
        }
        warn!("scheduler loop exited unexpectedly; restarting");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn run_loop(pipeline: &Arc<Pipeline>, shutdown: &mut watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(pipeline.config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tick_index: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scheduler shutting down");
                    return;
                }
            }
            _ = interval.tick() => {
                // Spawned so a panicking tick is caught and the loop survives.
                let pipeline = Arc::clone(pipeline);
                let handle = tokio::spawn(async move { pipeline.tick(tick_index).await });
                if let Err(e) = handle.await {
                    warn!(error = %e, "tick crashed");
                }
                tick_index += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn server_offline_since(since: Option<i64>) -> Server {
        let mut server = Server::new(
            1,
            2,
            "css",
            "a",
            27015,
            BTreeMap::new(),
            Probe::default(),
        );
        server.result.tracking.offline_since = since;
        server
    }

    #[test]
    fn auto_disable_is_off_by_default() {
        let server = server_offline_since(Some(0));
        assert!(!auto_disabled(&server, 0, 1_000_000_000));
    }

    #[test]
    fn auto_disable_kicks_in_after_the_cutoff() {
        let now = 1_000_000_000;
        let eight_days_ago = now - 8 * 86_400;
        let six_days_ago = now - 6 * 86_400;
        assert!(auto_disabled(&server_offline_since(Some(eight_days_ago)), 7, now));
        assert!(!auto_disabled(&server_offline_since(Some(six_days_ago)), 7, now));
        assert!(!auto_disabled(&server_offline_since(None), 7, now));
    }

    #[test]
    fn failure_bookkeeping_accumulates_and_pins_the_first_failure() {
        let mut server = server_offline_since(None);
        apply_probe_failure(&mut server, 100);
        assert!(!server.status);
        assert_eq!(server.result.tracking.fail_query_count, 1);
        assert_eq!(server.result.tracking.offline_since, Some(100));

        apply_probe_failure(&mut server, 200);
        assert_eq!(server.result.tracking.fail_query_count, 2);
        assert_eq!(server.result.tracking.offline_since, Some(100));
    }

    #[test]
    fn success_bookkeeping_resets_counters_but_keeps_the_alert_flag() {
        let mut server = server_offline_since(Some(50));
        server.result.tracking.fail_query_count = 4;
        server.result.tracking.sent_offline_alert = true;

        apply_probe_success(
            &mut server,
            Probe {
                name: "back".to_owned(),
                ..Probe::default()
            },
        );
        assert!(server.status);
        assert_eq!(server.result.name, "back");
        assert_eq!(server.result.tracking.fail_query_count, 0);
        assert_eq!(server.result.tracking.offline_since, None);
        assert!(server.result.tracking.sent_offline_alert);
    }
}
