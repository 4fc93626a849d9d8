//! Full-tick scenarios against an in-memory store, a scripted prober, and a
//! recording gateway.

mod support;

use std::sync::atomic::Ordering;

use chrono::Utc;

use monitor::repo::ServerFilter;
use monitor::scheduler::apply_probe_failure;
use support::{
    build_pipeline, sample_probe, seed_server, test_config, ProbeOutcome, ScriptedProber,
};

const KEY: &str = "css:10.0.0.1:27015";

async fn script_up(prober: &ScriptedProber, name: &str, players: i64, max: i64) {
    prober
        .script(KEY, vec![ProbeOutcome::Up(sample_probe(name, players, max))])
        .await;
}

#[tokio::test]
async fn stable_tick_updates_status_without_alerts() {
    let t = build_pipeline(test_config(&[("TASK_QUERY_SERVER", "15")]));
    t.repo.add_server(&seed_server(10, "10.0.0.1")).await.unwrap();
    script_up(&t.prober, "S", 3, 16).await;

    t.pipeline.tick(0).await;

    let rows = t.repo.all_servers(&ServerFilter::all()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].status);
    assert_eq!(rows[0].result.name, "S");
    assert_eq!(rows[0].result.numplayers, 3);
    assert_eq!(rows[0].result.tracking.fail_query_count, 0);

    assert!(t.gateway.webhooks.lock().await.is_empty());
    let presences = t.gateway.presences.lock().await;
    assert_eq!(presences.last().map(|(_, text)| text.as_str()), Some("1 servers"));
}

#[tokio::test]
async fn transient_failure_fires_one_offline_and_one_online_alert() {
    // Period 60s -> threshold max(2, 120/60) == 2.
    let t = build_pipeline(test_config(&[("TASK_QUERY_SERVER", "60")]));
    let mut server = seed_server(10, "10.0.0.1");
    server.style_data.insert(
        "_alert_webhook_url".to_owned(),
        "https://hooks.example/warn".to_owned(),
    );
    t.repo.add_server(&server).await.unwrap();

    t.prober
        .script(
            KEY,
            vec![
                ProbeOutcome::Down,
                ProbeOutcome::Down,
                ProbeOutcome::Up(sample_probe("S", 3, 16)),
            ],
        )
        .await;

    // Tick 1: first failure, below threshold.
    t.pipeline.tick(0).await;
    let row = &t.repo.all_servers(&ServerFilter::all()).await.unwrap()[0];
    assert!(!row.status);
    assert_eq!(row.result.tracking.fail_query_count, 1);
    assert!(row.result.tracking.offline_since.is_some());
    assert!(!row.result.tracking.sent_offline_alert);
    assert_eq!(t.gateway.webhooks.lock().await.len(), 0);

    // Tick 2: counter hits the threshold, exactly one offline alert.
    t.pipeline.tick(1).await;
    let row = &t.repo.all_servers(&ServerFilter::all()).await.unwrap()[0];
    assert_eq!(row.result.tracking.fail_query_count, 2);
    assert!(row.result.tracking.sent_offline_alert);
    {
        let webhooks = t.gateway.webhooks.lock().await;
        assert_eq!(webhooks.len(), 1);
        assert_eq!(
            webhooks[0].2["description"],
            "🚨 Your server seems to be down!"
        );
    }

    // Tick 3: recovery, exactly one online alert, counters reset.
    t.pipeline.tick(2).await;
    let row = &t.repo.all_servers(&ServerFilter::all()).await.unwrap()[0];
    assert!(row.status);
    assert_eq!(row.result.tracking.fail_query_count, 0);
    assert_eq!(row.result.tracking.offline_since, None);
    assert!(!row.result.tracking.sent_offline_alert);
    let webhooks = t.gateway.webhooks.lock().await;
    assert_eq!(webhooks.len(), 2);
    assert_eq!(
        webhooks[1].2["description"],
        "✅ Your server is back online!"
    );
}

#[tokio::test]
async fn continued_failure_does_not_repeat_the_offline_alert() {
    let t = build_pipeline(test_config(&[("TASK_QUERY_SERVER", "60")]));
    let mut server = seed_server(10, "10.0.0.1");
    server.style_data.insert(
        "_alert_webhook_url".to_owned(),
        "https://hooks.example/warn".to_owned(),
    );
    t.repo.add_server(&server).await.unwrap();
    t.prober.script(KEY, vec![ProbeOutcome::Down]).await;

    for tick in 0..5 {
        t.pipeline.tick(tick).await;
    }

    assert_eq!(t.gateway.webhooks.lock().await.len(), 1);
    let row = &t.repo.all_servers(&ServerFilter::all()).await.unwrap()[0];
    assert_eq!(row.result.tracking.fail_query_count, 5);
}

#[tokio::test]
async fn duplicate_monitors_stay_in_lockstep() {
    let t = build_pipeline(test_config(&[]));
    t.repo.add_server(&seed_server(10, "10.0.0.1")).await.unwrap();
    let mut second = seed_server(20, "10.0.0.1");
    second.guild_id = 2;
    t.repo.add_server(&second).await.unwrap();
    script_up(&t.prober, "S", 7, 32).await;

    t.pipeline.tick(0).await;

    // One probe for the shared endpoint, both rows updated identically.
    assert_eq!(t.prober.probes.load(Ordering::SeqCst), 1);
    let rows = t.repo.all_servers(&ServerFilter::all()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].result, rows[1].result);
    assert!(rows.iter().all(|r| r.status && r.result.numplayers == 7));
    assert_ne!(rows[0].channel_id, rows[1].channel_id);
}

#[tokio::test]
async fn long_offline_targets_are_skipped_and_left_untouched() {
    let t = build_pipeline(test_config(&[("TASK_QUERY_DISABLE_AFTER_DAYS", "7")]));
    t.repo.add_server(&seed_server(10, "10.0.0.1")).await.unwrap();

    // Drive the stored row into an 8-day-old down-run.
    let mut rows = t.repo.all_servers(&ServerFilter::all()).await.unwrap();
    let eight_days_ago = Utc::now().timestamp() - 8 * 86_400;
    apply_probe_failure(&mut rows[0], eight_days_ago);
    t.repo.update_servers(&rows).await.unwrap();
    let before = t.repo.all_servers(&ServerFilter::all()).await.unwrap();

    script_up(&t.prober, "S", 3, 16).await;
    t.pipeline.tick(0).await;

    assert_eq!(t.prober.probes.load(Ordering::SeqCst), 0);
    let after = t.repo.all_servers(&ServerFilter::all()).await.unwrap();
    assert_eq!(before[0].result, after[0].result);
    assert_eq!(before[0].status, after[0].status);
    assert!(t.gateway.webhooks.lock().await.is_empty());
}

#[tokio::test]
async fn results_match_targets_one_to_one() {
    let t = build_pipeline(test_config(&[("TASK_QUERY_CHUNK_SIZE", "1")]));
    for (channel, address) in [(10, "a.example"), (10, "b.example"), (11, "c.example")] {
        t.repo.add_server(&seed_server(channel, address)).await.unwrap();
    }
    t.prober
        .script("css:a.example:27015", vec![ProbeOutcome::Up(sample_probe("A", 1, 8))])
        .await;
    t.prober
        .script("css:b.example:27015", vec![ProbeOutcome::Down])
        .await;
    t.prober
        .script("css:c.example:27015", vec![ProbeOutcome::Up(sample_probe("C", 2, 8))])
        .await;

    t.pipeline.tick(0).await;

    // Chunk size 1 still probes every distinct endpoint exactly once.
    assert_eq!(t.prober.probes.load(Ordering::SeqCst), 3);
    let rows = t.repo.all_servers(&ServerFilter::all()).await.unwrap();
    let up = rows.iter().filter(|r| r.status).count();
    assert_eq!(up, 2);
}

#[tokio::test]
async fn metrics_ring_is_bounded() {
    let config = test_config(&[("METRICS_ENABLE", "true")]);
    let t = support::build_pipeline_with_limit(config, 3);
    t.repo.add_server(&seed_server(10, "10.0.0.1")).await.unwrap();
    script_up(&t.prober, "S", 3, 16).await;

    for tick in 0..5 {
        t.pipeline.tick(tick).await;
    }

    let row = &t.repo.all_servers(&ServerFilter::all()).await.unwrap()[0];
    let samples = t.repo.metric_samples(row).await.unwrap();
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| s.status && s.numplayers == 3));
}
