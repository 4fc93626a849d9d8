//! Message refresher behaviour: fetch-then-edit, eviction, and the resend
//! path's chunking rules.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use monitor::refresher::Refresher;
use monitor::repo::{sqlite::SqliteRepo, Repository, ServerFilter};
use support::{seed_server, RecordingGateway};

const EDIT_TIMEOUT: Duration = Duration::from_secs(3);

fn test_repo() -> Arc<Repository> {
    Arc::new(Repository::Sqlite(
        SqliteRepo::open_in_memory(1000).expect("in-memory sqlite"),
    ))
}

async fn publish(repo: &Repository, channel_id: i64, address: &str, message_id: i64) {
    let added = repo.add_server(&seed_server(channel_id, address)).await.unwrap();
    let mut published = added;
    published.message_id = Some(message_id);
    repo.update_servers_message_id(std::slice::from_ref(&published))
        .await
        .unwrap();
}

#[tokio::test]
async fn first_tick_fetches_then_later_ticks_edit() {
    let repo = test_repo();
    let gateway = RecordingGateway::new();
    let refresher = Refresher::new();
    publish(&repo, 10, "a", 100).await;
    publish(&repo, 10, "b", 101).await;

    let summary = refresher
        .tick(&repo, &gateway, EDIT_TIMEOUT, Utc::now())
        .await
        .unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.success, 2);
    assert_eq!(gateway.fetches.lock().await.len(), 2);
    assert!(gateway.edits.lock().await.is_empty());
    assert_eq!(refresher.cached_messages().await, 2);

    let summary = refresher
        .tick(&repo, &gateway, EDIT_TIMEOUT, Utc::now())
        .await
        .unwrap();
    assert_eq!(summary.success, 2);
    let edits = gateway.edits.lock().await;
    assert_eq!(edits.len(), 2);
    assert!(edits.iter().all(|(_, _, embeds)| *embeds == 1));
}

#[tokio::test]
async fn missing_message_clears_the_stored_id_for_republish() {
    let repo = test_repo();
    let gateway = RecordingGateway::new();
    let refresher = Refresher::new();
    publish(&repo, 10, "a", 100).await;
    publish(&repo, 10, "b", 101).await;
    gateway.mark_missing(101).await;

    // Fetch pass: the dead id is dropped immediately.
    refresher
        .tick(&repo, &gateway, EDIT_TIMEOUT, Utc::now())
        .await
        .unwrap();
    let rows = repo.all_servers(&ServerFilter::channel(10)).await.unwrap();
    let b = rows.iter().find(|r| r.address == "b").unwrap();
    assert_eq!(b.message_id, None);
    let a = rows.iter().find(|r| r.address == "a").unwrap();
    assert_eq!(a.message_id, Some(100));

    // Edit pass: a message that 404s mid-flight is also cleared.
    gateway.mark_missing(100).await;
    refresher
        .tick(&repo, &gateway, EDIT_TIMEOUT, Utc::now())
        .await
        .unwrap();
    let rows = repo.all_servers(&ServerFilter::channel(10)).await.unwrap();
    assert!(rows.iter().all(|r| r.message_id.is_none()));
    assert_eq!(refresher.cached_messages().await, 0);
}

#[tokio::test]
async fn grouped_servers_share_one_edit() {
    let repo = test_repo();
    let gateway = RecordingGateway::new();
    let refresher = Refresher::new();
    // Two rows published onto the same message.
    publish(&repo, 10, "a", 100).await;
    publish(&repo, 10, "b", 100).await;

    refresher
        .tick(&repo, &gateway, EDIT_TIMEOUT, Utc::now())
        .await
        .unwrap();
    refresher
        .tick(&repo, &gateway, EDIT_TIMEOUT, Utc::now())
        .await
        .unwrap();

    let edits = gateway.edits.lock().await;
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0], (10, 100, 2));
}

#[tokio::test]
async fn resend_packs_ten_embeds_per_message() {
    let repo = test_repo();
    let gateway = RecordingGateway::new();
    let refresher = Refresher::new();
    for index in 0..12 {
        repo.add_server(&seed_server(10, &format!("server-{index:02}")))
            .await
            .unwrap();
    }

    refresher
        .resend_channel(&repo, &gateway, 10, Utc::now())
        .await
        .unwrap();

    assert_eq!(*gateway.purges.lock().await, vec![10]);
    let sends = gateway.sends.lock().await;
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[0], (10, 10));
    assert_eq!(sends[1], (10, 2));

    // Every row in a chunk records the same fresh message id.
    let rows = repo.all_servers(&ServerFilter::channel(10)).await.unwrap();
    assert!(rows.iter().all(|r| r.message_id.is_some()));
    let first_chunk_id = rows[0].message_id;
    assert!(rows[..10].iter().all(|r| r.message_id == first_chunk_id));
    assert_ne!(rows[10].message_id, first_chunk_id);
}

#[tokio::test]
async fn resend_isolates_standalone_styles() {
    let repo = test_repo();
    let gateway = RecordingGateway::new();
    let refresher = Refresher::new();
    for (address, style) in [("a", "medium"), ("b", "large"), ("c", "medium")] {
        let mut server = seed_server(10, address);
        server.style_id = style.to_owned();
        repo.add_server(&server).await.unwrap();
    }

    refresher
        .resend_channel(&repo, &gateway, 10, Utc::now())
        .await
        .unwrap();

    let sends = gateway.sends.lock().await;
    let embed_counts: Vec<usize> = sends.iter().map(|(_, n)| *n).collect();
    assert_eq!(embed_counts, [1, 1, 1]);
}
