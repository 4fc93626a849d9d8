//! Repository contract tests against the in-memory sqlite backend.

mod support;

use std::collections::BTreeMap;

use gsm_probe::Probe;
use monitor::repo::{
    sqlite::SqliteRepo, DeleteFilter, MoveDirection, RepoError, Repository, ServerFilter,
};
use monitor::server::Server;
use support::seed_server;

fn repo() -> Repository {
    Repository::Sqlite(SqliteRepo::open_in_memory(1000).expect("in-memory sqlite"))
}

fn server_at(channel_id: i64, address: &str) -> Server {
    seed_server(channel_id, address)
}

#[tokio::test]
async fn add_assigns_contiguous_positions_per_channel() {
    let repo = repo();
    let a = repo.add_server(&server_at(10, "a")).await.unwrap();
    let b = repo.add_server(&server_at(10, "b")).await.unwrap();
    let other = repo.add_server(&server_at(20, "a")).await.unwrap();

    assert_eq!(a.position, 0);
    assert_eq!(b.position, 1);
    assert_eq!(other.position, 0);
    assert!(a.id != b.id);
}

#[tokio::test]
async fn duplicate_add_in_a_channel_is_a_conflict() {
    let repo = repo();
    repo.add_server(&server_at(10, "a")).await.unwrap();
    assert!(matches!(
        repo.add_server(&server_at(10, "a")).await,
        Err(RepoError::Conflict(_))
    ));
    // The same endpoint in another channel is fine.
    assert!(repo.add_server(&server_at(11, "a")).await.is_ok());
}

#[tokio::test]
async fn find_server_round_trips_the_row() {
    let repo = repo();
    let mut seed = server_at(10, "play.example.com");
    seed.query_extra
        .insert("_token".to_owned(), "secret".to_owned());
    seed.style_data
        .insert("locale".to_owned(), "en-US".to_owned());
    let added = repo.add_server(&seed).await.unwrap();

    let found = repo
        .find_server(10, "play.example.com", 27015)
        .await
        .unwrap();
    assert_eq!(found, added);
    assert_eq!(found.query_extra.get("_token").unwrap(), "secret");

    assert!(matches!(
        repo.find_server(10, "missing.example.com", 27015).await,
        Err(RepoError::NotFound)
    ));
}

#[tokio::test]
async fn update_servers_propagates_to_every_duplicate_row() {
    let repo = repo();
    repo.add_server(&server_at(10, "shared")).await.unwrap();
    repo.add_server(&server_at(20, "shared")).await.unwrap();
    repo.add_server(&server_at(10, "other")).await.unwrap();

    let mut update = server_at(0, "shared");
    update.status = false;
    update.result = Probe {
        name: "went down".to_owned(),
        ..Probe::default()
    };
    repo.update_servers(&[update]).await.unwrap();

    let rows = repo.all_servers(&ServerFilter::all()).await.unwrap();
    let shared: Vec<&Server> = rows.iter().filter(|r| r.address == "shared").collect();
    assert_eq!(shared.len(), 2);
    assert!(shared.iter().all(|r| !r.status));
    assert!(shared.iter().all(|r| r.result.name == "went down"));
    let other = rows.iter().find(|r| r.address == "other").unwrap();
    assert!(other.status);
}

#[tokio::test]
async fn swap_exchanges_position_and_message_id() {
    let repo = repo();
    let a = repo.add_server(&server_at(10, "a")).await.unwrap();
    let b = repo.add_server(&server_at(10, "b")).await.unwrap();
    let c = repo.add_server(&server_at(10, "c")).await.unwrap();

    // Publish messages 100/101/102 on the three lines.
    let mut rows = vec![a.clone(), b.clone(), c.clone()];
    for (row, message_id) in rows.iter_mut().zip([100i64, 101, 102]) {
        row.message_id = Some(message_id);
    }
    repo.update_servers_message_id(&rows).await.unwrap();

    let b = repo.find_server(10, "b", 27015).await.unwrap();
    let diff = repo.move_server(&b, MoveDirection::Up).await.unwrap();
    assert_eq!(diff.len(), 2);

    let after = repo.all_servers(&ServerFilter::channel(10)).await.unwrap();
    let by_address: BTreeMap<&str, &Server> =
        after.iter().map(|s| (s.address.as_str(), s)).collect();

    // B moved to the top line and now edits message 100; A slid down with 101.
    assert_eq!(by_address["b"].position, 0);
    assert_eq!(by_address["b"].message_id, Some(100));
    assert_eq!(by_address["a"].position, 1);
    assert_eq!(by_address["a"].message_id, Some(101));
    assert_eq!(by_address["c"].position, 2);
    assert_eq!(by_address["c"].message_id, Some(102));

    // The multiset of (position, message_id) pairs is preserved.
    let mut pairs: Vec<(i32, Option<i64>)> =
        after.iter().map(|s| (s.position, s.message_id)).collect();
    pairs.sort_unstable();
    assert_eq!(pairs, [(0, Some(100)), (1, Some(101)), (2, Some(102))]);
}

#[tokio::test]
async fn moves_at_the_boundaries_are_no_ops() {
    let repo = repo();
    let a = repo.add_server(&server_at(10, "a")).await.unwrap();
    let b = repo.add_server(&server_at(10, "b")).await.unwrap();
    let mut rows = vec![a.clone(), b.clone()];
    for (row, message_id) in rows.iter_mut().zip([100i64, 101]) {
        row.message_id = Some(message_id);
    }
    repo.update_servers_message_id(&rows).await.unwrap();

    let top = repo.find_server(10, "a", 27015).await.unwrap();
    assert!(repo.move_server(&top, MoveDirection::Up).await.unwrap().is_empty());
    let bottom = repo.find_server(10, "b", 27015).await.unwrap();
    assert!(repo
        .move_server(&bottom, MoveDirection::Down)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn moves_with_unpublished_messages_are_no_ops() {
    let repo = repo();
    repo.add_server(&server_at(10, "a")).await.unwrap();
    let b = repo.add_server(&server_at(10, "b")).await.unwrap();
    // Neither row has a message id yet.
    assert!(repo.move_server(&b, MoveDirection::Up).await.unwrap().is_empty());
}

#[tokio::test]
async fn move_to_channel_appends_at_the_destination_tail() {
    let repo = repo();
    repo.add_server(&server_at(20, "existing")).await.unwrap();
    let a = repo.add_server(&server_at(10, "a")).await.unwrap();

    repo.move_servers_to_channel(&[a.clone()], 20).await.unwrap();

    let moved = repo.find_server(20, "a", 27015).await.unwrap();
    assert_eq!(moved.channel_id, 20);
    assert_eq!(moved.position, 1);
    assert!(matches!(
        repo.find_server(10, "a", 27015).await,
        Err(RepoError::NotFound)
    ));
}

#[tokio::test]
async fn distinct_servers_collapses_duplicates() {
    let repo = repo();
    repo.add_server(&server_at(10, "shared")).await.unwrap();
    repo.add_server(&server_at(20, "shared")).await.unwrap();
    repo.add_server(&server_at(10, "solo")).await.unwrap();

    let distinct = repo.distinct_servers().await.unwrap();
    assert_eq!(distinct.len(), 2);
}

#[tokio::test]
async fn statistics_counts_distinct_dimensions() {
    let repo = repo();
    let mut one = server_at(10, "shared");
    one.guild_id = 1;
    let mut two = server_at(20, "shared");
    two.guild_id = 1;
    let mut three = server_at(20, "solo");
    three.guild_id = 2;
    for server in [&one, &two, &three] {
        repo.add_server(server).await.unwrap();
    }

    let stats = repo.statistics().await.unwrap();
    assert_eq!(stats.channels, 2);
    assert_eq!(stats.guilds, 2);
    assert_eq!(stats.unique_servers, 2);
}

#[tokio::test]
async fn delete_filters_cascade_correctly() {
    let repo = repo();
    let mut guild_one = server_at(10, "a");
    guild_one.guild_id = 1;
    let mut guild_two = server_at(20, "b");
    guild_two.guild_id = 2;
    let mut guild_two_other = server_at(30, "c");
    guild_two_other.guild_id = 2;
    for server in [&guild_one, &guild_two, &guild_two_other] {
        repo.add_server(server).await.unwrap();
    }

    repo.delete_servers(&DeleteFilter::Guild(2)).await.unwrap();
    let rows = repo.all_servers(&ServerFilter::all()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].guild_id, 1);

    repo.delete_servers(&DeleteFilter::Channel(10)).await.unwrap();
    assert!(repo.all_servers(&ServerFilter::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn metrics_ring_prunes_to_the_limit() {
    let repo = Repository::Sqlite(SqliteRepo::open_in_memory(3).expect("in-memory sqlite"));
    let added = repo.add_server(&server_at(10, "a")).await.unwrap();

    for captured_at in 0..6 {
        repo.update_metrics(std::slice::from_ref(&added), captured_at)
            .await
            .unwrap();
    }

    let samples = repo.metric_samples(&added).await.unwrap();
    assert_eq!(samples.len(), 3);
    let times: Vec<i64> = samples.iter().map(|s| s.captured_at).collect();
    assert_eq!(times, [3, 4, 5]);
}

#[tokio::test]
async fn game_filter_orders_by_id() {
    let repo = repo();
    repo.add_server(&server_at(10, "b")).await.unwrap();
    repo.add_server(&server_at(20, "a")).await.unwrap();

    let rows = repo
        .all_servers(&ServerFilter::game("css"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].id < rows[1].id);
}
