//! Read-only HTTP surface tests, including the secret-filter boundary.

mod support;

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;

use monitor::http::{router, ApiState};
use monitor::repo::{sqlite::SqliteRepo, Repository};
use support::seed_server;

async fn spawn_api(repo: Arc<Repository>) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let state = ApiState {
        repo,
        catalog: Arc::new(gsm_catalog::GameCatalog::load().expect("embedded catalog")),
        invite_link: Some("https://discord.com/api/oauth2/authorize?client_id=1".to_owned()),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    let handle = tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("serve test app");
    });
    (addr, handle)
}

fn test_repo() -> Arc<Repository> {
    Arc::new(Repository::Sqlite(
        SqliteRepo::open_in_memory(1000).expect("in-memory sqlite"),
    ))
}

async fn get_json(addr: SocketAddr, path: &str) -> Value {
    reqwest::get(format!("http://{addr}{path}"))
        .await
        .expect("request")
        .error_for_status()
        .expect("status")
        .json()
        .await
        .expect("json body")
}

#[tokio::test]
async fn secret_keys_never_cross_the_http_boundary() {
    let repo = test_repo();
    let mut server = seed_server(42, "ts.example.com");
    server.game_id = "teamspeak3".to_owned();
    server
        .query_extra
        .insert("_token".to_owned(), "xyz".to_owned());
    server
        .query_extra
        .insert("voice_port".to_owned(), "9987".to_owned());
    server.style_data.insert(
        "_alert_webhook_url".to_owned(),
        "https://hooks.example/x".to_owned(),
    );
    server
        .style_data
        .insert("description".to_owned(), "my desc".to_owned());
    server
        .style_data
        .insert("locale".to_owned(), "en-US".to_owned());
    repo.add_server(&server).await.unwrap();

    let (addr, handle) = spawn_api(repo).await;

    for path in ["/api/v1/channels/42", "/api/v1/servers/teamspeak3"] {
        let body = get_json(addr, path).await;
        let rows = body.as_array().expect("server list");
        assert_eq!(rows.len(), 1, "{path}");
        let row = &rows[0];
        assert_eq!(row["query_extra"], serde_json::json!({ "voice_port": "9987" }));
        assert_eq!(row["style_data"], serde_json::json!({ "locale": "en-US" }));
        let text = row.to_string();
        assert!(!text.contains("xyz"), "secret token leaked via {path}");
        assert!(!text.contains("my desc"), "description leaked via {path}");
    }

    handle.abort();
}

#[tokio::test]
async fn games_and_environment_endpoints_self_describe() {
    let (addr, handle) = spawn_api(test_repo()).await;

    let games = get_json(addr, "/api/v1/games").await;
    let games = games.as_array().expect("game list");
    assert!(games.len() > 50);
    assert!(games
        .iter()
        .any(|g| g["id"] == "css" && g["protocol"] == "source"));

    let variables = get_json(addr, "/api/v1/environment-variables").await;
    let variables = variables.as_array().expect("variable list");
    assert!(variables
        .iter()
        .any(|v| v["name"] == "APP_TOKEN" && v["required"] == true));
    assert!(variables.iter().any(|v| v["name"] == "TASK_QUERY_SERVER"));

    let commands = get_json(addr, "/api/v1/commands").await;
    assert!(commands
        .as_array()
        .expect("command list")
        .iter()
        .any(|c| c["name"] == "addserver"));

    handle.abort();
}

#[tokio::test]
async fn info_reports_statistics_and_counts_group_by_dimension() {
    let repo = test_repo();
    repo.add_server(&seed_server(10, "a")).await.unwrap();
    repo.add_server(&seed_server(10, "b")).await.unwrap();
    repo.add_server(&seed_server(20, "a")).await.unwrap();
    let (addr, handle) = spawn_api(repo).await;

    let info = get_json(addr, "/api/v1/info").await;
    assert_eq!(info["statistics"]["channels"], 2);
    assert_eq!(info["statistics"]["unique_servers"], 2);
    assert!(info["invite_link"].as_str().unwrap().contains("client_id"));

    let per_game = get_json(addr, "/api/v1/servers").await;
    assert_eq!(per_game["css"], 3);

    let per_channel = get_json(addr, "/api/v1/channels").await;
    assert_eq!(per_channel["10"], 2);
    assert_eq!(per_channel["20"], 1);

    handle.abort();
}

#[tokio::test]
async fn unknown_game_id_is_a_not_found_envelope() {
    let (addr, handle) = spawn_api(test_repo()).await;

    let resp = reqwest::get(format!("http://{addr}/api/v1/servers/not-a-game"))
        .await
        .expect("request");
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.expect("error envelope");
    assert_eq!(body["code"], "NOT_FOUND");

    handle.abort();
}
