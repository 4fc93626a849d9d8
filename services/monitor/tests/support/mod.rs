//! Shared fixtures for the integration suites: a scripted prober and a
//! recording chat gateway.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use gsm_probe::{Probe, ProbeError, ProbeTarget};
use monitor::config::Config;
use monitor::gateway::{ChatGateway, ChatMessage, GatewayError};
use monitor::refresher::Refresher;
use monitor::repo::{sqlite::SqliteRepo, Repository};
use monitor::scheduler::{Pipeline, Prober};
use monitor::server::Server;

// ---------------------------------------------------------------------------
// Scripted prober
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum ProbeOutcome {
    Up(Probe),
    Down,
}

pub struct ScriptedProber {
    script: Mutex<HashMap<String, VecDeque<ProbeOutcome>>>,
    pub probes: AtomicUsize,
    pub pre_queries: Mutex<Vec<String>>,
    pre_query_names: Vec<&'static str>,
}

pub fn target_key(target: &ProbeTarget) -> String {
    format!("{}:{}:{}", target.game_id, target.address, target.query_port)
}

impl ScriptedProber {
    pub fn new() -> Self {
        ScriptedProber {
            script: Mutex::new(HashMap::new()),
            probes: AtomicUsize::new(0),
            pre_queries: Mutex::new(Vec::new()),
            pre_query_names: Vec::new(),
        }
    }

    /// Queue outcomes for one endpoint; the final outcome repeats forever.
    pub async fn script(&self, key: &str, outcomes: Vec<ProbeOutcome>) {
        self.script
            .lock()
            .await
            .insert(key.to_owned(), outcomes.into());
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    fn pre_query_names(&self) -> Vec<&'static str> {
        self.pre_query_names.clone()
    }

    async fn pre_query(&self, strategy: &str) -> Result<(), ProbeError> {
        self.pre_queries.lock().await.push(strategy.to_owned());
        Ok(())
    }

    async fn probe(&self, target: &ProbeTarget) -> Result<Probe, ProbeError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let key = target_key(target);
        let mut script = self.script.lock().await;
        let Some(queue) = script.get_mut(&key) else {
            return Err(ProbeError::ServerNotFound);
        };
        let outcome = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match outcome {
            Some(ProbeOutcome::Up(probe)) => Ok(probe),
            Some(ProbeOutcome::Down) | None => {
                Err(ProbeError::Transport("scripted failure".to_owned()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Recording gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingGateway {
    pub webhooks: Mutex<Vec<(String, Option<String>, Value)>>,
    pub edits: Mutex<Vec<(i64, i64, usize)>>,
    pub sends: Mutex<Vec<(i64, usize)>>,
    pub purges: Mutex<Vec<i64>>,
    pub presences: Mutex<Vec<(u8, String)>>,
    pub fetches: Mutex<Vec<i64>>,
    /// Message ids whose fetch/edit answers 404.
    pub missing_messages: Mutex<HashSet<i64>>,
    next_message_id: AtomicI64,
}

impl RecordingGateway {
    pub fn new() -> Self {
        RecordingGateway {
            next_message_id: AtomicI64::new(1000),
            ..RecordingGateway::default()
        }
    }

    pub async fn mark_missing(&self, message_id: i64) {
        self.missing_messages.lock().await.insert(message_id);
    }
}

#[async_trait]
impl ChatGateway for RecordingGateway {
    async fn fetch_message(
        &self,
        channel_id: i64,
        message_id: i64,
    ) -> Result<ChatMessage, GatewayError> {
        self.fetches.lock().await.push(message_id);
        if self.missing_messages.lock().await.contains(&message_id) {
            return Err(GatewayError::NotFound);
        }
        Ok(ChatMessage {
            id: message_id,
            channel_id,
        })
    }

    async fn edit_message(
        &self,
        channel_id: i64,
        message_id: i64,
        embeds: &[Value],
    ) -> Result<(), GatewayError> {
        if self.missing_messages.lock().await.contains(&message_id) {
            return Err(GatewayError::NotFound);
        }
        self.edits
            .lock()
            .await
            .push((channel_id, message_id, embeds.len()));
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: i64,
        embeds: &[Value],
    ) -> Result<ChatMessage, GatewayError> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.sends.lock().await.push((channel_id, embeds.len()));
        Ok(ChatMessage { id, channel_id })
    }

    async fn purge_channel(&self, channel_id: i64) -> Result<(), GatewayError> {
        self.purges.lock().await.push(channel_id);
        Ok(())
    }

    async fn execute_webhook(
        &self,
        url: &str,
        content: Option<&str>,
        embed: &Value,
    ) -> Result<(), GatewayError> {
        self.webhooks
            .lock()
            .await
            .push((url.to_owned(), content.map(str::to_owned), embed.clone()));
        Ok(())
    }

    async fn update_presence(&self, activity_type: u8, text: &str) -> Result<(), GatewayError> {
        self.presences
            .lock()
            .await
            .push((activity_type, text.to_owned()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assembly helpers
// ---------------------------------------------------------------------------

pub fn test_config(vars: &[(&str, &str)]) -> Arc<Config> {
    let mut map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    map.entry("APP_TOKEN".to_owned())
        .or_insert_with(|| "test-token".to_owned());
    Arc::new(Config::from_lookup(|name| map.get(name).cloned()).expect("test config"))
}

pub struct TestPipeline {
    pub pipeline: Arc<Pipeline>,
    pub repo: Arc<Repository>,
    pub gateway: Arc<RecordingGateway>,
    pub prober: Arc<ScriptedProber>,
}

pub fn build_pipeline(config: Arc<Config>) -> TestPipeline {
    build_pipeline_with_limit(config, 1000)
}

pub fn build_pipeline_with_limit(config: Arc<Config>, metrics_limit: usize) -> TestPipeline {
    let repo = Arc::new(Repository::Sqlite(
        SqliteRepo::open_in_memory(metrics_limit).expect("in-memory sqlite"),
    ));
    let gateway = Arc::new(RecordingGateway::new());
    let prober = Arc::new(ScriptedProber::new());
    let catalog = Arc::new(gsm_catalog::GameCatalog::load().expect("embedded catalog"));

    let pipeline = Arc::new(Pipeline {
        repo: Arc::clone(&repo),
        gateway: Arc::clone(&gateway) as Arc<dyn ChatGateway>,
        prober: Arc::clone(&prober) as Arc<dyn Prober>,
        refresher: Arc::new(Refresher::new()),
        config,
        catalog,
    });

    TestPipeline {
        pipeline,
        repo,
        gateway,
        prober,
    }
}

pub fn sample_probe(name: &str, numplayers: i64, maxplayers: i64) -> Probe {
    Probe {
        name: name.to_owned(),
        map: "de_dust2".to_owned(),
        password: false,
        numplayers,
        numbots: 0,
        maxplayers,
        players: Some(Vec::new()),
        bots: Some(Vec::new()),
        connect: "10.0.0.1:27015".to_owned(),
        ping_ms: 10,
        raw: Value::Null,
        ..Probe::default()
    }
}

pub fn seed_server(channel_id: i64, address: &str) -> Server {
    Server::new(
        1,
        channel_id,
        "css",
        address,
        27015,
        BTreeMap::new(),
        Probe::default(),
    )
}
