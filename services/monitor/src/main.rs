// monitor: periodic game-server probing reflected into chat messages.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use gsm_catalog::GameCatalog;
use gsm_probe::Registry;

use monitor::config::{self, Config};
use monitor::gateway::DiscordRest;
use monitor::http::{self, ApiState};
use monitor::refresher::Refresher;
use monitor::repo::{postgres::PgRepo, sqlite::SqliteRepo, Repository};
use monitor::scheduler::{self, Pipeline, RegistryProber};

const KEEPALIVE_PERIOD: Duration = Duration::from_secs(300);

fn init_tracing(debug_enabled: bool) {
    let default = if debug_enabled { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("FATAL: failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(config.app_debug);
    info!(version = env!("CARGO_PKG_VERSION"), "monitor starting");

    let catalog = match GameCatalog::load() {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!(error = %e, "failed to load the game catalog");
            std::process::exit(1);
        }
    };
    let registry = match Registry::standard(config.probe_timeout) {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "failed to build the strategy registry");
            std::process::exit(1);
        }
    };
    // Unknown protocol names in the catalog are a config error, caught now
    // rather than at probe time.
    for entry in catalog.entries() {
        if !registry.contains(&entry.protocol) {
            error!(
                game_id = %entry.id,
                protocol = %entry.protocol,
                "catalog references an unknown protocol"
            );
            std::process::exit(1);
        }
    }

    let repo = match open_repository(&config).await {
        Ok(repo) => Arc::new(repo),
        Err(e) => {
            error!(error = %e, "failed to open the server store");
            std::process::exit(1);
        }
    };

    let client = match reqwest::Client::builder()
        .user_agent(concat!("gsm-monitor/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "failed to build the http client");
            std::process::exit(1);
        }
    };
    let gateway = Arc::new(DiscordRest::new(client.clone(), config.app_token.clone()));
    let refresher = Arc::new(Refresher::new());
    let prober = Arc::new(RegistryProber::new(
        registry,
        Arc::clone(&catalog),
        config.probe_timeout,
    ));

    let pipeline = Arc::new(Pipeline {
        repo: Arc::clone(&repo),
        gateway,
        prober,
        refresher,
        config: Arc::clone(&config),
        catalog: Arc::clone(&catalog),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler::run(pipeline, shutdown_rx.clone()));

    if config.web_api_enable {
        let state = ApiState {
            repo: Arc::clone(&repo),
            catalog: Arc::clone(&catalog),
            invite_link: config::invite_link(&config.app_token),
        };
        let bind = config.web_api_bind.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&bind).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(bind = %bind, error = %e, "web api bind failed");
                    return;
                }
            };
            info!(bind = %bind, "web api listening");
            let server = axum::serve(listener, http::router(state));
            let graceful = server.with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            });
            if let Err(e) = graceful.await {
                warn!(error = %e, "web api exited with an error");
            }
        });
    }

    if let Some(app_name) = config.heroku_app_name.clone() {
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let url = format!("https://{app_name}.herokuapp.com");
            let mut interval = tokio::time::interval(KEEPALIVE_PERIOD);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                    _ = interval.tick() => {
                        match client.get(&url).send().await {
                            Ok(resp) if resp.status().is_success() => {
                                debug!(url = %url, "keepalive ping");
                            }
                            Ok(resp) => warn!(url = %url, status = %resp.status(), "keepalive ping failed"),
                            Err(e) => warn!(url = %url, error = %e, "keepalive ping failed"),
                        }
                    }
                }
            }
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!(error = %e, "failed to listen for the shutdown signal"),
    }
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    info!("monitor stopped");
}

async fn open_repository(config: &Config) -> Result<Repository, monitor::repo::RepoError> {
    if config.wants_postgres() {
        let url = config
            .database_url
            .clone()
            .unwrap_or_else(|| "postgres://localhost/monitor".to_owned());
        let repo = PgRepo::connect(
            &url,
            &config.postgres_ssl_mode,
            config.metrics_record_limit,
        )
        .await?;
        info!("connected to the postgres store");
        Ok(Repository::Postgres(repo))
    } else {
        let path = PathBuf::from("data");
        if let Err(e) = std::fs::create_dir_all(&path) {
            warn!(error = %e, "could not create the data directory");
        }
        let repo = SqliteRepo::open(&path.join("servers.db"), config.metrics_record_limit)?;
        info!("connected to the sqlite store");
        Ok(Repository::Sqlite(repo))
    }
}
