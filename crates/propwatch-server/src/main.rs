use anyhow::Result;
use propwatch_notify::plugin::ChannelRegistry;
use propwatch_notify::{Dispatcher, RetryPolicy};
use propwatch_storage::memory::MemoryStore;
use propwatch_storage::sqlite::SqliteStore;
use propwatch_storage::{DeliveryLogStore, RuleStore, Store, TemplateStore};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use propwatch_server::app;
use propwatch_server::config::ServerConfig;
use propwatch_server::scheduler::RuleScheduler;
use propwatch_server::seed;
use propwatch_server::service::{RuleService, TemplateService};
use propwatch_server::state::{build_channels, AppState};

/// Delivery logs re-applied to statistics at startup.
const STARTUP_REPLAY_LIMIT: usize = 10_000;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  propwatch-server [config.toml]                            Start the server");
    eprintln!("  propwatch-server init-rules <config.toml> <seed.json>     Load alert rules from a seed file");
    eprintln!("  propwatch-server init-templates <config.toml> <seed.json> Load message templates from a seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install default CryptoProvider: {e:?}"))?;

    propwatch_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("propwatch=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some(cmd @ ("init-rules" | "init-templates")) => {
            let (Some(config_path), Some(seed_path)) = (args.get(2), args.get(3)) else {
                print_usage();
                return Err(anyhow::anyhow!(
                    "{cmd} requires <config.toml> and <seed.json> arguments"
                ));
            };
            run_seed(cmd, config_path, seed_path)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

fn open_sqlite(config: &ServerConfig) -> Result<Arc<SqliteStore>> {
    if config.database_path.is_empty() {
        return Err(anyhow::anyhow!(
            "database_path is empty; seeding an in-memory store has no effect"
        ));
    }
    Ok(Arc::new(SqliteStore::open(Path::new(&config.database_path))?))
}

fn run_seed(cmd: &str, config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_sqlite(&config)?;

    let summary = if cmd == "init-rules" {
        let rules: Arc<dyn RuleStore> = store;
        seed::seed_rules_from_file(&RuleService::new(rules), seed_path)?
    } else {
        let templates: Arc<dyn TemplateStore> = store.clone();
        let logs: Arc<dyn DeliveryLogStore> = store;
        let dispatcher = Arc::new(Dispatcher::new(Vec::new(), logs, RetryPolicy::default()));
        seed::seed_templates_from_file(&TemplateService::new(templates, dispatcher), seed_path)?
    };

    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        "{cmd} completed"
    );
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = if Path::new(config_path).exists() {
        ServerConfig::load(config_path)?
    } else {
        tracing::warn!(path = config_path, "Config file not found, using defaults");
        ServerConfig::default()
    };

    let database = if config.database_path.is_empty() {
        "memory"
    } else {
        config.database_path.as_str()
    };
    tracing::info!(
        http_port = config.http_port,
        database,
        "propwatch-server starting"
    );

    let registry = ChannelRegistry::default();
    let (channels, channel_info) = build_channels(&config, &registry)?;
    if channels.is_empty() {
        tracing::warn!("No notification channels configured; alerts will not be delivered");
    }

    if config.database_path.is_empty() {
        serve(config, Arc::new(MemoryStore::new()), channels, channel_info).await
    } else {
        let store = open_sqlite(&config)?;
        serve(config, store, channels, channel_info).await
    }
}

async fn serve<S: Store + 'static>(
    config: ServerConfig,
    store: Arc<S>,
    channels: Vec<Arc<dyn propwatch_notify::NotificationChannel>>,
    channel_info: Vec<propwatch_server::state::ChannelInfo>,
) -> Result<()> {
    let recent = store.list_logs(STARTUP_REPLAY_LIMIT)?;
    let scheduler_config = config.scheduler.clone();
    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;

    let state = AppState::build(config, store, channels, channel_info);

    // No worker has picked up a job yet, so anything still pending was cut
    // off by the previous shutdown.
    match state.dispatcher.fail_interrupted(&recent) {
        Ok(n) if n > 0 => tracing::warn!(logs = n, "Interrupted deliveries marked failed"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Failed to close interrupted deliveries"),
    }

    // Heals counters if the process stopped between a log update and its
    // statistics write.
    match state.dispatcher.statistics().replay(&recent) {
        Ok(n) if n > 0 => tracing::info!(logs = n, "Delivery statistics replayed"),
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Statistics replay failed"),
    }

    let scheduler_handle = if scheduler_config.enabled {
        let scheduler = RuleScheduler::new(
            state.rule_store.clone(),
            state.pipeline.clone(),
            scheduler_config.tick_secs,
            scheduler_config.max_concurrent,
        );
        Some(tokio::spawn(async move {
            scheduler.run().await;
        }))
    } else {
        tracing::info!("Rule scheduler disabled");
        None
    };

    let queue = state.queue.clone();
    let app = app::build_http_app(state);
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "Server started");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
            tracing::info!("Shutting down gracefully");
        })
        .await;
    if let Err(e) = result {
        tracing::error!(error = %e, "HTTP server error");
    }

    if let Some(h) = scheduler_handle {
        h.abort();
    }
    tracing::info!("Draining delivery queue");
    queue.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}
