use alertbot::bots::{BotsRegistry, BotsScheduler};
use alertbot::config::Config;
use alertbot::logger::{self, LogTag};
use alertbot::positions::{PositionLocks, PositionsStore};
use alertbot::strategies::spawn_continuation_sweep;
use alertbot::trend::{TrendService, TrendStore};
use alertbot::volume::VolumeUpService;
use alertbot::webserver::{start_server, AppState};
use alertbot::{arguments, shutdown};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<()> {
    let args = arguments::parse();
    logger::init(&args.debug, args.verbose);
    logger::info(LogTag::System, "Starting alertbot");

    shutdown::install_ctrlc_handler();

    let config = Config::load(&args.config)?;
    let port = args.port.unwrap_or(config.server.port);

    // both stores share one database file
    let conn = Connection::open(&config.database.path)
        .with_context(|| format!("Failed to open database {}", config.database.path))?;
    let conn = Arc::new(Mutex::new(conn));

    let positions = Arc::new(PositionsStore::new(Arc::clone(&conn)));
    positions.init().await.context("positions schema")?;
    let trend_store = Arc::new(TrendStore::new(conn));
    trend_store.init().await.context("trend schema")?;

    let trend = Arc::new(TrendService::new(trend_store));
    let volume = Arc::new(VolumeUpService::new());
    let locks = Arc::new(PositionLocks::new());

    let registry = Arc::new(BotsRegistry::init_from_config(
        &config,
        Arc::clone(&positions),
        Arc::clone(&volume),
        Arc::clone(&trend),
        Arc::clone(&locks),
    ));
    if registry.is_empty() {
        logger::warning(
            LogTag::System,
            "No bots registered - alerts will be accepted but nothing will trade",
        );
    }

    // background jobs: cache eviction, continuation sweep, trend reports
    Arc::clone(&volume).spawn_cleanup_task();
    spawn_continuation_sweep(
        Arc::clone(&registry),
        Arc::clone(&positions),
        Arc::clone(&locks),
    );
    BotsScheduler::new(Arc::clone(&registry)).start();

    let state = Arc::new(AppState::new(registry, trend, volume));
    if let Err(e) = start_server(state, &config.server.host, port).await {
        logger::error(LogTag::System, &e);
        anyhow::bail!(e);
    }

    logger::info(LogTag::System, "Shutdown complete");
    Ok(())
}
