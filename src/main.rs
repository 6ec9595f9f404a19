use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use armor_veil::config::VeilConfig;
use armor_veil::metrics::{Metrics, MetricsServer};
use armor_veil::net::dedup::BroadcastCache;
use armor_veil::net::redactor::Redactor;
use armor_veil::persistence::{AutoSave, StateFile};
use armor_veil::visibility::VisibilityStore;
use armor_veil::world::queue::WorldQueue;
use armor_veil::world::World;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Armor Veil v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = VeilConfig::load_or_default();
    if let Err(e) = config.validate() {
        anyhow::bail!("Invalid configuration: {}", e);
    }
    info!(
        "Configuration loaded: state={}, refresh_delay={}ms, dedup_capacity={}",
        config.state_file.display(),
        config.refresh_delay_ms,
        config.dedup_capacity
    );

    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(VisibilityStore::new(config.visibility()));

    // Saved settings override the environment seed
    let state = Arc::new(StateFile::new(&config.state_file));
    match state.load(&store) {
        Ok(loaded) => info!("Loaded {} players from {}", loaded, state.path().display()),
        Err(e) => error!("Failed to load {}: {}", state.path().display(), e),
    }

    let (autosave, _autosave_task) = AutoSave::spawn(
        state.clone(),
        store.clone(),
        Duration::from_millis(config.save_debounce_ms),
        metrics.clone(),
    );
    store.set_on_change(Some(Arc::new(move || autosave.request())));

    // Metrics endpoint
    let metrics_server = Arc::new(MetricsServer::new(metrics.clone(), store.clone()));
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics_server.serve(metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Redaction pipeline
    let dedup = Arc::new(BroadcastCache::new(config.dedup_capacity, metrics.clone()));
    let redactor = Arc::new(Redactor::new(store.clone(), dedup.clone(), metrics.clone()));
    let (queue, _queue_task) = WorldQueue::spawn("default");
    let world = Arc::new(World::new(queue, redactor, metrics.clone()));
    info!("World '{}' ready", world.name());

    // Drop decoded broadcasts whose packets are gone
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            dedup.sweep();
        }
    });

    // Shutdown signal handler
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = run_console(world.clone()) => {
            if let Err(e) = result {
                error!("Console error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    // Final save
    match state.save(&store) {
        Ok(count) => info!("Saved {} players", count),
        Err(e) => error!("Final save failed: {}", e),
    }
    info!("Stopped");

    Ok(())
}

/// Operator console: `<player-uuid> <hidearmor arguments>`, run with admin rights
async fn run_console(world: Arc<World>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((player, args)) = line.split_once(char::is_whitespace) else {
            warn!("Usage: <player-uuid> <hidearmor arguments>");
            continue;
        };
        let player = match Uuid::parse_str(player) {
            Ok(player) => player,
            Err(_) => {
                warn!("Invalid player id '{}'", player);
                continue;
            }
        };
        match world.run_command(player, args, true) {
            Ok(reply) => info!("{}", reply),
            Err(e) => warn!("{}", e),
        }
    }
    // Keep serving after stdin closes
    std::future::pending::<()>().await;
    Ok(())
}
