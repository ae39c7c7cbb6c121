//! LevelUp engine service.
//!
//! Wires the progress store, level curve and progression engine to the
//! chat gateway over NATS, and keeps the store flushed until shutdown.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `levelup-config.yaml` (or `LEVELUP_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the level curve
//! 4. Open the progress store
//! 5. Connect to NATS and create the reward dispatcher
//! 6. Start the engine (level reconciliation, cooldown seeding)
//! 7. Spawn the pending-flush task
//! 8. Run the NATS bridge until it ends or Ctrl-C arrives
//! 9. Flush any pending state

mod error;
mod nats_bridge;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use levelup_core::config::{LogFormat, LoggingConfig};
use levelup_core::{EngineConfig, EngineOptions, ProgressionEngine};
use levelup_store::ProgressStore;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ServiceError;
use crate::nats_bridge::{NatsBridge, NatsRewardDispatcher};

/// Environment variable naming the configuration file.
const ENV_CONFIG_PATH: &str = "LEVELUP_CONFIG";

/// Configuration file used when `LEVELUP_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "levelup-config.yaml";

/// Application entry point for the engine service.
///
/// # Errors
///
/// Returns an error if any initialization step fails or the bridge loses
/// its subscriptions.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::var(ENV_CONFIG_PATH)
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = EngineConfig::load(&config_path).map_err(ServiceError::from)?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        config_path = %config_path.display(),
        store_path = %config.store.path.display(),
        in_memory = config.store.in_memory,
        nats_url = config.nats.url,
        subject_prefix = config.nats.subject_prefix,
        "levelup-engine starting"
    );

    // 3. Build the level curve.
    let curve = config.leveling.curve.build().map_err(ServiceError::from)?;
    info!(curve = ?config.leveling.curve, "Level curve configured");

    // 4. Open the progress store.
    let store = Arc::new(
        ProgressStore::open(config.store_options())
            .await
            .map_err(ServiceError::from)?,
    );
    let stats = store.stats().await;
    info!(guilds = stats.guilds, members = stats.members, "Progress store opened");

    // 5. Connect to NATS.
    let client = async_nats::connect(&config.nats.url)
        .await
        .map_err(|e| ServiceError::Nats {
            message: format!("failed to connect to NATS at {}: {e}", config.nats.url),
        })?;
    info!("NATS connected");
    let dispatcher = NatsRewardDispatcher::new(
        client.clone(),
        config.nats.subject_prefix.clone(),
        Duration::from_millis(config.nats.dispatch_timeout_ms),
    );

    // 6. Start the engine.
    let engine = Arc::new(
        ProgressionEngine::start(
            Arc::clone(&store),
            curve,
            dispatcher,
            EngineOptions::from_config(&config.leveling),
        )
        .await,
    );

    // 7. Retry failed flushes in the background.
    let flusher = spawn_pending_flush(
        Arc::clone(&store),
        Duration::from_secs(config.store.dirty_flush_interval_secs.max(1)),
    );

    // 8. Run the bridge.
    let bridge = NatsBridge::new(client, engine, config.nats.subject_prefix.clone());
    tokio::select! {
        result = bridge.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
    }
    flusher.abort();

    // 9. Final flush.
    match store.flush_pending().await {
        Ok(true) => info!("Pending progress written before shutdown"),
        Ok(false) => {}
        Err(e) => error!(error = %e, "Progress could not be written before shutdown"),
    }

    info!("levelup-engine shutdown complete");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Periodically retry writing state that failed to reach disk.
fn spawn_pending_flush(store: Arc<ProgressStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = store.flush_pending().await {
                warn!(error = %e, "Pending progress flush failed, will retry");
            }
        }
    })
}
