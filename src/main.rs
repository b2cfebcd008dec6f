use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use vigil_core::{BroadcastBus, LevelPolicy};
use vigil_server::RelayContext;
use vigil_settings::{load_settings, load_settings_from_path, resolve_data_path};
use vigil_store::{Database, SqliteSessionStore, SqliteUserStore};
use vigil_telemetry::{init_telemetry, TelemetryConfig};

/// Relay submission lifecycle events to authenticated WebSocket viewers.
#[derive(Debug, Parser)]
#[command(name = "vigil", version)]
struct Cli {
    /// Settings file (defaults to ~/.vigil/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,
    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
    /// Override the session/user database path.
    #[arg(long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(db) = cli.db {
        settings.store.db_path = db;
    }

    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: TelemetryConfig::parse_level(&settings.logging.level),
        module_levels: Vec::new(),
        json: settings.logging.json,
        log_to_sqlite: settings.logging.persist,
        log_db_path: resolve_data_path(&settings.logging.db_path),
    });

    let db_path = resolve_data_path(&settings.store.db_path);
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;

    let policy = LevelPolicy::new(&settings.classification.levels)
        .context("invalid classification levels")?;
    let ctx = RelayContext {
        sessions: Arc::new(SqliteSessionStore::new(db.clone())),
        users: Arc::new(SqliteUserStore::new(db)),
        policy: Arc::new(policy),
        bus: Arc::new(BroadcastBus::new(settings.bus.channel_capacity)),
    };

    let handle = vigil_server::start(settings, ctx)
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.local_addr(), "vigil ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    handle.shutdown(None).await;
    Ok(())
}
