//! # Tally Agent
//!
//! Long-running process that keeps the local store and the remote sheet
//! reconciled.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Agent Startup                                     │
//! │                                                                         │
//! │  1. Initialize Logging ──── RUST_LOG or "info,tally=debug,sqlx=warn"   │
//! │  2. Load Config ─────────── sync.toml (written on first run), TALLY_*  │
//! │  3. Open Database ───────── create file, WAL, run migrations           │
//! │  4. Build Driver ────────── SheetsGateway + push queue                 │
//! │  5. Spawn Loop ──────────── first sync now, then every interval        │
//! │  6. Wait for Signal ─────── Ctrl+C / SIGTERM                           │
//! │  7. Shutdown ────────────── finish current cycle, drain pushes, close  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```text
//! tally-agent [path/to/sync.toml]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tally_db::{Database, DbConfig};
use tally_sync::{
    PushJob, SyncConfig, SyncDriverBuilder, SyncError, SyncEventEmitter, SyncStatus,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = SyncConfig::load_or_init(config_path).map_err(report_startup_error)?;
    info!(
        device_id = %config.device_id(),
        device_name = %config.device.name,
        remote = config.remote_url().unwrap_or("<none>"),
        "Configuration loaded"
    );

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(DbConfig::new(db_path)).await?;

    let driver = SyncDriverBuilder::new(config)
        .with_database(db.clone())
        .with_emitter(Arc::new(LogEmitter))
        .build()
        .map_err(report_startup_error)?;
    let handle = driver.spawn();

    shutdown_signal().await;

    handle.shutdown().await;
    match db.dashboard_stats().await {
        Ok(stats) => info!(
            today_revenue = %stats.today_revenue,
            today_bills = stats.today_bills,
            total_products = stats.total_products,
            low_stock = stats.low_stock,
            "Final dashboard snapshot"
        ),
        Err(e) => warn!(error = %e, "Could not compute dashboard stats"),
    }
    db.close().await;

    info!("Agent shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=tally_sync=trace` - Trace the sync engine only
/// - Default: `info,tally=debug,sqlx=warn`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tally=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Logs a startup failure, pointing config problems at their source.
fn report_startup_error(e: SyncError) -> SyncError {
    if e.is_config_error() {
        error!(error = %e, "Invalid configuration; check sync.toml and TALLY_* variables");
    } else {
        error!(error = %e, "Agent failed to start");
    }
    e
}

/// Routes sync events to the log.
struct LogEmitter;

impl SyncEventEmitter for LogEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        info!(
            state = ?status.state,
            products = status.products,
            bills = status.bills,
            last_sync = ?status.last_sync,
            "Sync status"
        );
    }

    fn emit_push_failed(&self, job: &PushJob, error: &SyncError) {
        warn!(
            kind = %job.kind,
            mode = %job.mode,
            rows = job.rows.len(),
            error = %error,
            "Push not accepted by remote"
        );
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        error!(retryable, "Sync error: {}", message);
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
