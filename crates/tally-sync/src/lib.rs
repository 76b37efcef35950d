//! # tally-sync: Sync Engine for Tally
//!
//! Keeps the local Record Store and the remote spreadsheet in step. The
//! local store is the source of truth for everything the sheet cannot
//! hold (line items, tax), the sheet wins for catalogue fields, and
//! nothing local is ever dropped because the remote has not seen it yet.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncDriver (Main Orchestrator)                   │  │
//! │  │                                                                  │  │
//! │  │  sync_now(): fetch → map → merge → persist → queue pushes        │  │
//! │  │  record_sale / add / update / delete product / clear_bills       │  │
//! │  └───────────┬──────────────────────────┬───────────────────────────┘  │
//! │              │                          │                               │
//! │              ▼                          ▼                               │
//! │  ┌────────────────────────┐  ┌────────────────────────────────────┐    │
//! │  │ tally-db::Database     │  │ PushQueue                          │    │
//! │  │ products() / bills()   │  │ one worker task, unbounded channel │    │
//! │  │ update_all = 1 locked  │  │ failures → emit_push_failed        │    │
//! │  │ read + 1 write         │  └─────────────────┬──────────────────┘    │
//! │  └────────────────────────┘                    │                       │
//! │                                                ▼                       │
//! │                              ┌────────────────────────────────────┐    │
//! │                              │ RemoteGateway (trait)              │    │
//! │                              │ SheetsGateway: reqwest, JSON       │    │
//! │                              └────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Sync configuration (device, remote, interval, db path)
//! - [`driver`] - `SyncDriver`, status, emitter trait, background loop
//! - [`error`] - Sync error types
//! - [`gateway`] - `RemoteGateway` trait and wire-neutral types
//! - [`push`] - Fire-and-forget push queue
//! - [`sheets`] - HTTP gateway for the spreadsheet web app
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_sync::{SyncConfig, SyncDriverBuilder};
//! use tally_db::{Database, DbConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//!
//! let driver = SyncDriverBuilder::new(config).with_database(db).build()?;
//! let handle = driver.spawn();
//!
//! let bill = handle.driver().record_sale(draft).await?;
//! handle.trigger();
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod push;
pub mod sheets;

#[cfg(test)]
pub(crate) mod testing;

pub use config::SyncConfig;
pub use driver::{
    NoOpEmitter, SyncDriver, SyncDriverBuilder, SyncDriverHandle, SyncEventEmitter, SyncOutcome,
    SyncReport, SyncState, SyncStatus,
};
pub use error::{SyncError, SyncResult};
pub use gateway::{PushAck, PushMode, RecordKind, RemoteGateway, RemoteSnapshot};
pub use push::{PushJob, PushQueue, PushQueueHandle};
pub use sheets::SheetsGateway;
