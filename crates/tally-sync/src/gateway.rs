//! # Remote Gateway
//!
//! The seam between the sync engine and whatever holds the remote copy of
//! the collections.
//!
//! ```text
//! SyncDriver ──fetch_all()──────────────► RemoteSnapshot { products, bills }
//! PushQueue  ──push_rows(kind, rows, mode)► PushAck
//! SyncDriver ──delete_all(kind)──────────► PushAck
//! ```
//!
//! Rows cross this boundary untyped (`RawRow`). Mapping to records happens
//! in `tally_core::rows` on the caller's side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use tally_core::rows::RawRow;

use crate::error::SyncResult;

/// Which remote sheet a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Products,
    Bills,
}

impl RecordKind {
    /// Wire name of the sheet.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Products => "products",
            RecordKind::Bills => "bills",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How pushed rows are applied remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMode {
    /// Add rows at the end of the sheet.
    Append,
    /// Replace rows with the same `Id`, append the rest.
    Upsert,
    /// Remove rows with these `Id`s. Rows are not sent.
    Delete { ids: Vec<String> },
}

impl PushMode {
    /// Wire `action`, absent for a plain append.
    pub fn action(&self) -> Option<&'static str> {
        match self {
            PushMode::Append => None,
            PushMode::Upsert => Some("upsert"),
            PushMode::Delete { .. } => Some("delete"),
        }
    }
}

impl fmt::Display for PushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action().unwrap_or("append"))
    }
}

/// Everything the remote holds, as untyped rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    pub products: Vec<RawRow>,
    pub bills: Vec<RawRow>,
}

/// Remote acknowledgement of a write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushAck {
    /// Rows (or ids) the request carried.
    pub sent: usize,
}

/// Remote storage for the Products and Bills collections.
///
/// Implementations own their timeouts. Every call resolves or fails in
/// bounded time.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Reads both sheets in one request.
    async fn fetch_all(&self) -> SyncResult<RemoteSnapshot>;

    /// Writes rows to one sheet.
    async fn push_rows(
        &self,
        kind: RecordKind,
        rows: Vec<RawRow>,
        mode: PushMode,
    ) -> SyncResult<PushAck>;

    /// Removes every row from one sheet.
    async fn delete_all(&self, kind: RecordKind) -> SyncResult<PushAck>;
}
