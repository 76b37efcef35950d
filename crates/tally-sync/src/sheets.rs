//! # Spreadsheet Web-App Gateway
//!
//! `RemoteGateway` over HTTP, talking to a spreadsheet script deployed as
//! a web app.
//!
//! ## Wire Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  GET  {url}                                                            │
//! │       ◄── {"ok": true, "products": [{...}], "bills": [{...}]}          │
//! │       ◄── {"ok": false, "error": "..."}                                │
//! │                                                                         │
//! │  POST {url}   Content-Type: text/plain                                 │
//! │       ──► {"type": "products", "rows": [...]}               append     │
//! │       ──► {"type": "products", "action": "upsert", "rows": [...]}      │
//! │       ──► {"type": "products", "action": "delete", "ids": [...]}       │
//! │       ──► {"type": "bills", "action": "delete_all"}                    │
//! │       ◄── {"ok": true, ...} | {"ok": false, "error": "..."}            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bodies go out as `text/plain` so the script host does not demand a CORS
//! preflight. Non-2xx statuses and `ok: false` are both errors.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use tally_core::rows::RawRow;

use crate::config::RemoteSettings;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{PushAck, PushMode, RecordKind, RemoteGateway, RemoteSnapshot};

const TEXT_PLAIN_UTF8: &str = "text/plain;charset=utf-8";
const DELETE_ALL_ACTION: &str = "delete_all";

// =============================================================================
// Wire Types
// =============================================================================

/// Response envelope shared by GET and POST.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    products: Value,
    #[serde(default)]
    bills: Value,
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<&'a [RawRow]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a [String]>,
}

impl<'a> PushRequest<'a> {
    fn new(kind: RecordKind, rows: &'a [RawRow], mode: &'a PushMode) -> Self {
        match mode {
            PushMode::Delete { ids } => PushRequest {
                kind: kind.as_str(),
                action: mode.action(),
                rows: None,
                ids: Some(ids.as_slice()),
            },
            _ => PushRequest {
                kind: kind.as_str(),
                action: mode.action(),
                rows: Some(rows),
                ids: None,
            },
        }
    }

    fn delete_all(kind: RecordKind) -> Self {
        PushRequest {
            kind: kind.as_str(),
            action: Some(DELETE_ALL_ACTION),
            rows: None,
            ids: None,
        }
    }
}

/// Parses a response body, turning `ok: false` into an error.
fn parse_envelope(body: &str) -> SyncResult<Envelope> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| SyncError::DeserializationFailed(e.to_string()))?;

    if !envelope.ok {
        let message = envelope
            .error
            .clone()
            .unwrap_or_else(|| "Sheet request failed".to_string());
        return Err(SyncError::RemoteRejected(message));
    }
    Ok(envelope)
}

/// Keeps the JSON objects of an array. A missing or non-array value is
/// an empty sheet.
fn rows_of(kind: RecordKind, value: Value) -> Vec<RawRow> {
    let Value::Array(values) = value else {
        return Vec::new();
    };

    let total = values.len();
    let rows: Vec<RawRow> = values.into_iter().filter_map(RawRow::from_value).collect();
    if rows.len() < total {
        warn!(
            kind = %kind,
            dropped = total - rows.len(),
            "Discarded non-object rows from remote"
        );
    }
    rows
}

// =============================================================================
// SheetsGateway
// =============================================================================

/// HTTP client for the spreadsheet web app.
#[derive(Debug, Clone)]
pub struct SheetsGateway {
    client: reqwest::Client,
    url: Url,
    timeout_secs: u64,
}

impl SheetsGateway {
    /// Creates a gateway for `url` with the given timeouts.
    pub fn new(url: &str, settings: &RemoteSettings) -> SyncResult<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "Remote URL must be http(s), got: {}",
                url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .connect_timeout(settings.connect_timeout())
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client: {}", e)))?;

        Ok(SheetsGateway {
            client,
            url,
            timeout_secs: settings.timeout_secs,
        })
    }

    /// Creates a gateway from `[remote]` settings.
    pub fn from_settings(settings: &RemoteSettings) -> SyncResult<Self> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| SyncError::InvalidConfig("remote.url is required for sync".into()))?;
        Self::new(url, settings)
    }

    /// The endpoint this gateway talks to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    fn map_transport(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout_secs)
        } else {
            SyncError::from(err)
        }
    }

    /// Sends a request and returns the checked envelope.
    async fn execute(&self, request: reqwest::RequestBuilder) -> SyncResult<Envelope> {
        let response = request.send().await.map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        parse_envelope(&body)
    }

    async fn post(&self, request: &PushRequest<'_>) -> SyncResult<Envelope> {
        let body = serde_json::to_string(request)?;
        self.execute(
            self.client
                .post(self.url.clone())
                .header(CONTENT_TYPE, TEXT_PLAIN_UTF8)
                .body(body),
        )
        .await
    }
}

#[async_trait]
impl RemoteGateway for SheetsGateway {
    async fn fetch_all(&self) -> SyncResult<RemoteSnapshot> {
        debug!(url = %self.url, "Fetching remote sheets");

        let envelope = self.execute(self.client.get(self.url.clone())).await?;
        let snapshot = RemoteSnapshot {
            products: rows_of(RecordKind::Products, envelope.products),
            bills: rows_of(RecordKind::Bills, envelope.bills),
        };

        debug!(
            products = snapshot.products.len(),
            bills = snapshot.bills.len(),
            "Remote snapshot received"
        );
        Ok(snapshot)
    }

    async fn push_rows(
        &self,
        kind: RecordKind,
        rows: Vec<RawRow>,
        mode: PushMode,
    ) -> SyncResult<PushAck> {
        let sent = match &mode {
            PushMode::Delete { ids } => ids.len(),
            _ => rows.len(),
        };
        debug!(kind = %kind, mode = %mode, count = sent, "Pushing rows");

        self.post(&PushRequest::new(kind, &rows, &mode)).await?;
        Ok(PushAck { sent })
    }

    async fn delete_all(&self, kind: RecordKind) -> SyncResult<PushAck> {
        debug!(kind = %kind, "Deleting all remote rows");

        self.post(&PushRequest::delete_all(kind)).await?;
        Ok(PushAck { sent: 0 })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
