//! Scripted gateway and recording emitter for driver and queue tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use tally_core::rows::RawRow;

use crate::driver::{SyncEventEmitter, SyncStatus};
use crate::error::{SyncError, SyncResult};
use crate::gateway::{PushAck, PushMode, RecordKind, RemoteGateway, RemoteSnapshot};
use crate::push::PushJob;

/// In-memory gateway. Serves a fixed snapshot and records accepted pushes.
#[derive(Default)]
pub(crate) struct MockGateway {
    snapshot: Mutex<RemoteSnapshot>,
    fail_fetch: AtomicBool,
    gate: Option<Arc<Notify>>,
    failing_kinds: Mutex<Vec<RecordKind>>,
    fail_delete_all: AtomicBool,
    pushes: Mutex<Vec<PushJob>>,
    delete_all_calls: AtomicUsize,
}

impl MockGateway {
    pub(crate) fn with_snapshot(snapshot: RemoteSnapshot) -> Self {
        MockGateway {
            snapshot: Mutex::new(snapshot),
            ..Default::default()
        }
    }

    pub(crate) fn failing_fetch() -> Self {
        let gateway = MockGateway::default();
        gateway.fail_fetch.store(true, Ordering::SeqCst);
        gateway
    }

    /// `fetch_all` blocks until `release` is called.
    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    pub(crate) fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub(crate) fn fail_pushes_for(&self, kind: RecordKind) {
        self.failing_kinds.lock().unwrap().push(kind);
    }

    pub(crate) fn fail_delete_all(&self) {
        self.fail_delete_all.store(true, Ordering::SeqCst);
    }

    pub(crate) fn pushes(&self) -> Vec<PushJob> {
        self.pushes.lock().unwrap().clone()
    }

    pub(crate) fn delete_all_calls(&self) -> usize {
        self.delete_all_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn fetch_all(&self) -> SyncResult<RemoteSnapshot> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(SyncError::ConnectionFailed("remote unreachable".into()));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn push_rows(
        &self,
        kind: RecordKind,
        rows: Vec<RawRow>,
        mode: PushMode,
    ) -> SyncResult<PushAck> {
        if self.failing_kinds.lock().unwrap().contains(&kind) {
            return Err(SyncError::RemoteRejected(format!("{} sheet is locked", kind)));
        }
        let sent = rows.len();
        self.pushes.lock().unwrap().push(PushJob { kind, rows, mode });
        Ok(PushAck { sent })
    }

    async fn delete_all(&self, _kind: RecordKind) -> SyncResult<PushAck> {
        if self.fail_delete_all.load(Ordering::SeqCst) {
            return Err(SyncError::HttpStatus(500));
        }
        self.delete_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PushAck::default())
    }
}

/// Emitter that keeps everything it is given.
#[derive(Default)]
pub(crate) struct RecordingEmitter {
    statuses: Mutex<Vec<SyncStatus>>,
    push_failures: Mutex<Vec<PushJob>>,
    errors: Mutex<Vec<(String, bool)>>,
}

impl RecordingEmitter {
    pub(crate) fn statuses(&self) -> Vec<SyncStatus> {
        self.statuses.lock().unwrap().clone()
    }

    pub(crate) fn push_failures(&self) -> Vec<PushJob> {
        self.push_failures.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<(String, bool)> {
        self.errors.lock().unwrap().clone()
    }
}

impl SyncEventEmitter for RecordingEmitter {
    fn emit_status(&self, status: &SyncStatus) {
        self.statuses.lock().unwrap().push(status.clone());
    }

    fn emit_push_failed(&self, job: &PushJob, _error: &SyncError) {
        self.push_failures.lock().unwrap().push(job.clone());
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        self.errors.lock().unwrap().push((message.to_string(), retryable));
    }
}
