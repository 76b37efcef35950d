//! # Push Queue
//!
//! Fire-and-forget delivery of local changes to the remote.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Push Queue Flow                                 │
//! │                                                                         │
//! │  SyncDriver / mutations                                                │
//! │       │ enqueue(PushJob)          (never waits for the network)        │
//! │       ▼                                                                 │
//! │  ┌──────────────────────┐                                              │
//! │  │ unbounded mpsc       │                                              │
//! │  └──────────┬───────────┘                                              │
//! │             ▼                                                           │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ PushQueue worker (one task)                                      │  │
//! │  │                                                                  │  │
//! │  │  Job   → gateway.push_rows(kind, rows, mode)                     │  │
//! │  │          ok  → debug log                                         │  │
//! │  │          err → warn log + emitter.emit_push_failed(job, err)     │  │
//! │  │  Flush → answer once every earlier job has been attempted        │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  Jobs are independent: a failed job is reported, never retried here,   │
//! │  and never holds up the jobs behind it. The next sync re-detects       │
//! │  anything the remote still lacks.                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use tally_core::rows::RawRow;

use crate::driver::SyncEventEmitter;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{PushMode, RecordKind, RemoteGateway};

// =============================================================================
// Push Job
// =============================================================================

/// One write to one remote sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct PushJob {
    pub kind: RecordKind,
    pub rows: Vec<RawRow>,
    pub mode: PushMode,
}

impl PushJob {
    pub fn append(kind: RecordKind, rows: Vec<RawRow>) -> Self {
        PushJob {
            kind,
            rows,
            mode: PushMode::Append,
        }
    }

    pub fn upsert(kind: RecordKind, rows: Vec<RawRow>) -> Self {
        PushJob {
            kind,
            rows,
            mode: PushMode::Upsert,
        }
    }

    pub fn delete(kind: RecordKind, ids: Vec<String>) -> Self {
        PushJob {
            kind,
            rows: Vec::new(),
            mode: PushMode::Delete { ids },
        }
    }

    /// A job that would send nothing.
    pub fn is_empty(&self) -> bool {
        match &self.mode {
            PushMode::Delete { ids } => ids.is_empty(),
            _ => self.rows.is_empty(),
        }
    }
}

enum PushCommand {
    Job(PushJob),
    Flush(oneshot::Sender<()>),
}

// =============================================================================
// Push Queue
// =============================================================================

/// Background worker that delivers push jobs in order.
pub struct PushQueue {
    gateway: Arc<dyn RemoteGateway>,
    emitter: Arc<dyn SyncEventEmitter>,
    rx: mpsc::UnboundedReceiver<PushCommand>,
}

/// Handle for feeding the push queue. Cheap to clone.
///
/// The worker stops once every handle is dropped and the backlog is done.
#[derive(Clone)]
pub struct PushQueueHandle {
    tx: mpsc::UnboundedSender<PushCommand>,
}

impl PushQueueHandle {
    /// Queues a job. Empty jobs are dropped here.
    pub fn enqueue(&self, job: PushJob) -> SyncResult<()> {
        if job.is_empty() {
            return Ok(());
        }
        self.tx
            .send(PushCommand::Job(job))
            .map_err(|_| SyncError::ChannelError("Push queue closed".into()))
    }

    /// Waits until every job queued before this call has been attempted.
    pub async fn flush(&self) -> SyncResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(PushCommand::Flush(done_tx))
            .map_err(|_| SyncError::ChannelError("Push queue closed".into()))?;
        done_rx
            .await
            .map_err(|_| SyncError::ChannelError("Push queue stopped before flush".into()))
    }
}

impl PushQueue {
    /// Creates a queue and returns its worker and a handle.
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> (Self, PushQueueHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            PushQueue {
                gateway,
                emitter,
                rx,
            },
            PushQueueHandle { tx },
        )
    }

    /// Creates a queue and spawns its worker on the current runtime.
    pub fn spawn(
        gateway: Arc<dyn RemoteGateway>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> PushQueueHandle {
        let (queue, handle) = Self::new(gateway, emitter);
        tokio::spawn(queue.run());
        handle
    }

    /// Runs the worker loop until all handles are gone.
    pub async fn run(mut self) {
        debug!("Push queue starting");

        while let Some(command) = self.rx.recv().await {
            match command {
                PushCommand::Job(job) => self.deliver(job).await,
                PushCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        info!("Push queue stopped");
    }

    async fn deliver(&self, job: PushJob) {
        let kind = job.kind;
        let mode = job.mode.clone();

        match self
            .gateway
            .push_rows(kind, job.rows.clone(), job.mode.clone())
            .await
        {
            Ok(ack) => {
                debug!(kind = %kind, mode = %mode, sent = ack.sent, "Push delivered");
            }
            Err(e) => {
                warn!(
                    kind = %kind,
                    mode = %mode,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Push failed"
                );
                self.emitter.emit_push_failed(&job, &e);
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockGateway, RecordingEmitter};

    fn row(id: &str) -> RawRow {
        RawRow::new().with("Id", id)
    }

    #[test]
    fn test_empty_jobs() {
        assert!(PushJob::append(RecordKind::Bills, vec![]).is_empty());
        assert!(PushJob::delete(RecordKind::Products, vec![]).is_empty());
        assert!(!PushJob::delete(RecordKind::Products, vec!["p".into()]).is_empty());
    }

    #[tokio::test]
    async fn test_jobs_delivered_in_order() {
        let gateway = Arc::new(MockGateway::default());
        let emitter = Arc::new(RecordingEmitter::default());
        let queue = PushQueue::spawn(gateway.clone(), emitter.clone());

        queue
            .enqueue(PushJob::append(RecordKind::Bills, vec![row("b-1")]))
            .unwrap();
        queue
            .enqueue(PushJob::upsert(RecordKind::Products, vec![row("p-1")]))
            .unwrap();
        queue
            .enqueue(PushJob::append(RecordKind::Bills, vec![]))
            .unwrap();
        queue.flush().await.unwrap();

        let pushes = gateway.pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].kind, RecordKind::Bills);
        assert_eq!(pushes[1].mode, PushMode::Upsert);
        assert!(emitter.push_failures().is_empty());
    }

    #[tokio::test]
    async fn test_failure_reported_and_does_not_block_others() {
        let gateway = Arc::new(MockGateway::default());
        gateway.fail_pushes_for(RecordKind::Bills);
        let emitter = Arc::new(RecordingEmitter::default());
        let queue = PushQueue::spawn(gateway.clone(), emitter.clone());

        queue
            .enqueue(PushJob::append(RecordKind::Bills, vec![row("b-1")]))
            .unwrap();
        queue
            .enqueue(PushJob::upsert(RecordKind::Products, vec![row("p-1")]))
            .unwrap();
        queue.flush().await.unwrap();

        let failures = emitter.push_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, RecordKind::Bills);

        let delivered = gateway.pushes();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].kind, RecordKind::Products);
    }
}
