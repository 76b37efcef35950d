//! # Sync Driver
//!
//! Orchestrates one sync cycle (fetch, map, merge, persist, push) and the
//! local mutations that must also reach the remote.
//!
//! ## Driver Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncDriver Architecture                          │
//! │                                                                         │
//! │   trigger() / interval tick                                            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   sync_now() ── busy? ──yes──► Coalesced                               │
//! │        │no                                                              │
//! │        ▼                                                                │
//! │   gateway.fetch_all() ──err──► emit_error, local untouched, Idle       │
//! │        │ok                                                              │
//! │        ▼                                                                │
//! │   map_product_rows / map_bill_rows                                     │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   products().update_all(merge_products)   one snapshot, one write     │
//! │   bills().update_all(merge_bills)          per collection              │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   PushQueue ◄── seeding ? Append(all local) : Upsert(local-only)       │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   Completed, Idle                                                      │
//! │                                                                         │
//! │  STATUS EVENTS (to the host via SyncEventEmitter):                     │
//! │  emit_status      - state / counts / last sync / last error            │
//! │  emit_push_failed - a push job the remote refused                      │
//! │  emit_error       - a sync cycle that failed                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The busy flag lives in an `AtomicBool` claimed through a guard whose
//! `Drop` releases it, so every exit path returns the driver to `Idle`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tally_core::reconcile::{merge_bills, merge_products};
use tally_core::rows::{bill_to_row, map_bill_rows, map_product_rows, product_to_row};
use tally_core::validation::validate_product;
use tally_core::{Bill, BillDraft, Product, ProductPatch};
use tally_db::Database;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::{RecordKind, RemoteGateway};
use crate::push::{PushJob, PushQueue, PushQueueHandle};
use crate::sheets::SheetsGateway;

// =============================================================================
// Sync Status
// =============================================================================

/// Whether a sync cycle is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
}

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    /// Idle or syncing.
    pub state: SyncState,

    /// Last successful sync.
    pub last_sync: Option<DateTime<Utc>>,

    /// Last error message (cleared by the next successful sync).
    pub last_error: Option<String>,

    /// Products after the last merge.
    pub products: usize,

    /// Bills after the last merge.
    pub bills: usize,
}

/// What one completed cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub products: usize,
    pub bills: usize,
    pub products_pushed: usize,
    pub bills_pushed: usize,
    pub products_seeded: bool,
    pub bills_seeded: bool,
}

/// Result of a `sync_now` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The cycle ran to the end.
    Completed(SyncReport),
    /// Another cycle was already running. Nothing was done.
    Coalesced,
    /// The cycle stopped early. Local data was not merged.
    Failed { message: String, retryable: bool },
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Trait for surfacing sync events to the host (UI, logs, metrics).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits a push job the remote did not accept.
    fn emit_push_failed(&self, job: &PushJob, error: &SyncError);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_push_failed(&self, _job: &PushJob, _error: &SyncError) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Busy Guard
// =============================================================================

struct BusyGuard {
    busy: Arc<AtomicBool>,
}

impl BusyGuard {
    /// Claims the flag, or `None` if a cycle already holds it.
    fn acquire(busy: &Arc<AtomicBool>) -> Option<Self> {
        busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { busy: busy.clone() })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

// =============================================================================
// Sync Driver
// =============================================================================

/// Runs sync cycles and remote-aware mutations against one `Database`.
///
/// Cheap to clone. Clones share the busy flag, status and push queue.
#[derive(Clone)]
pub struct SyncDriver {
    config: Arc<SyncConfig>,
    db: Database,
    gateway: Arc<dyn RemoteGateway>,
    pushes: PushQueueHandle,
    emitter: Arc<dyn SyncEventEmitter>,
    status: Arc<RwLock<SyncStatus>>,
    busy: Arc<AtomicBool>,
}

impl SyncDriver {
    /// Creates a driver and spawns its push queue on the current runtime.
    pub fn new(
        config: SyncConfig,
        db: Database,
        gateway: Arc<dyn RemoteGateway>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let pushes = PushQueue::spawn(gateway.clone(), emitter.clone());

        SyncDriver {
            config: Arc::new(config),
            db,
            gateway,
            pushes,
            emitter,
            status: Arc::new(RwLock::new(SyncStatus::default())),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The local store this driver writes to.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncStatus {
        let mut status = self.status.read().await.clone();
        status.state = self.state();
        status
    }

    fn state(&self) -> SyncState {
        if self.busy.load(Ordering::Acquire) {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    async fn emit_status(&self) {
        let status = self.status().await;
        self.emitter.emit_status(&status);
    }

    /// Waits until every push queued so far has been attempted.
    pub async fn flush_pushes(&self) -> SyncResult<()> {
        self.pushes.flush().await
    }

    // =========================================================================
    // Sync Cycle
    // =========================================================================

    /// Runs one sync cycle unless one is already running.
    ///
    /// Never returns an error: failures are logged, recorded in the status,
    /// emitted, and reported as `SyncOutcome::Failed`.
    pub async fn sync_now(&self) -> SyncOutcome {
        let Some(guard) = BusyGuard::acquire(&self.busy) else {
            debug!("Sync already running, coalescing trigger");
            return SyncOutcome::Coalesced;
        };
        self.emit_status().await;

        let outcome = match self.run_cycle().await {
            Ok(report) => {
                info!(
                    products = report.products,
                    bills = report.bills,
                    products_pushed = report.products_pushed,
                    bills_pushed = report.bills_pushed,
                    "Sync complete"
                );
                let mut status = self.status.write().await;
                status.last_sync = Some(Utc::now());
                status.last_error = None;
                status.products = report.products;
                status.bills = report.bills;
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                let message = e.to_string();
                let retryable = e.is_retryable();
                warn!(error = %message, retryable, "Sync failed, local data left as is");

                self.status.write().await.last_error = Some(message.clone());
                self.emitter.emit_error(&message, retryable);
                SyncOutcome::Failed { message, retryable }
            }
        };

        drop(guard);
        self.emit_status().await;
        outcome
    }

    async fn run_cycle(&self) -> SyncResult<SyncReport> {
        let snapshot = self.gateway.fetch_all().await?;
        let now = Utc::now();

        let remote_products = map_product_rows(&snapshot.products, now);
        let remote_bills = map_bill_rows(&snapshot.bills, now);
        debug!(
            products = remote_products.len(),
            bills = remote_bills.len(),
            "Remote rows mapped"
        );

        let (product_count, products_out, products_seeded) = self
            .db
            .products()
            .update_all(move |local| {
                let merge = merge_products(remote_products, &local);
                let count = merge.merged.len();
                (merge.merged, (count, merge.to_push, merge.seeding))
            })
            .await?;

        let (bill_count, bills_out, bills_seeded) = self
            .db
            .bills()
            .update_all(move |local| {
                let merge = merge_bills(remote_bills, &local);
                let count = merge.merged.len();
                (merge.merged, (count, merge.to_push, merge.seeding))
            })
            .await?;

        let products_pushed = products_out.len();
        let bills_pushed = bills_out.len();

        self.queue_outbound(
            RecordKind::Products,
            products_out.iter().map(product_to_row).collect(),
            products_seeded,
        )?;
        self.queue_outbound(
            RecordKind::Bills,
            bills_out.iter().map(bill_to_row).collect(),
            bills_seeded,
        )?;

        Ok(SyncReport {
            products: product_count,
            bills: bill_count,
            products_pushed,
            bills_pushed,
            products_seeded,
            bills_seeded,
        })
    }

    /// Seeding sends everything as one append. Otherwise local-only rows
    /// are upserted so a repeated push cannot duplicate them.
    fn queue_outbound(
        &self,
        kind: RecordKind,
        rows: Vec<tally_core::rows::RawRow>,
        seeding: bool,
    ) -> SyncResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if seeding {
            info!(kind = %kind, count = rows.len(), "Remote empty, seeding from local");
            self.pushes.enqueue(PushJob::append(kind, rows))
        } else {
            debug!(kind = %kind, count = rows.len(), "Pushing local-only records");
            self.pushes.enqueue(PushJob::upsert(kind, rows))
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Records a sale: allocates the bill number, stores the bill,
    /// decrements stock, and queues the bill and touched products.
    ///
    /// Once the bill is stored the sale counts as recorded. A failed stock
    /// update is reported through the emitter and the bill is still
    /// returned, so callers never record the same sale twice.
    pub async fn record_sale(&self, draft: BillDraft) -> SyncResult<Bill> {
        let now = Utc::now();
        let bill = self.db.bills().create(draft, now).await?;
        self.queue_after_write(PushJob::append(RecordKind::Bills, vec![bill_to_row(&bill)]));

        let touched = match self.db.products().apply_sale(&bill.items, now).await {
            Ok(touched) => touched,
            Err(e) => {
                let message = format!("Stock not updated for bill {}: {}", bill.bill_number, e);
                error!(bill_number = %bill.bill_number, error = %e, "Stock update failed after sale");
                self.status.write().await.last_error = Some(message.clone());
                self.emitter.emit_error(&message, false);
                return Ok(bill);
            }
        };

        info!(
            bill_number = %bill.bill_number,
            total = %bill.total,
            products = touched.len(),
            "Sale recorded"
        );

        self.queue_after_write(PushJob::upsert(
            RecordKind::Products,
            touched.iter().map(product_to_row).collect(),
        ));
        Ok(bill)
    }

    /// Adds a catalogue product and queues it for append.
    pub async fn add_product(&self, product: Product) -> SyncResult<Product> {
        validate_product(&product)?;
        let product = self.db.products().add(&product).await?;

        self.queue_after_write(PushJob::append(
            RecordKind::Products,
            vec![product_to_row(&product)],
        ));
        Ok(product)
    }

    /// Updates a product and queues it for upsert.
    pub async fn update_product(&self, id: &str, patch: ProductPatch) -> SyncResult<Product> {
        let product = self.db.products().update(id, &patch, Utc::now()).await?;

        self.queue_after_write(PushJob::upsert(
            RecordKind::Products,
            vec![product_to_row(&product)],
        ));
        Ok(product)
    }

    /// Deletes a product. A remote delete is queued only if it existed.
    pub async fn delete_product(&self, id: &str) -> SyncResult<bool> {
        let deleted = self.db.products().delete(id).await?;
        if deleted {
            self.queue_after_write(PushJob::delete(RecordKind::Products, vec![id.to_string()]));
        }
        Ok(deleted)
    }

    /// Deletes every bill, remote first. Local bills are kept if the
    /// remote refuses.
    pub async fn clear_bills(&self) -> SyncResult<u64> {
        self.gateway.delete_all(RecordKind::Bills).await?;
        let removed = self.db.bills().clear().await?;

        info!(removed, "All bills cleared");
        Ok(removed)
    }

    /// The local write already committed, so a closed queue is only logged.
    fn queue_after_write(&self, job: PushJob) {
        if let Err(e) = self.pushes.enqueue(job) {
            error!(error = %e, "Could not queue push after local write");
        }
    }

    // =========================================================================
    // Background Loop
    // =========================================================================

    /// Spawns the periodic loop and returns a handle to control it.
    ///
    /// The first periodic sync runs immediately. With `[sync] enabled = false`
    /// only manual triggers run.
    pub fn spawn(&self) -> SyncDriverHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(self.clone().run(trigger_rx, shutdown_rx));

        SyncDriverHandle {
            trigger_tx,
            shutdown_tx,
            driver: self.clone(),
            task: Arc::new(std::sync::Mutex::new(Some(task))),
        }
    }

    async fn run(self, mut trigger_rx: mpsc::Receiver<()>, mut shutdown_rx: mpsc::Receiver<()>) {
        let periodic = self.config.sync.enabled;
        info!(
            device_id = %self.config.device_id(),
            interval_secs = self.config.sync.interval_secs,
            periodic,
            "Sync driver starting"
        );

        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick(), if periodic => {
                    self.sync_now().await;
                }

                Some(()) = trigger_rx.recv() => {
                    self.sync_now().await;
                }

                _ = shutdown_rx.recv() => {
                    info!("Sync driver received shutdown");
                    break;
                }
            }
        }

        if let Err(e) = self.flush_pushes().await {
            warn!(error = %e, "Pending pushes not drained on shutdown");
        }
        info!("Sync driver stopped");
    }
}

// =============================================================================
// Driver Handle
// =============================================================================

/// Handle for controlling a running sync loop from outside.
#[derive(Clone)]
pub struct SyncDriverHandle {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    driver: SyncDriver,
    task: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl SyncDriverHandle {
    /// Requests a sync. If one is already pending the request is merged.
    pub fn trigger(&self) {
        if self.trigger_tx.try_send(()).is_err() {
            debug!("Sync trigger already pending");
        }
    }

    /// Gets the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.driver.status().await
    }

    /// The driver behind this loop, for mutations.
    pub fn driver(&self) -> &SyncDriver {
        &self.driver
    }

    /// Stops the loop after the current cycle and waits for queued pushes.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;

        let task = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "Sync driver task ended abnormally");
            }
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a `SyncDriver` with options.
pub struct SyncDriverBuilder {
    config: SyncConfig,
    db: Option<Database>,
    gateway: Option<Arc<dyn RemoteGateway>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncDriverBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncDriverBuilder {
            config,
            db: None,
            gateway: None,
            emitter: None,
        }
    }

    /// Sets the database.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the remote gateway. Defaults to `SheetsGateway` over
    /// `[remote] url`.
    pub fn with_gateway(mut self, gateway: Arc<dyn RemoteGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Builds the driver. Must run inside a Tokio runtime.
    pub fn build(self) -> SyncResult<SyncDriver> {
        self.config.validate()?;

        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let gateway = match self.gateway {
            Some(gateway) => gateway,
            None => Arc::new(SheetsGateway::from_settings(&self.config.remote)?),
        };
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncDriver::new(self.config, db, gateway, emitter))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{PushMode, RemoteSnapshot};
    use crate::testing::{MockGateway, RecordingEmitter};
    use chrono::Duration as ChronoDuration;
    use tally_core::rows::RawRow;
    use tally_core::{LineItem, Money};
    use tally_db::DbConfig;

    struct Fixture {
        driver: SyncDriver,
        gateway: Arc<MockGateway>,
        emitter: Arc<RecordingEmitter>,
    }

    async fn fixture(gateway: MockGateway) -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let gateway = Arc::new(gateway);
        let emitter = Arc::new(RecordingEmitter::default());
        let driver = SyncDriverBuilder::new(SyncConfig::default())
            .with_database(db)
            .with_gateway(gateway.clone())
            .with_emitter(emitter.clone())
            .build()
            .unwrap();
        Fixture {
            driver,
            gateway,
            emitter,
        }
    }

    fn product(id: &str, name: &str, stock: i64) -> Product {
        let mut p = Product::new("", name, Money::from_minor(5000), stock, Utc::now());
        p.id = id.to_string();
        p
    }

    fn bill(number: &str, total_minor: i64) -> Bill {
        let mut draft = BillDraft::default();
        draft
            .items
            .push(LineItem::manual("Dupatta", Money::from_minor(total_minor), 1).unwrap());
        draft.into_bill(number.to_string(), Utc::now()).unwrap()
    }

    fn product_row(id: &str, name: &str, qty: i64) -> RawRow {
        RawRow::new()
            .with("Id", id)
            .with("Name", name)
            .with("Price", 10)
            .with("Available Qty", qty)
    }

    fn bill_row(number: &str, total: i64) -> RawRow {
        RawRow::new()
            .with("Id", format!("id-{}", number))
            .with("Bill Number", number)
            .with("Date", "2024-03-01T10:00:00.000Z")
            .with("Total Tendered", total)
    }

    #[tokio::test]
    async fn test_empty_remote_seeds_every_local_record() {
        let fx = fixture(MockGateway::with_snapshot(RemoteSnapshot::default())).await;
        let products = fx.driver.database().products();
        for i in 0..3 {
            products
                .add(&product(&format!("p-{}", i), "Lawn suit", 5))
                .await
                .unwrap();
        }
        fx.driver.database().bills().add(&bill("SS01", 100)).await.unwrap();
        fx.driver.database().bills().add(&bill("SS02", 200)).await.unwrap();

        let outcome = fx.driver.sync_now().await;
        fx.driver.flush_pushes().await.unwrap();

        match outcome {
            SyncOutcome::Completed(report) => {
                assert!(report.products_seeded);
                assert!(report.bills_seeded);
                assert_eq!(report.products_pushed, 3);
                assert_eq!(report.bills_pushed, 2);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Local data survives an empty remote
        assert_eq!(products.get_all().await.unwrap().len(), 3);
        assert_eq!(fx.driver.database().bills().get_all().await.unwrap().len(), 2);

        let pushes = fx.gateway.pushes();
        assert_eq!(pushes.len(), 2);
        assert!(pushes.iter().all(|job| job.mode == PushMode::Append));
        let product_job = pushes
            .iter()
            .find(|job| job.kind == RecordKind::Products)
            .unwrap();
        assert_eq!(product_job.rows.len(), 3);
    }

    #[tokio::test]
    async fn test_merge_keeps_local_items_and_pushes_local_only() {
        let snapshot = RemoteSnapshot {
            products: vec![product_row("p-1", "Khussa", 7)],
            bills: vec![bill_row("SS01", 999)],
        };
        let fx = fixture(MockGateway::with_snapshot(snapshot)).await;
        let db = fx.driver.database();

        db.products().add(&product("p-1", "Old name", 1)).await.unwrap();
        db.products().add(&product("p-2", "Chappal", 4)).await.unwrap();
        let local = bill("SS01", 2500);
        db.bills().add(&local).await.unwrap();
        db.bills().add(&bill("SS02", 800)).await.unwrap();

        let outcome = fx.driver.sync_now().await;
        fx.driver.flush_pushes().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(_)));

        let merged = db.products().get_by_id("p-1").await.unwrap().unwrap();
        assert_eq!(merged.name, "Khussa");
        assert_eq!(merged.stock, 7);

        let ss01 = db.bills().get_by_number("SS01").await.unwrap().unwrap();
        assert_eq!(ss01.items, local.items);
        assert_eq!(ss01.total, local.total);

        let pushes = fx.gateway.pushes();
        assert_eq!(pushes.len(), 2);
        assert!(pushes.iter().all(|job| job.mode == PushMode::Upsert));
        let bill_job = pushes.iter().find(|j| j.kind == RecordKind::Bills).unwrap();
        assert_eq!(bill_job.rows.len(), 1);
        assert_eq!(bill_job.rows[0].text(&["Bill Number"]), "SS02");
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let snapshot = RemoteSnapshot {
            products: vec![product_row("p-1", "Khussa", 7)],
            bills: vec![bill_row("SS01", 10), bill_row("SS02", 20)],
        };
        let fx = fixture(MockGateway::with_snapshot(snapshot)).await;

        fx.driver.sync_now().await;
        let first = fx.driver.database().bills().get_all().await.unwrap();
        fx.driver.sync_now().await;
        let second = fx.driver.database().bills().get_all().await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        fx.driver.flush_pushes().await.unwrap();
        assert!(fx.gateway.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_local_untouched() {
        let fx = fixture(MockGateway::failing_fetch()).await;
        fx.driver
            .database()
            .products()
            .add(&product("p-1", "Shawl", 3))
            .await
            .unwrap();

        let outcome = fx.driver.sync_now().await;

        assert!(matches!(
            outcome,
            SyncOutcome::Failed {
                retryable: true,
                ..
            }
        ));
        let status = fx.driver.status().await;
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_error.is_some());
        assert_eq!(fx.emitter.errors().len(), 1);
        assert_eq!(
            fx.driver.database().products().get_all().await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_coalesced() {
        let gateway = MockGateway::with_snapshot(RemoteSnapshot::default()).gated();
        let fx = fixture(gateway).await;

        let first = {
            let driver = fx.driver.clone();
            tokio::spawn(async move { driver.sync_now().await })
        };
        while fx.driver.status().await.state != SyncState::Syncing {
            tokio::task::yield_now().await;
        }

        assert_eq!(fx.driver.sync_now().await, SyncOutcome::Coalesced);

        fx.gateway.release();
        assert!(matches!(first.await.unwrap(), SyncOutcome::Completed(_)));
        assert_eq!(fx.driver.status().await.state, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_record_sale_decrements_stock_and_pushes() {
        let fx = fixture(MockGateway::default()).await;
        let db = fx.driver.database();
        let kurta = db.products().add(&product("p-1", "Kurta", 12)).await.unwrap();

        let mut draft = BillDraft::default();
        draft.add_product(&kurta, 3).unwrap();
        let bill = fx.driver.record_sale(draft).await.unwrap();
        fx.driver.flush_pushes().await.unwrap();

        assert_eq!(bill.bill_number, "SS01");
        let kurta = db.products().get_by_id("p-1").await.unwrap().unwrap();
        assert_eq!(kurta.stock, 9);

        let pushes = fx.gateway.pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].kind, RecordKind::Bills);
        assert_eq!(pushes[0].mode, PushMode::Append);
        assert_eq!(pushes[1].kind, RecordKind::Products);
        assert_eq!(pushes[1].mode, PushMode::Upsert);
        assert_eq!(pushes[1].rows[0].number(&["Available Qty"]), 9.0);
    }

    #[tokio::test]
    async fn test_product_mutations_push_matching_modes() {
        let fx = fixture(MockGateway::default()).await;

        fx.driver.add_product(product("p-1", "Sandal", 2)).await.unwrap();
        fx.driver
            .update_product("p-1", ProductPatch::stock(20))
            .await
            .unwrap();
        assert!(fx.driver.delete_product("p-1").await.unwrap());
        assert!(!fx.driver.delete_product("p-1").await.unwrap());
        fx.driver.flush_pushes().await.unwrap();

        let modes: Vec<PushMode> = fx.gateway.pushes().into_iter().map(|j| j.mode).collect();
        assert_eq!(
            modes,
            vec![
                PushMode::Append,
                PushMode::Upsert,
                PushMode::Delete {
                    ids: vec!["p-1".to_string()]
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_add_product_rejects_blank_name() {
        let fx = fixture(MockGateway::default()).await;
        let err = fx.driver.add_product(product("p-1", " ", 2)).await.unwrap_err();
        assert!(matches!(err, SyncError::Core(_)));
    }

    #[tokio::test]
    async fn test_stock_failure_keeps_bill_and_queues_it() {
        let fx = fixture(MockGateway::default()).await;
        let db = fx.driver.database();
        let kurta = db.products().add(&product("p-1", "Kurta", 12)).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER freeze_stock BEFORE UPDATE ON products \
             BEGIN SELECT RAISE(ABORT, 'stock frozen'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let mut draft = BillDraft::default();
        draft.add_product(&kurta, 2).unwrap();
        let bill = fx.driver.record_sale(draft).await.unwrap();
        fx.driver.flush_pushes().await.unwrap();

        let stored = db.bills().get_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].bill_number, bill.bill_number);
        assert_eq!(db.products().get_by_id("p-1").await.unwrap().unwrap().stock, 12);

        let pushes = fx.gateway.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].kind, RecordKind::Bills);
        assert_eq!(pushes[0].mode, PushMode::Append);

        assert_eq!(fx.emitter.errors().len(), 1);
        assert!(fx.driver.status().await.last_error.is_some());
    }

    #[tokio::test]
    async fn test_update_product_rejects_negative_price() {
        let fx = fixture(MockGateway::default()).await;
        fx.driver.add_product(product("p-1", "Sandal", 2)).await.unwrap();
        fx.driver.flush_pushes().await.unwrap();

        let patch = ProductPatch {
            price: Some(Money::from_minor(-100)),
            ..Default::default()
        };
        let err = fx.driver.update_product("p-1", patch).await.unwrap_err();
        assert!(matches!(err, SyncError::Core(_)));
        fx.driver.flush_pushes().await.unwrap();

        let stored = fx.driver.database().products().get_by_id("p-1").await.unwrap().unwrap();
        assert_eq!(stored.price, Money::from_minor(5000));
        assert_eq!(fx.gateway.pushes().len(), 1);
    }

    #[tokio::test]
    async fn test_push_failure_does_not_roll_back_sale() {
        let gateway = MockGateway::default();
        gateway.fail_pushes_for(RecordKind::Bills);
        let fx = fixture(gateway).await;

        let mut draft = BillDraft::default();
        draft
            .items
            .push(LineItem::manual("Alteration", Money::from_minor(300), 1).unwrap());
        fx.driver.record_sale(draft).await.unwrap();
        fx.driver.flush_pushes().await.unwrap();

        assert_eq!(fx.driver.database().bills().get_all().await.unwrap().len(), 1);
        assert_eq!(fx.emitter.push_failures().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_bills_is_remote_first() {
        let gateway = MockGateway::default();
        gateway.fail_delete_all();
        let fx = fixture(gateway).await;
        fx.driver.database().bills().add(&bill("SS01", 100)).await.unwrap();

        assert!(fx.driver.clear_bills().await.is_err());
        assert_eq!(fx.driver.database().bills().get_all().await.unwrap().len(), 1);

        let fx = fixture(MockGateway::default()).await;
        fx.driver.database().bills().add(&bill("SS01", 100)).await.unwrap();
        assert_eq!(fx.driver.clear_bills().await.unwrap(), 1);
        assert!(fx.driver.database().bills().get_all().await.unwrap().is_empty());
        assert_eq!(fx.gateway.delete_all_calls(), 1);
    }

    #[tokio::test]
    async fn test_spawned_loop_runs_and_shuts_down() {
        let snapshot = RemoteSnapshot {
            products: vec![],
            bills: vec![bill_row("SS07", 70)],
        };
        let fx = fixture(MockGateway::with_snapshot(snapshot)).await;
        let handle = fx.driver.spawn();

        handle.trigger();
        for _ in 0..200 {
            if handle.status().await.last_sync.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        let status = handle.status().await;
        assert!(status.last_sync.is_some());
        assert_eq!(status.bills, 1);
        assert!(!fx.emitter.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_remote_dates_are_kept() {
        let fx = fixture(MockGateway::with_snapshot(RemoteSnapshot {
            products: vec![],
            bills: vec![bill_row("SS03", 30)],
        }))
        .await;

        fx.driver.sync_now().await;
        let ss03 = fx
            .driver
            .database()
            .bills()
            .get_by_number("SS03")
            .await
            .unwrap()
            .unwrap();
        assert!(Utc::now() - ss03.created_at > ChronoDuration::days(1));
    }
}
