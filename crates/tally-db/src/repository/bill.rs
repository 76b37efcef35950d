//! # Bill Repository
//!
//! Database operations for the Bills collection.
//!
//! ## One Bill per Number
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  write path                         read path                          │
//! │  ──────────                         ─────────                          │
//! │  add(b)     → delete same number,   get_all() → duplicates found?      │
//! │               then insert              │                               │
//! │  set_all(v) → dedup, then replace      ├── no  → return rows           │
//! │  create(d)  → allocate number and      └── yes → dedup, persist the    │
//! │               insert under the lock             compacted form, return │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Dedup keeps the record with the latest `created_at` (see
//! `tally_core::reconcile::dedup_bills`).

use chrono::{DateTime, Local, Utc};
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use crate::error::DbResult;
use crate::repository::CollectionLock;
use tally_core::allocator::next_bill_number;
use tally_core::reconcile::{dedup_bills, has_duplicate_numbers};
use tally_core::stats::{search_bills, BillQuery};
use tally_core::{Bill, BillDraft};

/// Repository for bill database operations.
#[derive(Debug, Clone)]
pub struct BillRepository {
    pool: SqlitePool,
    lock: CollectionLock,
}

impl BillRepository {
    /// Creates a new BillRepository sharing `lock` with its siblings.
    pub fn new(pool: SqlitePool, lock: CollectionLock) -> Self {
        BillRepository { pool, lock }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns every bill, one per `bill_number`.
    ///
    /// If the stored rows contain duplicates, the compacted collection is
    /// persisted before returning.
    pub async fn get_all(&self) -> DbResult<Vec<Bill>> {
        let bills = {
            let mut conn = self.pool.acquire().await?;
            fetch_all(&mut conn).await?
        };

        if !has_duplicate_numbers(&bills) {
            return Ok(bills);
        }

        warn!(count = bills.len(), "Duplicate bill numbers found, compacting");
        self.update_all(|stored| {
            let compacted = dedup_bills(stored);
            (compacted.clone(), compacted)
        })
        .await
    }

    /// Gets a bill by its business key.
    pub async fn get_by_number(&self, bill_number: &str) -> DbResult<Option<Bill>> {
        let bill = sqlx::query_as::<_, Bill>(
            r#"
            SELECT id, bill_number, customer_name, customer_phone, items, item_ids,
                   subtotal, discount, discount_amount, tax, tax_amount, total, created_at
            FROM bills
            WHERE bill_number = ?1
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(bill_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(bill)
    }

    /// Bills matching `query`, with day bounds in the local timezone.
    pub async fn search(&self, query: &BillQuery) -> DbResult<Vec<Bill>> {
        let bills = self.get_all().await?;
        let found = search_bills(&bills, query, &Local);
        debug!(total = bills.len(), found = found.len(), "Bill search");
        Ok(found)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replaces the whole collection after deduplicating it.
    pub async fn set_all(&self, bills: Vec<Bill>) -> DbResult<()> {
        let bills = dedup_bills(bills);
        debug!(count = bills.len(), "Replacing bill collection");

        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;
        replace_all(&mut tx, &bills).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Inserts `bill`, replacing any bill with the same number.
    ///
    /// An explicit add always wins, whatever the timestamps say.
    pub async fn add(&self, bill: &Bill) -> DbResult<()> {
        debug!(bill_number = %bill.bill_number, "Adding bill");

        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let replaced = sqlx::query("DELETE FROM bills WHERE bill_number = ?1")
            .bind(&bill.bill_number)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if replaced > 0 {
            info!(bill_number = %bill.bill_number, "Replaced existing bill");
        }
        insert(&mut tx, bill).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Finalizes `draft` with the next free bill number and stores it.
    ///
    /// Allocation and insert happen in one transaction under the write
    /// lock, so two concurrent calls never get the same number.
    pub async fn create(&self, draft: BillDraft, now: DateTime<Utc>) -> DbResult<Bill> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let numbers: Vec<String> = sqlx::query_scalar("SELECT bill_number FROM bills")
            .fetch_all(&mut *tx)
            .await?;
        let bill_number = next_bill_number(numbers.iter().map(String::as_str));

        let bill = draft.into_bill(bill_number, now)?;
        insert(&mut tx, &bill).await?;

        tx.commit().await?;
        info!(
            bill_number = %bill.bill_number,
            total = %bill.total,
            items = bill.items.len(),
            "Bill created"
        );
        Ok(bill)
    }

    /// Deletes every bill.
    pub async fn clear(&self) -> DbResult<u64> {
        let _guard = self.lock.lock().await;
        let result = sqlx::query("DELETE FROM bills").execute(&self.pool).await?;

        info!(count = result.rows_affected(), "Bills cleared");
        Ok(result.rows_affected())
    }

    /// Read-modify-write of the whole collection under the write lock.
    ///
    /// The returned collection is deduplicated before it is persisted.
    pub async fn update_all<F, R>(&self, f: F) -> DbResult<R>
    where
        F: FnOnce(Vec<Bill>) -> (Vec<Bill>, R),
    {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let current = fetch_all(&mut tx).await?;
        let (next, out) = f(current);
        replace_all(&mut tx, &dedup_bills(next)).await?;

        tx.commit().await?;
        Ok(out)
    }
}

// =============================================================================
// Connection-level helpers
// =============================================================================

async fn fetch_all(conn: &mut SqliteConnection) -> DbResult<Vec<Bill>> {
    let bills = sqlx::query_as::<_, Bill>(
        r#"
        SELECT id, bill_number, customer_name, customer_phone, items, item_ids,
               subtotal, discount, discount_amount, tax, tax_amount, total, created_at
        FROM bills
        ORDER BY seq
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(bills)
}

async fn insert(conn: &mut SqliteConnection, bill: &Bill) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO bills (
            id, bill_number, customer_name, customer_phone, items, item_ids,
            subtotal, discount, discount_amount, tax, tax_amount, total, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&bill.id)
    .bind(&bill.bill_number)
    .bind(&bill.customer_name)
    .bind(&bill.customer_phone)
    .bind(Json(&bill.items))
    .bind(&bill.item_ids)
    .bind(bill.subtotal)
    .bind(bill.discount)
    .bind(bill.discount_amount)
    .bind(bill.tax)
    .bind(bill.tax_amount)
    .bind(bill.total)
    .bind(bill.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn replace_all(conn: &mut SqliteConnection, bills: &[Bill]) -> DbResult<()> {
    sqlx::query("DELETE FROM bills").execute(&mut *conn).await?;
    for bill in bills {
        insert(conn, bill).await?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::insert;
    use crate::{Database, DbConfig};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tally_core::stats::BillQuery;
    use tally_core::{Bill, BillDraft, LineItem, Money, TaxRate};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, hour, 0, 0).unwrap()
    }

    fn draft(price_minor: i64) -> BillDraft {
        let mut draft = BillDraft {
            tax: TaxRate::from_percentage(12.0),
            ..Default::default()
        };
        draft
            .items
            .push(LineItem::manual("Dupatta", Money::from_minor(price_minor), 1).unwrap());
        draft
    }

    fn bill(number: &str, total_minor: i64, created_at: DateTime<Utc>) -> Bill {
        draft(total_minor)
            .into_bill(number.to_string(), created_at)
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_keeps_items_and_tax() {
        let db = db().await;
        let original = bill("SS01", 1999, at(9));
        db.bills().add(&original).await.unwrap();

        let all = db.bills().get_all().await.unwrap();
        assert_eq!(all, vec![original]);
        assert_eq!(all[0].tax.bps(), 1200);
        assert_eq!(all[0].items[0].name, "Dupatta");
    }

    #[tokio::test]
    async fn test_set_all_then_get_all_dedups_by_latest() {
        let db = db().await;
        let bills = vec![
            bill("SS01", 100, at(9)),
            bill("SS02", 200, at(9)),
            bill("SS01", 300, at(12)),
            bill("SS01", 400, at(10)),
        ];

        db.bills().set_all(bills).await.unwrap();
        let all = db.bills().get_all().await.unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(all[0].bill_number, "SS01");
        assert_eq!(all[0].subtotal.minor(), 300);
        assert_eq!(all[0].created_at, at(12));
    }

    #[tokio::test]
    async fn test_add_replaces_same_number_regardless_of_time() {
        let db = db().await;
        db.bills().add(&bill("SS01", 100, at(12))).await.unwrap();
        db.bills().add(&bill("SS01", 200, at(8))).await.unwrap();

        let all = db.bills().get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].subtotal.minor(), 200);
    }

    #[tokio::test]
    async fn test_get_all_heals_stored_duplicates() {
        let db = db().await;
        {
            // Rows written behind the store's back, as an older data file might hold
            let mut conn = db.pool().acquire().await.unwrap();
            insert(&mut conn, &bill("SS05", 100, at(9))).await.unwrap();
            insert(&mut conn, &bill("SS05", 200, at(11))).await.unwrap();
        }

        let healed = db.bills().get_all().await.unwrap();
        assert_eq!(healed.len(), 1);
        assert_eq!(healed[0].subtotal.minor(), 200);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bills")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_create_allocates_sequential_numbers() {
        let db = db().await;
        db.bills().add(&bill("SS01", 100, at(9))).await.unwrap();
        db.bills().add(&bill("SS05", 100, at(9))).await.unwrap();

        let created = db.bills().create(draft(500), at(10)).await.unwrap();
        assert_eq!(created.bill_number, "SS06");
        assert_eq!(created.total.minor(), 560);

        let next = db.bills().create(draft(500), at(10)).await.unwrap();
        assert_eq!(next.bill_number, "SS07");
    }

    #[tokio::test]
    async fn test_concurrent_create_never_collides() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                db.bills().create(draft(100), Utc::now()).await.unwrap()
            }));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().bill_number);
        }
        numbers.sort();
        numbers.dedup();
        assert_eq!(numbers.len(), 8);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_draft() {
        let db = db().await;
        assert!(db.bills().create(BillDraft::default(), at(9)).await.is_err());
        assert!(db.bills().get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let db = db().await;
        db.bills().add(&bill("SS01", 100, at(9))).await.unwrap();
        db.bills().add(&bill("SS02", 100, at(9))).await.unwrap();

        assert_eq!(db.bills().clear().await.unwrap(), 2);
        assert!(db.bills().get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_by_customer_and_range() {
        let db = db().await;
        let mut meena = bill("SS01", 100, at(9));
        meena.customer_name = Some("Meena".to_string());
        let mut ravi = bill("SS02", 200, at(10));
        ravi.customer_phone = Some("98765 43210".to_string());
        db.bills().set_all(vec![meena.clone(), ravi, bill("SS03", 300, at(11))]).await.unwrap();

        let found = db.bills().search(&BillQuery::text("MEE")).await.unwrap();
        assert_eq!(found, vec![meena]);

        let by_phone = db.bills().search(&BillQuery::text("43210")).await.unwrap();
        assert_eq!(by_phone[0].bill_number, "SS02");

        let day = at(12).date_naive();
        let wide = BillQuery::default().between(day.pred_opt().unwrap(), day.succ_opt().unwrap());
        assert_eq!(db.bills().search(&wide).await.unwrap().len(), 3);

        let later = BillQuery::default().between(
            day + Duration::days(5),
            day + Duration::days(6),
        );
        assert!(db.bills().search(&later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_number() {
        let db = db().await;
        let b = bill("SS03", 100, at(9) + Duration::minutes(3));
        db.bills().add(&b).await.unwrap();

        assert_eq!(db.bills().get_by_number("SS03").await.unwrap(), Some(b));
        assert_eq!(db.bills().get_by_number("SS04").await.unwrap(), None);
    }
}
