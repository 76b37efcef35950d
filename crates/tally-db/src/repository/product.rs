//! # Product Repository
//!
//! Database operations for the Products collection.
//!
//! ## Key Operations
//! - Full-collection read and replace
//! - Add / patch / delete of single products
//! - Stock decrement for a completed sale
//! - Locked read-modify-write (`update_all`) for the sync merge

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::repository::CollectionLock;
use tally_core::{LineItem, Product, ProductPatch};

/// Repository for product database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
///
/// repo.add(&product).await?;
/// let updated = repo.update(&product.id, &ProductPatch::stock(4), Utc::now()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
    lock: CollectionLock,
}

impl ProductRepository {
    /// Creates a new ProductRepository sharing `lock` with its siblings.
    pub fn new(pool: SqlitePool, lock: CollectionLock) -> Self {
        ProductRepository { pool, lock }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns every product in insertion order.
    pub async fn get_all(&self) -> DbResult<Vec<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_all(&mut conn).await
    }

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        fetch_one(&mut conn, id).await
    }

    /// Number of products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Replaces the whole collection. No merge.
    pub async fn set_all(&self, products: &[Product]) -> DbResult<()> {
        debug!(count = products.len(), "Replacing product collection");

        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;
        replace_all(&mut tx, products).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Inserts a new product.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - a product with this id exists
    pub async fn add(&self, product: &Product) -> DbResult<Product> {
        debug!(id = %product.id, name = %product.name, "Adding product");

        let _guard = self.lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        insert(&mut conn, product).await?;
        Ok(product.clone())
    }

    /// Applies `patch` over the stored product and stamps `updated_at`.
    ///
    /// ## Returns
    /// * `Ok(Product)` - the product as persisted
    /// * `Err(DbError::NotFound)` - no product with this id
    pub async fn update(
        &self,
        id: &str,
        patch: &ProductPatch,
        now: DateTime<Utc>,
    ) -> DbResult<Product> {
        debug!(id = %id, "Updating product");

        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut product = fetch_one(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))?;
        patch.apply(&mut product, now)?;
        write_back(&mut tx, &product).await?;

        tx.commit().await?;
        Ok(product)
    }

    /// Deletes a product. Returns `false` if it did not exist.
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        debug!(id = %id, "Deleting product");

        let _guard = self.lock.lock().await;
        let result = sqlx::query("DELETE FROM products WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Decrements stock for every catalogue line of a sale.
    ///
    /// Manual lines are skipped. Lines for the same product are summed
    /// first. Lines whose product no longer exists are skipped with a
    /// warning.
    ///
    /// ## Returns
    /// The updated products, in first-seen line order.
    pub async fn apply_sale(&self, items: &[LineItem], now: DateTime<Utc>) -> DbResult<Vec<Product>> {
        let mut quantities: Vec<(&str, i64)> = Vec::new();
        for item in items.iter().filter(|item| !item.manual) {
            match quantities.iter_mut().find(|(id, _)| *id == item.product_id) {
                Some((_, qty)) => *qty += item.quantity,
                None => quantities.push((item.product_id.as_str(), item.quantity)),
            }
        }

        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut updated = Vec::with_capacity(quantities.len());

        for (id, qty) in quantities {
            let result = sqlx::query(
                "UPDATE products SET stock = stock - ?2, updated_at = ?3 WHERE id = ?1",
            )
            .bind(id)
            .bind(qty)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                warn!(product_id = %id, "Sold product no longer in catalogue");
                continue;
            }
            if let Some(product) = fetch_one(&mut tx, id).await? {
                updated.push(product);
            }
        }

        tx.commit().await?;
        debug!(count = updated.len(), "Stock decremented for sale");
        Ok(updated)
    }

    /// Read-modify-write of the whole collection under the write lock.
    ///
    /// `f` receives the current snapshot and returns the collection to
    /// persist plus a value handed back to the caller.
    pub async fn update_all<F, R>(&self, f: F) -> DbResult<R>
    where
        F: FnOnce(Vec<Product>) -> (Vec<Product>, R),
    {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let current = fetch_all(&mut tx).await?;
        let (next, out) = f(current);
        replace_all(&mut tx, &next).await?;

        tx.commit().await?;
        Ok(out)
    }
}

// =============================================================================
// Connection-level helpers
// =============================================================================

async fn fetch_all(conn: &mut SqliteConnection) -> DbResult<Vec<Product>> {
    let products = sqlx::query_as::<_, Product>(
        r#"
        SELECT id, code, name, price, stock, unit, created_at, updated_at
        FROM products
        ORDER BY seq
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    Ok(products)
}

async fn fetch_one(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(
        r#"
        SELECT id, code, name, price, stock, unit, created_at, updated_at
        FROM products
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(product)
}

async fn insert(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO products (id, code, name, price, stock, unit, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&product.id)
    .bind(&product.code)
    .bind(&product.name)
    .bind(product.price)
    .bind(product.stock)
    .bind(&product.unit)
    .bind(product.created_at)
    .bind(product.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::UniqueViolation { .. } => DbError::duplicate("product id", &product.id),
        other => other,
    })?;

    Ok(())
}

async fn write_back(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE products SET
            code = ?2,
            name = ?3,
            price = ?4,
            stock = ?5,
            unit = ?6,
            updated_at = ?7
        WHERE id = ?1
        "#,
    )
    .bind(&product.id)
    .bind(&product.code)
    .bind(&product.name)
    .bind(product.price)
    .bind(product.stock)
    .bind(&product.unit)
    .bind(product.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn replace_all(conn: &mut SqliteConnection, products: &[Product]) -> DbResult<()> {
    sqlx::query("DELETE FROM products")
        .execute(&mut *conn)
        .await?;
    for product in products {
        insert(conn, product).await?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
