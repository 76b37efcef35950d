//! # Domain Types
//!
//! Core domain types used throughout Tally.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Bill       │   │    LineItem     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  product_id     │       │
//! │  │  code, name     │   │  bill_number    │   │  name, price    │       │
//! │  │  price, stock   │   │  items (local)  │   │  quantity       │       │
//! │  │  timestamps     │   │  money breakdown│   │  total, manual  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    TaxRate      │   │  ProductPatch   │   │   BillDraft     │       │
//! │  │  bps (u32)      │   │  partial update │   │  cart → Bill    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! - `id`: UUID, immutable, joins local and remote copies of a Product
//! - `bill_number`: the human-facing key of a Bill (`SS01`, `SS02`, ...);
//!   bills are matched against the sheet by this key, not by `id`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::validation::{
    validate_phone, validate_price, validate_product_code, validate_product_name,
    validate_quantity, validate_stock, validate_tax_rate,
};
use crate::LOW_STOCK_THRESHOLD;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so 1800 bps = 18%.
/// The sheet and the UI speak percentages; `from_percentage` converts once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Creates a tax rate from a percentage. Negative or non-finite input is zero.
    pub fn from_percentage(pct: f64) -> Self {
        if !pct.is_finite() || pct <= 0.0 {
            return TaxRate::zero();
        }
        TaxRate((pct * 100.0).round() as u32)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display and sheet cells).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product in the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    /// Unique identifier, shared with the sheet's `Id` column.
    pub id: String,

    /// Shop code (free text, may be empty).
    pub code: String,

    /// Display name. Never empty for a valid record.
    pub name: String,

    /// Unit price.
    pub price: Money,

    /// Units on hand. Negative only as a defect.
    pub stock: i64,

    /// Unit of measure (kg, cm, litre...), if any.
    pub unit: Option<String>,

    /// When the product was first created. Never changes afterwards.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    /// When the product was last mutated locally.
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates a new product with a fresh UUID and both timestamps at `now`.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        price: Money,
        stock: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Product {
            id: Uuid::new_v4().to_string(),
            code: code.into(),
            name: name.into(),
            price,
            stock,
            unit: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when stock has fallen below the low-stock threshold.
    #[inline]
    pub fn is_low_stock(&self) -> bool {
        self.stock < LOW_STOCK_THRESHOLD
    }

    /// Checks there is enough stock to sell `quantity` units.
    pub fn ensure_stock(&self, quantity: i64) -> CoreResult<()> {
        if self.stock < quantity {
            return Err(CoreError::InsufficientStock {
                name: self.name.clone(),
                available: self.stock,
                requested: quantity,
            });
        }
        Ok(())
    }
}

/// Partial update for a Product.
///
/// `None` fields are left untouched. Applying a patch always stamps
/// `updated_at`, even when every field is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProductPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub price: Option<Money>,
    pub stock: Option<i64>,
    pub unit: Option<String>,
}

impl ProductPatch {
    /// A patch that only sets stock.
    pub fn stock(stock: i64) -> Self {
        ProductPatch {
            stock: Some(stock),
            ..Default::default()
        }
    }

    /// Checks every present field without touching a product.
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(ref name) = self.name {
            validate_product_name(name)?;
        }
        if let Some(ref code) = self.code {
            validate_product_code(code)?;
        }
        if let Some(price) = self.price {
            validate_price(price)?;
        }
        if let Some(stock) = self.stock {
            validate_stock(stock)?;
        }
        Ok(())
    }

    /// Applies the patch over `product`. `created_at` is never touched.
    ///
    /// The product is left unchanged when any field is invalid.
    pub fn apply(&self, product: &mut Product, now: DateTime<Utc>) -> CoreResult<()> {
        self.validate()?;

        if let Some(ref name) = self.name {
            product.name = name.trim().to_string();
        }
        if let Some(ref code) = self.code {
            product.code = code.trim().to_string();
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(stock) = self.stock {
            product.stock = stock;
        }
        if let Some(ref unit) = self.unit {
            product.unit = Some(unit.clone()).filter(|u| !u.trim().is_empty());
        }
        product.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Line Item
// =============================================================================

/// A line on a bill.
///
/// Line items exist only locally: the sheet has no column that can carry
/// them, which is why the merge keeps the local copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    /// Catalogue product id, or a random id for manual items.
    pub product_id: String,
    /// Name at time of sale (frozen).
    pub name: String,
    /// Unit price at time of sale (frozen).
    pub price: Money,
    pub quantity: i64,
    /// price × quantity.
    pub total: Money,
    /// Ad-hoc item typed at the counter; never touches stock.
    #[serde(default)]
    pub manual: bool,
}

impl LineItem {
    /// Builds a line for a catalogue product, checking stock first.
    pub fn from_product(product: &Product, quantity: i64) -> CoreResult<Self> {
        validate_quantity(quantity)?;
        product.ensure_stock(quantity)?;

        Ok(LineItem {
            product_id: product.id.clone(),
            name: product.name.clone(),
            price: product.price,
            quantity,
            total: product.price * quantity,
            manual: false,
        })
    }

    /// Builds an ad-hoc line that is not in the catalogue.
    pub fn manual(name: impl Into<String>, price: Money, quantity: i64) -> CoreResult<Self> {
        let name = name.into();
        validate_product_name(&name)?;
        validate_quantity(quantity)?;
        if price.minor() <= 0 {
            return Err(crate::ValidationError::MustBePositive {
                field: "price".to_string(),
            }
            .into());
        }

        Ok(LineItem {
            product_id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            price,
            quantity,
            total: price * quantity,
            manual: true,
        })
    }
}

// =============================================================================
// Bill
// =============================================================================

/// A finalized bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Bill {
    /// Internal identifier, independent of `bill_number`.
    pub id: String,

    /// Business key, unique across the collection.
    pub bill_number: String,

    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,

    /// Line items. Empty for bills first seen on the sheet.
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub items: Vec<LineItem>,

    /// Comma-joined product ids, the flat form the sheet can store.
    pub item_ids: String,

    pub subtotal: Money,
    /// Discount as entered at the counter (absolute amount).
    pub discount: Money,
    pub discount_amount: Money,
    pub tax: TaxRate,
    pub tax_amount: Money,
    pub total: Money,

    /// Creation time. Drives dedup tie-breaking and revenue-by-date.
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Bill {
    /// Joins the product ids of `items` the way the sheet stores them.
    pub fn item_ids_of(items: &[LineItem]) -> String {
        items
            .iter()
            .map(|item| item.product_id.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Items that decrement catalogue stock.
    pub fn stocked_items(&self) -> impl Iterator<Item = &LineItem> {
        self.items.iter().filter(|item| !item.manual)
    }
}

/// A bill being assembled at the counter, before it has a number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BillDraft {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub items: Vec<LineItem>,
    /// Absolute discount off the subtotal.
    pub discount: Money,
    /// Tax applied to (subtotal - discount).
    pub tax: TaxRate,
}

impl BillDraft {
    /// Adds `quantity` of `product`, folding into an existing line for the
    /// same product. Stock is checked against the combined quantity.
    pub fn add_product(&mut self, product: &Product, quantity: i64) -> CoreResult<()> {
        validate_quantity(quantity)?;

        if let Some(line) = self
            .items
            .iter_mut()
            .find(|line| !line.manual && line.product_id == product.id)
        {
            let combined = line.quantity + quantity;
            product.ensure_stock(combined)?;
            line.quantity = combined;
            line.total = line.price * combined;
            return Ok(());
        }

        self.items.push(LineItem::from_product(product, quantity)?);
        Ok(())
    }

    /// Sum of line totals.
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(|line| line.total).sum()
    }

    /// Finalizes the draft into a Bill with the given number.
    ///
    /// ## Totals
    /// ```text
    /// subtotal   = Σ line.total
    /// taxable    = subtotal - discount
    /// tax_amount = taxable × tax
    /// total      = taxable + tax_amount
    /// ```
    pub fn into_bill(self, bill_number: String, now: DateTime<Utc>) -> CoreResult<Bill> {
        if self.items.is_empty() {
            return Err(CoreError::EmptyBill);
        }
        if self.discount.is_negative() {
            return Err(crate::ValidationError::OutOfRange {
                field: "discount".to_string(),
                min: 0,
                max: i64::MAX,
            }
            .into());
        }

        if let Some(ref phone) = self.customer_phone {
            validate_phone(phone)?;
        }
        validate_tax_rate(self.tax)?;

        let subtotal = self.subtotal();
        if self.discount > subtotal {
            return Err(CoreError::DiscountExceedsSubtotal {
                discount: self.discount.to_string(),
                subtotal: subtotal.to_string(),
            });
        }

        let taxable = subtotal - self.discount;
        let tax_amount = taxable.calculate_tax(self.tax);

        Ok(Bill {
            id: Uuid::new_v4().to_string(),
            bill_number,
            customer_name: non_blank(self.customer_name),
            customer_phone: non_blank(self.customer_phone),
            item_ids: Bill::item_ids_of(&self.items),
            items: self.items,
            subtotal,
            discount: self.discount,
            discount_amount: self.discount,
            tax: self.tax,
            tax_amount,
            total: taxable + tax_amount,
            created_at: now,
        })
    }
}

/// Trims and drops empty strings.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Unit Tests
// =============================================================================
