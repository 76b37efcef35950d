//! # Remote Row Mapping
//!
//! Normalizes loosely-typed spreadsheet rows into Products and Bills, and
//! encodes local records back into rows.
//!
//! ## Shape of a Row
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  {"Id": "", "Name": " Bangles ", "Price": "120", "Available Qty": 4.0} │
//! │                                                                         │
//! │  - any column may be missing                                           │
//! │  - numbers arrive as numbers, numeric strings, or junk                 │
//! │  - ids may be blank for rows typed into the sheet by hand              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! Every mapping function is total:
//! - unparsable numbers become `0`
//! - missing or unparsable dates become "now"
//! - missing text becomes empty
//! - a blank id is synthesized (UUID v5 over kind, the row's identifying
//!   columns and how many earlier blank-id rows shared them). Editing any
//!   other cell keeps the id, so a hand-typed row stays one record
//! - products with an empty name are discarded
//! - a bill without a bill number takes its id as the number

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::money::Money;
use crate::types::{non_blank, Bill, Product, TaxRate};

/// Namespace for ids synthesized from remote rows.
const ROW_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x1d, 0x2c, 0x4e, 0x9a, 0x37, 0x4b, 0x52, 0x8c, 0x05, 0x3e, 0x71, 0xd4, 0x20, 0xb9, 0x66,
]);

// =============================================================================
// Column Names
// =============================================================================

pub mod columns {
    pub const ID: &str = "Id";
    pub const ID_UPPER: &str = "ID";

    pub const CODE: &str = "Code";
    pub const NAME: &str = "Name";
    pub const PRICE: &str = "Price";
    pub const AVAILABLE_QTY: &str = "Available Qty";
    pub const QUANTITY: &str = "Quantity";
    pub const UNIT: &str = "Unit(kg,cm,litter)";

    pub const BILL_NUMBER: &str = "Bill Number";
    pub const BILL_NO: &str = "Bill No";
    pub const DATE: &str = "Date";
    pub const CUSTOMER_NAME: &str = "Customer Name";
    pub const PHONE: &str = "Phone";
    pub const ITEM_ID: &str = "Item Id";
    pub const SUB_TOTAL: &str = "Sub total";
    pub const DISCOUNT: &str = "Discount";
    pub const TOTAL_TENDERED: &str = "Total Tendered";
}

// =============================================================================
// RawRow
// =============================================================================

/// One row of the remote sheet: column name → cell value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(Map<String, Value>);

impl RawRow {
    pub fn new() -> Self {
        RawRow(Map::new())
    }

    /// Accepts JSON objects; anything else is not a row.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(RawRow(map)),
            _ => None,
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// First non-empty text among `columns`, trimmed. Empty if none.
    pub fn text(&self, columns: &[&str]) -> String {
        columns
            .iter()
            .filter_map(|column| self.0.get(*column))
            .map(cell_text)
            .find(|text| !text.is_empty())
            .unwrap_or_default()
    }

    /// Number in the first present, non-null column among `columns`.
    /// Unparsable or missing values are `0`.
    pub fn number(&self, columns: &[&str]) -> f64 {
        columns
            .iter()
            .filter_map(|column| self.0.get(*column))
            .find(|value| !value.is_null())
            .map(parse_number)
            .unwrap_or(0.0)
    }

    /// Timestamp in `column`, or `now` if missing or unparsable.
    pub fn date_or(&self, column: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        self.0.get(column).and_then(parse_date).unwrap_or(now)
    }

}

/// Hands out deterministic ids to rows that arrived without one.
///
/// The id covers only identifying columns (name and code for products;
/// number, date and customer for bills). Rows that share all of them are
/// told apart by their order among blank-id rows.
struct IdSynthesizer {
    kind: &'static str,
    seen: HashMap<String, usize>,
}

impl IdSynthesizer {
    fn new(kind: &'static str) -> Self {
        IdSynthesizer {
            kind,
            seen: HashMap::new(),
        }
    }

    fn next(&mut self, identity: &[&str]) -> String {
        let key = serde_json::to_string(identity).unwrap_or_default();
        let occurrence = self.seen.entry(key.clone()).or_insert(0);
        let name = format!("{}:{}:{}", self.kind, key, occurrence);
        *occurrence += 1;
        Uuid::new_v5(&ROW_ID_NAMESPACE, name.as_bytes()).to_string()
    }
}

impl From<Map<String, Value>> for RawRow {
    fn from(map: Map<String, Value>) -> Self {
        RawRow(map)
    }
}

// =============================================================================
// Cell Parsing
// =============================================================================

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Converts a cell to a finite number, `0` otherwise.
///
/// Blank strings are `0`, booleans are `1`/`0`.
pub fn parse_number(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse::<f64>().unwrap_or(0.0)
            }
        }
        Value::Bool(true) => 1.0,
        _ => 0.0,
    };
    if parsed.is_finite() {
        parsed
    } else {
        0.0
    }
}

/// Parses a date cell.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`,
/// `YYYY-MM-DD`, `DD/MM/YYYY` and epoch milliseconds. Naive values are
/// read as UTC.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => parse_date_str(s.trim()),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

// =============================================================================
// Inbound Mapping
// =============================================================================

/// Maps product rows. Rows with an empty name are dropped.
pub fn map_product_rows(rows: &[RawRow], now: DateTime<Utc>) -> Vec<Product> {
    use self::columns::*;

    let mut ids = IdSynthesizer::new("products");
    rows.iter()
        .filter_map(|row| {
            let name = row.text(&[NAME]);
            if name.is_empty() {
                return None;
            }
            let code = row.text(&[CODE]);

            let id = match row.text(&[ID, ID_UPPER]) {
                id if id.is_empty() => ids.next(&[name.as_str(), code.as_str()]),
                id => id,
            };

            Some(Product {
                id,
                code,
                name,
                price: Money::from_major_lossy(row.number(&[PRICE])),
                stock: row.number(&[AVAILABLE_QTY, QUANTITY]).round() as i64,
                unit: Some(row.text(&[UNIT])).filter(|unit| !unit.is_empty()),
                created_at: now,
                updated_at: now,
            })
        })
        .collect()
}

/// Maps bill rows. Remote bills never carry line items or tax.
pub fn map_bill_rows(rows: &[RawRow], now: DateTime<Utc>) -> Vec<Bill> {
    use self::columns::*;

    let mut ids = IdSynthesizer::new("bills");
    rows.iter()
        .map(|row| {
            let number = row.text(&[BILL_NUMBER, BILL_NO]);
            let id = match row.text(&[ID, ID_UPPER]) {
                id if id.is_empty() => ids.next(&[
                    number.as_str(),
                    row.text(&[DATE]).as_str(),
                    row.text(&[CUSTOMER_NAME]).as_str(),
                ]),
                id => id,
            };
            let bill_number = if number.is_empty() { id.clone() } else { number };
            let discount = Money::from_major_lossy(row.number(&[DISCOUNT]));

            Bill {
                id,
                bill_number,
                customer_name: non_blank(Some(row.text(&[CUSTOMER_NAME]))),
                customer_phone: non_blank(Some(row.text(&[PHONE]))),
                items: Vec::new(),
                item_ids: row.text(&[ITEM_ID]),
                subtotal: Money::from_major_lossy(row.number(&[SUB_TOTAL])),
                discount,
                discount_amount: discount,
                tax: TaxRate::zero(),
                tax_amount: Money::zero(),
                total: Money::from_major_lossy(row.number(&[TOTAL_TENDERED])),
                created_at: row.date_or(DATE, now),
            }
        })
        .collect()
}

// =============================================================================
// Outbound Encoding
// =============================================================================

/// Encodes a product as a sheet row.
pub fn product_to_row(product: &Product) -> RawRow {
    use self::columns::*;

    RawRow::new()
        .with(ID, product.id.as_str())
        .with(CODE, product.code.as_str())
        .with(NAME, product.name.as_str())
        .with(PRICE, json!(product.price.to_major()))
        .with(UNIT, product.unit.as_deref().unwrap_or(""))
        .with(QUANTITY, product.stock)
        .with(AVAILABLE_QTY, product.stock)
}

/// Encodes a bill as a sheet row. Items and tax have no column.
pub fn bill_to_row(bill: &Bill) -> RawRow {
    use self::columns::*;

    RawRow::new()
        .with(ID, bill.id.as_str())
        .with(BILL_NUMBER, bill.bill_number.as_str())
        .with(
            DATE,
            bill.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
        .with(CUSTOMER_NAME, bill.customer_name.as_deref().unwrap_or(""))
        .with(PHONE, bill.customer_phone.as_deref().unwrap_or(""))
        .with(ITEM_ID, bill.item_ids.as_str())
        .with(SUB_TOTAL, json!(bill.subtotal.to_major()))
        .with(DISCOUNT, json!(bill.discount.to_major()))
        .with(TOTAL_TENDERED, json!(bill.total.to_major()))
}

// =============================================================================
// Unit Tests
// =============================================================================
