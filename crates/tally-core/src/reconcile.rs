//! # Reconciliation
//!
//! Merges a freshly fetched remote snapshot with the local collections.
//!
//! ## Policy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Merge Policy                                       │
//! │                                                                         │
//! │  Products (matched by id)                                              │
//! │  ├── remote fields win                                                 │
//! │  └── created_at / updated_at come from local                           │
//! │                                                                         │
//! │  Bills (matched by bill_number)                                        │
//! │  ├── remote row is the base                                            │
//! │  └── local wins for what the sheet cannot hold:                        │
//! │      items, item_ids, money breakdown, customer details                │
//! │                                                                         │
//! │  Local-only records   → kept unchanged, listed in to_push              │
//! │  Remote-only records  → adopted as-is                                  │
//! │  Empty remote + local → "not yet seeded": keep local, push all of it   │
//! │                                                                         │
//! │  Nothing is ever deleted by a merge.                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every function here is pure. Persisting `merged` and sending `to_push`
//! belong to the caller.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{non_blank, Bill, Product};

// =============================================================================
// Results
// =============================================================================

/// Outcome of a product merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductMerge {
    /// Collection to persist locally.
    pub merged: Vec<Product>,
    /// Local records the remote has not seen.
    pub to_push: Vec<Product>,
    /// Remote was empty while local was not.
    pub seeding: bool,
}

/// Outcome of a bill merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillMerge {
    /// Collection to persist locally, already deduplicated.
    pub merged: Vec<Bill>,
    /// Local records the remote has not seen.
    pub to_push: Vec<Bill>,
    /// Remote was empty while local was not.
    pub seeding: bool,
}

// =============================================================================
// Products
// =============================================================================

/// Merges mapped remote products with the local collection.
///
/// A remote snapshot listing the same id twice keeps the last row, at the
/// position of the first.
pub fn merge_products(remote: Vec<Product>, local: &[Product]) -> ProductMerge {
    if remote.is_empty() && !local.is_empty() {
        return ProductMerge {
            merged: local.to_vec(),
            to_push: local.to_vec(),
            seeding: true,
        };
    }

    let local_by_id: HashMap<&str, &Product> =
        local.iter().map(|p| (p.id.as_str(), p)).collect();

    let mut merged: Vec<Product> = Vec::with_capacity(remote.len() + local.len());
    let mut position: HashMap<String, usize> = HashMap::new();

    for incoming in remote {
        let record = match local_by_id.get(incoming.id.as_str()) {
            Some(existing) => Product {
                created_at: existing.created_at,
                updated_at: existing.updated_at,
                ..incoming
            },
            None => incoming,
        };

        match position.get(&record.id) {
            Some(&index) => merged[index] = record,
            None => {
                position.insert(record.id.clone(), merged.len());
                merged.push(record);
            }
        }
    }

    let to_push: Vec<Product> = local
        .iter()
        .filter(|p| !position.contains_key(&p.id))
        .cloned()
        .collect();
    merged.extend(to_push.iter().cloned());

    ProductMerge {
        merged,
        to_push,
        seeding: false,
    }
}

// =============================================================================
// Bills
// =============================================================================

/// Merges mapped remote bills with the local collection.
pub fn merge_bills(remote: Vec<Bill>, local: &[Bill]) -> BillMerge {
    if remote.is_empty() && !local.is_empty() {
        let local = dedup_bills(local.to_vec());
        return BillMerge {
            merged: local.clone(),
            to_push: local,
            seeding: true,
        };
    }

    let local_by_number: HashMap<&str, &Bill> = local
        .iter()
        .map(|b| (b.bill_number.as_str(), b))
        .collect();
    let remote_numbers: HashSet<String> = remote.iter().map(|b| b.bill_number.clone()).collect();

    let mut merged: Vec<Bill> = remote
        .into_iter()
        .map(|incoming| match local_by_number.get(incoming.bill_number.as_str()) {
            Some(existing) => overlay_local(incoming, existing),
            None => Bill {
                items: Vec::new(),
                ..incoming
            },
        })
        .collect();

    let to_push = dedup_bills(
        local
            .iter()
            .filter(|b| !remote_numbers.contains(&b.bill_number))
            .cloned()
            .collect(),
    );
    merged.extend(to_push.iter().cloned());

    BillMerge {
        merged: dedup_bills(merged),
        to_push,
        seeding: false,
    }
}

/// Remote bill as base, local values for the fields the sheet cannot carry.
///
/// Money fields are always present locally, so they always win.
fn overlay_local(remote: Bill, local: &Bill) -> Bill {
    Bill {
        items: if local.items.is_empty() {
            remote.items
        } else {
            local.items.clone()
        },
        item_ids: if local.item_ids.is_empty() {
            remote.item_ids
        } else {
            local.item_ids.clone()
        },
        subtotal: local.subtotal,
        discount: local.discount,
        discount_amount: local.discount_amount,
        tax: local.tax,
        tax_amount: local.tax_amount,
        total: local.total,
        customer_name: non_blank(local.customer_name.clone()).or(remote.customer_name),
        customer_phone: non_blank(local.customer_phone.clone()).or(remote.customer_phone),
        ..remote
    }
}

// =============================================================================
// Deduplication
// =============================================================================

/// Collapses bills sharing a `bill_number` to one.
///
/// The survivor has the latest `created_at`; on a tie the later-seen
/// record wins. Output order follows the first appearance of each number.
///
/// ## Example
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use tally_core::reconcile::dedup_bills;
/// use tally_core::{BillDraft, LineItem, Money};
///
/// let bill = |n: &str, hour: u32| {
///     let mut draft = BillDraft::default();
///     draft.items.push(LineItem::manual("Pin", Money::from_minor(100), 1).unwrap());
///     draft
///         .into_bill(n.to_string(), Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap())
///         .unwrap()
/// };
///
/// let out = dedup_bills(vec![bill("SS01", 9), bill("SS02", 9), bill("SS01", 11)]);
/// assert_eq!(out.len(), 2);
/// assert_eq!(out[0].created_at.format("%H").to_string(), "11");
/// ```
pub fn dedup_bills(bills: Vec<Bill>) -> Vec<Bill> {
    let mut out: Vec<Bill> = Vec::with_capacity(bills.len());
    let mut position: HashMap<String, usize> = HashMap::new();

    for bill in bills {
        match position.get(&bill.bill_number) {
            Some(&index) => {
                if bill.created_at >= out[index].created_at {
                    out[index] = bill;
                }
            }
            None => {
                position.insert(bill.bill_number.clone(), out.len());
                out.push(bill);
            }
        }
    }

    out
}

/// True if any `bill_number` appears more than once.
pub fn has_duplicate_numbers(bills: &[Bill]) -> bool {
    let mut seen = HashSet::with_capacity(bills.len());
    bills.iter().any(|b| !seen.insert(b.bill_number.as_str()))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::types::{BillDraft, LineItem, TaxRate};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 10, hour, 0, 0).unwrap()
    }

    fn product(id: &str, name: &str, stock: i64, ts: DateTime<Utc>) -> Product {
        let mut p = Product::new("", name, Money::from_minor(1000), stock, ts);
        p.id = id.to_string();
        p
    }

    fn local_bill(number: &str, ts: DateTime<Utc>) -> Bill {
        let mut draft = BillDraft {
            customer_name: Some("Lakshmi".into()),
            customer_phone: Some("98450 00000".into()),
            discount: Money::from_minor(500),
            tax: TaxRate::from_percentage(5.0),
            ..Default::default()
        };
        draft
            .items
            .push(LineItem::manual("Hair clip", Money::from_minor(2500), 2).unwrap());
        draft.into_bill(number.to_string(), ts).unwrap()
    }

    /// What a bill looks like after a round trip through the sheet.
    fn remote_bill(number: &str, total_minor: i64, ts: DateTime<Utc>) -> Bill {
        Bill {
            id: format!("remote-{number}"),
            bill_number: number.to_string(),
            customer_name: None,
            customer_phone: None,
            items: Vec::new(),
            item_ids: String::new(),
            subtotal: Money::from_minor(total_minor),
            discount: Money::zero(),
            discount_amount: Money::zero(),
            tax: TaxRate::zero(),
            tax_amount: Money::zero(),
            total: Money::from_minor(total_minor),
            created_at: ts,
        }
    }

    // -------------------------------------------------------------------------
    // Products
    // -------------------------------------------------------------------------

    #[test]
    fn test_products_remote_fields_win_local_timestamps_kept() {
        let local = vec![product("p1", "Old name", 3, at(8))];
        let remote = vec![product("p1", "New name", 9, at(12))];

        let result = merge_products(remote, &local);

        assert_eq!(result.merged.len(), 1);
        assert_eq!(result.merged[0].name, "New name");
        assert_eq!(result.merged[0].stock, 9);
        assert_eq!(result.merged[0].created_at, at(8));
        assert_eq!(result.merged[0].updated_at, at(8));
        assert!(result.to_push.is_empty());
        assert!(!result.seeding);
    }

    #[test]
    fn test_products_local_only_kept_and_flagged() {
        let local = vec![product("p1", "Anklet", 3, at(8)), product("p2", "Toe ring", 4, at(9))];
        let remote = vec![product("p1", "Anklet", 3, at(12)), product("p3", "Nose pin", 1, at(12))];

        let result = merge_products(remote, &local);

        let ids: Vec<&str> = result.merged.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p3", "p2"]);
        assert_eq!(result.to_push, vec![local[1].clone()]);
        assert_eq!(result.merged[2], local[1]);
    }

    #[test]
    fn test_products_empty_remote_is_not_delete() {
        let local: Vec<Product> = (0..5)
            .map(|i| product(&format!("p{i}"), "Bindi", i, at(8)))
            .collect();

        let result = merge_products(Vec::new(), &local);

        assert!(result.seeding);
        assert_eq!(result.merged.len(), 5);
        assert_eq!(result.to_push.len(), 5);
    }

    #[test]
    fn test_products_both_empty() {
        let result = merge_products(Vec::new(), &[]);
        assert!(result.merged.is_empty());
        assert!(!result.seeding);
    }

    #[test]
    fn test_products_duplicate_remote_ids_collapse() {
        let remote = vec![product("p1", "First", 1, at(8)), product("p1", "Second", 2, at(8))];
        let result = merge_products(remote, &[]);
        assert_eq!(result.merged.len(), 1);
        assert_eq!(result.merged[0].name, "Second");
    }

    #[test]
    fn test_hand_typed_row_edited_between_syncs_stays_one_product() {
        use crate::rows::{map_product_rows, RawRow};
        use serde_json::json;

        let sheet_row = |qty: i64| {
            RawRow::from_value(json!({"Id": "", "Name": "Bangles", "Price": 120, "Available Qty": qty}))
                .unwrap()
        };

        let first = merge_products(map_product_rows(&[sheet_row(5)], at(9)), &[]);
        assert_eq!(first.merged.len(), 1);

        let second = merge_products(map_product_rows(&[sheet_row(4)], at(10)), &first.merged);
        assert_eq!(second.merged.len(), 1);
        assert_eq!(second.merged[0].stock, 4);
        assert!(second.to_push.is_empty());
    }

    // -------------------------------------------------------------------------
    // Bills
    // -------------------------------------------------------------------------

    #[test]
    fn test_bills_merge_preserves_local_items_and_breakdown() {
        let local = vec![local_bill("SS01", at(9))];
        let remote = vec![remote_bill("SS01", 1, at(9))];

        let result = merge_bills(remote, &local);
        let merged = &result.merged[0];

        assert_eq!(merged.items, local[0].items);
        assert_eq!(merged.item_ids, local[0].item_ids);
        assert_eq!(merged.total, local[0].total);
        assert_eq!(merged.tax, local[0].tax);
        assert_eq!(merged.tax_amount, local[0].tax_amount);
        assert_eq!(merged.customer_name.as_deref(), Some("Lakshmi"));
        assert_eq!(merged.id, "remote-SS01");
        assert!(result.to_push.is_empty());
    }

    #[test]
    fn test_bills_remote_customer_fills_blank_local() {
        let mut local = local_bill("SS01", at(9));
        local.customer_name = None;
        let mut remote = remote_bill("SS01", 100, at(9));
        remote.customer_name = Some("From sheet".into());

        let result = merge_bills(vec![remote], &[local]);
        assert_eq!(result.merged[0].customer_name.as_deref(), Some("From sheet"));
    }

    #[test]
    fn test_bills_remote_only_adopted_with_empty_items() {
        let local = vec![local_bill("SS01", at(9))];
        let remote = vec![remote_bill("SS01", 1, at(9)), remote_bill("SS02", 700, at(10))];

        let result = merge_bills(remote, &local);

        assert_eq!(result.merged.len(), 2);
        assert_eq!(result.merged[1].bill_number, "SS02");
        assert!(result.merged[1].items.is_empty());
        assert_eq!(result.merged[1].total.minor(), 700);
    }

    #[test]
    fn test_bills_local_only_kept_and_flagged() {
        let local = vec![local_bill("SS01", at(9)), local_bill("SS02", at(10))];
        let remote = vec![remote_bill("SS01", 1, at(9))];

        let result = merge_bills(remote, &local);

        assert_eq!(result.merged.len(), 2);
        assert_eq!(result.merged[1], local[1]);
        assert_eq!(result.to_push, vec![local[1].clone()]);
    }

    #[test]
    fn test_bills_empty_remote_seeds() {
        let local = vec![local_bill("SS01", at(9)), local_bill("SS02", at(10))];
        let result = merge_bills(Vec::new(), &local);

        assert!(result.seeding);
        assert_eq!(result.merged, local);
        assert_eq!(result.to_push.len(), 2);
    }

    #[test]
    fn test_bills_merge_output_is_deduplicated() {
        let remote = vec![remote_bill("SS01", 100, at(9)), remote_bill("SS01", 200, at(11))];
        let result = merge_bills(remote, &[]);

        assert_eq!(result.merged.len(), 1);
        assert_eq!(result.merged[0].total.minor(), 200);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let local = vec![local_bill("SS01", at(9)), local_bill("SS02", at(10))];
        let remote = vec![remote_bill("SS01", 1, at(9))];

        let first = merge_bills(remote.clone(), &local);
        let second = merge_bills(remote, &first.merged);
        assert_eq!(first.merged, second.merged);
    }

    // -------------------------------------------------------------------------
    // Dedup
    // -------------------------------------------------------------------------

    #[test]
    fn test_dedup_keeps_latest_created_at() {
        let bills = vec![
            remote_bill("SS01", 100, at(12)),
            remote_bill("SS02", 50, at(9)),
            remote_bill("SS01", 300, at(8)),
            remote_bill("SS01", 200, at(10)),
        ];

        let out = dedup_bills(bills);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].bill_number, "SS01");
        assert_eq!(out[0].total.minor(), 100);
        assert_eq!(out[1].bill_number, "SS02");
        assert!(!has_duplicate_numbers(&out));
    }

    #[test]
    fn test_dedup_tie_keeps_later_seen() {
        let out = dedup_bills(vec![remote_bill("SS01", 100, at(9)), remote_bill("SS01", 200, at(9))]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].total.minor(), 200);
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let bills = vec![
            remote_bill("SS01", 100, at(9)),
            remote_bill("SS01", 200, at(10)),
            remote_bill("SS03", 10, at(10)),
        ];
        let once = dedup_bills(bills);
        let twice = dedup_bills(once.clone());
        assert_eq!(once, twice);
    }
}
