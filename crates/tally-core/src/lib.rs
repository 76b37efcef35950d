//! # tally-core: Pure Reconciliation Logic for Tally
//!
//! This crate holds every rule of the reconciliation engine as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tally Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │        Web UI (external): products, new bill, bills, charts     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          tally-sync (Sync Driver, Remote Gateway, Push Queue)    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ allocator │  │ reconcile │  │   rows    │  │   │
//! │  │   │  Product  │  │ SS01,SS02 │  │  merge    │  │  RawRow   │  │   │
//! │  │   │   Bill    │  │           │  │  dedup    │  │  mapping  │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tally-db (Record Store on SQLite)               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Product, Bill, LineItem, drafts and patches)
//! - [`money`] - Money type with integer arithmetic
//! - [`allocator`] - Collision-free bill number allocation
//! - [`reconcile`] - Local/remote merge and bill deduplication
//! - [`rows`] - Normalization of loosely-typed remote sheet rows
//! - [`stats`] - Dashboard stats and revenue-by-day aggregation
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::allocator::next_bill_number;
//!
//! let existing = ["SS01", "SS02", "SS05"];
//! assert_eq!(next_bill_number(existing.iter().copied()), "SS06");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocator;
pub mod error;
pub mod money;
pub mod reconcile;
pub mod rows;
pub mod stats;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Prefix of every allocated bill number.
pub const BILL_NUMBER_PREFIX: &str = "SS";

/// Minimum digit width of the numeric part of a bill number.
///
/// Wider numbers keep their natural width: `SS07`, `SS99`, `SS100`.
pub const BILL_NUMBER_MIN_WIDTH: usize = 2;

/// Products with stock strictly below this count as low stock.
pub const LOW_STOCK_THRESHOLD: i64 = 10;

/// Maximum quantity of a single line item.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10)
pub const MAX_ITEM_QUANTITY: i64 = 999;
