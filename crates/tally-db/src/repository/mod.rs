//! # Repository Module
//!
//! One repository per collection.
//!
//! ```text
//! db.products()                      db.bills()
//! ├── get_all / get_by_id            ├── get_all (dedup, self-healing)
//! ├── set_all (full replace)         ├── set_all (dedup, then replace)
//! ├── add / update / delete          ├── add (same number is replaced)
//! ├── apply_sale                     ├── create (allocate + insert)
//! └── update_all                     ├── clear
//!                                    └── update_all
//! ```
//!
//! `update_all` is the read-modify-write primitive: the closure sees one
//! snapshot of the collection and its result is written back in the same
//! transaction, under the collection lock.

pub mod bill;
pub mod product;

use std::sync::Arc;

use tokio::sync::Mutex;

/// Write lock for one collection.
pub type CollectionLock = Arc<Mutex<()>>;
