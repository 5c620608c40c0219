//! panopticon-store: SQLite-backed inventory reconciliation.
//!
//! This crate is the single mutation point for the device inventory. Scan
//! observations are merged into persisted devices and ports here, and every
//! detected difference is appended to the change history in the same
//! transaction.

pub mod client;
pub mod maintenance;
pub mod mutations;
pub mod queries;
pub mod retry;
pub mod schema;

pub use client::{ReconciliationStore, StoreError};
pub use retry::execute_with_retry;
