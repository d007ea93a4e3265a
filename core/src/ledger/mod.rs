//! Ledger mutation primitives.
//!
//! Each function takes the caller's open [`Transaction`](crate::store::Transaction)
//! and performs one locked read-modify-write. Nothing is visible to other
//! transactions until the caller commits.

pub mod account;
pub mod inventory;
