//! # Bookstore Core
//!
//! Order transaction engine of an online bookstore.
//!
//! Buyers place orders against a store's inventory, optionally redeeming a
//! coupon, then pay from a prepaid balance. Orders move along a fixed
//! lifecycle and unpaid orders are canceled automatically once they age past
//! a deadline. Every multi-step operation runs in one datastore transaction:
//! either all of its effects commit or none do.
//!
//! ## Services
//!
//! - [`OrderEngine`]: create, pay, deliver, receive, cancel and list orders
//! - [`CouponLedger`]: define, collect and list coupons
//! - [`Cart`]: per-user shopping cart feeding `create_order`
//! - [`StoreAdmin`]: open stores, list and restock books, sales statistics
//! - [`TimeoutSweeper`]: periodic cancellation of stale unpaid orders
//!
//! ## Seams
//!
//! Services receive a [`BookstoreEnvironment`] holding the [`Datastore`], the
//! [`IdentityProvider`] and a [`Clock`]. Production wires in
//! `bookstore-postgres`; tests use the in-memory datastore of
//! `bookstore-testing`.
//!
//! ## Example
//!
//! ```ignore
//! use bookstore_core::*;
//!
//! let engine = OrderEngine::new(env);
//! let order = engine
//!     .create_order(&buyer, &store, &[LineItem::new("isbn-1", 2)], None)
//!     .await?;
//! engine.pay(&buyer, &order, "secret").await?;
//! ```

pub mod cart;
pub mod coupon;
pub mod environment;
pub mod error;
pub mod ledger;
pub mod order;
pub mod seller;
pub mod store;
pub mod sweeper;
pub mod types;

pub use cart::Cart;
pub use coupon::CouponLedger;
pub use environment::{BookstoreEnvironment, Clock, SystemClock};
pub use error::{BookstoreError, ErrorKind, Outcome, Result, StoreError};
pub use order::{OrderEngine, SettlementPolicy};
pub use seller::StoreAdmin;
pub use store::{Datastore, IdentityProvider, StoreFuture, Transaction};
pub use sweeper::TimeoutSweeper;
pub use types::{
    Account, AvailableCoupon, BookId, BookSales, CartItem, CouponDefinition, CouponGrant, CouponId,
    GrantId, GrantStatus, InventoryEntry, LineItem, NewCoupon, Order, OrderDetails, OrderId, OrderLine,
    OrderStatus, StoreId, StoreStats, UserId,
};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
