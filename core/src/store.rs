//! Persistence seam of the engine.
//!
//! The engine talks to its relational store through two traits:
//!
//! - [`Datastore`]: opens transactions and serves read-only queries.
//! - [`Transaction`]: an explicitly passed unit of work. Every `lock_*`
//!   method takes an exclusive row lock held until the transaction ends, so
//!   the read-then-write sequences of the ledgers cannot lose updates.
//!
//! A transaction is committed with [`Transaction::commit`]. Dropping it
//! without committing rolls back every mutation made through it, which is
//! how `?` inside an operation turns any failure into a full rollback.
//!
//! # Implementations
//!
//! - `PostgresDatastore` (in `bookstore-postgres`): production, row locks via
//!   `SELECT ... FOR UPDATE`
//! - `InMemoryDatastore` (in `bookstore-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return [`StoreFuture`] instead of using `async fn` so services can
//! hold `Arc<dyn Datastore>` and pass `&mut dyn Transaction` around.

use crate::error::StoreError;
use crate::types::{
    Account, AvailableCoupon, BookId, CartItem, CouponDefinition, CouponGrant, CouponId, GrantId,
    InventoryEntry, NewCoupon, Order, OrderDetails, OrderId, OrderLine, OrderStatus, StoreId,
    StoreStats, UserId,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by datastore methods
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Entry point to the relational store.
pub trait Datastore: Send + Sync {
    /// Begin a new transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] if no connection could be obtained.
    fn begin(&self) -> StoreFuture<'_, Box<dyn Transaction>>;

    /// Orders of a buyer, newest first, with their lines.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    fn orders_for_buyer(
        &self,
        buyer: &UserId,
        limit: i64,
        offset: i64,
    ) -> StoreFuture<'_, Vec<OrderDetails>>;

    /// `(buyer, order)` pairs of unpaid orders created strictly before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    fn unpaid_orders_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<(UserId, OrderId)>>;

    /// Unused grants of `user` whose coupon ends after `now`, optionally
    /// restricted to one store.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    fn available_coupons(
        &self,
        user: &UserId,
        store: Option<&StoreId>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<AvailableCoupon>>;

    /// Sales summary over settled orders of a store.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    fn store_stats(&self, store: &StoreId) -> StoreFuture<'_, StoreStats>;

    /// Unlocked read of one order with its lines.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    fn order(&self, order: &OrderId) -> StoreFuture<'_, Option<OrderDetails>>;

    /// Unlocked read of an inventory entry.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    fn inventory(&self, store: &StoreId, book: &BookId) -> StoreFuture<'_, Option<InventoryEntry>>;

    /// Unlocked read of an account.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    fn account(&self, user: &UserId) -> StoreFuture<'_, Option<Account>>;

    /// Cart of a user, ordered by store then book.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    fn cart_items(&self, user: &UserId) -> StoreFuture<'_, Vec<CartItem>>;
}

/// A unit of work against the relational store.
///
/// All methods share the errors of the backend: [`StoreError::Transient`]
/// on lock or connection failures, [`StoreError::Conflict`] on uniqueness
/// violations, [`StoreError::Database`] otherwise.
#[allow(missing_docs)]
pub trait Transaction: Send {
    // ── Inventory ──

    /// Lock and load an inventory entry
    fn lock_inventory(
        &mut self,
        store: &StoreId,
        book: &BookId,
    ) -> StoreFuture<'_, Option<InventoryEntry>>;

    /// Overwrite the stock level of a locked entry
    fn set_stock(&mut self, store: &StoreId, book: &BookId, stock_level: i64)
    -> StoreFuture<'_, ()>;

    /// Insert a new inventory entry
    fn insert_inventory(&mut self, entry: &InventoryEntry) -> StoreFuture<'_, ()>;

    // ── Accounts & stores ──

    /// Lock and load an account
    fn lock_account(&mut self, user: &UserId) -> StoreFuture<'_, Option<Account>>;

    /// Overwrite the balance of a locked account
    fn set_balance(&mut self, user: &UserId, balance: i64) -> StoreFuture<'_, ()>;

    /// Owner of a store. `Ok(None)` covers both an unknown store and a store
    /// whose owner record is gone; use [`Self::store_exists`] to tell them apart.
    fn store_owner(&mut self, store: &StoreId) -> StoreFuture<'_, Option<UserId>>;

    /// Whether the store row exists
    fn store_exists(&mut self, store: &StoreId) -> StoreFuture<'_, bool>;

    /// Insert a store row
    fn insert_store(&mut self, store: &StoreId, owner: &UserId) -> StoreFuture<'_, ()>;

    // ── Orders ──

    /// Lock and load an order
    fn lock_order(&mut self, order: &OrderId) -> StoreFuture<'_, Option<Order>>;

    /// Lines of an order
    fn order_lines(&mut self, order: &OrderId) -> StoreFuture<'_, Vec<OrderLine>>;

    /// Insert an order with its lines
    fn insert_order(&mut self, order: &Order, lines: &[OrderLine]) -> StoreFuture<'_, ()>;

    /// Overwrite the status of a locked order
    fn set_order_status(&mut self, order: &OrderId, status: OrderStatus) -> StoreFuture<'_, ()>;

    // ── Coupons ──

    /// Lock and load a coupon definition
    fn lock_coupon(&mut self, coupon: CouponId) -> StoreFuture<'_, Option<CouponDefinition>>;

    /// Insert a coupon definition, returning its id
    fn insert_coupon(&mut self, coupon: &NewCoupon) -> StoreFuture<'_, CouponId>;

    /// Overwrite the remaining stock of a locked coupon
    fn set_coupon_stock(&mut self, coupon: CouponId, stock: i64) -> StoreFuture<'_, ()>;

    /// Lock and load a grant
    fn lock_grant(&mut self, grant: GrantId) -> StoreFuture<'_, Option<CouponGrant>>;

    /// Insert an unused grant, returning its id
    fn insert_grant(&mut self, owner: &UserId, coupon: CouponId) -> StoreFuture<'_, GrantId>;

    /// Mark a locked grant used by `order`
    fn mark_grant_used(&mut self, grant: GrantId, order: &OrderId) -> StoreFuture<'_, ()>;

    // ── Carts ──

    /// Lock and load the quantity of one cart line
    fn lock_cart_item(
        &mut self,
        user: &UserId,
        store: &StoreId,
        book: &BookId,
    ) -> StoreFuture<'_, Option<i64>>;

    /// Insert or overwrite a cart line
    fn set_cart_item(&mut self, user: &UserId, item: &CartItem) -> StoreFuture<'_, ()>;

    /// Delete one cart line, reporting whether it existed
    fn delete_cart_item(
        &mut self,
        user: &UserId,
        store: &StoreId,
        book: &BookId,
    ) -> StoreFuture<'_, bool>;

    /// Delete every cart line of a user, returning how many were removed
    fn clear_cart(&mut self, user: &UserId) -> StoreFuture<'_, u64>;

    /// Commit every mutation made through this transaction.
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;
}

/// Identity checks supplied by the authentication collaborator.
pub trait IdentityProvider: Send + Sync {
    /// Whether a user with this id is registered.
    ///
    /// # Errors
    ///
    /// Returns the underlying lookup error.
    fn user_exists(&self, user: &UserId) -> StoreFuture<'_, bool>;

    /// Whether a store with this id is registered.
    ///
    /// # Errors
    ///
    /// Returns the underlying lookup error.
    fn store_exists(&self, store: &StoreId) -> StoreFuture<'_, bool>;

    /// Whether `secret` is the user's current credential.
    ///
    /// # Errors
    ///
    /// Returns the underlying lookup error.
    fn credential_valid(&self, user: &UserId, secret: &str) -> StoreFuture<'_, bool>;
}
