//! In-memory datastore for fast, deterministic tests.
//!
//! [`InMemoryDatastore`] implements both [`Datastore`] and
//! [`IdentityProvider`]. A transaction takes the single state mutex for its
//! whole lifetime and works on a private copy of the state; `commit` writes
//! the copy back, dropping the transaction discards it. Transactions are
//! therefore fully serialized, which gives the same no-lost-update guarantee
//! as row locks.
//!
//! Identity lookups take the same mutex, so the store behaves like a pool of
//! one connection: an operation that consults [`IdentityProvider`] while its
//! own transaction is open never completes.
//!
//! Seeding and inspection helpers are synchronous and must not be called
//! while a transaction is open.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::expect_used)]
#![allow(clippy::missing_panics_doc)] // Seeding helpers panic only on misuse

use bookstore_core::{
    Account, AvailableCoupon, BookId, BookSales, CartItem, CouponDefinition, CouponGrant, CouponId,
    Datastore, GrantId, GrantStatus, IdentityProvider, InventoryEntry, NewCoupon, Order,
    OrderDetails, OrderId, OrderLine, OrderStatus, StoreError, StoreFuture, StoreId, StoreStats,
    Transaction, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug)]
struct StoredOrder {
    seq: u64,
    order: Order,
    lines: Vec<OrderLine>,
}

impl StoredOrder {
    fn details(&self) -> OrderDetails {
        OrderDetails {
            order: self.order.clone(),
            lines: self.lines.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct State {
    // Store id to owner; `None` once the owner record is removed.
    stores: HashMap<StoreId, Option<UserId>>,
    inventory: HashMap<(StoreId, BookId), InventoryEntry>,
    accounts: HashMap<UserId, i64>,
    credentials: HashMap<UserId, String>,
    orders: HashMap<OrderId, StoredOrder>,
    coupons: BTreeMap<CouponId, CouponDefinition>,
    grants: BTreeMap<GrantId, CouponGrant>,
    carts: BTreeMap<(UserId, StoreId, BookId), i64>,
    next_order_seq: u64,
    next_coupon_id: i64,
    next_grant_id: i64,
}

/// In-memory [`Datastore`] and [`IdentityProvider`].
///
/// # Example
///
/// ```
/// use bookstore_testing::InMemoryDatastore;
///
/// let datastore = InMemoryDatastore::new()
///     .with_user("alice", "secret", 1_000)
///     .with_user("seller", "pw", 0)
///     .with_store("shop", "seller")
///     .with_inventory("shop", "isbn-1", 100, 5);
///
/// assert_eq!(datastore.stock_level("shop", "isbn-1"), Some(5));
/// assert_eq!(datastore.balance("alice"), Some(1_000));
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDatastore {
    state: Arc<Mutex<State>>,
    commit_failures: Arc<AtomicUsize>,
}

impl InMemoryDatastore {
    /// Create an empty datastore
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn seed(&self) -> tokio::sync::MutexGuard<'_, State> {
        self.state
            .try_lock()
            .expect("in-memory datastore accessed while a transaction is open")
    }

    /// Register a user with a credential and an account holding `balance`
    #[must_use]
    pub fn with_user(self, user: impl Into<UserId>, credential: &str, balance: i64) -> Self {
        let user = user.into();
        let mut state = self.seed();
        state.credentials.insert(user.clone(), credential.to_string());
        state.accounts.insert(user, balance);
        drop(state);
        self
    }

    /// Register a store owned by `owner`
    #[must_use]
    pub fn with_store(self, store: impl Into<StoreId>, owner: impl Into<UserId>) -> Self {
        self.seed().stores.insert(store.into(), Some(owner.into()));
        self
    }

    /// List a book in a store
    #[must_use]
    pub fn with_inventory(
        self,
        store: impl Into<StoreId>,
        book: impl Into<BookId>,
        unit_price: i64,
        stock_level: i64,
    ) -> Self {
        let entry = InventoryEntry {
            store: store.into(),
            book: book.into(),
            stock_level,
            unit_price,
        };
        self.seed()
            .inventory
            .insert((entry.store.clone(), entry.book.clone()), entry);
        self
    }

    /// Delete a user's account row, leaving their identity in place
    pub fn remove_account(&self, user: impl Into<UserId>) {
        self.seed().accounts.remove(&user.into());
    }

    /// Detach a store from its owner, as if the owner record were deleted
    pub fn orphan_store(&self, store: impl Into<StoreId>) {
        if let Some(owner) = self.seed().stores.get_mut(&store.into()) {
            *owner = None;
        }
    }

    /// Make the next `count` commits fail with [`StoreError::Transient`].
    /// A failed commit discards the transaction's changes.
    pub fn fail_next_commits(&self, count: usize) {
        self.commit_failures.store(count, Ordering::SeqCst);
    }

    /// Current stock level of a listing
    #[must_use]
    pub fn stock_level(&self, store: impl Into<StoreId>, book: impl Into<BookId>) -> Option<i64> {
        self.seed()
            .inventory
            .get(&(store.into(), book.into()))
            .map(|entry| entry.stock_level)
    }

    /// Current balance of an account
    #[must_use]
    pub fn balance(&self, user: impl Into<UserId>) -> Option<i64> {
        self.seed().accounts.get(&user.into()).copied()
    }

    /// Current status of an order
    #[must_use]
    pub fn order_status(&self, order: &OrderId) -> Option<OrderStatus> {
        self.seed().orders.get(order).map(|stored| stored.order.status)
    }

    /// A grant as currently stored
    #[must_use]
    pub fn grant(&self, grant: GrantId) -> Option<CouponGrant> {
        self.seed().grants.get(&grant).cloned()
    }

    /// Remaining stock of a coupon definition
    #[must_use]
    pub fn coupon_stock(&self, coupon: CouponId) -> Option<i64> {
        self.seed().coupons.get(&coupon).map(|definition| definition.stock)
    }

    /// Number of orders ever committed
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.seed().orders.len()
    }
}

fn ready<T: Send + 'static>(result: Result<T, StoreError>) -> StoreFuture<'static, T> {
    Box::pin(std::future::ready(result))
}

fn missing(what: &str) -> StoreError {
    StoreError::Database(format!("{what} missing"))
}

impl Datastore for InMemoryDatastore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn Transaction>> {
        let state = Arc::clone(&self.state);
        let commit_failures = Arc::clone(&self.commit_failures);
        Box::pin(async move {
            let guard = state.lock_owned().await;
            let working = guard.clone();
            let tx: Box<dyn Transaction> = Box::new(MemoryTransaction {
                guard,
                working,
                commit_failures,
            });
            Ok(tx)
        })
    }

    fn orders_for_buyer(
        &self,
        buyer: &UserId,
        limit: i64,
        offset: i64,
    ) -> StoreFuture<'_, Vec<OrderDetails>> {
        let buyer = buyer.clone();
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut orders: Vec<&StoredOrder> = state
                .orders
                .values()
                .filter(|stored| stored.order.buyer == buyer)
                .collect();
            orders.sort_by(|a, b| {
                b.order
                    .created_at
                    .cmp(&a.order.created_at)
                    .then(b.seq.cmp(&a.seq))
            });
            Ok(orders
                .into_iter()
                .skip(usize::try_from(offset).unwrap_or(usize::MAX))
                .take(usize::try_from(limit).unwrap_or(0))
                .map(StoredOrder::details)
                .collect())
        })
    }

    fn unpaid_orders_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<(UserId, OrderId)>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut stale: Vec<&StoredOrder> = state
                .orders
                .values()
                .filter(|stored| {
                    stored.order.status == OrderStatus::Unpaid && stored.order.created_at < cutoff
                })
                .collect();
            stale.sort_by_key(|stored| stored.seq);
            Ok(stale
                .into_iter()
                .map(|stored| (stored.order.buyer.clone(), stored.order.id.clone()))
                .collect())
        })
    }

    fn available_coupons(
        &self,
        user: &UserId,
        store: Option<&StoreId>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<AvailableCoupon>> {
        let user = user.clone();
        let store = store.cloned();
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .grants
                .values()
                .filter(|grant| grant.owner == user && grant.status == GrantStatus::Unused)
                .filter_map(|grant| {
                    state
                        .coupons
                        .get(&grant.coupon)
                        .map(|coupon| (grant, coupon))
                })
                .filter(|(_, coupon)| !coupon.is_expired(now))
                .filter(|(_, coupon)| store.as_ref().is_none_or(|store| &coupon.store == store))
                .map(|(grant, coupon)| AvailableCoupon {
                    grant: grant.id,
                    coupon: coupon.id,
                    name: coupon.name.clone(),
                    store: coupon.store.clone(),
                    threshold: coupon.threshold,
                    discount: coupon.discount,
                    end_time: coupon.end_time,
                })
                .collect())
        })
    }

    fn store_stats(&self, store: &StoreId) -> StoreFuture<'_, StoreStats> {
        let store = store.clone();
        Box::pin(async move {
            let state = self.state.lock().await;
            let settled: Vec<&StoredOrder> = state
                .orders
                .values()
                .filter(|stored| stored.order.store == store && stored.order.status.is_settled())
                .collect();

            let mut sold: HashMap<&BookId, i64> = HashMap::new();
            for line in settled.iter().flat_map(|stored| &stored.lines) {
                *sold.entry(&line.book).or_default() += line.quantity;
            }
            let mut top_books: Vec<BookSales> = sold
                .into_iter()
                .map(|(book, quantity)| BookSales {
                    book: book.clone(),
                    quantity,
                })
                .collect();
            top_books.sort_by(|a, b| b.quantity.cmp(&a.quantity).then(a.book.cmp(&b.book)));
            top_books.truncate(5);

            Ok(StoreStats {
                total_orders: i64::try_from(settled.len()).unwrap_or(i64::MAX),
                total_revenue: settled.iter().map(|stored| stored.order.total_price).sum(),
                top_books,
            })
        })
    }

    fn order(&self, order: &OrderId) -> StoreFuture<'_, Option<OrderDetails>> {
        let order = order.clone();
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.orders.get(&order).map(StoredOrder::details))
        })
    }

    fn inventory(&self, store: &StoreId, book: &BookId) -> StoreFuture<'_, Option<InventoryEntry>> {
        let key = (store.clone(), book.clone());
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.inventory.get(&key).cloned())
        })
    }

    fn account(&self, user: &UserId) -> StoreFuture<'_, Option<Account>> {
        let user = user.clone();
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.accounts.get(&user).map(|balance| Account {
                user: user.clone(),
                balance: *balance,
            }))
        })
    }

    fn cart_items(&self, user: &UserId) -> StoreFuture<'_, Vec<CartItem>> {
        let user = user.clone();
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .carts
                .iter()
                .filter(|((owner, _, _), _)| *owner == user)
                .map(|((_, store, book), quantity)| CartItem {
                    store: store.clone(),
                    book: book.clone(),
                    quantity: *quantity,
                })
                .collect())
        })
    }
}

impl IdentityProvider for InMemoryDatastore {
    fn user_exists(&self, user: &UserId) -> StoreFuture<'_, bool> {
        let user = user.clone();
        Box::pin(async move { Ok(self.state.lock().await.credentials.contains_key(&user)) })
    }

    fn store_exists(&self, store: &StoreId) -> StoreFuture<'_, bool> {
        let store = store.clone();
        Box::pin(async move { Ok(self.state.lock().await.stores.contains_key(&store)) })
    }

    fn credential_valid(&self, user: &UserId, secret: &str) -> StoreFuture<'_, bool> {
        let (user, secret) = (user.clone(), secret.to_string());
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .credentials
                .get(&user)
                .is_some_and(|credential| *credential == secret))
        })
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
    commit_failures: Arc<AtomicUsize>,
}

impl Transaction for MemoryTransaction {
    fn lock_inventory(
        &mut self,
        store: &StoreId,
        book: &BookId,
    ) -> StoreFuture<'_, Option<InventoryEntry>> {
        let entry = self
            .working
            .inventory
            .get(&(store.clone(), book.clone()))
            .cloned();
        ready(Ok(entry))
    }

    fn set_stock(
        &mut self,
        store: &StoreId,
        book: &BookId,
        stock_level: i64,
    ) -> StoreFuture<'_, ()> {
        let result = match self.working.inventory.get_mut(&(store.clone(), book.clone())) {
            Some(entry) if stock_level < 0 => Err(StoreError::Database(format!(
                "stock of {}/{} would become {stock_level}",
                entry.store, entry.book
            ))),
            Some(entry) => {
                entry.stock_level = stock_level;
                Ok(())
            }
            None => Err(missing("inventory entry")),
        };
        ready(result)
    }

    fn insert_inventory(&mut self, entry: &InventoryEntry) -> StoreFuture<'_, ()> {
        let key = (entry.store.clone(), entry.book.clone());
        let result = if self.working.inventory.contains_key(&key) {
            Err(StoreError::Conflict(format!("inventory {}/{}", entry.store, entry.book)))
        } else {
            self.working.inventory.insert(key, entry.clone());
            Ok(())
        };
        ready(result)
    }

    fn lock_account(&mut self, user: &UserId) -> StoreFuture<'_, Option<Account>> {
        let account = self.working.accounts.get(user).map(|balance| Account {
            user: user.clone(),
            balance: *balance,
        });
        ready(Ok(account))
    }

    fn set_balance(&mut self, user: &UserId, balance: i64) -> StoreFuture<'_, ()> {
        let result = match self.working.accounts.get_mut(user) {
            Some(_) if balance < 0 => Err(StoreError::Database(format!(
                "balance of {user} would become {balance}"
            ))),
            Some(current) => {
                *current = balance;
                Ok(())
            }
            None => Err(missing("account")),
        };
        ready(result)
    }

    fn store_owner(&mut self, store: &StoreId) -> StoreFuture<'_, Option<UserId>> {
        ready(Ok(self.working.stores.get(store).cloned().flatten()))
    }

    fn store_exists(&mut self, store: &StoreId) -> StoreFuture<'_, bool> {
        ready(Ok(self.working.stores.contains_key(store)))
    }

    fn insert_store(&mut self, store: &StoreId, owner: &UserId) -> StoreFuture<'_, ()> {
        let result = if self.working.stores.contains_key(store) {
            Err(StoreError::Conflict(format!("store {store}")))
        } else {
            self.working
                .stores
                .insert(store.clone(), Some(owner.clone()));
            Ok(())
        };
        ready(result)
    }

    fn lock_order(&mut self, order: &OrderId) -> StoreFuture<'_, Option<Order>> {
        let order = self
            .working
            .orders
            .get(order)
            .map(|stored| stored.order.clone());
        ready(Ok(order))
    }

    fn order_lines(&mut self, order: &OrderId) -> StoreFuture<'_, Vec<OrderLine>> {
        let lines = self
            .working
            .orders
            .get(order)
            .map(|stored| stored.lines.clone())
            .unwrap_or_default();
        ready(Ok(lines))
    }

    fn insert_order(&mut self, order: &Order, lines: &[OrderLine]) -> StoreFuture<'_, ()> {
        let result = if self.working.orders.contains_key(&order.id) {
            Err(StoreError::Conflict(format!("order {}", order.id)))
        } else {
            self.working.next_order_seq += 1;
            let stored = StoredOrder {
                seq: self.working.next_order_seq,
                order: order.clone(),
                lines: lines.to_vec(),
            };
            self.working.orders.insert(order.id.clone(), stored);
            Ok(())
        };
        ready(result)
    }

    fn set_order_status(&mut self, order: &OrderId, status: OrderStatus) -> StoreFuture<'_, ()> {
        let result = match self.working.orders.get_mut(order) {
            Some(stored) => {
                stored.order.status = status;
                Ok(())
            }
            None => Err(missing("order")),
        };
        ready(result)
    }

    fn lock_coupon(&mut self, coupon: CouponId) -> StoreFuture<'_, Option<CouponDefinition>> {
        ready(Ok(self.working.coupons.get(&coupon).cloned()))
    }

    fn insert_coupon(&mut self, coupon: &NewCoupon) -> StoreFuture<'_, CouponId> {
        self.working.next_coupon_id += 1;
        let id = CouponId(self.working.next_coupon_id);
        self.working.coupons.insert(
            id,
            CouponDefinition {
                id,
                store: coupon.store.clone(),
                name: coupon.name.clone(),
                threshold: coupon.threshold,
                discount: coupon.discount,
                stock: coupon.stock,
                end_time: coupon.end_time,
            },
        );
        ready(Ok(id))
    }

    fn set_coupon_stock(&mut self, coupon: CouponId, stock: i64) -> StoreFuture<'_, ()> {
        let result = match self.working.coupons.get_mut(&coupon) {
            Some(definition) => {
                definition.stock = stock;
                Ok(())
            }
            None => Err(missing("coupon")),
        };
        ready(result)
    }

    fn lock_grant(&mut self, grant: GrantId) -> StoreFuture<'_, Option<CouponGrant>> {
        ready(Ok(self.working.grants.get(&grant).cloned()))
    }

    fn insert_grant(&mut self, owner: &UserId, coupon: CouponId) -> StoreFuture<'_, GrantId> {
        self.working.next_grant_id += 1;
        let id = GrantId(self.working.next_grant_id);
        self.working.grants.insert(
            id,
            CouponGrant {
                id,
                owner: owner.clone(),
                coupon,
                status: GrantStatus::Unused,
                order: None,
            },
        );
        ready(Ok(id))
    }

    fn mark_grant_used(&mut self, grant: GrantId, order: &OrderId) -> StoreFuture<'_, ()> {
        if !self.working.orders.contains_key(order) {
            return ready(Err(missing("order referenced by grant")));
        }
        let result = match self.working.grants.get_mut(&grant) {
            Some(stored) => {
                stored.status = GrantStatus::Used;
                stored.order = Some(order.clone());
                Ok(())
            }
            None => Err(missing("grant")),
        };
        ready(result)
    }

    fn lock_cart_item(
        &mut self,
        user: &UserId,
        store: &StoreId,
        book: &BookId,
    ) -> StoreFuture<'_, Option<i64>> {
        let key = (user.clone(), store.clone(), book.clone());
        ready(Ok(self.working.carts.get(&key).copied()))
    }

    fn set_cart_item(&mut self, user: &UserId, item: &CartItem) -> StoreFuture<'_, ()> {
        let key = (item.store.clone(), item.book.clone());
        let result = if item.quantity <= 0 {
            Err(StoreError::Database(format!(
                "cart quantity of {}/{} would become {}",
                item.store, item.book, item.quantity
            )))
        } else if !self.working.inventory.contains_key(&key) {
            Err(missing("inventory entry referenced by cart"))
        } else {
            let (store, book) = key;
            self.working
                .carts
                .insert((user.clone(), store, book), item.quantity);
            Ok(())
        };
        ready(result)
    }

    fn delete_cart_item(
        &mut self,
        user: &UserId,
        store: &StoreId,
        book: &BookId,
    ) -> StoreFuture<'_, bool> {
        let key = (user.clone(), store.clone(), book.clone());
        ready(Ok(self.working.carts.remove(&key).is_some()))
    }

    fn clear_cart(&mut self, user: &UserId) -> StoreFuture<'_, u64> {
        let before = self.working.carts.len();
        self.working.carts.retain(|(owner, _, _), _| owner != user);
        let removed = before - self.working.carts.len();
        ready(Ok(u64::try_from(removed).unwrap_or(u64::MAX)))
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        let Self {
            mut guard,
            working,
            commit_failures,
        } = *self;
        let injected = commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return ready(Err(StoreError::Transient(
                "injected commit failure".to_string(),
            )));
        }
        *guard = working;
        ready(Ok(()))
    }
}
