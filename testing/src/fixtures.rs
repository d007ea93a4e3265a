//! Seeded bookstore with every service wired to one in-memory datastore.

use crate::memory::InMemoryDatastore;
use crate::mocks::{ManualClock, test_epoch};
use bookstore_core::{
    BookstoreEnvironment, Cart, CouponLedger, NewCoupon, OrderEngine, StoreAdmin, StoreId,
    TimeoutSweeper, UserId,
};
use std::sync::Arc;

/// Buyer with 1 000 on their balance
pub const ALICE: &str = "alice";
/// Second buyer with 1 000 on their balance
pub const BOB: &str = "bob";
/// Owner of [`SHOP`], empty balance
pub const SELLER: &str = "seller";
/// Owner of [`OTHER_SHOP`]
pub const RIVAL: &str = "rival";
/// Store listing [`BOOK_A`] (5 × 100) and [`BOOK_B`] (10 × 40)
pub const SHOP: &str = "shop";
/// Store listing [`BOOK_A`] (3 × 90)
pub const OTHER_SHOP: &str = "other-shop";
/// Book priced 100, 5 in stock at [`SHOP`]
pub const BOOK_A: &str = "isbn-a";
/// Book priced 40, 10 in stock at [`SHOP`]
pub const BOOK_B: &str = "isbn-b";

/// Credential of a seeded user
#[must_use]
pub fn credential(user: &str) -> String {
    format!("{user}-pw")
}

/// A seeded bookstore.
#[derive(Clone, Debug)]
pub struct TestBookstore {
    /// Backing datastore, for seeding and inspection
    pub datastore: InMemoryDatastore,
    /// Clock shared by every service, starts at [`test_epoch`]
    pub clock: Arc<ManualClock>,
    /// Environment the services run against
    pub env: BookstoreEnvironment,
    /// Order lifecycle
    pub engine: OrderEngine,
    /// Coupon ledger
    pub coupons: CouponLedger,
    /// Shopping carts
    pub cart: Cart,
    /// Store administration
    pub admin: StoreAdmin,
}

impl TestBookstore {
    /// Wrap an existing datastore
    #[must_use]
    pub fn new(datastore: InMemoryDatastore) -> Self {
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let env = BookstoreEnvironment::new(
            Arc::new(datastore.clone()),
            Arc::new(datastore.clone()),
            clock.clone(),
        );
        Self {
            engine: OrderEngine::new(env.clone()),
            coupons: CouponLedger::new(env.clone()),
            cart: Cart::new(env.clone()),
            admin: StoreAdmin::new(env.clone()),
            datastore,
            clock,
            env,
        }
    }

    /// The standard fixture described by the constants of this module
    #[must_use]
    pub fn seeded() -> Self {
        Self::new(
            InMemoryDatastore::new()
                .with_user(ALICE, &credential(ALICE), 1_000)
                .with_user(BOB, &credential(BOB), 1_000)
                .with_user(SELLER, &credential(SELLER), 0)
                .with_user(RIVAL, &credential(RIVAL), 0)
                .with_store(SHOP, SELLER)
                .with_store(OTHER_SHOP, RIVAL)
                .with_inventory(SHOP, BOOK_A, 100, 5)
                .with_inventory(SHOP, BOOK_B, 40, 10)
                .with_inventory(OTHER_SHOP, BOOK_A, 90, 3),
        )
    }

    /// A sweeper over this bookstore's engine
    #[must_use]
    pub fn sweeper(&self) -> TimeoutSweeper {
        TimeoutSweeper::new(self.engine.clone())
    }

    /// Coupon for [`SHOP`] ending one day after [`test_epoch`]
    #[must_use]
    pub fn shop_coupon(threshold: i64, discount: i64, stock: i64) -> NewCoupon {
        NewCoupon {
            store: StoreId::new(SHOP),
            name: format!("{discount} off {threshold}"),
            threshold,
            discount,
            stock,
            end_time: test_epoch() + chrono::Duration::days(1),
        }
    }

    /// Shorthand for a seeded user id
    #[must_use]
    pub fn user(name: &str) -> UserId {
        UserId::new(name)
    }

    /// Shorthand for a seeded store id
    #[must_use]
    pub fn store(name: &str) -> StoreId {
        StoreId::new(name)
    }
}
