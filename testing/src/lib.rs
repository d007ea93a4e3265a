//! # Bookstore Testing
//!
//! Testing utilities for the bookstore engine.
//!
//! This crate provides:
//! - [`InMemoryDatastore`]: a transactional in-memory [`Datastore`] with
//!   commit fault injection
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`TestBookstore`]: a seeded environment with every service wired up
//! - proptest strategies for purchase requests
//!
//! ## Example
//!
//! ```ignore
//! use bookstore_testing::TestBookstore;
//! use bookstore_testing::fixtures::{ALICE, BOOK_A, SHOP};
//!
//! #[tokio::test]
//! async fn test_order_flow() {
//!     let shop = TestBookstore::seeded();
//!     shop.engine
//!         .create_order(
//!             &TestBookstore::user(ALICE),
//!             &TestBookstore::store(SHOP),
//!             &[LineItem::new(BOOK_A, 3)],
//!             None,
//!         )
//!         .await
//!         .unwrap();
//!     assert_eq!(shop.datastore.stock_level(SHOP, BOOK_A), Some(2));
//! }
//! ```
//!
//! [`Datastore`]: bookstore_core::Datastore

use bookstore_core::environment::Clock;
use chrono::{DateTime, Utc};

pub mod fixtures;
pub mod memory;

/// Deterministic clocks
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use bookstore_testing::mocks::FixedClock;
    /// use bookstore_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Used to age orders past the sweeper deadline and coupons past their
    /// end time without sleeping.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Start of every test timeline (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use bookstore_core::LineItem;
    use proptest::prelude::*;

    /// Purchase requests over a small catalogue `b0..b{books}`, with zero and
    /// negative quantities mixed in.
    pub fn line_items(books: usize, max_len: usize) -> impl Strategy<Value = Vec<LineItem>> {
        proptest::collection::vec((0..books.max(1), -3i64..6), 0..=max_len).prop_map(|raw| {
            raw.into_iter()
                .map(|(book, quantity)| LineItem::new(format!("b{book}"), quantity))
                .collect()
        })
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG` for the current test
/// binary. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use fixtures::TestBookstore;
pub use memory::InMemoryDatastore;
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), test_epoch());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(test_epoch());
        clock.advance(chrono::Duration::minutes(16));
        assert_eq!(clock.now() - test_epoch(), chrono::Duration::minutes(16));
    }
}
