//! Ledger conservation properties over random purchase requests

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use bookstore_core::{Datastore, ErrorKind, LineItem, StoreId, UserId};
use bookstore_testing::properties::line_items;
use bookstore_testing::{InMemoryDatastore, TestBookstore};
use proptest::prelude::*;

const BOOKS: usize = 4;
const STOCK: i64 = 8;
const PRICE: i64 = 7;

fn catalogue() -> TestBookstore {
    let mut datastore = InMemoryDatastore::new()
        .with_user("buyer", "pw", 10_000)
        .with_user("owner", "pw", 0)
        .with_store("store", "owner");
    for book in 0..BOOKS {
        datastore = datastore.with_inventory("store", format!("b{book}"), PRICE, STOCK);
    }
    TestBookstore::new(datastore)
}

fn stock(fixture: &TestBookstore, book: usize) -> i64 {
    fixture
        .datastore
        .stock_level("store", format!("b{book}"))
        .unwrap()
}

fn requested(items: &[LineItem], book: usize) -> i64 {
    let name = format!("b{book}");
    items
        .iter()
        .filter(|item| item.book.as_str() == name && item.quantity > 0)
        .map(|item| item.quantity)
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn placing_an_order_is_all_or_nothing(items in line_items(BOOKS, 6)) {
        let fixture = catalogue();
        let result = tokio_test::block_on(fixture.engine.create_order(
            &UserId::new("buyer"),
            &StoreId::new("store"),
            &items,
            None,
        ));

        match result {
            Ok(order) => {
                let details = tokio_test::block_on(fixture.datastore.order(&order))
                    .unwrap()
                    .unwrap();
                let units: i64 = (0..BOOKS).map(|book| requested(&items, book)).sum();
                prop_assert_eq!(details.order.total_price, units * PRICE);
                for book in 0..BOOKS {
                    prop_assert_eq!(stock(&fixture, book), STOCK - requested(&items, book));
                }
            }
            Err(error) => {
                prop_assert!(matches!(
                    error.kind(),
                    ErrorKind::NoValidItems | ErrorKind::InsufficientStock
                ));
                for book in 0..BOOKS {
                    prop_assert_eq!(stock(&fixture, book), STOCK);
                }
            }
        }
    }

    #[test]
    fn cancel_restores_every_reservation(items in line_items(BOOKS, 6)) {
        let fixture = catalogue();
        let buyer = UserId::new("buyer");
        let placed = tokio_test::block_on(fixture.engine.create_order(
            &buyer,
            &StoreId::new("store"),
            &items,
            None,
        ));

        if let Ok(order) = placed {
            tokio_test::block_on(fixture.engine.cancel(&buyer, &order)).unwrap();
            for book in 0..BOOKS {
                prop_assert_eq!(stock(&fixture, book), STOCK);
            }
        }
    }
}
