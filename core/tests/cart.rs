//! Shopping cart

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use bookstore_core::{BookId, CartItem, Datastore, ErrorKind, LineItem, StoreId, UserId};
use bookstore_testing::TestBookstore;
use bookstore_testing::fixtures::{ALICE, BOB, BOOK_A, BOOK_B, OTHER_SHOP, SHOP};

fn alice() -> UserId {
    TestBookstore::user(ALICE)
}

fn shop() -> StoreId {
    TestBookstore::store(SHOP)
}

fn line(store: &str, book: &str, quantity: i64) -> CartItem {
    CartItem {
        store: StoreId::new(store),
        book: BookId::new(book),
        quantity,
    }
}

#[tokio::test]
async fn adding_accumulates_and_setting_overwrites() {
    let fixture = TestBookstore::seeded();
    let book = BookId::new(BOOK_A);

    assert_eq!(fixture.cart.add_item(&alice(), &shop(), &book, 2).await.unwrap(), 2);
    assert_eq!(fixture.cart.add_item(&alice(), &shop(), &book, 3).await.unwrap(), 5);
    assert_eq!(
        fixture.cart.items(&alice()).await.unwrap(),
        vec![line(SHOP, BOOK_A, 5)]
    );

    fixture
        .cart
        .set_quantity(&alice(), &shop(), &book, 1)
        .await
        .unwrap();
    assert_eq!(
        fixture.cart.items(&alice()).await.unwrap(),
        vec![line(SHOP, BOOK_A, 1)]
    );

    // Carts hold intent only
    assert_eq!(fixture.datastore.stock_level(SHOP, BOOK_A), Some(5));
}

#[tokio::test]
async fn cart_lines_are_not_checked_against_stock() {
    let fixture = TestBookstore::seeded();

    let quantity = fixture
        .cart
        .add_item(&alice(), &shop(), &BookId::new(BOOK_A), 50)
        .await
        .unwrap();
    assert_eq!(quantity, 50);
}

#[tokio::test]
async fn adding_requires_user_store_listing_and_positive_quantity() {
    let fixture = TestBookstore::seeded();
    let book = BookId::new(BOOK_A);

    let error = fixture
        .cart
        .add_item(&UserId::new("mallory"), &shop(), &book, 1)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);

    let error = fixture
        .cart
        .add_item(&alice(), &StoreId::new("nowhere"), &book, 1)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);

    // BOOK_B is listed at SHOP only
    let error = fixture
        .cart
        .add_item(&alice(), &TestBookstore::store(OTHER_SHOP), &BookId::new(BOOK_B), 1)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);

    for quantity in [0, -2] {
        let error = fixture
            .cart
            .add_item(&alice(), &shop(), &book, quantity)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidArgument);
    }

    let error = fixture
        .cart
        .set_quantity(&alice(), &shop(), &book, -1)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidArgument);

    assert!(fixture.cart.items(&alice()).await.unwrap().is_empty());
}

#[tokio::test]
async fn setting_zero_or_removing_drops_the_line() {
    let fixture = TestBookstore::seeded();
    let (book_a, book_b) = (BookId::new(BOOK_A), BookId::new(BOOK_B));
    fixture.cart.add_item(&alice(), &shop(), &book_a, 1).await.unwrap();
    fixture.cart.add_item(&alice(), &shop(), &book_b, 4).await.unwrap();

    fixture
        .cart
        .set_quantity(&alice(), &shop(), &book_a, 0)
        .await
        .unwrap();
    assert_eq!(
        fixture.cart.items(&alice()).await.unwrap(),
        vec![line(SHOP, BOOK_B, 4)]
    );

    assert!(fixture.cart.remove_item(&alice(), &shop(), &book_b).await.unwrap());
    assert!(!fixture.cart.remove_item(&alice(), &shop(), &book_b).await.unwrap());
    assert!(fixture.cart.items(&alice()).await.unwrap().is_empty());
}

#[tokio::test]
async fn clear_only_touches_one_user() {
    let fixture = TestBookstore::seeded();
    let other_shop = TestBookstore::store(OTHER_SHOP);
    let bob = TestBookstore::user(BOB);
    let book_a = BookId::new(BOOK_A);

    fixture.cart.add_item(&alice(), &shop(), &book_a, 1).await.unwrap();
    fixture.cart.add_item(&alice(), &other_shop, &book_a, 2).await.unwrap();
    fixture.cart.add_item(&bob, &shop(), &book_a, 3).await.unwrap();

    assert_eq!(fixture.cart.clear(&alice()).await.unwrap(), 2);
    assert_eq!(fixture.cart.clear(&alice()).await.unwrap(), 0);
    assert!(fixture.cart.items(&alice()).await.unwrap().is_empty());
    assert_eq!(
        fixture.cart.items(&bob).await.unwrap(),
        vec![line(SHOP, BOOK_A, 3)]
    );
}

#[tokio::test]
async fn items_are_grouped_by_store_and_feed_an_order() {
    let fixture = TestBookstore::seeded();
    let other_shop = TestBookstore::store(OTHER_SHOP);

    fixture
        .cart
        .add_item(&alice(), &shop(), &BookId::new(BOOK_B), 2)
        .await
        .unwrap();
    fixture
        .cart
        .add_item(&alice(), &other_shop, &BookId::new(BOOK_A), 1)
        .await
        .unwrap();
    fixture
        .cart
        .add_item(&alice(), &shop(), &BookId::new(BOOK_A), 1)
        .await
        .unwrap();

    assert_eq!(
        fixture.cart.items(&alice()).await.unwrap(),
        vec![
            line(OTHER_SHOP, BOOK_A, 1),
            line(SHOP, BOOK_A, 1),
            line(SHOP, BOOK_B, 2),
        ]
    );

    let items = fixture.cart.line_items(&alice(), &shop()).await.unwrap();
    assert_eq!(items, vec![LineItem::new(BOOK_A, 1), LineItem::new(BOOK_B, 2)]);

    let order = fixture
        .engine
        .create_order(&alice(), &shop(), &items, None)
        .await
        .unwrap();
    let details = fixture.datastore.order(&order).await.unwrap().unwrap();
    assert_eq!(details.order.total_price, 100 + 2 * 40);
    assert_eq!(fixture.datastore.stock_level(SHOP, BOOK_B), Some(8));
}
