//! Tests for the in-memory datastore

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use bookstore_core::{BookId, Datastore, IdentityProvider, StoreError, StoreId, UserId};
use bookstore_testing::InMemoryDatastore;
use std::time::Duration;

fn datastore() -> InMemoryDatastore {
    InMemoryDatastore::new()
        .with_user("alice", "secret", 50)
        .with_user("seller", "pw", 0)
        .with_store("shop", "seller")
        .with_inventory("shop", "book", 100, 5)
}

#[tokio::test]
async fn committed_changes_are_visible() {
    let datastore = datastore();
    let (store, book) = (StoreId::new("shop"), BookId::new("book"));

    let mut tx = datastore.begin().await.unwrap();
    tx.set_stock(&store, &book, 2).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(datastore.stock_level("shop", "book"), Some(2));
}

#[tokio::test]
async fn dropped_transaction_rolls_back() {
    let datastore = datastore();
    let (store, book) = (StoreId::new("shop"), BookId::new("book"));

    {
        let mut tx = datastore.begin().await.unwrap();
        tx.set_stock(&store, &book, 0).await.unwrap();
        tx.set_balance(&UserId::new("alice"), 0).await.unwrap();
        assert_eq!(
            tx.lock_inventory(&store, &book).await.unwrap().unwrap().stock_level,
            0
        );
    }

    assert_eq!(datastore.stock_level("shop", "book"), Some(5));
    assert_eq!(datastore.balance("alice"), Some(50));
}

#[tokio::test]
async fn injected_commit_failure_discards_changes() {
    let datastore = datastore();
    datastore.fail_next_commits(1);
    let (store, book) = (StoreId::new("shop"), BookId::new("book"));

    let mut tx = datastore.begin().await.unwrap();
    tx.set_stock(&store, &book, 1).await.unwrap();
    let error = tx.commit().await.unwrap_err();
    assert!(matches!(error, StoreError::Transient(_)));
    assert_eq!(datastore.stock_level("shop", "book"), Some(5));

    // Only the requested number of commits fail
    let mut tx = datastore.begin().await.unwrap();
    tx.set_stock(&store, &book, 1).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(datastore.stock_level("shop", "book"), Some(1));
}

#[tokio::test]
async fn negative_stock_is_rejected_like_a_check_constraint() {
    let datastore = datastore();
    let mut tx = datastore.begin().await.unwrap();
    let error = tx
        .set_stock(&StoreId::new("shop"), &BookId::new("book"), -1)
        .await
        .unwrap_err();
    assert!(matches!(error, StoreError::Database(_)));
}

#[tokio::test]
async fn duplicate_store_is_a_conflict() {
    let datastore = datastore();
    let mut tx = datastore.begin().await.unwrap();
    let error = tx
        .insert_store(&StoreId::new("shop"), &UserId::new("alice"))
        .await
        .unwrap_err();
    assert!(matches!(error, StoreError::Conflict(_)));
}

#[tokio::test]
async fn identity_checks() {
    let datastore = datastore();
    let alice = UserId::new("alice");

    assert!(datastore.user_exists(&alice).await.unwrap());
    assert!(!datastore.user_exists(&UserId::new("mallory")).await.unwrap());
    assert!(datastore.store_exists(&StoreId::new("shop")).await.unwrap());
    assert!(!datastore.store_exists(&StoreId::new("nowhere")).await.unwrap());
    assert!(datastore.credential_valid(&alice, "secret").await.unwrap());
    assert!(!datastore.credential_valid(&alice, "guess").await.unwrap());
}

#[tokio::test]
async fn identity_lookups_wait_for_the_open_transaction() {
    let datastore = datastore();
    let alice = UserId::new("alice");
    let tx = datastore.begin().await.unwrap();

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        datastore.credential_valid(&alice, "secret"),
    )
    .await;
    assert!(blocked.is_err());

    drop(tx);
    assert!(datastore.credential_valid(&alice, "secret").await.unwrap());
}

#[tokio::test]
async fn orphaned_store_has_no_owner() {
    let datastore = datastore();
    datastore.orphan_store("shop");

    let mut tx = datastore.begin().await.unwrap();
    let store = StoreId::new("shop");
    assert!(tx.store_exists(&store).await.unwrap());
    assert_eq!(tx.store_owner(&store).await.unwrap(), None);
}
