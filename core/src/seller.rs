//! Store administration: opening stores, listing and restocking books, and
//! sales statistics. Every operation except `open_store` is restricted to the
//! store's registered owner.

use crate::environment::BookstoreEnvironment;
use crate::error::{BookstoreError, Result};
use crate::ledger::inventory;
use crate::store::Transaction;
use crate::types::{BookId, InventoryEntry, StoreId, StoreStats, UserId};

/// Store-owner operations.
#[derive(Clone, Debug)]
pub struct StoreAdmin {
    env: BookstoreEnvironment,
}

impl StoreAdmin {
    /// Creates the service over the given environment
    #[must_use]
    pub const fn new(env: BookstoreEnvironment) -> Self {
        Self { env }
    }

    /// Register a new store owned by `owner`.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::UserNotFound`] if `owner` is not registered
    /// - [`BookstoreError::AlreadyExists`] if the store id is taken
    pub async fn open_store(&self, owner: &UserId, store: &StoreId) -> Result<()> {
        if !self.env.identity.user_exists(owner).await? {
            return Err(BookstoreError::UserNotFound(owner.clone()));
        }

        let mut tx = self.env.datastore.begin().await?;
        if tx.store_exists(store).await? {
            return Err(BookstoreError::AlreadyExists(format!("store {store}")));
        }
        tx.insert_store(store, owner).await?;
        tx.commit().await?;

        tracing::info!(store = %store, owner = %owner, "Store opened");
        Ok(())
    }

    /// List a book in a store with an initial stock level.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::InvalidArgument`] for a negative price or stock
    /// - [`BookstoreError::StoreNotFound`] / [`BookstoreError::AuthorizationFailed`]
    /// - [`BookstoreError::AlreadyExists`] if the store already lists the book
    pub async fn list_book(
        &self,
        owner: &UserId,
        store: &StoreId,
        book: &BookId,
        unit_price: i64,
        stock_level: i64,
    ) -> Result<()> {
        if unit_price < 0 || stock_level < 0 {
            return Err(BookstoreError::InvalidArgument(format!(
                "price {unit_price}, stock {stock_level}"
            )));
        }

        let mut tx = self.env.datastore.begin().await?;
        ensure_owner(tx.as_mut(), owner, store).await?;
        if tx.lock_inventory(store, book).await?.is_some() {
            return Err(BookstoreError::AlreadyExists(format!(
                "book {book} in store {store}"
            )));
        }
        tx.insert_inventory(&InventoryEntry {
            store: store.clone(),
            book: book.clone(),
            stock_level,
            unit_price,
        })
        .await?;
        tx.commit().await?;

        tracing::info!(store = %store, book = %book, unit_price, stock_level, "Book listed");
        Ok(())
    }

    /// Add `delta` units of a listed book, returning the new stock level.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::StoreNotFound`] / [`BookstoreError::AuthorizationFailed`]
    /// - [`BookstoreError::InvalidArgument`] unless `delta > 0`
    /// - [`BookstoreError::BookNotFound`] if the book is not listed
    pub async fn restock(
        &self,
        owner: &UserId,
        store: &StoreId,
        book: &BookId,
        delta: i64,
    ) -> Result<i64> {
        let mut tx = self.env.datastore.begin().await?;
        ensure_owner(tx.as_mut(), owner, store).await?;
        let stock_level = inventory::add_stock(tx.as_mut(), store, book, delta).await?;
        tx.commit().await?;
        Ok(stock_level)
    }

    /// Order count, revenue and best sellers over the store's settled orders.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::StoreNotFound`] / [`BookstoreError::AuthorizationFailed`]
    /// - the underlying read error
    pub async fn store_stats(&self, owner: &UserId, store: &StoreId) -> Result<StoreStats> {
        {
            let mut tx = self.env.datastore.begin().await?;
            ensure_owner(tx.as_mut(), owner, store).await?;
        }
        Ok(self.env.datastore.store_stats(store).await?)
    }
}

async fn ensure_owner(tx: &mut dyn Transaction, owner: &UserId, store: &StoreId) -> Result<()> {
    if !tx.store_exists(store).await? {
        return Err(BookstoreError::StoreNotFound(store.clone()));
    }
    if tx.store_owner(store).await?.as_ref() == Some(owner) {
        Ok(())
    } else {
        Err(BookstoreError::AuthorizationFailed(owner.clone()))
    }
}
