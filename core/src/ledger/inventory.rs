//! Inventory ledger: per (store, book) stock level and unit price.

use crate::error::{BookstoreError, Result};
use crate::store::Transaction;
use crate::types::{BookId, StoreId};

/// Reserve `quantity` units and return the entry's unit price.
///
/// # Errors
///
/// - [`BookstoreError::BookNotFound`] if the store does not list the book
/// - [`BookstoreError::InsufficientStock`] if fewer than `quantity` units remain
pub async fn reserve(
    tx: &mut dyn Transaction,
    store: &StoreId,
    book: &BookId,
    quantity: i64,
) -> Result<i64> {
    let entry = tx
        .lock_inventory(store, book)
        .await?
        .ok_or_else(|| BookstoreError::BookNotFound {
            store: store.clone(),
            book: book.clone(),
        })?;

    if entry.stock_level < quantity {
        return Err(BookstoreError::InsufficientStock {
            book: book.clone(),
            requested: quantity,
            available: entry.stock_level,
        });
    }

    tx.set_stock(store, book, entry.stock_level - quantity).await?;
    Ok(entry.unit_price)
}

/// Put `quantity` units back.
///
/// Returns `false` when the entry no longer exists. That is a consistency
/// problem (an order references a listing that was removed), so it is
/// logged, but it does not fail the surrounding cancellation.
///
/// # Errors
///
/// Only datastore errors.
pub async fn restore(
    tx: &mut dyn Transaction,
    store: &StoreId,
    book: &BookId,
    quantity: i64,
) -> Result<bool> {
    let Some(entry) = tx.lock_inventory(store, book).await? else {
        tracing::warn!(
            store = %store,
            book = %book,
            quantity,
            "Inventory entry missing while restoring stock"
        );
        return Ok(false);
    };

    let restored = entry
        .stock_level
        .checked_add(quantity)
        .ok_or_else(|| BookstoreError::InvalidArgument("stock level overflow".to_string()))?;
    tx.set_stock(store, book, restored).await?;
    Ok(true)
}

/// Add `delta` units to an existing entry and return the new stock level.
///
/// # Errors
///
/// - [`BookstoreError::InvalidArgument`] unless `delta > 0`
/// - [`BookstoreError::BookNotFound`] if the entry does not exist
pub async fn add_stock(
    tx: &mut dyn Transaction,
    store: &StoreId,
    book: &BookId,
    delta: i64,
) -> Result<i64> {
    if delta <= 0 {
        return Err(BookstoreError::InvalidArgument(format!(
            "stock delta must be positive, got {delta}"
        )));
    }

    let entry = tx
        .lock_inventory(store, book)
        .await?
        .ok_or_else(|| BookstoreError::BookNotFound {
            store: store.clone(),
            book: book.clone(),
        })?;

    let stock_level = entry
        .stock_level
        .checked_add(delta)
        .ok_or_else(|| BookstoreError::InvalidArgument("stock level overflow".to_string()))?;
    tx.set_stock(store, book, stock_level).await?;
    Ok(stock_level)
}
