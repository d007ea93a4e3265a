//! Shopping cart: books a user intends to buy, grouped by store.
//!
//! Cart lines reserve nothing. [`Cart::line_items`] turns the lines for one
//! store into the input of `OrderEngine::create_order`, where stock is
//! actually checked.

use crate::environment::BookstoreEnvironment;
use crate::error::{BookstoreError, Result};
use crate::types::{BookId, CartItem, LineItem, StoreId, UserId};

/// Cart operations.
#[derive(Clone, Debug)]
pub struct Cart {
    env: BookstoreEnvironment,
}

impl Cart {
    /// Creates a cart service over the given environment
    #[must_use]
    pub const fn new(env: BookstoreEnvironment) -> Self {
        Self { env }
    }

    /// Add `quantity` units of a listed book, on top of any already in the
    /// cart. Returns the resulting quantity.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::InvalidArgument`] unless `quantity > 0`
    /// - [`BookstoreError::UserNotFound`] / [`BookstoreError::StoreNotFound`]
    /// - [`BookstoreError::BookNotFound`] if the store does not list the book
    pub async fn add_item(
        &self,
        user: &UserId,
        store: &StoreId,
        book: &BookId,
        quantity: i64,
    ) -> Result<i64> {
        if quantity <= 0 {
            return Err(BookstoreError::InvalidArgument(format!(
                "cart quantity {quantity}"
            )));
        }
        self.ensure_listed(user, store, book).await?;

        let mut tx = self.env.datastore.begin().await?;
        let current = tx.lock_cart_item(user, store, book).await?.unwrap_or(0);
        let quantity = current
            .checked_add(quantity)
            .ok_or_else(|| BookstoreError::InvalidArgument("cart quantity overflow".to_string()))?;
        tx.set_cart_item(user, &item(store, book, quantity)).await?;
        tx.commit().await?;

        tracing::debug!(user = %user, store = %store, book = %book, quantity, "Cart item added");
        Ok(quantity)
    }

    /// Replace the quantity of a cart line. Zero removes the line.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::InvalidArgument`] for a negative quantity
    /// - [`BookstoreError::UserNotFound`] / [`BookstoreError::StoreNotFound`]
    /// - [`BookstoreError::BookNotFound`] if the store does not list the book
    pub async fn set_quantity(
        &self,
        user: &UserId,
        store: &StoreId,
        book: &BookId,
        quantity: i64,
    ) -> Result<()> {
        if quantity < 0 {
            return Err(BookstoreError::InvalidArgument(format!(
                "cart quantity {quantity}"
            )));
        }
        if quantity == 0 {
            self.remove_item(user, store, book).await?;
            return Ok(());
        }
        self.ensure_listed(user, store, book).await?;

        let mut tx = self.env.datastore.begin().await?;
        tx.set_cart_item(user, &item(store, book, quantity)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Drop one line. Removing a line that is not in the cart is not an error.
    ///
    /// # Errors
    ///
    /// Returns the underlying datastore error.
    pub async fn remove_item(&self, user: &UserId, store: &StoreId, book: &BookId) -> Result<bool> {
        let mut tx = self.env.datastore.begin().await?;
        let removed = tx.delete_cart_item(user, store, book).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Empty the cart, returning how many lines were dropped.
    ///
    /// # Errors
    ///
    /// Returns the underlying datastore error.
    pub async fn clear(&self, user: &UserId) -> Result<u64> {
        let mut tx = self.env.datastore.begin().await?;
        let removed = tx.clear_cart(user).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Every line of a user's cart, ordered by store then book.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    pub async fn items(&self, user: &UserId) -> Result<Vec<CartItem>> {
        Ok(self.env.datastore.cart_items(user).await?)
    }

    /// The cart lines for one store, ready to pass to `create_order`.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    pub async fn line_items(&self, user: &UserId, store: &StoreId) -> Result<Vec<LineItem>> {
        Ok(self
            .items(user)
            .await?
            .into_iter()
            .filter(|item| &item.store == store)
            .map(|item| LineItem::new(item.book, item.quantity))
            .collect())
    }

    async fn ensure_listed(&self, user: &UserId, store: &StoreId, book: &BookId) -> Result<()> {
        if !self.env.identity.user_exists(user).await? {
            return Err(BookstoreError::UserNotFound(user.clone()));
        }
        if !self.env.identity.store_exists(store).await? {
            return Err(BookstoreError::StoreNotFound(store.clone()));
        }
        if self.env.datastore.inventory(store, book).await?.is_none() {
            return Err(BookstoreError::BookNotFound {
                store: store.clone(),
                book: book.clone(),
            });
        }
        Ok(())
    }
}

fn item(store: &StoreId, book: &BookId, quantity: i64) -> CartItem {
    CartItem {
        store: store.clone(),
        book: book.clone(),
        quantity,
    }
}
