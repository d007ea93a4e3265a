//! Order lifecycle manager.
//!
//! Creates orders (reserving inventory and redeeming coupons), settles
//! payment between buyer and seller, and drives the lifecycle:
//!
//! ```text
//! unpaid --pay--> paid --deliver--> delivering --receive--> received
//! unpaid --cancel / timeout--> canceled
//! ```
//!
//! `create_order`, `pay` and `cancel` each run in one transaction. Any error
//! returned after the transaction began drops it uncommitted, which rolls
//! back every reservation, debit, credit, coupon and status change made so
//! far.

use crate::coupon;
use crate::environment::BookstoreEnvironment;
use crate::error::{BookstoreError, Result};
use crate::ledger::{account, inventory};
use crate::store::Transaction;
use crate::types::{
    BookId, GrantId, LineItem, Order, OrderDetails, OrderId, OrderLine, OrderStatus, StoreId,
    UserId,
};

/// What `pay` does when the store owner's account cannot be credited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SettlementPolicy {
    /// Complete the payment anyway and log a warning. Matches the legacy
    /// behavior: the buyer is debited, nobody is credited.
    #[default]
    BestEffort,
    /// Fail the payment with `AccountNotFound` and roll back the debit.
    RequireSeller,
}

/// Order operations.
#[derive(Clone, Debug)]
pub struct OrderEngine {
    env: BookstoreEnvironment,
    settlement: SettlementPolicy,
}

impl OrderEngine {
    /// Creates an engine with the default [`SettlementPolicy::BestEffort`]
    #[must_use]
    pub const fn new(env: BookstoreEnvironment) -> Self {
        Self {
            env,
            settlement: SettlementPolicy::BestEffort,
        }
    }

    /// Replace the settlement policy
    #[must_use]
    pub const fn with_settlement_policy(mut self, settlement: SettlementPolicy) -> Self {
        self.settlement = settlement;
        self
    }

    /// The environment this engine runs against
    #[must_use]
    pub const fn environment(&self) -> &BookstoreEnvironment {
        &self.env
    }

    /// Place an order, reserving stock for every line with a positive quantity.
    ///
    /// Lines are reserved in the order given (duplicates of the same book are
    /// merged first). With a coupon grant the total is reduced by the
    /// coupon's discount, floored at zero, and the grant is consumed.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::UserNotFound`] / [`BookstoreError::StoreNotFound`]
    /// - [`BookstoreError::NoValidItems`] if no line has a positive quantity
    /// - [`BookstoreError::BookNotFound`] / [`BookstoreError::InsufficientStock`]
    ///   from reservation
    /// - any coupon error of [`coupon::check_redemption`]
    pub async fn create_order(
        &self,
        buyer: &UserId,
        store: &StoreId,
        items: &[LineItem],
        grant: Option<GrantId>,
    ) -> Result<OrderId> {
        let result = self.try_create_order(buyer, store, items, grant).await;
        log_infrastructure("create_order", &result);
        result
    }

    async fn try_create_order(
        &self,
        buyer: &UserId,
        store: &StoreId,
        items: &[LineItem],
        grant: Option<GrantId>,
    ) -> Result<OrderId> {
        if !self.env.identity.user_exists(buyer).await? {
            return Err(BookstoreError::UserNotFound(buyer.clone()));
        }
        if !self.env.identity.store_exists(store).await? {
            return Err(BookstoreError::StoreNotFound(store.clone()));
        }

        let requested = normalize_items(items);
        if requested.is_empty() {
            return Err(BookstoreError::NoValidItems);
        }

        let mut tx = self.env.datastore.begin().await?;

        let mut lines = Vec::with_capacity(requested.len());
        for (book, quantity) in requested {
            let unit_price = inventory::reserve(tx.as_mut(), store, &book, quantity).await?;
            lines.push(OrderLine {
                book,
                quantity,
                unit_price,
            });
        }

        let subtotal = order_subtotal(&lines)?;
        let now = self.env.clock.now();
        let total_price = match grant {
            Some(grant) => {
                coupon::check_redemption(tx.as_mut(), buyer, store, grant, subtotal, now).await?
            }
            None => subtotal,
        };

        let order = Order {
            id: OrderId::generate(),
            buyer: buyer.clone(),
            store: store.clone(),
            status: OrderStatus::Unpaid,
            total_price,
            created_at: now,
        };
        tx.insert_order(&order, &lines).await?;
        if let Some(grant) = grant {
            tx.mark_grant_used(grant, &order.id).await?;
        }
        tx.commit().await?;

        metrics::counter!("bookstore.orders.created").increment(1);
        tracing::info!(
            order_id = %order.id,
            buyer = %buyer,
            store = %store,
            lines = lines.len(),
            subtotal,
            total = total_price,
            "Order created"
        );
        Ok(order.id)
    }

    /// Settle an unpaid order: debit the buyer, credit the store owner.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::OrderNotFound`]
    /// - [`BookstoreError::AuthorizationFailed`] if `buyer` did not place the
    ///   order or the credential is rejected
    /// - [`BookstoreError::InvalidState`] unless the order is unpaid
    /// - [`BookstoreError::AccountNotFound`] / [`BookstoreError::InsufficientFunds`]
    ///   from the debit
    /// - [`BookstoreError::AccountNotFound`] for the seller under
    ///   [`SettlementPolicy::RequireSeller`]
    pub async fn pay(&self, buyer: &UserId, order_id: &OrderId, credential: &str) -> Result<()> {
        let result = self.try_pay(buyer, order_id, credential).await;
        log_infrastructure("pay", &result);
        result
    }

    async fn try_pay(&self, buyer: &UserId, order_id: &OrderId, credential: &str) -> Result<()> {
        // Resolved before `begin` so no identity lookup waits on a second
        // connection while the order row is locked.
        let authenticated = self.env.identity.credential_valid(buyer, credential).await?;

        let mut tx = self.env.datastore.begin().await?;
        let order = lock_order(tx.as_mut(), order_id).await?;

        if &order.buyer != buyer || !authenticated {
            return Err(BookstoreError::AuthorizationFailed(buyer.clone()));
        }
        ensure_transition(&order, OrderStatus::Paid)?;

        account::debit(tx.as_mut(), buyer, order.total_price).await?;

        let owner = tx.store_owner(&order.store).await?;
        let credited = match &owner {
            Some(owner) => account::credit(tx.as_mut(), owner, order.total_price).await?,
            None => false,
        };
        if !credited {
            if self.settlement == SettlementPolicy::RequireSeller {
                return Err(match owner {
                    Some(owner) => BookstoreError::AccountNotFound(owner),
                    None => BookstoreError::StoreNotFound(order.store),
                });
            }
            tracing::warn!(
                order_id = %order.id,
                store = %order.store,
                amount = order.total_price,
                "Store owner account missing, payment settled without credit"
            );
        }

        tx.set_order_status(&order.id, OrderStatus::Paid).await?;
        tx.commit().await?;

        metrics::counter!("bookstore.orders.paid").increment(1);
        tracing::info!(order_id = %order.id, amount = order.total_price, "Order paid");
        Ok(())
    }

    /// Mark a paid order as shipped. Store-owner action.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::OrderNotFound`]
    /// - [`BookstoreError::StoreMismatch`] if the order belongs to another store
    /// - [`BookstoreError::InvalidState`] unless the order is paid
    pub async fn deliver(&self, store: &StoreId, order_id: &OrderId) -> Result<()> {
        let result = self
            .transition(order_id, OrderStatus::Delivering, |order| {
                if &order.store == store {
                    Ok(())
                } else {
                    Err(BookstoreError::StoreMismatch {
                        expected: store.clone(),
                        actual: order.store.clone(),
                    })
                }
            })
            .await;
        log_infrastructure("deliver", &result);
        result
    }

    /// Confirm receipt of a delivering order. Buyer action.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::OrderNotFound`]
    /// - [`BookstoreError::AuthorizationFailed`] if `buyer` did not place the order
    /// - [`BookstoreError::InvalidState`] unless the order is delivering
    pub async fn receive(&self, buyer: &UserId, order_id: &OrderId) -> Result<()> {
        let result = self
            .transition(order_id, OrderStatus::Received, |order| {
                ensure_buyer(order, buyer)
            })
            .await;
        log_infrastructure("receive", &result);
        result
    }

    /// Cancel an unpaid order and put its stock back.
    ///
    /// This is also the path the timeout sweeper takes.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::OrderNotFound`]
    /// - [`BookstoreError::AuthorizationFailed`] if `buyer` did not place the order
    /// - [`BookstoreError::InvalidState`] unless the order is unpaid
    pub async fn cancel(&self, buyer: &UserId, order_id: &OrderId) -> Result<()> {
        let result = self.try_cancel(buyer, order_id).await;
        log_infrastructure("cancel", &result);
        result
    }

    async fn try_cancel(&self, buyer: &UserId, order_id: &OrderId) -> Result<()> {
        let mut tx = self.env.datastore.begin().await?;
        let order = lock_order(tx.as_mut(), order_id).await?;
        ensure_buyer(&order, buyer)?;
        ensure_transition(&order, OrderStatus::Canceled)?;

        let lines = tx.order_lines(&order.id).await?;
        for line in &lines {
            inventory::restore(tx.as_mut(), &order.store, &line.book, line.quantity).await?;
        }

        tx.set_order_status(&order.id, OrderStatus::Canceled).await?;
        tx.commit().await?;

        metrics::counter!("bookstore.orders.canceled").increment(1);
        tracing::info!(order_id = %order.id, lines = lines.len(), "Order canceled");
        Ok(())
    }

    /// Orders of a buyer, newest first, with their lines.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::InvalidArgument`] for a negative limit or offset
    /// - the underlying read error, unretried
    pub async fn list_orders(
        &self,
        buyer: &UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<OrderDetails>> {
        if limit < 0 || offset < 0 {
            return Err(BookstoreError::InvalidArgument(format!(
                "limit {limit}, offset {offset}"
            )));
        }
        let result = self
            .env
            .datastore
            .orders_for_buyer(buyer, limit, offset)
            .await
            .map_err(BookstoreError::from);
        log_infrastructure("list_orders", &result);
        result
    }

    /// Top up a buyer's balance after checking their credential.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::AuthorizationFailed`] if the credential is rejected
    /// - [`BookstoreError::InvalidArgument`] unless `amount > 0`
    /// - [`BookstoreError::AccountNotFound`]
    pub async fn add_funds(&self, user: &UserId, credential: &str, amount: i64) -> Result<i64> {
        let result = self.try_add_funds(user, credential, amount).await;
        log_infrastructure("add_funds", &result);
        result
    }

    async fn try_add_funds(&self, user: &UserId, credential: &str, amount: i64) -> Result<i64> {
        if !self.env.identity.credential_valid(user, credential).await? {
            return Err(BookstoreError::AuthorizationFailed(user.clone()));
        }
        let mut tx = self.env.datastore.begin().await?;
        let balance = account::add_funds(tx.as_mut(), user, amount).await?;
        tx.commit().await?;
        Ok(balance)
    }

    /// Single-step status change shared by `deliver` and `receive`.
    async fn transition<F>(&self, order_id: &OrderId, next: OrderStatus, authorize: F) -> Result<()>
    where
        F: FnOnce(&Order) -> Result<()> + Send,
    {
        let mut tx = self.env.datastore.begin().await?;
        let order = lock_order(tx.as_mut(), order_id).await?;
        authorize(&order)?;
        ensure_transition(&order, next)?;

        tx.set_order_status(&order.id, next).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order.id, from = %order.status, to = %next, "Order status changed");
        Ok(())
    }
}

async fn lock_order(tx: &mut dyn Transaction, order_id: &OrderId) -> Result<Order> {
    tx.lock_order(order_id)
        .await?
        .ok_or_else(|| BookstoreError::OrderNotFound(order_id.clone()))
}

fn ensure_buyer(order: &Order, buyer: &UserId) -> Result<()> {
    if &order.buyer == buyer {
        Ok(())
    } else {
        Err(BookstoreError::AuthorizationFailed(buyer.clone()))
    }
}

fn ensure_transition(order: &Order, next: OrderStatus) -> Result<()> {
    if order.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(BookstoreError::InvalidState {
            order: order.id.clone(),
            status: order.status,
            attempted: next,
        })
    }
}

fn log_infrastructure<T>(operation: &'static str, result: &Result<T>) {
    match result {
        Err(error) if error.is_infrastructure() => {
            tracing::warn!(operation, error = %error, kind = ?error.kind(), "Datastore failure");
        }
        _ => {}
    }
}

/// Drop lines with a non-positive quantity and merge repeated books,
/// keeping the position of each book's first occurrence.
#[must_use]
pub fn normalize_items(items: &[LineItem]) -> Vec<(BookId, i64)> {
    let mut merged: Vec<(BookId, i64)> = Vec::with_capacity(items.len());
    for item in items {
        if item.quantity <= 0 {
            tracing::debug!(book = %item.book, quantity = item.quantity, "Dropping line item");
            continue;
        }
        match merged.iter_mut().find(|(book, _)| book == &item.book) {
            Some((_, quantity)) => *quantity = quantity.saturating_add(item.quantity),
            None => merged.push((item.book.clone(), item.quantity)),
        }
    }
    merged
}

/// `Σ quantity × unit_price` over the lines.
///
/// # Errors
///
/// [`BookstoreError::InvalidArgument`] if the sum overflows.
pub fn order_subtotal(lines: &[OrderLine]) -> Result<i64> {
    lines
        .iter()
        .try_fold(0i64, |sum, line| line.subtotal().and_then(|s| sum.checked_add(s)))
        .ok_or_else(|| BookstoreError::InvalidArgument("order total overflow".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_drops_non_positive_and_merges_duplicates() {
        let items = vec![
            LineItem::new("b2", 1),
            LineItem::new("b1", 0),
            LineItem::new("b3", -4),
            LineItem::new("b1", 2),
            LineItem::new("b2", 3),
        ];
        let normalized = normalize_items(&items);
        assert_eq!(
            normalized,
            vec![(BookId::new("b2"), 4), (BookId::new("b1"), 2)]
        );
    }

    #[test]
    fn normalize_of_only_invalid_items_is_empty() {
        let items = vec![LineItem::new("b1", 0), LineItem::new("b2", -1)];
        assert!(normalize_items(&items).is_empty());
    }

    #[test]
    fn subtotal_overflow_is_rejected() {
        let lines = vec![OrderLine {
            book: BookId::new("b"),
            quantity: i64::MAX,
            unit_price: 2,
        }];
        assert_eq!(
            order_subtotal(&lines).map_err(|e| e.kind()),
            Err(crate::error::ErrorKind::InvalidArgument)
        );
    }

    proptest! {
        #[test]
        fn subtotal_is_sum_of_line_products(
            raw in proptest::collection::vec((1i64..1_000, 0i64..10_000), 0..20)
        ) {
            let lines: Vec<OrderLine> = raw
                .iter()
                .enumerate()
                .map(|(i, (quantity, unit_price))| OrderLine {
                    book: BookId::new(format!("b{i}")),
                    quantity: *quantity,
                    unit_price: *unit_price,
                })
                .collect();
            let expected: i64 = raw.iter().map(|(q, p)| q * p).sum();
            prop_assert_eq!(order_subtotal(&lines).ok(), Some(expected));
        }

        #[test]
        fn normalized_quantities_are_positive_and_preserve_total(
            raw in proptest::collection::vec((0usize..5, -5i64..10), 0..30)
        ) {
            let items: Vec<LineItem> = raw
                .iter()
                .map(|(book, quantity)| LineItem::new(format!("b{book}"), *quantity))
                .collect();
            let normalized = normalize_items(&items);

            prop_assert!(normalized.iter().all(|(_, q)| *q > 0));
            let positive: i64 = raw.iter().map(|(_, q)| *q).filter(|q| *q > 0).sum();
            let merged: i64 = normalized.iter().map(|(_, q)| q).sum();
            prop_assert_eq!(positive, merged);

            let mut books: Vec<&BookId> = normalized.iter().map(|(b, _)| b).collect();
            books.sort();
            books.dedup();
            prop_assert_eq!(books.len(), normalized.len());
        }
    }
}
