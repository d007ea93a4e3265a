//! Coupon ledger: store-issued coupon definitions and the grants users collect.
//!
//! A definition has a finite stock of grants. Collecting decrements that stock
//! under a row lock, so two buyers racing for the last grant cannot both win.
//! A grant is consumed by at most one order (see [`check_redemption`]).

use crate::environment::BookstoreEnvironment;
use crate::error::{BookstoreError, Result};
use crate::store::Transaction;
use crate::types::{AvailableCoupon, CouponId, GrantId, GrantStatus, NewCoupon, StoreId, UserId};
use chrono::{DateTime, Utc};

/// Coupon operations.
#[derive(Clone, Debug)]
pub struct CouponLedger {
    env: BookstoreEnvironment,
}

impl CouponLedger {
    /// Creates a coupon ledger over the given environment
    #[must_use]
    pub const fn new(env: BookstoreEnvironment) -> Self {
        Self { env }
    }

    /// Define a new coupon for a store.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::StoreNotFound`] if the store does not exist
    /// - [`BookstoreError::AuthorizationFailed`] unless `owner` owns the store
    /// - [`BookstoreError::InvalidArgument`] for a negative threshold or stock,
    ///   or a non-positive discount
    pub async fn create(&self, owner: &UserId, coupon: NewCoupon) -> Result<CouponId> {
        if coupon.threshold < 0 || coupon.stock < 0 || coupon.discount <= 0 {
            return Err(BookstoreError::InvalidArgument(format!(
                "threshold {}, discount {}, stock {}",
                coupon.threshold, coupon.discount, coupon.stock
            )));
        }

        let mut tx = self.env.datastore.begin().await?;
        if !tx.store_exists(&coupon.store).await? {
            return Err(BookstoreError::StoreNotFound(coupon.store));
        }
        if tx.store_owner(&coupon.store).await?.as_ref() != Some(owner) {
            return Err(BookstoreError::AuthorizationFailed(owner.clone()));
        }

        let id = tx.insert_coupon(&coupon).await?;
        tx.commit().await?;

        tracing::info!(
            coupon_id = %id,
            store = %coupon.store,
            stock = coupon.stock,
            "Coupon created"
        );
        Ok(id)
    }

    /// Collect one grant of a coupon for `user`.
    ///
    /// # Errors
    ///
    /// - [`BookstoreError::UserNotFound`] / [`BookstoreError::CouponNotFound`]
    /// - [`BookstoreError::OutOfStock`] if no grants remain
    /// - [`BookstoreError::Expired`] if the coupon has ended
    pub async fn collect(&self, user: &UserId, coupon: CouponId) -> Result<GrantId> {
        if !self.env.identity.user_exists(user).await? {
            return Err(BookstoreError::UserNotFound(user.clone()));
        }

        let mut tx = self.env.datastore.begin().await?;
        let definition = tx
            .lock_coupon(coupon)
            .await?
            .ok_or(BookstoreError::CouponNotFound(coupon))?;

        if definition.stock <= 0 {
            return Err(BookstoreError::OutOfStock(coupon));
        }
        if definition.is_expired(self.env.clock.now()) {
            return Err(BookstoreError::Expired(coupon));
        }

        tx.set_coupon_stock(coupon, definition.stock - 1).await?;
        let grant = tx.insert_grant(user, coupon).await?;
        tx.commit().await?;

        tracing::debug!(coupon_id = %coupon, grant_id = %grant, user = %user, "Coupon collected");
        Ok(grant)
    }

    /// Unused, unexpired grants of a user, optionally for one store only.
    ///
    /// # Errors
    ///
    /// Returns the underlying read error.
    pub async fn list_available(
        &self,
        user: &UserId,
        store: Option<&StoreId>,
    ) -> Result<Vec<AvailableCoupon>> {
        let now = self.env.clock.now();
        Ok(self.env.datastore.available_coupons(user, store, now).await?)
    }
}

/// Validate a grant against an order under construction and return the
/// discounted total.
///
/// Locks the grant row. Does not mark it used: the caller does that once the
/// order row exists, inside the same transaction.
///
/// # Errors
///
/// - [`BookstoreError::GrantNotFound`] if absent or owned by someone else
/// - [`BookstoreError::AlreadyUsed`] if already consumed
/// - [`BookstoreError::CouponNotFound`] if its definition is gone
/// - [`BookstoreError::StoreMismatch`] if the coupon is for another store
/// - [`BookstoreError::Expired`] if the coupon has ended
/// - [`BookstoreError::ThresholdNotMet`] if `subtotal` is below the threshold
pub(crate) async fn check_redemption(
    tx: &mut dyn Transaction,
    buyer: &UserId,
    store: &StoreId,
    grant_id: GrantId,
    subtotal: i64,
    now: DateTime<Utc>,
) -> Result<i64> {
    let grant = tx
        .lock_grant(grant_id)
        .await?
        .filter(|grant| &grant.owner == buyer)
        .ok_or(BookstoreError::GrantNotFound(grant_id))?;

    if grant.status != GrantStatus::Unused {
        return Err(BookstoreError::AlreadyUsed(grant_id));
    }

    let coupon = tx
        .lock_coupon(grant.coupon)
        .await?
        .ok_or(BookstoreError::CouponNotFound(grant.coupon))?;

    if &coupon.store != store {
        return Err(BookstoreError::StoreMismatch {
            expected: store.clone(),
            actual: coupon.store,
        });
    }
    if coupon.is_expired(now) {
        return Err(BookstoreError::Expired(coupon.id));
    }
    if subtotal < coupon.threshold {
        return Err(BookstoreError::ThresholdNotMet {
            total: subtotal,
            threshold: coupon.threshold,
        });
    }

    Ok(apply_discount(subtotal, coupon.discount))
}

/// `max(0, total - discount)`
#[must_use]
pub const fn apply_discount(total: i64, discount: i64) -> i64 {
    let discounted = total.saturating_sub(discount);
    if discounted < 0 { 0 } else { discounted }
}
