//! Account ledger: per-user balance.

use crate::error::{BookstoreError, Result};
use crate::store::Transaction;
use crate::types::UserId;

/// Take `amount` from the user's balance, returning the new balance.
///
/// # Errors
///
/// - [`BookstoreError::AccountNotFound`] if the user has no account
/// - [`BookstoreError::InsufficientFunds`] if the balance is below `amount`
pub async fn debit(tx: &mut dyn Transaction, user: &UserId, amount: i64) -> Result<i64> {
    let account = tx
        .lock_account(user)
        .await?
        .ok_or_else(|| BookstoreError::AccountNotFound(user.clone()))?;

    if account.balance < amount {
        return Err(BookstoreError::InsufficientFunds {
            needed: amount,
            available: account.balance,
        });
    }

    let balance = account.balance - amount;
    tx.set_balance(user, balance).await?;
    Ok(balance)
}

/// Add `amount` to the user's balance.
///
/// Returns `false` without touching anything when the account does not
/// exist; callers decide whether that is acceptable.
///
/// # Errors
///
/// Only datastore errors, or [`BookstoreError::InvalidArgument`] on overflow.
pub async fn credit(tx: &mut dyn Transaction, user: &UserId, amount: i64) -> Result<bool> {
    let Some(account) = tx.lock_account(user).await? else {
        return Ok(false);
    };

    let balance = account
        .balance
        .checked_add(amount)
        .ok_or_else(|| BookstoreError::InvalidArgument("balance overflow".to_string()))?;
    tx.set_balance(user, balance).await?;
    Ok(true)
}

/// Top up a balance, returning the new balance.
///
/// # Errors
///
/// - [`BookstoreError::InvalidArgument`] unless `amount > 0`
/// - [`BookstoreError::AccountNotFound`] if the user has no account
pub async fn add_funds(tx: &mut dyn Transaction, user: &UserId, amount: i64) -> Result<i64> {
    if amount <= 0 {
        return Err(BookstoreError::InvalidArgument(format!(
            "amount must be positive, got {amount}"
        )));
    }

    let account = tx
        .lock_account(user)
        .await?
        .ok_or_else(|| BookstoreError::AccountNotFound(user.clone()))?;

    let balance = account
        .balance
        .checked_add(amount)
        .ok_or_else(|| BookstoreError::InvalidArgument("balance overflow".to_string()))?;
    tx.set_balance(user, balance).await?;
    Ok(balance)
}
