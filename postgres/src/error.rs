//! Mapping of `sqlx` failures onto [`StoreError`].

use bookstore_core::StoreError;

/// `deadlock_detected`
const DEADLOCK_DETECTED: &str = "40P01";
/// `serialization_failure`
const SERIALIZATION_FAILURE: &str = "40001";
/// `lock_not_available`, raised when `lock_timeout` expires
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Classify a `sqlx` error.
///
/// Lock conflicts, pool exhaustion and lost connections are transient: the
/// transaction has been rolled back and the caller may retry. Unique
/// violations are conflicts. Everything else is a database error.
#[must_use]
pub fn map_sqlx(context: &str, error: sqlx::Error) -> StoreError {
    let message = format!("{context}: {error}");
    match &error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(DEADLOCK_DETECTED | SERIALIZATION_FAILURE | LOCK_NOT_AVAILABLE) => {
                StoreError::Transient(message)
            }
            _ if db.is_unique_violation() => StoreError::Conflict(message),
            _ => StoreError::Database(message),
        },
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => StoreError::Transient(message),
        _ => StoreError::Database(message),
    }
}
