//! Error taxonomy of the order engine.
//!
//! Two layers:
//!
//! - [`StoreError`]: failures of the underlying datastore (lock, connection,
//!   constraint). Produced by [`Datastore`](crate::store::Datastore) and
//!   [`Transaction`](crate::store::Transaction) implementations.
//! - [`BookstoreError`]: everything an operation can fail with, business
//!   rules included. Every variant projects onto a machine-readable
//!   [`ErrorKind`] that the request layer forwards verbatim.
//!
//! Only [`ErrorKind::TransientStoreError`] is retryable. All other kinds are
//! deterministic given the same inputs.

use crate::types::{BookId, CouponId, GrantId, OrderId, OrderStatus, StoreId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a datastore backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Deadlock, serialization failure, lock timeout, pool exhaustion or
    /// lost connection. The whole operation was rolled back and may be
    /// retried by the caller.
    #[error("Transient datastore error: {0}")]
    Transient(String),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other datastore failure (query, decoding, corrupt data).
    #[error("Database error: {0}")]
    Database(String),
}

/// Machine-readable error kind carried to the request layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A referenced user, store, book, order, coupon or grant does not exist
    NotFound,
    /// Caller is not allowed to act on the resource
    AuthorizationFailed,
    /// Order is not in the state the transition starts from
    InvalidState,
    /// Not enough units to reserve
    InsufficientStock,
    /// Buyer balance below the order total
    InsufficientFunds,
    /// Argument outside its domain (non-positive delta, negative price...)
    InvalidArgument,
    /// Purchase request had no line with a positive quantity
    NoValidItems,
    /// Order or coupon belongs to another store
    StoreMismatch,
    /// Coupon validity window has closed
    Expired,
    /// Coupon grant already consumed
    AlreadyUsed,
    /// Provisional total below the coupon threshold
    ThresholdNotMet,
    /// Coupon has no grants left to collect
    OutOfStock,
    /// Store or listing already exists
    AlreadyExists,
    /// Lock or connection failure; safe to retry
    TransientStoreError,
    /// Non-retryable datastore failure
    Internal,
}

impl ErrorKind {
    /// Whether a caller may retry the operation as-is
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::TransientStoreError)
    }
}

/// Errors returned by engine operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookstoreError {
    /// Unknown user id.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Unknown store id.
    #[error("Store not found: {0}")]
    StoreNotFound(StoreId),

    /// The store does not list the book.
    #[error("Book {book} not found in store {store}")]
    BookNotFound {
        /// Store searched
        store: StoreId,
        /// Book requested
        book: BookId,
    },

    /// Unknown order id.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Unknown coupon definition.
    #[error("Coupon not found: {0}")]
    CouponNotFound(CouponId),

    /// Unknown grant, or a grant owned by someone else.
    #[error("Coupon grant not found: {0}")]
    GrantNotFound(GrantId),

    /// No account row for the user.
    #[error("Account not found: {0}")]
    AccountNotFound(UserId),

    /// Caller does not own the order or store, or the credential was rejected.
    #[error("Authorization failed for user {0}")]
    AuthorizationFailed(UserId),

    /// Illegal lifecycle transition.
    #[error("Order {order} is {status}, cannot move to {attempted}")]
    InvalidState {
        /// Order concerned
        order: OrderId,
        /// Its current status
        status: OrderStatus,
        /// Status the operation would have set
        attempted: OrderStatus,
    },

    /// Stock below the requested quantity.
    #[error("Insufficient stock for book {book}: requested {requested}, available {available}")]
    InsufficientStock {
        /// Book concerned
        book: BookId,
        /// Quantity requested
        requested: i64,
        /// Stock on hand
        available: i64,
    },

    /// Balance below the amount to debit.
    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds {
        /// Amount to debit
        needed: i64,
        /// Current balance
        available: i64,
    },

    /// Argument outside its domain.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Every requested line had a non-positive quantity.
    #[error("No valid items in order")]
    NoValidItems,

    /// Order or coupon belongs to a different store.
    #[error("Store mismatch: expected {expected}, got {actual}")]
    StoreMismatch {
        /// Store the operation targets
        expected: StoreId,
        /// Store the resource belongs to
        actual: StoreId,
    },

    /// Coupon validity window has closed.
    #[error("Coupon {0} expired")]
    Expired(CouponId),

    /// Grant already consumed by an order.
    #[error("Coupon grant {0} already used")]
    AlreadyUsed(GrantId),

    /// Provisional total below the coupon threshold.
    #[error("Total price {total} less than threshold {threshold}")]
    ThresholdNotMet {
        /// Provisional total
        total: i64,
        /// Coupon threshold
        threshold: i64,
    },

    /// No grants left to collect.
    #[error("Coupon {0} out of stock")]
    OutOfStock(CouponId),

    /// Store or inventory listing already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Datastore failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookstoreError {
    /// Project the error onto its machine-readable kind
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UserNotFound(_)
            | Self::StoreNotFound(_)
            | Self::BookNotFound { .. }
            | Self::OrderNotFound(_)
            | Self::CouponNotFound(_)
            | Self::GrantNotFound(_)
            | Self::AccountNotFound(_) => ErrorKind::NotFound,
            Self::AuthorizationFailed(_) => ErrorKind::AuthorizationFailed,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NoValidItems => ErrorKind::NoValidItems,
            Self::StoreMismatch { .. } => ErrorKind::StoreMismatch,
            Self::Expired(_) => ErrorKind::Expired,
            Self::AlreadyUsed(_) => ErrorKind::AlreadyUsed,
            Self::ThresholdNotMet { .. } => ErrorKind::ThresholdNotMet,
            Self::OutOfStock(_) => ErrorKind::OutOfStock,
            Self::AlreadyExists(_) | Self::Store(StoreError::Conflict(_)) => {
                ErrorKind::AlreadyExists
            }
            Self::Store(StoreError::Transient(_)) => ErrorKind::TransientStoreError,
            Self::Store(StoreError::Database(_)) => ErrorKind::Internal,
        }
    }

    /// Infrastructure failures are the only ones the engine logs
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Store(StoreError::Transient(_) | StoreError::Database(_))
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, BookstoreError>;

/// Flattened operation result for the request-handling layer.
///
/// `value` carries the identifier created by the operation (order id for
/// `create_order`, grant id for `collect`) or whatever the operation returns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome<T> {
    /// Whether the operation succeeded
    pub success: bool,
    /// Error kind on failure
    pub kind: Option<ErrorKind>,
    /// `"ok"` on success, the error's display text otherwise
    pub message: String,
    /// Operation payload on success
    pub value: Option<T>,
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self {
                success: true,
                kind: None,
                message: "ok".to_string(),
                value: Some(value),
            },
            Err(error) => Self {
                success: false,
                kind: Some(error.kind()),
                message: error.to_string(),
                value: None,
            },
        }
    }
}
