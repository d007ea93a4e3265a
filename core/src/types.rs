//! Domain types for the order transaction engine.
//!
//! All monetary amounts are `i64` values in the smallest currency unit
//! (cents). Stock levels and quantities are `i64` as well so they map onto
//! `BIGINT` columns without conversion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a `", stringify!($name), "` from any string-like value")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a user (buyer or store owner), issued by the auth collaborator
    UserId
);
string_id!(
    /// Identifier of a store
    StoreId
);
string_id!(
    /// Identifier of a book in the catalog
    BookId
);
string_id!(
    /// Opaque order identifier (`order_<32 hex digits>`)
    OrderId
);

impl OrderId {
    /// Generates a fresh random order id
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("order_{}", Uuid::new_v4().simple()))
    }
}

/// Identifier of a coupon definition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CouponId(pub i64);

impl std::fmt::Display for CouponId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a coupon grant (a user's claim on a coupon definition)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantId(pub i64);

impl std::fmt::Display for GrantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an order.
///
/// ```text
/// unpaid --pay--> paid --deliver--> delivering --receive--> received
///   |
///   +--cancel / timeout--> canceled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created, stock reserved, waiting for payment
    Unpaid,
    /// Settled, waiting for the store to ship
    Paid,
    /// Shipped by the store
    Delivering,
    /// Received by the buyer (terminal)
    Received,
    /// Canceled by the buyer or the timeout sweeper (terminal)
    Canceled,
}

impl OrderStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Delivering => "delivering",
            Self::Received => "received",
            Self::Canceled => "canceled",
        }
    }

    /// Parse status from its database string.
    ///
    /// Returns `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(Self::Unpaid),
            "paid" => Some(Self::Paid),
            "delivering" => Some(Self::Delivering),
            "received" => Some(Self::Received),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unpaid, Self::Paid | Self::Canceled)
                | (Self::Paid, Self::Delivering)
                | (Self::Delivering, Self::Received)
        )
    }

    /// Terminal states have no outgoing transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Received | Self::Canceled)
    }

    /// Orders whose payment has been settled
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Paid | Self::Delivering | Self::Received)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Buyer who placed the order
    pub buyer: UserId,
    /// Store the order was placed with
    pub store: StoreId,
    /// Current lifecycle state
    pub status: OrderStatus,
    /// Total after discount, in cents
    pub total_price: i64,
    /// When the order was created
    pub created_at: DateTime<Utc>,
}

/// One book line of an order. Price is a snapshot taken at reservation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Book ordered
    pub book: BookId,
    /// Quantity ordered (always positive)
    pub quantity: i64,
    /// Unit price at order time, in cents
    pub unit_price: i64,
}

impl OrderLine {
    /// Line subtotal, `None` on overflow
    #[must_use]
    pub const fn subtotal(&self) -> Option<i64> {
        self.quantity.checked_mul(self.unit_price)
    }
}

/// An order together with its lines, as returned by order listings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    /// The order row
    pub order: Order,
    /// Its lines
    pub lines: Vec<OrderLine>,
}

/// A requested line of a purchase. Quantities may be non-positive; such
/// items are dropped before reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Book requested
    pub book: BookId,
    /// Requested quantity
    pub quantity: i64,
}

impl LineItem {
    /// Creates a line item
    #[must_use]
    pub fn new(book: impl Into<BookId>, quantity: i64) -> Self {
        Self {
            book: book.into(),
            quantity,
        }
    }
}

/// A book the user intends to buy from a store, not yet reserved
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Store selling the book
    pub store: StoreId,
    /// Book
    pub book: BookId,
    /// Units wanted (always positive)
    pub quantity: i64,
}

/// Stock and price of one book in one store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    /// Owning store
    pub store: StoreId,
    /// Book
    pub book: BookId,
    /// Units on hand (never negative)
    pub stock_level: i64,
    /// Selling price, in cents
    pub unit_price: i64,
}

/// A user's balance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account holder
    pub user: UserId,
    /// Balance in cents (never negative)
    pub balance: i64,
}

/// A coupon offered by a store: spend at least `threshold`, get `discount` off
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponDefinition {
    /// Coupon identifier
    pub id: CouponId,
    /// Store whose orders the coupon applies to
    pub store: StoreId,
    /// Display name
    pub name: String,
    /// Minimum provisional total, in cents
    pub threshold: i64,
    /// Amount taken off the total, in cents
    pub discount: i64,
    /// Grants still available for collection
    pub stock: i64,
    /// Coupon cannot be collected or used after this instant
    pub end_time: DateTime<Utc>,
}

impl CouponDefinition {
    /// Whether the validity window has closed at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_time < now
    }
}

/// Fields of a coupon definition before it has an id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCoupon {
    /// Store the coupon belongs to
    pub store: StoreId,
    /// Display name
    pub name: String,
    /// Minimum provisional total, in cents
    pub threshold: i64,
    /// Discount, in cents
    pub discount: i64,
    /// Number of grants that can be collected
    pub stock: i64,
    /// End of validity
    pub end_time: DateTime<Utc>,
}

/// Status of a coupon grant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    /// Collected, not yet applied to an order
    Unused,
    /// Consumed by an order
    Used,
}

impl GrantStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unused => "unused",
            Self::Used => "used",
        }
    }

    /// Parse status from its database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unused" => Some(Self::Unused),
            "used" => Some(Self::Used),
            _ => None,
        }
    }
}

/// A user's single-use claim on a coupon definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponGrant {
    /// Grant identifier
    pub id: GrantId,
    /// User who collected the coupon
    pub owner: UserId,
    /// Definition this grant was collected from
    pub coupon: CouponId,
    /// Whether it has been consumed
    pub status: GrantStatus,
    /// Order that consumed it
    pub order: Option<OrderId>,
}

/// An unused, unexpired grant joined with its definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableCoupon {
    /// Grant to pass to `create_order`
    pub grant: GrantId,
    /// Definition the grant came from
    pub coupon: CouponId,
    /// Coupon name
    pub name: String,
    /// Store the coupon applies to
    pub store: StoreId,
    /// Minimum spend
    pub threshold: i64,
    /// Discount
    pub discount: i64,
    /// End of validity
    pub end_time: DateTime<Utc>,
}

/// Quantity sold of one book
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSales {
    /// Book
    pub book: BookId,
    /// Units sold across settled orders
    pub quantity: i64,
}

/// Sales summary of a store over its settled orders
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of settled orders
    pub total_orders: i64,
    /// Sum of their totals, in cents
    pub total_revenue: i64,
    /// Best sellers, highest quantity first (at most five)
    pub top_books: Vec<BookSales>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_has_prefix_and_is_unique() {
        let a = OrderId::generate();
        let b = OrderId::generate();
        assert!(a.as_str().starts_with("order_"));
        assert_eq!(a.as_str().len(), "order_".len() + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn status_round_trips_through_database_string() {
        for status in [
            OrderStatus::Unpaid,
            OrderStatus::Paid,
            OrderStatus::Delivering,
            OrderStatus::Received,
            OrderStatus::Canceled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("PENDING"), None);
    }

    #[test]
    fn only_lifecycle_edges_are_legal() {
        use OrderStatus::{Canceled, Delivering, Paid, Received, Unpaid};
        assert!(Unpaid.can_transition_to(Paid));
        assert!(Unpaid.can_transition_to(Canceled));
        assert!(Paid.can_transition_to(Delivering));
        assert!(Delivering.can_transition_to(Received));

        assert!(!Paid.can_transition_to(Canceled));
        assert!(!Unpaid.can_transition_to(Delivering));
        assert!(!Canceled.can_transition_to(Unpaid));
        assert!(!Received.can_transition_to(Canceled));
        assert!(!Paid.can_transition_to(Paid));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        let all = [
            OrderStatus::Unpaid,
            OrderStatus::Paid,
            OrderStatus::Delivering,
            OrderStatus::Received,
            OrderStatus::Canceled,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            assert!(all.iter().all(|to| !from.can_transition_to(*to)));
        }
    }

    #[test]
    fn coupon_expiry_is_strict() {
        let end = Utc::now();
        let coupon = CouponDefinition {
            id: CouponId(1),
            store: StoreId::new("s"),
            name: "c".into(),
            threshold: 0,
            discount: 1,
            stock: 1,
            end_time: end,
        };
        assert!(!coupon.is_expired(end));
        assert!(coupon.is_expired(end + chrono::Duration::seconds(1)));
    }
}
