use crate::error::map_sqlx;
use bookstore_core::{
    Account, AvailableCoupon, BookId, BookSales, CartItem, CouponDefinition, CouponGrant, CouponId,
    Datastore, GrantId, GrantStatus, IdentityProvider, InventoryEntry, NewCoupon, Order,
    OrderDetails, OrderId, OrderLine, OrderStatus, StoreError, StoreFuture, StoreId, StoreStats,
    Transaction, UserId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use std::collections::HashMap;

const SETTLED: [OrderStatus; 3] = [
    OrderStatus::Paid,
    OrderStatus::Delivering,
    OrderStatus::Received,
];

fn settled_statuses() -> Vec<String> {
    SETTLED.iter().map(|status| status.as_str().to_string()).collect()
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    buyer_id: String,
    store_id: String,
    status: String,
    total_price: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, StoreError> {
        let status = OrderStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Database(format!(
                "Invalid order status {:?} on {}",
                row.status, row.order_id
            ))
        })?;
        Ok(Self {
            id: OrderId::new(row.order_id),
            buyer: UserId::new(row.buyer_id),
            store: StoreId::new(row.store_id),
            status,
            total_price: row.total_price,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LineRow {
    order_id: String,
    book_id: String,
    quantity: i64,
    unit_price: i64,
}

impl From<LineRow> for OrderLine {
    fn from(row: LineRow) -> Self {
        Self {
            book: BookId::new(row.book_id),
            quantity: row.quantity,
            unit_price: row.unit_price,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    coupon_id: i64,
    store_id: String,
    name: String,
    threshold: i64,
    discount: i64,
    stock: i64,
    end_time: DateTime<Utc>,
}

impl From<CouponRow> for CouponDefinition {
    fn from(row: CouponRow) -> Self {
        Self {
            id: CouponId(row.coupon_id),
            store: StoreId::new(row.store_id),
            name: row.name,
            threshold: row.threshold,
            discount: row.discount,
            stock: row.stock,
            end_time: row.end_time,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GrantRow {
    grant_id: i64,
    owner_id: String,
    coupon_id: i64,
    status: String,
    order_id: Option<String>,
}

impl TryFrom<GrantRow> for CouponGrant {
    type Error = StoreError;

    fn try_from(row: GrantRow) -> Result<Self, StoreError> {
        let status = GrantStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Database(format!(
                "Invalid grant status {:?} on grant {}",
                row.status, row.grant_id
            ))
        })?;
        Ok(Self {
            id: GrantId(row.grant_id),
            owner: UserId::new(row.owner_id),
            coupon: CouponId(row.coupon_id),
            status,
            order: row.order_id.map(OrderId::new),
        })
    }
}

#[derive(sqlx::FromRow)]
struct AvailableRow {
    grant_id: i64,
    coupon_id: i64,
    name: String,
    store_id: String,
    threshold: i64,
    discount: i64,
    end_time: DateTime<Utc>,
}

impl From<AvailableRow> for AvailableCoupon {
    fn from(row: AvailableRow) -> Self {
        Self {
            grant: GrantId(row.grant_id),
            coupon: CouponId(row.coupon_id),
            name: row.name,
            store: StoreId::new(row.store_id),
            threshold: row.threshold,
            discount: row.discount,
            end_time: row.end_time,
        }
    }
}

/// `PostgreSQL`-backed [`Datastore`] and [`IdentityProvider`].
///
/// # Example
///
/// ```no_run
/// use bookstore_postgres::PostgresDatastore;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let datastore = PostgresDatastore::new(pool);
/// datastore.migrate().await?;
/// datastore.register_user("alice", "secret", 1_000).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresDatastore {
    pool: PgPool,
}

impl PostgresDatastore {
    /// Create a datastore over an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transient`] if the database is unreachable.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx("connect", e))?;
        Ok(Self::new(pool))
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Register a user with a credential and an opening balance.
    ///
    /// User records are owned by the authentication collaborator; this is the
    /// seeding entry point for tests and tooling.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the user already exists.
    pub async fn register_user(
        &self,
        user: impl Into<UserId>,
        credential: &str,
        balance: i64,
    ) -> Result<(), StoreError> {
        let user = user.into();
        sqlx::query("INSERT INTO users (user_id, credential, balance) VALUES ($1, $2, $3)")
            .bind(user.as_str())
            .bind(credential)
            .bind(balance)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx("register user", e))?;
        tracing::debug!(user = %user, "User registered");
        Ok(())
    }

    async fn lines_for(&self, orders: &[String]) -> Result<HashMap<String, Vec<OrderLine>>, StoreError> {
        let rows: Vec<LineRow> = sqlx::query_as(
            r"
            SELECT order_id, book_id, quantity, unit_price
            FROM order_lines
            WHERE order_id = ANY($1)
            ORDER BY order_id, position
            ",
        )
        .bind(orders)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx("load order lines", e))?;

        let mut lines: HashMap<String, Vec<OrderLine>> = HashMap::new();
        for row in rows {
            lines.entry(row.order_id.clone()).or_default().push(row.into());
        }
        Ok(lines)
    }
}

impl Datastore for PostgresDatastore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn Transaction>> {
        Box::pin(async move {
            let tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx("begin transaction", e))?;
            let tx: Box<dyn Transaction> = Box::new(PgTransaction { tx });
            Ok(tx)
        })
    }

    fn orders_for_buyer(
        &self,
        buyer: &UserId,
        limit: i64,
        offset: i64,
    ) -> StoreFuture<'_, Vec<OrderDetails>> {
        let buyer = buyer.clone();
        Box::pin(async move {
            let rows: Vec<OrderRow> = sqlx::query_as(
                r"
                SELECT order_id, buyer_id, store_id, status, total_price, created_at
                FROM orders
                WHERE buyer_id = $1
                ORDER BY created_at DESC, seq DESC
                LIMIT $2 OFFSET $3
                ",
            )
            .bind(buyer.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("list orders", e))?;

            let ids: Vec<String> = rows.iter().map(|row| row.order_id.clone()).collect();
            let mut lines = self.lines_for(&ids).await?;

            rows.into_iter()
                .map(|row| -> Result<OrderDetails, StoreError> {
                    let order = Order::try_from(row)?;
                    let lines = lines.remove(order.id.as_str()).unwrap_or_default();
                    Ok(OrderDetails { order, lines })
                })
                .collect()
        })
    }

    fn unpaid_orders_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<(UserId, OrderId)>> {
        Box::pin(async move {
            let rows: Vec<(String, String)> = sqlx::query_as(
                r"
                SELECT buyer_id, order_id
                FROM orders
                WHERE status = $1 AND created_at < $2
                ORDER BY created_at, seq
                ",
            )
            .bind(OrderStatus::Unpaid.as_str())
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("select stale orders", e))?;

            Ok(rows
                .into_iter()
                .map(|(buyer, order)| (UserId::new(buyer), OrderId::new(order)))
                .collect())
        })
    }

    fn available_coupons(
        &self,
        user: &UserId,
        store: Option<&StoreId>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<AvailableCoupon>> {
        let user = user.clone();
        let store = store.map(|store| store.as_str().to_string());
        Box::pin(async move {
            let rows: Vec<AvailableRow> = sqlx::query_as(
                r"
                SELECT g.grant_id, c.coupon_id, c.name, c.store_id, c.threshold, c.discount, c.end_time
                FROM coupon_grants g
                JOIN coupons c ON c.coupon_id = g.coupon_id
                WHERE g.owner_id = $1
                  AND g.status = $2
                  AND c.end_time >= $3
                  AND ($4::TEXT IS NULL OR c.store_id = $4)
                ORDER BY g.grant_id
                ",
            )
            .bind(user.as_str())
            .bind(GrantStatus::Unused.as_str())
            .bind(now)
            .bind(store)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("list available coupons", e))?;

            Ok(rows.into_iter().map(AvailableCoupon::from).collect())
        })
    }

    fn store_stats(&self, store: &StoreId) -> StoreFuture<'_, StoreStats> {
        let store = store.clone();
        Box::pin(async move {
            let settled = settled_statuses();
            let (total_orders, total_revenue): (i64, i64) = sqlx::query_as(
                r"
                SELECT COUNT(*)::BIGINT, COALESCE(SUM(total_price), 0)::BIGINT
                FROM orders
                WHERE store_id = $1 AND status = ANY($2)
                ",
            )
            .bind(store.as_str())
            .bind(&settled)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx("store totals", e))?;

            let top: Vec<(String, i64)> = sqlx::query_as(
                r"
                SELECT l.book_id, SUM(l.quantity)::BIGINT AS sold
                FROM order_lines l
                JOIN orders o ON o.order_id = l.order_id
                WHERE o.store_id = $1 AND o.status = ANY($2)
                GROUP BY l.book_id
                ORDER BY sold DESC, l.book_id
                LIMIT 5
                ",
            )
            .bind(store.as_str())
            .bind(&settled)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("store best sellers", e))?;

            Ok(StoreStats {
                total_orders,
                total_revenue,
                top_books: top
                    .into_iter()
                    .map(|(book, quantity)| BookSales {
                        book: BookId::new(book),
                        quantity,
                    })
                    .collect(),
            })
        })
    }

    fn order(&self, order: &OrderId) -> StoreFuture<'_, Option<OrderDetails>> {
        let order = order.clone();
        Box::pin(async move {
            let row: Option<OrderRow> = sqlx::query_as(
                r"
                SELECT order_id, buyer_id, store_id, status, total_price, created_at
                FROM orders
                WHERE order_id = $1
                ",
            )
            .bind(order.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("load order", e))?;

            let Some(row) = row else {
                return Ok(None);
            };
            let order = Order::try_from(row)?;
            let mut lines = self.lines_for(&[order.id.as_str().to_string()]).await?;
            let lines = lines.remove(order.id.as_str()).unwrap_or_default();
            Ok(Some(OrderDetails { order, lines }))
        })
    }

    fn inventory(&self, store: &StoreId, book: &BookId) -> StoreFuture<'_, Option<InventoryEntry>> {
        let (store, book) = (store.clone(), book.clone());
        Box::pin(async move {
            let row: Option<(i64, i64)> = sqlx::query_as(
                "SELECT stock_level, unit_price FROM inventory WHERE store_id = $1 AND book_id = $2",
            )
            .bind(store.as_str())
            .bind(book.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx("load inventory", e))?;

            Ok(row.map(|(stock_level, unit_price)| InventoryEntry {
                store,
                book,
                stock_level,
                unit_price,
            }))
        })
    }

    fn account(&self, user: &UserId) -> StoreFuture<'_, Option<Account>> {
        let user = user.clone();
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as("SELECT balance FROM users WHERE user_id = $1")
                .bind(user.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx("load account", e))?;
            Ok(row.map(|(balance,)| Account { user, balance }))
        })
    }

    fn cart_items(&self, user: &UserId) -> StoreFuture<'_, Vec<CartItem>> {
        let user = user.clone();
        Box::pin(async move {
            let rows: Vec<(String, String, i64)> = sqlx::query_as(
                r"
                SELECT store_id, book_id, quantity
                FROM cart_items
                WHERE user_id = $1
                ORDER BY store_id, book_id
                ",
            )
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx("load cart", e))?;

            Ok(rows
                .into_iter()
                .map(|(store, book, quantity)| CartItem {
                    store: StoreId::new(store),
                    book: BookId::new(book),
                    quantity,
                })
                .collect())
        })
    }
}

impl IdentityProvider for PostgresDatastore {
    fn user_exists(&self, user: &UserId) -> StoreFuture<'_, bool> {
        let user = user.clone();
        Box::pin(async move {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE user_id = $1)")
                    .bind(user.as_str())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| map_sqlx("check user", e))?;
            Ok(exists)
        })
    }

    fn store_exists(&self, store: &StoreId) -> StoreFuture<'_, bool> {
        let store = store.clone();
        Box::pin(async move {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM stores WHERE store_id = $1)")
                    .bind(store.as_str())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| map_sqlx("check store", e))?;
            Ok(exists)
        })
    }

    fn credential_valid(&self, user: &UserId, secret: &str) -> StoreFuture<'_, bool> {
        let user = user.clone();
        let secret = secret.to_string();
        Box::pin(async move {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT credential FROM users WHERE user_id = $1")
                    .bind(user.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| map_sqlx("check credential", e))?;
            Ok(row.is_some_and(|(stored,)| {
                constant_time_eq::constant_time_eq(stored.as_bytes(), secret.as_bytes())
            }))
        })
    }
}

/// One open `PostgreSQL` transaction. Dropped without commit, sqlx rolls it
/// back.
struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl Transaction for PgTransaction {
    fn lock_inventory(
        &mut self,
        store: &StoreId,
        book: &BookId,
    ) -> StoreFuture<'_, Option<InventoryEntry>> {
        let (store, book) = (store.clone(), book.clone());
        Box::pin(async move {
            let row: Option<(i64, i64)> = sqlx::query_as(
                r"
                SELECT stock_level, unit_price
                FROM inventory
                WHERE store_id = $1 AND book_id = $2
                FOR UPDATE
                ",
            )
            .bind(store.as_str())
            .bind(book.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("lock inventory", e))?;

            Ok(row.map(|(stock_level, unit_price)| InventoryEntry {
                store,
                book,
                stock_level,
                unit_price,
            }))
        })
    }

    fn set_stock(
        &mut self,
        store: &StoreId,
        book: &BookId,
        stock_level: i64,
    ) -> StoreFuture<'_, ()> {
        let (store, book) = (store.clone(), book.clone());
        Box::pin(async move {
            sqlx::query("UPDATE inventory SET stock_level = $3 WHERE store_id = $1 AND book_id = $2")
                .bind(store.as_str())
                .bind(book.as_str())
                .bind(stock_level)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx("update stock", e))?;
            Ok(())
        })
    }

    fn insert_inventory(&mut self, entry: &InventoryEntry) -> StoreFuture<'_, ()> {
        let entry = entry.clone();
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO inventory (store_id, book_id, stock_level, unit_price)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(entry.store.as_str())
            .bind(entry.book.as_str())
            .bind(entry.stock_level)
            .bind(entry.unit_price)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("insert inventory", e))?;
            Ok(())
        })
    }

    fn lock_account(&mut self, user: &UserId) -> StoreFuture<'_, Option<Account>> {
        let user = user.clone();
        Box::pin(async move {
            let row: Option<(i64,)> =
                sqlx::query_as("SELECT balance FROM users WHERE user_id = $1 FOR UPDATE")
                    .bind(user.as_str())
                    .fetch_optional(&mut *self.tx)
                    .await
                    .map_err(|e| map_sqlx("lock account", e))?;
            Ok(row.map(|(balance,)| Account { user, balance }))
        })
    }

    fn set_balance(&mut self, user: &UserId, balance: i64) -> StoreFuture<'_, ()> {
        let user = user.clone();
        Box::pin(async move {
            sqlx::query("UPDATE users SET balance = $2 WHERE user_id = $1")
                .bind(user.as_str())
                .bind(balance)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx("update balance", e))?;
            Ok(())
        })
    }

    fn store_owner(&mut self, store: &StoreId) -> StoreFuture<'_, Option<UserId>> {
        let store = store.clone();
        Box::pin(async move {
            let row: Option<(Option<String>,)> =
                sqlx::query_as("SELECT owner_id FROM stores WHERE store_id = $1")
                    .bind(store.as_str())
                    .fetch_optional(&mut *self.tx)
                    .await
                    .map_err(|e| map_sqlx("load store owner", e))?;
            Ok(row.and_then(|(owner,)| owner).map(UserId::new))
        })
    }

    fn store_exists(&mut self, store: &StoreId) -> StoreFuture<'_, bool> {
        let store = store.clone();
        Box::pin(async move {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM stores WHERE store_id = $1)")
                    .bind(store.as_str())
                    .fetch_one(&mut *self.tx)
                    .await
                    .map_err(|e| map_sqlx("check store", e))?;
            Ok(exists)
        })
    }

    fn insert_store(&mut self, store: &StoreId, owner: &UserId) -> StoreFuture<'_, ()> {
        let (store, owner) = (store.clone(), owner.clone());
        Box::pin(async move {
            sqlx::query("INSERT INTO stores (store_id, owner_id) VALUES ($1, $2)")
                .bind(store.as_str())
                .bind(owner.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx("insert store", e))?;
            Ok(())
        })
    }

    fn lock_order(&mut self, order: &OrderId) -> StoreFuture<'_, Option<Order>> {
        let order = order.clone();
        Box::pin(async move {
            let row: Option<OrderRow> = sqlx::query_as(
                r"
                SELECT order_id, buyer_id, store_id, status, total_price, created_at
                FROM orders
                WHERE order_id = $1
                FOR UPDATE
                ",
            )
            .bind(order.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("lock order", e))?;
            row.map(Order::try_from).transpose()
        })
    }

    fn order_lines(&mut self, order: &OrderId) -> StoreFuture<'_, Vec<OrderLine>> {
        let order = order.clone();
        Box::pin(async move {
            let rows: Vec<LineRow> = sqlx::query_as(
                r"
                SELECT order_id, book_id, quantity, unit_price
                FROM order_lines
                WHERE order_id = $1
                ORDER BY position
                ",
            )
            .bind(order.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("load order lines", e))?;
            Ok(rows.into_iter().map(OrderLine::from).collect())
        })
    }

    fn insert_order(&mut self, order: &Order, lines: &[OrderLine]) -> StoreFuture<'_, ()> {
        let order = order.clone();
        let lines = lines.to_vec();
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO orders (order_id, buyer_id, store_id, status, total_price, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(order.id.as_str())
            .bind(order.buyer.as_str())
            .bind(order.store.as_str())
            .bind(order.status.as_str())
            .bind(order.total_price)
            .bind(order.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("insert order", e))?;

            for (position, line) in lines.iter().enumerate() {
                let position = i32::try_from(position)
                    .map_err(|_| StoreError::Database(format!("order line {position} out of range")))?;
                sqlx::query(
                    r"
                    INSERT INTO order_lines (order_id, position, book_id, quantity, unit_price)
                    VALUES ($1, $2, $3, $4, $5)
                    ",
                )
                .bind(order.id.as_str())
                .bind(position)
                .bind(line.book.as_str())
                .bind(line.quantity)
                .bind(line.unit_price)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx("insert order line", e))?;
            }
            Ok(())
        })
    }

    fn set_order_status(&mut self, order: &OrderId, status: OrderStatus) -> StoreFuture<'_, ()> {
        let order = order.clone();
        Box::pin(async move {
            sqlx::query("UPDATE orders SET status = $2 WHERE order_id = $1")
                .bind(order.as_str())
                .bind(status.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx("update order status", e))?;
            Ok(())
        })
    }

    fn lock_coupon(&mut self, coupon: CouponId) -> StoreFuture<'_, Option<CouponDefinition>> {
        Box::pin(async move {
            let row: Option<CouponRow> = sqlx::query_as(
                r"
                SELECT coupon_id, store_id, name, threshold, discount, stock, end_time
                FROM coupons
                WHERE coupon_id = $1
                FOR UPDATE
                ",
            )
            .bind(coupon.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("lock coupon", e))?;
            Ok(row.map(CouponDefinition::from))
        })
    }

    fn insert_coupon(&mut self, coupon: &NewCoupon) -> StoreFuture<'_, CouponId> {
        let coupon = coupon.clone();
        Box::pin(async move {
            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO coupons (store_id, name, threshold, discount, stock, end_time)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING coupon_id
                ",
            )
            .bind(coupon.store.as_str())
            .bind(&coupon.name)
            .bind(coupon.threshold)
            .bind(coupon.discount)
            .bind(coupon.stock)
            .bind(coupon.end_time)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("insert coupon", e))?;
            Ok(CouponId(id))
        })
    }

    fn set_coupon_stock(&mut self, coupon: CouponId, stock: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE coupons SET stock = $2 WHERE coupon_id = $1")
                .bind(coupon.0)
                .bind(stock)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx("update coupon stock", e))?;
            Ok(())
        })
    }

    fn lock_grant(&mut self, grant: GrantId) -> StoreFuture<'_, Option<CouponGrant>> {
        Box::pin(async move {
            let row: Option<GrantRow> = sqlx::query_as(
                r"
                SELECT grant_id, owner_id, coupon_id, status, order_id
                FROM coupon_grants
                WHERE grant_id = $1
                FOR UPDATE
                ",
            )
            .bind(grant.0)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("lock grant", e))?;
            row.map(CouponGrant::try_from).transpose()
        })
    }

    fn insert_grant(&mut self, owner: &UserId, coupon: CouponId) -> StoreFuture<'_, GrantId> {
        let owner = owner.clone();
        Box::pin(async move {
            let (id,): (i64,) = sqlx::query_as(
                r"
                INSERT INTO coupon_grants (owner_id, coupon_id, status)
                VALUES ($1, $2, $3)
                RETURNING grant_id
                ",
            )
            .bind(owner.as_str())
            .bind(coupon.0)
            .bind(GrantStatus::Unused.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("insert grant", e))?;
            Ok(GrantId(id))
        })
    }

    fn mark_grant_used(&mut self, grant: GrantId, order: &OrderId) -> StoreFuture<'_, ()> {
        let order = order.clone();
        Box::pin(async move {
            sqlx::query("UPDATE coupon_grants SET status = $2, order_id = $3 WHERE grant_id = $1")
                .bind(grant.0)
                .bind(GrantStatus::Used.as_str())
                .bind(order.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx("mark grant used", e))?;
            Ok(())
        })
    }

    fn lock_cart_item(
        &mut self,
        user: &UserId,
        store: &StoreId,
        book: &BookId,
    ) -> StoreFuture<'_, Option<i64>> {
        let (user, store, book) = (user.clone(), store.clone(), book.clone());
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as(
                r"
                SELECT quantity
                FROM cart_items
                WHERE user_id = $1 AND store_id = $2 AND book_id = $3
                FOR UPDATE
                ",
            )
            .bind(user.as_str())
            .bind(store.as_str())
            .bind(book.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("lock cart item", e))?;
            Ok(row.map(|(quantity,)| quantity))
        })
    }

    fn set_cart_item(&mut self, user: &UserId, item: &CartItem) -> StoreFuture<'_, ()> {
        let (user, item) = (user.clone(), item.clone());
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO cart_items (user_id, store_id, book_id, quantity)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id, store_id, book_id)
                DO UPDATE SET quantity = EXCLUDED.quantity
                ",
            )
            .bind(user.as_str())
            .bind(item.store.as_str())
            .bind(item.book.as_str())
            .bind(item.quantity)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("upsert cart item", e))?;
            Ok(())
        })
    }

    fn delete_cart_item(
        &mut self,
        user: &UserId,
        store: &StoreId,
        book: &BookId,
    ) -> StoreFuture<'_, bool> {
        let (user, store, book) = (user.clone(), store.clone(), book.clone());
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM cart_items WHERE user_id = $1 AND store_id = $2 AND book_id = $3",
            )
            .bind(user.as_str())
            .bind(store.as_str())
            .bind(book.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx("delete cart item", e))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn clear_cart(&mut self, user: &UserId) -> StoreFuture<'_, u64> {
        let user = user.clone();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
                .bind(user.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx("clear cart", e))?;
            Ok(result.rows_affected())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx
                .commit()
                .await
                .map_err(|e| map_sqlx("commit", e))
        })
    }
}
