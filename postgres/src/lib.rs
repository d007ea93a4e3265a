//! `PostgreSQL` datastore for the bookstore engine.
//!
//! [`PostgresDatastore`] implements both `Datastore` and `IdentityProvider`
//! from `bookstore-core`. Every read that precedes a mutation inside a
//! transaction is a `SELECT ... FOR UPDATE`, so concurrent orders, payments
//! and coupon collections serialize on the rows they touch.
//!
//! # Example
//!
//! ```ignore
//! use bookstore_postgres::PostgresDatastore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let datastore = PostgresDatastore::connect("postgres://localhost/bookstore").await?;
//!     datastore.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod datastore;
pub mod error;

pub use datastore::PostgresDatastore;
pub use error::map_sqlx;
