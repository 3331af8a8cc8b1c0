//! Resilient pooled MySQL client layer.
//!
//! Wraps a wire driver (supplied via the [`driver::Driver`] trait) with
//! automatic reconnect-and-retry on lost connections, per-statement query
//! logging, simplified fetch methods, statement builders, paginated
//! iteration, transactions, a bounded connection pool, and named
//! connection profiles.

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod manager;
pub mod pool;
pub mod pooled;
pub mod sql;
pub mod testkit;
pub mod transaction;
pub mod value;

pub use config::{ConnectionConfig, ManagerConfig, PoolOptions};
pub use connection::{Connection, FetchOptions, PagedRows};
pub use driver::{Driver, DriverError, DriverFactory};
pub use error::{DbError, DbResult};
pub use manager::ConnectionManager;
pub use pool::{Pool, PooledConnection};
pub use pooled::ConnectionPooled;
pub use transaction::Transaction;
pub use value::{Row, Value};
