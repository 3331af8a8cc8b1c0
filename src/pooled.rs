//! A pooled connection handle: one lazily-created default connection for
//! everyday statements, plus a bounded pool for concurrent checkout.
//!
//! The default connection never enters the pool. It is created at most
//! once, on first use, behind a `OnceCell`; the delegating methods below
//! lock it per call, so a `ConnectionPooled` can be shared behind an
//! `Arc` and used from many tasks.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, MutexGuard, OnceCell};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::driver::{DriverFactory, DriverWarning};
use crate::error::DbResult;
use crate::pool::{Pool, PooledConnection};
use crate::value::{Row, Value};

/// A default connection plus a connection pool, built from one
/// configuration and one driver factory.
pub struct ConnectionPooled<F: DriverFactory> {
    config: ConnectionConfig,
    factory: Arc<F>,
    default: OnceCell<Mutex<Connection<F::Driver>>>,
    pool: Pool<F>,
}

impl<F: DriverFactory> std::fmt::Debug for ConnectionPooled<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPooled").finish_non_exhaustive()
    }
}

impl<F: DriverFactory> ConnectionPooled<F> {
    /// Must run inside a tokio runtime (the pool spawns its sweeper).
    pub fn new(config: ConnectionConfig, factory: Arc<F>) -> Self {
        let pool = Pool::new(config.clone(), Arc::clone(&factory));
        Self {
            config,
            factory,
            default: OnceCell::new(),
            pool,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The default (non-pooled) connection, created and connected on
    /// first use. Concurrent first calls race on the cell, not on the
    /// server: only one connection is ever created.
    pub async fn connection(&self) -> DbResult<MutexGuard<'_, Connection<F::Driver>>> {
        let cell = self
            .default
            .get_or_try_init(|| async {
                let driver = self.factory.open(&self.config);
                let mut conn = Connection::new(driver, self.config.clone());
                conn.connect().await?;
                Ok::<_, crate::error::DbError>(Mutex::new(conn))
            })
            .await?;
        Ok(cell.lock().await)
    }

    /// Check a connection out of the pool.
    pub async fn pool(&self) -> DbResult<PooledConnection<F>> {
        self.pool.acquire().await
    }

    /// Close the pool and the default connection.
    pub async fn close(&self) -> DbResult<()> {
        self.pool.close().await;
        if let Some(cell) = self.default.get() {
            cell.lock().await.close().await?;
        }
        Ok(())
    }

    // Delegation to the default connection.

    pub async fn query(&self, sql: &str, unbuffered: bool) -> DbResult<u64> {
        self.connection().await?.query(sql, unbuffered).await
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.connection().await?.execute(sql, params).await
    }

    pub async fn execute_many(&self, sql: &str, params: &[Vec<Value>]) -> DbResult<u64> {
        self.connection().await?.execute_many(sql, params).await
    }

    pub async fn fetch_all(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.connection().await?.fetch_all(sql, params).await
    }

    pub async fn fetch_row(&self, sql: &str, params: &[Value]) -> DbResult<Option<Row>> {
        self.connection().await?.fetch_row(sql, params).await
    }

    pub async fn fetch_column(
        &self,
        sql: &str,
        params: &[Value],
        column: usize,
    ) -> DbResult<Option<Value>> {
        self.connection().await?.fetch_column(sql, params, column).await
    }

    pub async fn fetch_first(&self, sql: &str, params: &[Value]) -> DbResult<Option<Value>> {
        self.connection().await?.fetch_first(sql, params).await
    }

    pub async fn insert(
        &self,
        sql: &str,
        params: &[Value],
        data: &[(&str, Value)],
    ) -> DbResult<u64> {
        self.connection().await?.insert(sql, params, data).await
    }

    pub async fn insert_many(
        &self,
        sql: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
    ) -> DbResult<u64> {
        self.connection().await?.insert_many(sql, columns, rows).await
    }

    pub async fn update(
        &self,
        sql: &str,
        params: &[Value],
        data: &[(&str, Value)],
    ) -> DbResult<u64> {
        self.connection().await?.update(sql, params, data).await
    }

    pub async fn delete(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.connection().await?.delete(sql, params).await
    }

    pub async fn show_warnings(&self) -> DbResult<Vec<DriverWarning>> {
        self.connection().await?.show_warnings().await
    }

    /// Run a closure inside a transaction on the default connection.
    pub async fn with_transaction<T, B>(&self, body: B) -> DbResult<T>
    where
        B: for<'c> FnOnce(&'c mut Connection<F::Driver>) -> BoxFuture<'c, DbResult<T>>,
    {
        self.connection().await?.with_transaction(body).await
    }
}
