//! Named connection profiles.
//!
//! [`ConnectionManager`] holds a profile map and constructs one
//! [`ConnectionPooled`] per profile, lazily, the first time the profile is
//! asked for. Asking for a name with no profile is an error; nothing ever
//! falls back to another profile silently.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{ConnectionConfig, ManagerConfig};
use crate::connection::Connection;
use crate::driver::{DriverFactory, DriverWarning};
use crate::error::{DbError, DbResult};
use crate::pool::PooledConnection;
use crate::pooled::ConnectionPooled;
use crate::value::{Row, Value};

/// Lazily-constructed, cached pooled handles for a set of named profiles.
///
/// The delegating methods below run on the default profile's default
/// connection, so the everyday call shape stays one line:
///
/// ```ignore
/// let manager = ConnectionManager::new(config, factory);
/// manager.execute("insert into t (a) values (?)", &[1.into()]).await?;
/// manager.connection(Some("replica")).await?.fetch_all("select ...", &[]).await?;
/// ```
pub struct ConnectionManager<F: DriverFactory> {
    factory: Arc<F>,
    default_profile: String,
    profiles: HashMap<String, ConnectionConfig>,
    connections: RwLock<HashMap<String, Arc<ConnectionPooled<F>>>>,
}

impl<F: DriverFactory> ConnectionManager<F> {
    pub fn new(config: ManagerConfig, factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            default_profile: config.default,
            profiles: config.profiles,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Name of the profile used when none is given.
    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    /// The pooled handle for a profile, constructing and caching it on
    /// first access. `None` selects the default profile.
    pub async fn connection(&self, name: Option<&str>) -> DbResult<Arc<ConnectionPooled<F>>> {
        let name = name.unwrap_or(&self.default_profile);

        {
            let connections = self.connections.read().await;
            if let Some(pooled) = connections.get(name) {
                return Ok(Arc::clone(pooled));
            }
        }

        let config = self
            .profiles
            .get(name)
            .ok_or_else(|| DbError::unknown_profile(name))?;

        let mut connections = self.connections.write().await;
        // Another task may have won the race between the read and write
        // locks; keep its instance.
        if let Some(pooled) = connections.get(name) {
            return Ok(Arc::clone(pooled));
        }

        let pooled = Arc::new(ConnectionPooled::new(
            config.clone(),
            Arc::clone(&self.factory),
        ));
        connections.insert(name.to_string(), Arc::clone(&pooled));
        info!(profile = %name, "connection profile initialized");
        Ok(pooled)
    }

    /// Check a connection out of the default profile's pool.
    pub async fn pool(&self) -> DbResult<PooledConnection<F>> {
        self.connection(None).await?.pool().await
    }

    /// Close every profile constructed so far. A failing profile does not
    /// stop the rest from closing; the first error is returned at the end.
    pub async fn close(&self) -> DbResult<()> {
        let connections: Vec<(String, Arc<ConnectionPooled<F>>)> = {
            let map = self.connections.read().await;
            map.iter()
                .map(|(name, pooled)| (name.clone(), Arc::clone(pooled)))
                .collect()
        };

        let mut first_error = None;
        for (name, pooled) in connections {
            if let Err(err) = pooled.close().await {
                warn!(profile = %name, error = %err, "profile close failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // Delegation to the default profile's default connection.

    pub async fn query(&self, sql: &str, unbuffered: bool) -> DbResult<u64> {
        self.connection(None).await?.query(sql, unbuffered).await
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.connection(None).await?.execute(sql, params).await
    }

    pub async fn execute_many(&self, sql: &str, params: &[Vec<Value>]) -> DbResult<u64> {
        self.connection(None).await?.execute_many(sql, params).await
    }

    pub async fn fetch_all(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        self.connection(None).await?.fetch_all(sql, params).await
    }

    pub async fn fetch_row(&self, sql: &str, params: &[Value]) -> DbResult<Option<Row>> {
        self.connection(None).await?.fetch_row(sql, params).await
    }

    pub async fn fetch_column(
        &self,
        sql: &str,
        params: &[Value],
        column: usize,
    ) -> DbResult<Option<Value>> {
        self.connection(None)
            .await?
            .fetch_column(sql, params, column)
            .await
    }

    pub async fn fetch_first(&self, sql: &str, params: &[Value]) -> DbResult<Option<Value>> {
        self.connection(None).await?.fetch_first(sql, params).await
    }

    pub async fn insert(
        &self,
        sql: &str,
        params: &[Value],
        data: &[(&str, Value)],
    ) -> DbResult<u64> {
        self.connection(None).await?.insert(sql, params, data).await
    }

    pub async fn insert_many(
        &self,
        sql: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
    ) -> DbResult<u64> {
        self.connection(None)
            .await?
            .insert_many(sql, columns, rows)
            .await
    }

    pub async fn update(
        &self,
        sql: &str,
        params: &[Value],
        data: &[(&str, Value)],
    ) -> DbResult<u64> {
        self.connection(None).await?.update(sql, params, data).await
    }

    pub async fn delete(&self, sql: &str, params: &[Value]) -> DbResult<u64> {
        self.connection(None).await?.delete(sql, params).await
    }

    pub async fn show_warnings(&self) -> DbResult<Vec<DriverWarning>> {
        self.connection(None).await?.show_warnings().await
    }

    /// Run a closure inside a transaction on the default profile's
    /// default connection.
    pub async fn with_transaction<T, B>(&self, body: B) -> DbResult<T>
    where
        B: for<'c> FnOnce(&'c mut Connection<F::Driver>) -> BoxFuture<'c, DbResult<T>>,
    {
        self.connection(None).await?.with_transaction(body).await
    }
}
