//! Bounded connection pool.
//!
//! A semaphore caps the number of checked-out connections; callers block
//! in [`Pool::acquire`] until a permit frees up. Returned connections park
//! on an idle list and are handed out most-recently-used first. A
//! background sweeper discards idle connections that outlive the
//! configured idle window, holding only a `Weak` handle so an abandoned
//! pool can drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::driver::DriverFactory;
use crate::error::{DbError, DbResult};

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

struct IdleConn<F: DriverFactory> {
    conn: Connection<F::Driver>,
    parked_at: Instant,
}

struct PoolShared<F: DriverFactory> {
    factory: Arc<F>,
    config: ConnectionConfig,
    name: String,
    idle_ttl: Duration,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConn<F>>>,
    closed: AtomicBool,
}

/// A bounded pool of [`Connection`]s built from one configuration and one
/// driver factory.
pub struct Pool<F: DriverFactory> {
    shared: Arc<PoolShared<F>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<F: DriverFactory> Pool<F> {
    /// Create a pool and start its idle sweeper.
    ///
    /// Must run inside a tokio runtime (the sweeper is spawned here).
    pub fn new(config: ConnectionConfig, factory: Arc<F>) -> Self {
        let max_size = config.pool.max_size_or_default();
        let idle_ttl = Duration::from_secs(config.pool.idle_secs_or_default());
        let name = config.pool.name_or_default().to_string();

        let shared = Arc::new(PoolShared {
            factory,
            config,
            name,
            idle_ttl,
            semaphore: Arc::new(Semaphore::new(max_size as usize)),
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        let sweeper = spawn_sweeper(Arc::downgrade(&shared));

        info!(pool = %shared.name, max_size, "connection pool created");
        Self {
            shared,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Check a connection out of the pool, blocking while all permits are
    /// in use. Fresh connections are opened only when no usable idle
    /// connection exists.
    pub async fn acquire(&self) -> DbResult<PooledConnection<F>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(DbError::PoolClosed);
        }

        let permit = Arc::clone(&self.shared.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DbError::PoolClosed)?;

        let conn = match self.take_idle() {
            Some(conn) => {
                debug!(pool = %self.shared.name, "reusing idle connection");
                conn
            }
            None => {
                let driver = self.shared.factory.open(&self.shared.config);
                let mut conn = Connection::new(driver, self.shared.config.clone());
                conn.connect().await?;
                debug!(pool = %self.shared.name, "opened fresh pooled connection");
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Number of idle connections currently parked.
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Close the pool: stop the sweeper, wake blocked acquirers with an
    /// error, and tear down every idle connection.
    pub async fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.semaphore.close();

        if let Some(handle) = self.sweeper.lock().ok().and_then(|mut h| h.take()) {
            handle.abort();
        }

        let drained: Vec<IdleConn<F>> = match self.shared.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for mut entry in drained {
            if let Err(err) = entry.conn.close().await {
                debug!(pool = %self.shared.name, error = %err, "error closing idle connection");
            }
        }

        info!(pool = %self.shared.name, "connection pool closed");
    }

    /// Pop the most recently parked connection that is still inside the
    /// idle window; anything older is dropped on the way.
    fn take_idle(&self) -> Option<Connection<F::Driver>> {
        let mut idle = self.shared.idle.lock().ok()?;
        while let Some(entry) = idle.pop() {
            if entry.parked_at.elapsed() <= self.shared.idle_ttl {
                return Some(entry.conn);
            }
            debug!(pool = %self.shared.name, "discarding idle connection past ttl");
        }
        None
    }
}

fn spawn_sweeper<F: DriverFactory>(weak: Weak<PoolShared<F>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(shared) = weak.upgrade() else {
                return;
            };

            // Collect expired entries under the lock, drop them outside it.
            let expired: Vec<IdleConn<F>> = match shared.idle.lock() {
                Ok(mut idle) => {
                    let ttl = shared.idle_ttl;
                    let (keep, expire): (Vec<_>, Vec<_>) = idle
                        .drain(..)
                        .partition(|entry| entry.parked_at.elapsed() <= ttl);
                    *idle = keep;
                    expire
                }
                Err(_) => Vec::new(),
            };

            if !expired.is_empty() {
                debug!(
                    pool = %shared.name,
                    count = expired.len(),
                    "swept expired idle connections"
                );
            }
            drop(expired);
        }
    })
}

/// A checked-out pooled connection. Dereferences to [`Connection`]; on
/// drop the connection returns to the idle list (when still open) and the
/// permit frees unconditionally, so the pool never leaks capacity on
/// error paths.
pub struct PooledConnection<F: DriverFactory> {
    conn: Option<Connection<F::Driver>>,
    shared: Arc<PoolShared<F>>,
    _permit: OwnedSemaphorePermit,
}

impl<F: DriverFactory> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish_non_exhaustive()
    }
}

impl<F: DriverFactory> std::ops::Deref for PooledConnection<F> {
    type Target = Connection<F::Driver>;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<F: DriverFactory> std::ops::DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<F: DriverFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.shared.closed.load(Ordering::Acquire) || !conn.is_connected() {
            return;
        }
        if let Ok(mut idle) = self.shared.idle.lock() {
            idle.push(IdleConn {
                conn,
                parked_at: Instant::now(),
            });
        }
    }
}
