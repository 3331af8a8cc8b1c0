//! A resilient server connection.
//!
//! [`Connection`] wraps a [`Driver`] session and layers on top of it:
//!
//! 1. Automatic reconnect-and-retry when the server drops the connection
//!    (error 2006 "gone away" / 2013 "lost during query")
//! 2. One timed log record per statement attempt, with slow-query warnings
//! 3. Session time zone setup right after each physical connect
//! 4. Simplified fetch methods (`fetch_all` / `fetch_row` / `fetch_column`
//!    / `fetch_first`) and a paginated [`fetch_iterator`](Connection::fetch_iterator)
//! 5. Statement builders (`insert` / `insert_many` / `update` / `delete`)
//! 6. Transactions, scoped or guard-based

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use futures_util::future::BoxFuture;
use tracing::{Level, debug, error, info, warn};

use crate::config::{ConnectionConfig, NOTE_QUERY_TIME, WARN_QUERY_TIME};
use crate::driver::{Driver, DriverError, DriverWarning};
use crate::error::{DbError, DbResult};
use crate::sql;
use crate::transaction::Transaction;
use crate::value::{Row, Value};

/// Page callback for [`Connection::fetch_iterator`]. Receives the current
/// row offset and the 1-based page number; returning `false` stops the
/// iteration.
pub type PageCallback = Box<dyn FnMut(u64, u64) -> bool + Send>;

/// Options for [`Connection::fetch_iterator`].
pub struct FetchOptions {
    max: u64,
    per: u64,
    callback: Option<PageCallback>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max: 0,
            per: 100,
            callback: None,
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after this many rows; 0 means unlimited.
    pub fn max(mut self, max: u64) -> Self {
        self.max = max;
        self
    }

    /// Rows fetched per page.
    pub fn per(mut self, per: u64) -> Self {
        self.per = per;
        self
    }

    /// Install a progress callback, checked before every yielded row.
    pub fn on_page(mut self, callback: impl FnMut(u64, u64) -> bool + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// A single server connection with reconnect-retry, query logging, and
/// statement builders.
pub struct Connection<D: Driver> {
    driver: D,
    config: ConnectionConfig,
    log_target: String,
}

impl<D: Driver> Connection<D> {
    pub fn new(driver: D, config: ConnectionConfig) -> Self {
        let log_target = config.log_target();
        Self {
            driver,
            config,
            log_target,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn log_target(&self) -> &str {
        &self.log_target
    }

    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    /// Open the server session. A no-op when the socket is already open.
    pub async fn connect(&mut self) -> DbResult<()> {
        if self.driver.is_connected() {
            return Ok(());
        }
        self.connect_physical().await
    }

    /// Close the server session.
    pub async fn close(&mut self) -> DbResult<()> {
        self.driver.close().await?;
        debug!(connection = %self.log_target, "connection closed");
        Ok(())
    }

    /// Run raw SQL with reconnect-retry and query logging.
    ///
    /// On a lost connection the dead socket is forced shut, the session is
    /// reopened, and the statement runs again. The loop has no attempt
    /// cap: it retries as long as each failure stays in the lost class,
    /// and surfaces the first error of any other kind.
    pub async fn query(&mut self, sql: &str, unbuffered: bool) -> DbResult<u64> {
        loop {
            let start = Instant::now();
            match self.driver.query(sql, unbuffered).await {
                Ok(affected) => {
                    self.log_query(sql, start.elapsed().as_secs_f64(), Ok(affected));
                    return Ok(affected);
                }
                Err(err) => {
                    self.log_query(sql, start.elapsed().as_secs_f64(), Err(&err));
                    self.recover_or_bail(err).await?;
                }
            }
        }
    }

    /// Run a parameterized statement, with the same retry and logging as
    /// [`query`](Self::query). Returns the affected-row count.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        loop {
            let start = Instant::now();
            match self.driver.execute(sql, params).await {
                Ok(affected) => {
                    self.log_query(sql, start.elapsed().as_secs_f64(), Ok(affected));
                    return Ok(affected);
                }
                Err(err) => {
                    self.log_query(sql, start.elapsed().as_secs_f64(), Err(&err));
                    self.recover_or_bail(err).await?;
                }
            }
        }
    }

    /// Run one statement once per parameter set.
    pub async fn execute_many(&mut self, sql: &str, params: &[Vec<Value>]) -> DbResult<u64> {
        loop {
            let start = Instant::now();
            match self.driver.execute_many(sql, params).await {
                Ok(affected) => {
                    self.log_query(sql, start.elapsed().as_secs_f64(), Ok(affected));
                    return Ok(affected);
                }
                Err(err) => {
                    self.log_query(sql, start.elapsed().as_secs_f64(), Err(&err));
                    self.recover_or_bail(err).await?;
                }
            }
        }
    }

    /// Affected-row count of the last statement.
    pub fn rowcount(&self) -> u64 {
        self.driver.affected_rows()
    }

    /// Auto-increment id generated by the last insert.
    pub fn last_insert_id(&self) -> u64 {
        self.driver.last_insert_id()
    }

    /// Fetch every row of the result set.
    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        loop {
            let start = Instant::now();
            match self.driver.fetch_all(sql, params).await {
                Ok(rows) => {
                    self.log_query(sql, start.elapsed().as_secs_f64(), Ok(rows.len() as u64));
                    return Ok(rows);
                }
                Err(err) => {
                    self.log_query(sql, start.elapsed().as_secs_f64(), Err(&err));
                    self.recover_or_bail(err).await?;
                }
            }
        }
    }

    /// Fetch the first row. A `limit 1` is appended to unlimited SELECTs
    /// so the server never materializes more than one row.
    pub async fn fetch_row(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<Row>> {
        let limited = sql::limit(sql, 1);
        let mut rows = self.fetch_all(&limited, params).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }

    /// Fetch one column of the first row, by result-set position.
    /// Out-of-range positions yield `None`, not an error.
    pub async fn fetch_column(
        &mut self,
        sql: &str,
        params: &[Value],
        column: usize,
    ) -> DbResult<Option<Value>> {
        let row = self.fetch_row(sql, params).await?;
        Ok(row.and_then(|r| r.index(column).cloned()))
    }

    /// Fetch the first column of the first row.
    pub async fn fetch_first(&mut self, sql: &str, params: &[Value]) -> DbResult<Option<Value>> {
        self.fetch_column(sql, params, 0).await
    }

    /// Iterate a large result set in pages without a server-side cursor.
    ///
    /// The statement must be a SELECT without its own `limit` clause; the
    /// iterator appends `limit {per} offset {offset}` itself. See
    /// [`PagedRows::next`] for the traversal rules.
    pub fn fetch_iterator<'c>(
        &'c mut self,
        sql: &str,
        params: &[Value],
        options: FetchOptions,
    ) -> DbResult<PagedRows<'c, D>> {
        if !sql::is_select(sql) || sql::is_limited(sql) {
            return Err(DbError::sql(sql));
        }
        if options.per == 0 {
            return Err(DbError::invalid_input("page size must be at least 1"));
        }

        Ok(PagedRows {
            conn: self,
            sql: sql.to_string(),
            params: params.to_vec(),
            max: options.max,
            per: options.per,
            callback: options.callback,
            offset: 0,
            buffer: VecDeque::new(),
            done: false,
        })
    }

    /// Begin a transaction, returning a guard that must be consumed by
    /// [`commit`](Transaction::commit) or [`rollback`](Transaction::rollback).
    pub async fn transaction(&mut self) -> DbResult<Transaction<'_, D>> {
        Transaction::begin(self).await
    }

    /// Run a closure inside a transaction: commit on `Ok`, roll back on
    /// `Err` and return the closure's error unmodified.
    ///
    /// ```ignore
    /// conn.with_transaction(|conn| async move {
    ///     conn.execute("insert into t (a) values (?)", &[1.into()]).await?;
    ///     conn.execute("delete from old_t", &[]).await
    /// }.boxed()).await?;
    /// ```
    pub async fn with_transaction<T, F>(&mut self, body: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut Connection<D>) -> BoxFuture<'c, DbResult<T>>,
    {
        self.run_command("BEGIN").await?;
        debug!(connection = %self.log_target, "transaction started");

        match body(self).await {
            Ok(value) => {
                self.run_command("COMMIT").await?;
                debug!(connection = %self.log_target, "transaction committed");
                Ok(value)
            }
            Err(err) => {
                warn!(connection = %self.log_target, error = %err, "rolling back transaction");
                if let Err(rollback_err) = self.run_command("ROLLBACK").await {
                    warn!(
                        connection = %self.log_target,
                        error = %rollback_err,
                        "rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Build and run an INSERT (or REPLACE).
    ///
    /// When `data` is non-empty, a column list and escaped value list are
    /// spliced in right after the table name:
    ///
    /// ```ignore
    /// conn.insert("insert ignore into t", &[], &[("foo", 1.into())]).await?;
    /// // runs: insert ignore into t (`foo`) values (1)
    /// ```
    pub async fn insert(
        &mut self,
        sql: &str,
        params: &[Value],
        data: &[(&str, Value)],
    ) -> DbResult<u64> {
        let statement = match sql::insert_parts(sql) {
            Some((head, tail)) if !data.is_empty() => {
                let columns = data
                    .iter()
                    .map(|(name, _)| sql::identifier(name))
                    .collect::<Vec<_>>()
                    .join(", ");
                let values = data
                    .iter()
                    .map(|(_, value)| self.driver.escape(value))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{head} ({columns}) values ({values}) {tail}")
                    .trim_end()
                    .to_string()
            }
            _ => sql.to_string(),
        };

        if !sql::is_insert(&statement) {
            return Err(DbError::sql(statement));
        }
        self.execute(&statement, params).await
    }

    /// Build and run a multi-row INSERT (or REPLACE).
    ///
    /// Every row must carry exactly `columns.len()` values; the first row
    /// is checked up front.
    pub async fn insert_many(
        &mut self,
        sql: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
    ) -> DbResult<u64> {
        let first = rows
            .first()
            .ok_or_else(|| DbError::invalid_input("row list must not be empty"))?;
        if first.len() != columns.len() {
            return Err(DbError::invalid_input(format!(
                "column count ({}) does not match row values ({})",
                columns.len(),
                first.len()
            )));
        }

        let (head, tail) = sql::insert_parts(sql).ok_or_else(|| DbError::sql(sql))?;
        let column_list = sql::identifiers(columns).join(", ");
        let value_lists = rows
            .iter()
            .map(|row| {
                let escaped = row
                    .iter()
                    .map(|value| self.driver.escape(value))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({escaped})")
            })
            .collect::<Vec<_>>()
            .join(", ");

        let statement = format!("{head} ({column_list}) values {value_lists} {tail}")
            .trim_end()
            .to_string();
        self.execute(&statement, &[]).await
    }

    /// Build and run an UPDATE. When `data` is non-empty, a `set` clause
    /// is spliced in between the table name and the rest of the statement:
    ///
    /// ```ignore
    /// conn.update("update t where id < ?", &[10.into()], &[("foo", 1.into())]).await?;
    /// // runs: update t set `foo` = 1 where id < ?
    /// ```
    pub async fn update(
        &mut self,
        sql: &str,
        params: &[Value],
        data: &[(&str, Value)],
    ) -> DbResult<u64> {
        let statement = match sql::update_parts(sql) {
            Some((head, rest)) if !data.is_empty() => {
                let assignments = data
                    .iter()
                    .map(|(name, value)| {
                        format!("{} = {}", sql::identifier(name), self.driver.escape(value))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{head} set {assignments} {rest}")
                    .trim_end()
                    .to_string()
            }
            _ => sql.to_string(),
        };

        if !sql::is_update(&statement) {
            return Err(DbError::sql(statement));
        }
        self.execute(&statement, params).await
    }

    /// Run a DELETE after checking the statement shape.
    pub async fn delete(&mut self, sql: &str, params: &[Value]) -> DbResult<u64> {
        if !sql::is_delete(sql) {
            return Err(DbError::sql(sql));
        }
        self.execute(sql, params).await
    }

    /// Fetch the server warnings raised by the last statement, re-logging
    /// each one at WARN.
    pub async fn show_warnings(&mut self) -> DbResult<Vec<DriverWarning>> {
        let warnings = self.driver.warnings().await?;
        for warning in &warnings {
            warn!(
                connection = %self.log_target,
                level = %warning.level,
                code = warning.code,
                message = %warning.message,
                "server warning"
            );
        }
        Ok(warnings)
    }

    /// Run a control statement (BEGIN/COMMIT/ROLLBACK) directly on the
    /// driver, outside the logged retry path.
    pub(crate) async fn run_command(&mut self, statement: &str) -> DbResult<()> {
        self.driver.query(statement, false).await?;
        Ok(())
    }

    /// Open the session and apply the configured time zone, classifying
    /// driver failures as WARN or ERROR by their severity.
    async fn connect_physical(&mut self) -> DbResult<()> {
        debug!(connection = %self.log_target, "opening server connection");

        match self.open_session().await {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.is_warning() {
                    warn!(
                        connection = %self.log_target,
                        code = err.code,
                        error = %err.message,
                        "connect raised a warning"
                    );
                } else {
                    error!(
                        connection = %self.log_target,
                        code = err.code,
                        error = %err.message,
                        "connect failed"
                    );
                }
                Err(err.into())
            }
        }
    }

    async fn open_session(&mut self) -> Result<(), DriverError> {
        self.driver.connect().await?;
        debug!(connection = %self.log_target, "server connection established");

        if !self.config.timezone.is_empty() {
            let statement = format!("set time_zone='{}'", self.config.timezone);
            self.driver.query(&statement, false).await?;
        }
        Ok(())
    }

    /// Handle one failed attempt. Errors outside the lost-connection
    /// class surface immediately; for 2006/2013 the dead socket is forced
    /// shut (close failures on a dead socket are expected) and the
    /// session reopened. A reconnect failure surfaces as the result.
    async fn recover_or_bail(&mut self, err: DriverError) -> DbResult<()> {
        if !err.is_connection_lost() {
            return Err(err.into());
        }

        if self.driver.is_connected() {
            if let Err(close_err) = self.driver.close().await {
                debug!(
                    connection = %self.log_target,
                    error = %close_err,
                    "discarding dead socket"
                );
            }
        }

        match self.connect_physical().await {
            Ok(()) => {
                info!(connection = %self.log_target, "reconnected after lost connection");
                Ok(())
            }
            Err(reconnect_err) => {
                error!(
                    connection = %self.log_target,
                    error = %reconnect_err,
                    "reconnect failed"
                );
                Err(reconnect_err)
            }
        }
    }

    /// One log record per statement attempt, at the level chosen by
    /// [`query_log_level`].
    fn log_query(&self, sql: &str, elapsed_secs: f64, outcome: Result<u64, &DriverError>) {
        let statement = sql::inline(sql);
        match outcome {
            Err(err) => {
                error!(
                    connection = %self.log_target,
                    sql = %statement,
                    elapsed_secs,
                    code = err.code,
                    error = %err.message,
                    "query failed"
                );
            }
            Ok(affected) => {
                if query_log_level(elapsed_secs, false) == Level::WARN {
                    warn!(
                        connection = %self.log_target,
                        sql = %statement,
                        elapsed_secs,
                        affected,
                        "slow query"
                    );
                } else {
                    debug!(
                        connection = %self.log_target,
                        sql = %statement,
                        elapsed_secs,
                        affected,
                        "query executed"
                    );
                }
            }
        }
    }
}

/// Level for one statement log record. Failures log ERROR; slow queries
/// log WARN, with the 5s and 10s thresholds surfacing as that same
/// level; everything else logs DEBUG.
fn query_log_level(elapsed_secs: f64, failed: bool) -> Level {
    if failed {
        Level::ERROR
    } else if elapsed_secs >= NOTE_QUERY_TIME || elapsed_secs >= WARN_QUERY_TIME {
        Level::WARN
    } else {
        Level::DEBUG
    }
}

/// A paginated cursor over a SELECT, produced by
/// [`Connection::fetch_iterator`].
///
/// Pages are fetched lazily with `limit {per} offset {offset}`; the offset
/// advances one row at a time, so the row cap and the page callback apply
/// per row, before any further page fetch. An empty page ends iteration.
pub struct PagedRows<'c, D: Driver> {
    conn: &'c mut Connection<D>,
    sql: String,
    params: Vec<Value>,
    max: u64,
    per: u64,
    callback: Option<PageCallback>,
    offset: u64,
    buffer: VecDeque<Row>,
    done: bool,
}

impl<'c, D: Driver> fmt::Debug for PagedRows<'c, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedRows")
            .field("sql", &self.sql)
            .field("params", &self.params)
            .field("max", &self.max)
            .field("per", &self.per)
            .field("offset", &self.offset)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<'c, D: Driver> PagedRows<'c, D> {
    /// Advance to the next row. Returns `Ok(None)` when the row cap is
    /// reached, the callback vetoes continuation, or a page comes back
    /// empty. Termination is final: once `None` is returned, every later
    /// call returns `None` without invoking the callback or the server.
    pub async fn next(&mut self) -> DbResult<Option<Row>> {
        if self.done {
            return Ok(None);
        }

        if self.max > 0 && self.offset >= self.max {
            self.done = true;
            return Ok(None);
        }

        let page = self.offset / self.per + 1;
        if let Some(callback) = self.callback.as_mut() {
            if !callback(self.offset, page) {
                self.done = true;
                return Ok(None);
            }
        }

        if self.buffer.is_empty() {
            let paged = format!("{} limit {} offset {}", self.sql, self.per, self.offset);
            self.buffer = self
                .conn
                .fetch_all(&paged, &self.params)
                .await?
                .into();
            if self.buffer.is_empty() {
                self.done = true;
                return Ok(None);
            }
        }

        self.offset += 1;
        Ok(self.buffer.pop_front())
    }

    /// Drain the remaining rows into a vector.
    pub async fn collect(mut self) -> DbResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}
