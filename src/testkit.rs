//! Scripted in-memory driver for tests.
//!
//! [`ScriptedDriver`] implements [`Driver`] against a queue of scripted
//! outcomes and records every statement it receives, so tests can assert
//! on retry behavior, rewritten statements, and pagination without a
//! server. State lives behind an `Arc`, so a clone kept by the test keeps
//! observing a driver that moved into a [`Connection`](crate::connection::Connection)
//! or a pool.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::ConnectionConfig;
use crate::driver::{Driver, DriverError, DriverFactory, DriverResult, DriverWarning};
use crate::value::{Row, Value};

/// One scripted statement outcome.
pub enum ScriptStep {
    /// Succeed with this affected-row count.
    Affected(u64),
    /// Succeed with these rows (`fetch_all`) or their count (`query`).
    Rows(Vec<Row>),
    /// Fail with this driver error.
    Fail(DriverError),
}

#[derive(Default)]
struct ScriptState {
    steps: VecDeque<ScriptStep>,
    connect_failures: VecDeque<DriverError>,
    close_failures: VecDeque<DriverError>,
    statements: Vec<String>,
    connects: u32,
    closes: u32,
    connected: bool,
    affected: u64,
    last_insert_id: u64,
    warnings: Vec<DriverWarning>,
}

/// A [`Driver`] that replays scripted outcomes. With an empty script every
/// statement succeeds: zero affected rows, no result rows.
///
/// Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedDriver {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful outcome with an affected-row count.
    pub fn push_affected(&self, affected: u64) {
        self.lock().steps.push_back(ScriptStep::Affected(affected));
    }

    /// Queue a successful outcome with result rows.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.lock().steps.push_back(ScriptStep::Rows(rows));
    }

    /// Queue a failure.
    pub fn push_error(&self, code: u16, message: &str) {
        self.lock()
            .steps
            .push_back(ScriptStep::Fail(DriverError::new(code, message)));
    }

    /// Queue a failure for the next `connect` call.
    pub fn push_connect_error(&self, code: u16, message: &str) {
        self.lock()
            .connect_failures
            .push_back(DriverError::new(code, message));
    }

    /// Queue a failure for the next `close` call. The close still counts
    /// and still drops the connection.
    pub fn push_close_error(&self, code: u16, message: &str) {
        self.lock()
            .close_failures
            .push_back(DriverError::new(code, message));
    }

    pub fn set_last_insert_id(&self, id: u64) {
        self.lock().last_insert_id = id;
    }

    pub fn set_warnings(&self, warnings: Vec<DriverWarning>) {
        self.lock().warnings = warnings;
    }

    /// Every statement received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    /// Number of successful `connect` calls.
    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> u32 {
        self.lock().closes
    }

    /// Build a row from column names and values.
    pub fn row(columns: &[&str], values: Vec<Value>) -> Row {
        let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
        Row::new(columns, values)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().expect("script state lock")
    }

    fn run_statement(&self, sql: &str) -> DriverResult<u64> {
        let mut state = self.lock();
        state.statements.push(sql.to_string());
        match state.steps.pop_front() {
            Some(ScriptStep::Affected(affected)) => {
                state.affected = affected;
                Ok(affected)
            }
            Some(ScriptStep::Rows(rows)) => {
                state.affected = rows.len() as u64;
                Ok(rows.len() as u64)
            }
            Some(ScriptStep::Fail(err)) => Err(err),
            None => {
                state.affected = 0;
                Ok(0)
            }
        }
    }
}

impl Driver for ScriptedDriver {
    async fn connect(&mut self) -> DriverResult<()> {
        let mut state = self.lock();
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    async fn close(&mut self) -> DriverResult<()> {
        let mut state = self.lock();
        state.connected = false;
        state.closes += 1;
        match state.close_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn query(&mut self, sql: &str, _unbuffered: bool) -> DriverResult<u64> {
        self.run_statement(sql)
    }

    async fn execute(&mut self, sql: &str, _params: &[Value]) -> DriverResult<u64> {
        self.run_statement(sql)
    }

    async fn execute_many(&mut self, sql: &str, params: &[Vec<Value>]) -> DriverResult<u64> {
        let sets = params.len() as u64;
        self.run_statement(sql).map(|affected| {
            if affected == 0 { sets } else { affected }
        })
    }

    async fn fetch_all(&mut self, sql: &str, _params: &[Value]) -> DriverResult<Vec<Row>> {
        let mut state = self.lock();
        state.statements.push(sql.to_string());
        match state.steps.pop_front() {
            Some(ScriptStep::Rows(rows)) => {
                state.affected = rows.len() as u64;
                Ok(rows)
            }
            Some(ScriptStep::Affected(affected)) => {
                state.affected = affected;
                Ok(Vec::new())
            }
            Some(ScriptStep::Fail(err)) => Err(err),
            None => Ok(Vec::new()),
        }
    }

    fn affected_rows(&self) -> u64 {
        self.lock().affected
    }

    fn last_insert_id(&self) -> u64 {
        self.lock().last_insert_id
    }

    async fn warnings(&mut self) -> DriverResult<Vec<DriverWarning>> {
        Ok(self.lock().warnings.clone())
    }
}

/// A factory handing out clones of one scripted driver, so the whole pool
/// shares a single script and call log.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    driver: ScriptedDriver,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn driver(&self) -> &ScriptedDriver {
        &self.driver
    }
}

impl DriverFactory for ScriptedFactory {
    type Driver = ScriptedDriver;

    fn open(&self, _config: &ConnectionConfig) -> Self::Driver {
        self.driver.clone()
    }
}

/// Connection configuration for tests: library defaults with the session
/// time zone statement disabled, so scripts line up one-to-one with the
/// statements a test runs.
pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        timezone: String::new(),
        ..ConnectionConfig::default()
    }
}
