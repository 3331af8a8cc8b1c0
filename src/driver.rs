//! The wire-driver contract.
//!
//! The client layer never speaks the MySQL protocol itself; it drives a
//! [`Driver`] implementation supplied by the embedding application. The
//! trait mirrors what a MySQL client library exposes: connect/close,
//! buffered or unbuffered statement execution, parameterized execution,
//! result fetching, literal escaping, and post-statement metadata.
//!
//! Methods return `impl Future + Send` so implementations can be written
//! as plain `async fn` while the pool's background task stays spawnable.

use std::future::Future;

use thiserror::Error;

use crate::config::ConnectionConfig;
use crate::value::{Row, Value};

/// Server has gone away (client error 2006).
pub const ER_SERVER_GONE: u16 = 2006;
/// Lost connection to server during query (client error 2013).
pub const ER_SERVER_LOST: u16 = 2013;

/// How severe a driver failure is; warnings are logged at WARN instead of
/// ERROR when raised during connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// An error reported by the wire driver, carrying the MySQL error code
/// and server message verbatim.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct DriverError {
    pub code: u16,
    pub message: String,
    pub severity: Severity,
}

impl DriverError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    /// Whether this failure means the server connection is gone and a
    /// reconnect may succeed. Only codes 2006 and 2013 qualify.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self.code, ER_SERVER_GONE | ER_SERVER_LOST)
    }
}

/// Result alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// One entry from `SHOW WARNINGS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverWarning {
    /// "Note", "Warning", or "Error".
    pub level: String,
    pub code: u16,
    pub message: String,
}

/// A single server session as exposed by the wire driver.
///
/// Implementations hold the socket and protocol state; the client layer
/// adds reconnect-retry, logging, builders, pooling, and profiles on top.
pub trait Driver: Send {
    /// Open the server session. Called again after [`close`](Self::close)
    /// when the client layer reconnects.
    fn connect(&mut self) -> impl Future<Output = DriverResult<()>> + Send;

    /// Tear down the session. Closing an already-dead socket may fail;
    /// callers decide whether that matters.
    fn close(&mut self) -> impl Future<Output = DriverResult<()>> + Send;

    /// Whether the session currently holds an open socket.
    fn is_connected(&self) -> bool;

    /// Run raw SQL, returning the affected-row count. With `unbuffered`
    /// the driver streams the result set instead of materializing it.
    fn query(&mut self, sql: &str, unbuffered: bool)
    -> impl Future<Output = DriverResult<u64>> + Send;

    /// Run a parameterized statement, returning the affected-row count.
    fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DriverResult<u64>> + Send;

    /// Run one parameterized statement once per parameter set.
    fn execute_many(
        &mut self,
        sql: &str,
        params: &[Vec<Value>],
    ) -> impl Future<Output = DriverResult<u64>> + Send;

    /// Run a parameterized statement and return all result rows.
    fn fetch_all(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DriverResult<Vec<Row>>> + Send;

    /// Affected-row count of the last statement.
    fn affected_rows(&self) -> u64;

    /// Auto-increment id generated by the last insert, 0 when none.
    fn last_insert_id(&self) -> u64;

    /// Fetch the warnings raised by the last statement.
    fn warnings(&mut self) -> impl Future<Output = DriverResult<Vec<DriverWarning>>> + Send;

    /// Render a value as a safely-escaped SQL literal for this session's
    /// charset. The default follows MySQL string literal rules.
    fn escape(&self, value: &Value) -> String {
        escape_literal(value)
    }
}

/// Produces fresh driver sessions for a configuration. The pool and the
/// profile manager create connections exclusively through this.
pub trait DriverFactory: Send + Sync + 'static {
    type Driver: Driver + 'static;

    fn open(&self, config: &ConnectionConfig) -> Self::Driver;
}

/// Escape a string body per MySQL literal rules (without the surrounding
/// quotes).
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

/// Render a [`Value`] as a SQL literal.
pub fn escape_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => format!("'{}'", escape_string(s)),
        Value::Bytes(b) => format!("'{}'", escape_string(&String::from_utf8_lossy(b))),
    }
}
