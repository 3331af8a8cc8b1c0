//! Error types for the client layer.
//!
//! Driver-reported failures pass through [`DbError::Driver`] with their
//! original code and message unaltered. Everything else is a client-side
//! failure raised before a statement reaches the wire.

use thiserror::Error;

use crate::driver::DriverError;

/// Result type alias for client operations.
pub type DbResult<T> = Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    /// A builder or classifier rejected the statement's shape.
    #[error("statement does not match the expected SQL shape: {statement}")]
    Sql { statement: String },

    /// A caller-supplied value was unusable (empty row list, arity
    /// mismatch, zero page size, ...).
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Configuration could not be parsed or validated.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A profile name with no entry in the profile map.
    #[error("unknown connection profile: {name}")]
    UnknownProfile { name: String },

    /// The pool was closed while a caller was waiting on it.
    #[error("connection pool is closed")]
    PoolClosed,

    /// An error reported by the wire driver, code and message intact.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl DbError {
    /// Create a SQL-shape error carrying the offending statement.
    pub fn sql(statement: impl Into<String>) -> Self {
        Self::Sql {
            statement: statement.into(),
        }
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unknown-profile error.
    pub fn unknown_profile(name: impl Into<String>) -> Self {
        Self::UnknownProfile { name: name.into() }
    }

    /// The driver error code, if this wraps a driver failure.
    pub fn driver_code(&self) -> Option<u16> {
        match self {
            Self::Driver(err) => Some(err.code),
            _ => None,
        }
    }
}
