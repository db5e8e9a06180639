//! Errors raised while initializing the pool or running queries on it.

use std::borrow::Cow;

use deadpool::managed::TimeoutType;
use diesel::result::{ConnectionError, Error};
use diesel_async::pooled_connection::PoolError as DieselPoolError;
use diesel_async::pooled_connection::deadpool::PoolError as DeadpoolError;

use crate::TRACING_TARGET_CONNECTION;

/// Remediation text attached to an error.
pub trait ErrorHint {
    /// Returns what an operator can do about the error.
    fn hint(&self) -> Cow<'static, str>;
}

impl ErrorHint for TimeoutType {
    fn hint(&self) -> Cow<'static, str> {
        let hint = match self {
            TimeoutType::Wait => {
                "All pooled connections stayed busy; raise POSTGRES_MAX_CONNECTIONS or shorten transactions"
            }
            TimeoutType::Create => {
                "Opening a connection took too long; check POSTGRES_URL and that the server is reachable"
            }
            TimeoutType::Recycle => {
                "Recycling an idle connection took too long; the server may have dropped it"
            }
        };
        Cow::Borrowed(hint)
    }
}

/// Failure of a pool or query operation.
#[derive(Debug, thiserror::Error)]
#[must_use = "a database error should be handled or propagated"]
pub enum PgError {
    /// An empty or whitespace-only connection string, schema name or identifier.
    #[error("Invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),

    /// A pool setting outside its allowed range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Waiting for, opening or recycling a connection exceeded its timeout.
    #[error("Timed out while {}", describe_timeout(.0))]
    Timeout(TimeoutType),

    /// The connection could not be opened or was lost.
    #[error("Database connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The server rejected a statement, or its result could not be decoded.
    #[error("Database query error: {0}")]
    Query(#[from] Error),

    /// The pool was closed before a connection could be borrowed.
    #[error("Connection pool is closed")]
    Closed,

    #[error("Unexpected error: {0}")]
    Unexpected(Cow<'static, str>),
}

fn describe_timeout(timeout: &TimeoutType) -> &'static str {
    match timeout {
        TimeoutType::Wait => "waiting for a pooled connection",
        TimeoutType::Create => "opening a connection",
        TimeoutType::Recycle => "recycling a connection",
    }
}

impl PgError {
    pub(crate) fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Returns whether retrying the operation may succeed.
    ///
    /// Only timeouts and dropped connections qualify.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PgError::Timeout(_) | PgError::Connection(ConnectionError::BadConnection(_))
        )
    }

    #[inline]
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Returns a remediation hint when one is known for this error.
    pub fn hint(&self) -> Option<Cow<'static, str>> {
        match self {
            PgError::Timeout(timeout) => Some(timeout.hint()),
            PgError::InvalidArgument(_) | PgError::Config(_) => Some(Cow::Borrowed(
                "Check POSTGRES_URL, POSTGRES_SCHEMA and the pool settings",
            )),
            _ => None,
        }
    }
}

impl From<DeadpoolError> for PgError {
    fn from(value: DeadpoolError) -> Self {
        match value {
            DeadpoolError::Timeout(timeout) => Self::Timeout(timeout),
            DeadpoolError::Backend(DieselPoolError::QueryError(error)) => Self::Query(error),
            DeadpoolError::Backend(DieselPoolError::ConnectionError(error)) => {
                Self::Connection(error)
            }
            DeadpoolError::Closed => Self::Closed,
            // The session hook swallows its own failures.
            DeadpoolError::PostCreateHook(err) => {
                tracing::warn!(target: TRACING_TARGET_CONNECTION, error = %err, "Post-create hook failed");
                Self::Unexpected(err.to_string().into())
            }
            DeadpoolError::NoRuntimeSpecified => {
                Self::Unexpected("connection pool was built without a runtime".into())
            }
        }
    }
}

/// [`Result`] with [`PgError`] as the default error.
pub type PgResult<T, E = PgError> = Result<T, E>;
