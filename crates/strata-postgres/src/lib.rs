#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

// Tracing target constants for consistent logging.

/// Tracing target for client-related operations.
///
/// Use this target for logging client initialization, configuration, and lifecycle events.
pub const TRACING_TARGET_CLIENT: &str = "strata_postgres::client";

/// Tracing target for database query operations.
///
/// Slow-query warnings are emitted under this target.
pub const TRACING_TARGET_QUERY: &str = "strata_postgres::queries";

/// Tracing target for database connection operations.
///
/// Use this target for logging connection establishment, pool management,
/// session configuration and connection errors.
pub const TRACING_TARGET_CONNECTION: &str = "strata_postgres::connection";

/// Tracing target for schema provisioning.
pub const TRACING_TARGET_SCHEMA: &str = "strata_postgres::schema";

mod client;
mod error;
mod instrument;
pub mod sql;

pub use diesel_async::AsyncPgConnection as PgConnection;

pub use crate::client::{
    ConnectionPool, PgClient, PgConfig, PgConn, PgConnectionManager, PgPoolStatus,
    PooledConnection, SchemaName,
};
pub use crate::error::{ErrorHint, PgError, PgResult};
pub use crate::instrument::{
    DriverTiming, Instrumentation, Instrumented, QueryTimer, RowCount, ScopeGuard,
    SlowQueryEvent, SlowQueryInstrumentor, SlowQueryOutcome, SlowQueryReporter,
    SlowQueryThreshold, TimerScope, TracingReporter,
};
pub use crate::sql::{QueryDescriptor, QueryLabel, quote_identifier};
