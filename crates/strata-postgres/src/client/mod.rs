//! PostgreSQL client with schema-scoped connection pooling.
//!
//! This module provides the pool initializer and the high-level interface for
//! borrowing connections and running one-off queries. Every new connection is
//! instrumented and pointed at the configured schema by the pool's post-create
//! hook before it is handed out.

pub(crate) mod custom_hooks;
mod manager;
mod pg_client;
mod pg_config;
mod schema;

use deadpool::managed::{Object, Pool};
pub use manager::PgConnectionManager;
pub use pg_client::{PgClient, PgConn, PgPoolStatus};
pub use pg_config::PgConfig;
pub use schema::SchemaName;

/// Type alias for the connection pool used throughout the application.
pub type ConnectionPool = Pool<PgConnectionManager>;

/// Type alias for a connection object from the pool.
pub type PooledConnection = Object<PgConnectionManager>;
