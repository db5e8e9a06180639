use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use deadpool::managed::{Hook, Pool};
use derive_more::{Deref, DerefMut};
use diesel_async::methods::LoadQuery;
use diesel_async::scoped_futures::ScopedBoxFuture;
use diesel_async::{AsyncConnection, AsyncPgConnection, SimpleAsyncConnection};

use super::custom_hooks::{self, SessionSetup};
use super::schema::{SchemaName, is_concurrent_creation};
use super::{ConnectionPool, PgConnectionManager, PgConfig, PooledConnection};
use crate::instrument::{SlowQueryInstrumentor, SlowQueryReporter};
use crate::sql::QueryDescriptor;
use crate::{
    PgError, PgResult, TRACING_TARGET_CLIENT, TRACING_TARGET_CONNECTION, TRACING_TARGET_SCHEMA,
};

/// Connection pool status information.
#[derive(Debug, Clone)]
pub struct PgPoolStatus {
    /// Maximum number of connections in the pool
    pub max_size: usize,
    /// Current number of connections in the pool
    pub size: usize,
    /// Number of available connections
    pub available: usize,
    /// Number of requests waiting for connections
    pub waiting: usize,
}

impl PgPoolStatus {
    /// Returns the utilization percentage of the pool (0.0 to 1.0).
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.size.saturating_sub(self.available) as f64 / self.max_size as f64
        }
    }

    /// Returns whether the pool is under pressure (high utilization or waiting requests).
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.waiting > 0 || self.utilization() > 0.8
    }
}

/// Schema-scoped database client that owns the connection pool.
///
/// A client is only handed out once the target schema exists and the session
/// configuration has been verified against the database. Every connection it
/// lends out resolves unqualified table names into the configured schema and,
/// when a slow-query threshold is set, times its queries.
#[derive(Clone)]
pub struct PgClient {
    inner: Arc<PgClientInner>,
}

/// Inner data for PgClient
struct PgClientInner {
    pool: ConnectionPool,
    config: PgConfig,
    schema: SchemaName,
    session: Arc<SessionSetup>,
}

impl PgClient {
    /// Initializes the pool, provisions the schema and verifies the session.
    ///
    /// Steps, all completed before the client is returned:
    ///
    /// 1. Validates the configuration and builds the pool. Connections are
    ///    established lazily.
    /// 2. Runs `CREATE SCHEMA IF NOT EXISTS` for non-default schemas. Losing a
    ///    creation race against another initializer is not an error.
    /// 3. Registers the post-create hook that instruments each new connection
    ///    and sets its `search_path`.
    /// 4. Runs the session statement once on a borrowed connection to fail fast
    ///    on a broken connection string or schema.
    ///
    /// Slow queries are timed against [`PgConfig::postgres_slow_query_ms`] and
    /// reported through [`TracingReporter`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    ///
    /// - The connection string or schema name is empty ([`PgError::InvalidArgument`])
    /// - Pool settings are out of range ([`PgError::Config`])
    /// - The database cannot be reached or the schema cannot be created
    /// - The startup session statement fails
    ///
    /// [`TracingReporter`]: crate::TracingReporter
    pub async fn connect(config: PgConfig) -> PgResult<Self> {
        let instrumentor = config.instrumentor();
        Self::initialize(config, instrumentor).await
    }

    /// Like [`PgClient::connect`], with slow queries sent to `reporter`.
    ///
    /// The threshold still comes from [`PgConfig::postgres_slow_query_ms`].
    ///
    /// # Errors
    ///
    /// Same as [`PgClient::connect`].
    pub async fn connect_with_reporter(
        config: PgConfig,
        reporter: impl SlowQueryReporter + 'static,
    ) -> PgResult<Self> {
        let instrumentor = config.instrumentor().with_reporter(reporter);
        Self::initialize(config, instrumentor).await
    }

    #[tracing::instrument(
        skip(config, instrumentor),
        target = TRACING_TARGET_CLIENT,
        fields(database_url = %config.database_url_masked(), schema = %config.postgres_schema)
    )]
    async fn initialize(config: PgConfig, instrumentor: SlowQueryInstrumentor) -> PgResult<Self> {
        tracing::info!(target: TRACING_TARGET_CLIENT, "Initializing database client");

        config.validate().inspect_err(|e| {
            tracing::error!(target: TRACING_TARGET_CLIENT, error = %e, "Invalid database configuration");
        })?;

        let schema = config.schema()?;
        let session = Arc::new(SessionSetup::new(schema.clone(), instrumentor)?);
        let pool = Self::build_pool(&config, Arc::clone(&session))?;

        let this = Self {
            inner: Arc::new(PgClientInner {
                pool,
                config,
                schema,
                session,
            }),
        };

        this.provision_schema().await?;
        this.verify_session().await?;

        tracing::info!(
            target: TRACING_TARGET_CLIENT,
            schema = %this.inner.schema,
            slow_query = %this.inner.session.instrumentor().threshold(),
            max_connections = this.inner.config.postgres_max_connections,
            connection_timeout_secs = this.inner.config.postgres_connection_timeout_secs,
            idle_timeout_secs = this.inner.config.postgres_idle_timeout_secs,
            "Database client initialized successfully"
        );

        Ok(this)
    }

    /// Builds the pool with the session and lifecycle hooks attached.
    fn build_pool(config: &PgConfig, session: Arc<SessionSetup>) -> PgResult<ConnectionPool> {
        let manager = PgConnectionManager::new(config.database_url());

        Pool::builder(manager)
            .max_size(config.postgres_max_connections as usize)
            .wait_timeout(config.connection_timeout())
            .create_timeout(config.connection_timeout())
            .recycle_timeout(config.idle_timeout())
            .runtime(deadpool::Runtime::Tokio1)
            .post_create(custom_hooks::post_create(session))
            .pre_recycle(Hook::sync_fn(custom_hooks::pre_recycle))
            .post_recycle(Hook::sync_fn(custom_hooks::post_recycle))
            .build()
            .map_err(|e| {
                tracing::error!(target: TRACING_TARGET_CONNECTION, error = %e, "Failed to create connection pool");
                PgError::Unexpected(format!("Failed to build connection pool: {}", e).into())
            })
    }

    /// Creates the target schema unless it is the default one.
    async fn provision_schema(&self) -> PgResult<()> {
        let schema = &self.inner.schema;
        let Some(statement) = schema.create_statement()? else {
            tracing::debug!(target: TRACING_TARGET_SCHEMA, %schema, "Default schema, nothing to provision");
            return Ok(());
        };

        let mut conn = self.get_pooled_connection().await?;
        match conn.get_mut().batch_execute(&statement).await {
            Ok(()) => {
                tracing::info!(target: TRACING_TARGET_SCHEMA, %schema, "Schema provisioned");
            }
            Err(err) if is_concurrent_creation(&err) => {
                tracing::debug!(
                    target: TRACING_TARGET_SCHEMA,
                    %schema,
                    error = %err,
                    "Schema created concurrently by another initializer"
                );
            }
            Err(err) => {
                tracing::error!(target: TRACING_TARGET_SCHEMA, %schema, error = %err, "Failed to provision schema");
                return Err(PgError::Query(err));
            }
        }

        Ok(())
    }

    /// Runs the session statement once, propagating any failure.
    async fn verify_session(&self) -> PgResult<()> {
        tracing::debug!(target: TRACING_TARGET_CONNECTION, "Verifying session configuration");

        let mut conn = self.get_pooled_connection().await?;
        conn.get_mut()
            .batch_execute(self.inner.session.search_path_statement())
            .await
            .map_err(|e| {
                tracing::error!(
                    target: TRACING_TARGET_CONNECTION,
                    schema = %self.inner.schema,
                    error = %e,
                    "Session configuration check failed"
                );
                PgError::from(e)
            })
    }

    /// Gets a connection from the pool.
    ///
    /// This method will wait up to the configured timeout for an available connection.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection is available within the timeout period.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CONNECTION)]
    pub async fn get_connection(&self) -> PgResult<PgConn> {
        tracing::trace!(target: TRACING_TARGET_CONNECTION, "Acquiring connection from pool");

        let start = std::time::Instant::now();
        let conn = self.inner.pool.get().await.map_err(|e| {
            tracing::error!(
                target: TRACING_TARGET_CONNECTION,
                error = %e,
                elapsed = ?start.elapsed(),
                "Failed to acquire connection from pool"
            );
            PgError::from(e)
        })?;

        let elapsed = start.elapsed();
        if elapsed > Duration::from_millis(100) {
            tracing::warn!(
                target: TRACING_TARGET_CONNECTION,
                elapsed = ?elapsed,
                "Connection acquisition took longer than expected"
            );
        }

        tracing::trace!(target: TRACING_TARGET_CONNECTION, elapsed = ?elapsed, "Connection acquired successfully");
        Ok(PgConn::new(conn))
    }

    /// Gets a raw pooled connection from the pool.
    async fn get_pooled_connection(&self) -> PgResult<PooledConnection> {
        let conn = self.inner.pool.get().await.map_err(PgError::from)?;
        Ok(conn)
    }

    /// Executes a one-off statement on a pooled connection.
    ///
    /// Timed as one labeled unit. The connection was already instrumented when
    /// it joined the pool, so the query is reported at most once.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection is available, the descriptor carries
    /// no text, or the statement fails.
    pub async fn execute_sql(&self, query: impl Into<QueryDescriptor>) -> PgResult<usize> {
        let mut conn = self.get_connection().await?;
        conn.instrument(self.inner.session.instrumentor());
        conn.execute_sql(query).await
    }

    /// Loads the rows of a one-off query on a pooled connection.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection is available, the descriptor carries
    /// no text, or the query fails.
    pub async fn load_sql<T>(&self, query: impl Into<QueryDescriptor>) -> PgResult<Vec<T>>
    where
        T: Send + 'static,
        for<'query> diesel::query_builder::SqlQuery: LoadQuery<'query, AsyncPgConnection, T>,
    {
        let mut conn = self.get_connection().await?;
        conn.instrument(self.inner.session.instrumentor());
        conn.load_sql(query).await
    }

    /// Gets the current pool status and statistics.
    #[inline]
    pub fn pool_status(&self) -> PgPoolStatus {
        let status = self.inner.pool.status();
        PgPoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    /// Returns how many per-connection session statements have failed.
    ///
    /// Failures are logged and never escalated.
    #[inline]
    pub fn session_failures(&self) -> u64 {
        self.inner.session.failure_count()
    }

    /// Gets the schema every pooled connection resolves into.
    #[inline]
    pub fn schema(&self) -> &SchemaName {
        &self.inner.schema
    }

    /// Gets the instrumentor applied to pooled connections.
    #[inline]
    pub fn instrumentor(&self) -> &SlowQueryInstrumentor {
        self.inner.session.instrumentor()
    }

    /// Gets the database configuration used by this client.
    #[inline]
    pub fn config(&self) -> &PgConfig {
        &self.inner.config
    }

    /// Closes the pool.
    ///
    /// Idle connections are dropped immediately, borrowed ones when returned.
    /// Further acquisitions fail.
    pub fn close(&self) {
        tracing::info!(target: TRACING_TARGET_CLIENT, "Closing database connection pool");
        self.inner.pool.close();
    }

    /// Returns whether the pool has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.pool.is_closed()
    }
}

impl fmt::Debug for PgClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool_status = self.pool_status();
        f.debug_struct("PgClient")
            .field("database_url", &self.inner.config.database_url_masked())
            .field("schema", &self.inner.schema)
            .field("slow_query", &self.inner.session.instrumentor().threshold())
            .field(
                "pool_max_connections",
                &self.inner.config.postgres_max_connections,
            )
            .field("pool_current_size", &pool_status.size)
            .field("pool_available", &pool_status.available)
            .field("pool_waiting", &pool_status.waiting)
            .finish()
    }
}

/// A wrapper around a pooled, schema-scoped database connection.
///
/// `PgConn` owns a connection obtained from the connection pool and derefs to
/// [`Instrumented`], whose `run`, `execute_sql` and `load_sql` entry points are
/// timed. When dropped, the connection is automatically returned to the pool.
///
/// ```ignore
/// let mut conn = pg_client.get_connection().await?;
/// let affected = conn.execute_sql("DELETE FROM sessions WHERE expired").await?;
/// ```
///
/// [`Instrumented`]: crate::Instrumented
#[derive(Deref, DerefMut)]
pub struct PgConn {
    #[deref]
    #[deref_mut]
    conn: PooledConnection,
}

impl PgConn {
    /// Creates a new connection wrapper from a pooled connection.
    pub fn new(conn: PooledConnection) -> Self {
        Self { conn }
    }

    /// Executes the given function within a database transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If the function returns `Err`, the transaction is rolled back.
    /// Each statement inside the transaction is timed on its own by the
    /// connection's driver timer, as are `BEGIN` and `COMMIT`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// conn.transaction(|conn| {
    ///     Box::pin(async move {
    ///         diesel::insert_into(table).values(&data).execute(conn).await?;
    ///         diesel::update(other_table).set(&changes).execute(conn).await?;
    ///         Ok(result)
    ///     })
    /// }).await?;
    /// ```
    pub async fn transaction<'a, T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: for<'r> FnOnce(&'r mut AsyncPgConnection) -> ScopedBoxFuture<'a, 'r, Result<T, E>>
            + Send
            + 'a,
        T: Send + 'a,
        E: From<diesel::result::Error> + Send + 'a,
    {
        self.conn.get_mut().transaction(f).await
    }
}

impl fmt::Debug for PgConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConn")
            .field("instrumented", &self.conn.is_instrumented())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PgPoolStatus {
            max_size: 10,
            size: 8,
            available: 2,
            waiting: 0,
        };
        assert!((status.utilization() - 0.6).abs() < f64::EPSILON);
        assert!(!status.is_under_pressure());
    }

    #[test]
    fn test_pool_status_pressure() {
        let waiting = PgPoolStatus {
            max_size: 4,
            size: 4,
            available: 0,
            waiting: 3,
        };
        assert!(waiting.is_under_pressure());

        let empty = PgPoolStatus {
            max_size: 0,
            size: 0,
            available: 0,
            waiting: 0,
        };
        assert_eq!(empty.utilization(), 0.0);
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_arguments() {
        let empty_url = PgClient::connect(PgConfig::new("  ")).await;
        assert!(matches!(empty_url, Err(PgError::InvalidArgument(_))));

        let empty_schema = PgClient::connect_with_reporter(
            PgConfig::new("postgresql://localhost/db").with_schema(""),
            crate::TracingReporter,
        )
        .await;
        assert!(matches!(empty_schema, Err(PgError::InvalidArgument(_))));
    }
}
