//! Connection setup and pool lifecycle hooks for [`diesel`] and [`deadpool`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use deadpool::managed::{Hook, HookResult, Metrics};
use diesel::{ConnectionResult, QueryResult};
use diesel_async::pooled_connection::{PoolError, PoolableConnection};
use diesel_async::{AsyncConnection, AsyncPgConnection, SimpleAsyncConnection};
use futures::FutureExt;
use futures::future::BoxFuture;

use super::pg_config::mask_url;
use super::{PgConnectionManager, SchemaName};
use crate::instrument::{DriverTiming, Instrumented, SlowQueryInstrumentor};
use crate::{PgResult, TRACING_TARGET_CONNECTION};

/// Opens a physical connection for the pool, logging the masked address and
/// how long the handshake took.
///
/// Plugged into [`ManagerConfig::custom_setup`].
///
/// [`ManagerConfig::custom_setup`]: diesel_async::pooled_connection::ManagerConfig
pub fn setup_callback<C>(addr: &str) -> BoxFuture<'_, ConnectionResult<C>>
where
    C: AsyncConnection + 'static,
{
    let start = Instant::now();
    let server = mask_url(addr);

    async move {
        let result = C::establish(addr).await;
        let elapsed_ms = start.elapsed().as_millis();

        if let Err(err) = &result {
            tracing::error!(
                target: TRACING_TARGET_CONNECTION,
                hook = "setup_callback",
                server = %server,
                elapsed_ms,
                error = %err,
                "Could not open a connection for the schema pool"
            );
        } else {
            tracing::debug!(
                target: TRACING_TARGET_CONNECTION,
                hook = "setup_callback",
                server = %server,
                elapsed_ms,
                "Opened a connection for the schema pool"
            );
        }

        result
    }
    .boxed()
}

/// Connections able to run a plain session statement.
pub(crate) trait SessionConnection: Send {
    /// Runs `statement` without binds or results.
    fn run_statement<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, QueryResult<()>>;
}

impl SessionConnection for AsyncPgConnection {
    fn run_statement<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, QueryResult<()>> {
        self.batch_execute(statement).boxed()
    }
}

/// Configures every new physical connection before it joins the pool.
///
/// Instruments the connection and points its `search_path` at the target
/// schema. Neither step can fail connection setup: a failed session statement
/// is logged and counted, and the connection is still handed out.
pub(crate) struct SessionSetup {
    schema: SchemaName,
    search_path: String,
    instrumentor: SlowQueryInstrumentor,
    failures: AtomicU64,
}

impl SessionSetup {
    /// Prepares the session statement for `schema`.
    pub fn new(schema: SchemaName, instrumentor: SlowQueryInstrumentor) -> PgResult<Self> {
        let search_path = schema.search_path_statement()?;
        Ok(Self {
            schema,
            search_path,
            instrumentor,
            failures: AtomicU64::new(0),
        })
    }

    /// Returns the `SET search_path` statement issued on every new connection.
    #[inline]
    pub fn search_path_statement(&self) -> &str {
        &self.search_path
    }

    /// Returns the instrumentor applied to every new connection.
    #[inline]
    pub fn instrumentor(&self) -> &SlowQueryInstrumentor {
        &self.instrumentor
    }

    /// Instruments `conn` and sets its search path.
    ///
    /// Returns whether the search path was set. A failure is only logged and
    /// counted.
    pub async fn apply<C>(&self, conn: &mut Instrumented<C>) -> bool
    where
        C: SessionConnection + DriverTiming,
    {
        if conn.instrument(&self.instrumentor) {
            tracing::trace!(
                target: TRACING_TARGET_CONNECTION,
                hook = "post_create",
                threshold = %self.instrumentor.threshold(),
                driver_timed = conn.instrumentation().is_driver_timed(),
                "Connection instrumented"
            );
        }

        match conn.get_mut().run_statement(&self.search_path).await {
            Ok(()) => {
                tracing::debug!(
                    target: TRACING_TARGET_CONNECTION,
                    hook = "post_create",
                    schema = %self.schema,
                    "Session search path configured"
                );
                true
            }
            Err(err) => {
                let failures = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    target: TRACING_TARGET_CONNECTION,
                    hook = "post_create",
                    schema = %self.schema,
                    failures,
                    error = %err,
                    "Failed to configure session search path"
                );
                false
            }
        }
    }

    /// Returns how many session statements have failed so far.
    #[inline]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Builds the post-create hook running [`SessionSetup`] on new connections.
///
/// See [`PoolBuilder`] for more details.
///
/// [`PoolBuilder`]: deadpool::managed::PoolBuilder
pub(crate) fn post_create(session: Arc<SessionSetup>) -> Hook<PgConnectionManager> {
    Hook::<PgConnectionManager>::async_fn(move |conn, metrics| {
        let session = Arc::clone(&session);

        tracing::trace!(
            target: TRACING_TARGET_CONNECTION,
            hook = "post_create",
            schema = %session.schema,
            is_broken = conn.get_mut().is_broken(),
            created_at = ?metrics.created,
            "Preparing session for new pooled connection"
        );

        Box::pin(async move {
            session.apply(conn).await;
            // Setup failures are counted, never propagated.
            Ok(())
        })
    })
}

/// Logs the state of a connection about to be recycled.
///
/// See [`PoolBuilder`] for more details.
///
/// [`PoolBuilder`]: deadpool::managed::PoolBuilder
pub fn pre_recycle(
    conn: &mut Instrumented<AsyncPgConnection>,
    metrics: &Metrics,
) -> HookResult<PoolError> {
    let instrumented = conn.is_instrumented();
    let is_broken = conn.get_mut().is_broken();

    tracing::trace!(
        target: TRACING_TARGET_CONNECTION,
        hook = "pre_recycle",
        instrumented,
        is_broken,
        recycle_count = metrics.recycle_count,
        age_ms = metrics.age().as_millis(),
        "Returning schema connection to the pool"
    );

    if is_broken {
        tracing::warn!(
            target: TRACING_TARGET_CONNECTION,
            hook = "pre_recycle",
            recycle_count = metrics.recycle_count,
            "Schema connection returned broken"
        );
    }

    Ok(())
}

/// Logs connections that come out of recycling broken.
///
/// Deadpool's own health check drops them; the session setup is not rerun on
/// recycled connections.
pub fn post_recycle(
    conn: &mut Instrumented<AsyncPgConnection>,
    metrics: &Metrics,
) -> HookResult<PoolError> {
    if conn.get_mut().is_broken() {
        tracing::error!(
            target: TRACING_TARGET_CONNECTION,
            hook = "post_recycle",
            instrumented = conn.is_instrumented(),
            recycle_count = metrics.recycle_count,
            "Recycled schema connection is unusable"
        );
    }

    Ok(())
}
