use std::fmt;
use std::future::Future;

use derive_more::{Deref, DerefMut};
use diesel_async::methods::LoadQuery;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use super::{QueryTimer, SlowQueryInstrumentor, TimerScope};
use crate::sql::QueryDescriptor;
use crate::{PgError, PgResult};

/// Number of rows produced or affected by a query result.
///
/// Results without a meaningful row count report `None`.
pub trait RowCount {
    /// Returns the row count, if applicable.
    fn row_count(&self) -> Option<u64>;
}

impl RowCount for usize {
    fn row_count(&self) -> Option<u64> {
        u64::try_from(*self).ok()
    }
}

impl<T> RowCount for Vec<T> {
    fn row_count(&self) -> Option<u64> {
        u64::try_from(self.len()).ok()
    }
}

impl<T> RowCount for Option<T> {
    fn row_count(&self) -> Option<u64> {
        Some(u64::from(self.is_some()))
    }
}

impl RowCount for () {
    fn row_count(&self) -> Option<u64> {
        None
    }
}

/// Connections whose driver reports every statement it runs.
pub trait DriverTiming {
    /// Hands `timer` to the driver.
    ///
    /// Returns `false` when the driver has no such hook; only the labeled
    /// entry points of [`Instrumented`] are timed then.
    fn install_timer(&mut self, timer: QueryTimer) -> bool;
}

impl DriverTiming for AsyncPgConnection {
    fn install_timer(&mut self, timer: QueryTimer) -> bool {
        self.set_instrumentation(timer);
        true
    }
}

/// How a connection's queries are timed.
#[derive(Debug, Clone, Default)]
pub enum Instrumentation {
    /// Queries run untimed.
    #[default]
    Bare,
    /// Only the labeled entry points are timed.
    Wrapped(SlowQueryInstrumentor),
    /// The driver times every statement; labeled entry points take over
    /// timing for the statements they issue.
    Driver {
        instrumentor: SlowQueryInstrumentor,
        scope: TimerScope,
    },
}

impl Instrumentation {
    /// Returns whether the connection has been wrapped.
    #[inline]
    pub fn is_wrapped(&self) -> bool {
        !matches!(self, Self::Bare)
    }

    /// Returns whether the driver times every statement.
    #[inline]
    pub fn is_driver_timed(&self) -> bool {
        matches!(self, Self::Driver { .. })
    }

    /// Returns the instrumentor in effect, if any.
    pub fn instrumentor(&self) -> Option<&SlowQueryInstrumentor> {
        match self {
            Self::Bare => None,
            Self::Wrapped(instrumentor) | Self::Driver { instrumentor, .. } => Some(instrumentor),
        }
    }
}

/// A connection decorated with slow-query timing.
///
/// Once instrumented, a driver with a timing hook (such as
/// [`AsyncPgConnection`]) times every statement it runs, including the diesel
/// query DSL, `batch_execute` and transactions reached through `Deref`.
/// [`Instrumented::run`], [`Instrumented::execute_sql`] and
/// [`Instrumented::load_sql`] time their unit as a whole, labeled with the
/// query name and carrying the row count.
#[derive(Deref, DerefMut)]
pub struct Instrumented<C> {
    #[deref]
    #[deref_mut]
    conn: C,
    state: Instrumentation,
}

impl<C> Instrumented<C> {
    /// Wraps a connection in the [`Instrumentation::Bare`] state.
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            state: Instrumentation::Bare,
        }
    }

    /// Instruments this connection.
    ///
    /// A no-op when the instrumentor is disabled or the connection is already
    /// wrapped, so a query is never timed twice and the first instrumentor
    /// stays in effect. Returns whether the state changed.
    pub fn instrument(&mut self, instrumentor: &SlowQueryInstrumentor) -> bool
    where
        C: DriverTiming,
    {
        if !instrumentor.is_enabled() || self.state.is_wrapped() {
            return false;
        }

        let scope = TimerScope::default();
        let timer = QueryTimer::new(instrumentor.clone(), scope.clone());
        self.state = if self.conn.install_timer(timer) {
            Instrumentation::Driver {
                instrumentor: instrumentor.clone(),
                scope,
            }
        } else {
            Instrumentation::Wrapped(instrumentor.clone())
        };

        true
    }

    /// Returns the current instrumentation state.
    #[inline]
    pub fn instrumentation(&self) -> &Instrumentation {
        &self.state
    }

    /// Returns whether queries on this connection are timed.
    #[inline]
    pub fn is_instrumented(&self) -> bool {
        self.state.is_wrapped()
    }

    /// Returns a mutable reference to the underlying connection.
    #[inline]
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Unwraps the underlying connection.
    ///
    /// A timer already installed in the driver stays there.
    #[inline]
    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Runs `query_fn` against the connection, timing it when instrumented.
    ///
    /// `query` labels the unit if it is reported as slow. Statements issued by
    /// `query_fn` are not reported separately by the driver timer.
    /// Errors are returned unchanged.
    ///
    /// ```rust,ignore
    /// let accounts = conn
    ///     .run(QueryDescriptor::named("listAccounts"), |conn| {
    ///         accounts::table.load::<Account>(conn)
    ///     })
    ///     .await?;
    /// ```
    pub async fn run<'c, T, E, F, Fut>(
        &'c mut self,
        query: impl Into<QueryDescriptor>,
        query_fn: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&'c mut C) -> Fut,
        Fut: Future<Output = Result<T, E>> + 'c,
        T: RowCount,
        E: fmt::Display,
    {
        let (instrumentor, _scope) = match &self.state {
            Instrumentation::Bare => (None, None),
            Instrumentation::Wrapped(instrumentor) => (Some(instrumentor.clone()), None),
            Instrumentation::Driver {
                instrumentor,
                scope,
            } => (Some(instrumentor.clone()), Some(scope.enter())),
        };

        let query_future = query_fn(&mut self.conn);
        match instrumentor {
            Some(instrumentor) => instrumentor.observe(&query.into(), query_future).await,
            None => query_future.await,
        }
    }
}

impl Instrumented<AsyncPgConnection> {
    /// Executes a raw SQL statement, returning the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::InvalidArgument`] if the descriptor carries no text,
    /// or [`PgError::Query`] if execution fails.
    pub async fn execute_sql(&mut self, query: impl Into<QueryDescriptor>) -> PgResult<usize> {
        let query = query.into();
        let sql = query.sql()?.to_owned();

        self.run(query, move |conn| diesel::sql_query(sql).execute(conn))
            .await
            .map_err(PgError::from)
    }

    /// Loads rows of a raw SQL query into `T`.
    ///
    /// `T` is typically a `#[derive(QueryableByName)]` struct.
    ///
    /// # Errors
    ///
    /// Returns [`PgError::InvalidArgument`] if the descriptor carries no text,
    /// or [`PgError::Query`] if execution fails.
    pub async fn load_sql<T>(&mut self, query: impl Into<QueryDescriptor>) -> PgResult<Vec<T>>
    where
        T: Send + 'static,
        for<'query> diesel::query_builder::SqlQuery: LoadQuery<'query, AsyncPgConnection, T>,
    {
        let query = query.into();
        let sql = query.sql()?.to_owned();

        self.run(query, move |conn| diesel::sql_query(sql).load::<T>(conn))
            .await
            .map_err(PgError::from)
    }
}

impl<C> fmt::Debug for Instrumented<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumented")
            .field("instrumented", &self.state.is_wrapped())
            .field("driver_timed", &self.state.is_driver_timed())
            .finish_non_exhaustive()
    }
}
