//! Driver-level timing of every statement a connection runs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use diesel::connection::{Instrumentation, InstrumentationEvent};
use tokio::time::Instant;

use super::{SlowQueryInstrumentor, SlowQueryOutcome};
use crate::sql::QueryDescriptor;

/// Statements awaiting their finish event; older ones are dropped past this.
const MAX_PENDING: usize = 64;

/// Marks the spans in which an entry point times a labeled unit itself.
///
/// Statements started inside an active scope are left to the entry point, so
/// they are never reported twice.
#[derive(Debug, Clone, Default)]
pub struct TimerScope(Arc<AtomicUsize>);

impl TimerScope {
    /// Enters the scope until the returned guard is dropped.
    pub fn enter(&self) -> ScopeGuard {
        self.0.fetch_add(1, Ordering::AcqRel);
        ScopeGuard(Arc::clone(&self.0))
    }

    /// Returns whether an entry point currently owns the timing.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire) > 0
    }
}

/// Leaves a [`TimerScope`] on drop.
#[derive(Debug)]
#[must_use = "the scope is left as soon as the guard is dropped"]
pub struct ScopeGuard(Arc<AtomicUsize>);

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct PendingQuery {
    sql: String,
    started: Instant,
    timed: bool,
}

/// Times each statement reported by the driver's instrumentation events.
///
/// Installed on a connection by [`Instrumented::instrument`], it covers the
/// diesel query DSL, `batch_execute` and every statement of a transaction.
/// Driver events carry no row count, so completed statements report `None`.
///
/// [`Instrumented::instrument`]: crate::Instrumented::instrument
pub struct QueryTimer {
    instrumentor: SlowQueryInstrumentor,
    scope: TimerScope,
    pending: VecDeque<PendingQuery>,
}

impl QueryTimer {
    /// Creates a timer reporting through `instrumentor`.
    pub fn new(instrumentor: SlowQueryInstrumentor, scope: TimerScope) -> Self {
        Self {
            instrumentor,
            scope,
            pending: VecDeque::new(),
        }
    }

    /// Records that the driver started running `query`.
    pub fn start_query(&mut self, query: &str) {
        if self.pending.len() >= MAX_PENDING {
            self.pending.pop_front();
        }

        self.pending.push_back(PendingQuery {
            sql: strip_binds(query).to_owned(),
            started: Instant::now(),
            timed: !self.scope.is_active(),
        });
    }

    /// Records that the driver finished `query`, reporting it when slow.
    ///
    /// Pipelined statements may finish out of order; the oldest pending
    /// statement with the same text is matched first.
    pub fn finish_query<E>(&mut self, query: &str, error: Option<&E>)
    where
        E: fmt::Display + ?Sized,
    {
        let sql = strip_binds(query);
        let position = self
            .pending
            .iter()
            .position(|pending| pending.sql == sql)
            .unwrap_or(0);
        let Some(pending) = self.pending.remove(position) else {
            return;
        };

        if !pending.timed {
            return;
        }

        let query = QueryDescriptor::new(pending.sql);
        self.instrumentor
            .record(&query, pending.started.elapsed(), || match error {
                Some(error) => SlowQueryOutcome::Failed {
                    error: error.to_string(),
                },
                None => SlowQueryOutcome::Completed { row_count: None },
            });
    }

    /// Returns how many statements are awaiting their finish event.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Instrumentation for QueryTimer {
    fn on_connection_event(&mut self, event: InstrumentationEvent<'_>) {
        match event {
            InstrumentationEvent::StartQuery { query, .. } => {
                self.start_query(&query.to_string());
            }
            InstrumentationEvent::FinishQuery { query, error, .. } => {
                self.finish_query(&query.to_string(), error);
            }
            _ => {}
        }
    }
}

impl fmt::Debug for QueryTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryTimer")
            .field("threshold", &self.instrumentor.threshold())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Drops the bind listing diesel appends to a query's display form.
fn strip_binds(query: &str) -> &str {
    query
        .split_once(" -- binds: ")
        .map_or(query, |(sql, _)| sql)
}
