use crate::TRACING_TARGET_QUERY;
use crate::sql::QueryLabel;

/// How a reported slow query finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlowQueryOutcome {
    /// The query succeeded.
    ///
    /// `row_count` is `None` when the result has no meaningful row count.
    Completed { row_count: Option<u64> },
    /// The query failed; the error was still returned to the caller.
    Failed { error: String },
}

/// A query that met the slow-query threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowQueryEvent {
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Advisory label of the query.
    pub query: QueryLabel,
    /// Success with row count, or the error.
    pub outcome: SlowQueryOutcome,
}

/// Receives slow-query events.
///
/// Implementations must not block; they run inline after the query completes.
pub trait SlowQueryReporter: Send + Sync {
    /// Handles a single slow-query event.
    fn report(&self, event: &SlowQueryEvent);
}

/// Reports slow queries as `WARN` events on [`TRACING_TARGET_QUERY`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl SlowQueryReporter for TracingReporter {
    fn report(&self, event: &SlowQueryEvent) {
        match &event.outcome {
            SlowQueryOutcome::Completed { row_count } => {
                tracing::warn!(
                    target: TRACING_TARGET_QUERY,
                    duration_ms = event.duration_ms,
                    query = %event.query,
                    row_count = ?row_count,
                    "Slow query"
                );
            }
            SlowQueryOutcome::Failed { error } => {
                tracing::warn!(
                    target: TRACING_TARGET_QUERY,
                    duration_ms = event.duration_ms,
                    query = %event.query,
                    err = %error,
                    "Slow query"
                );
            }
        }
    }
}
