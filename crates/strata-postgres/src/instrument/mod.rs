//! Slow-query instrumentation.
//!
//! [`Instrumented`] decorates a driver connection. Instrumenting it installs a
//! [`QueryTimer`] into the driver, so every statement is timed whichever way it
//! is issued, and the labeled entry points time their unit once with its name
//! and row count. Each connection carries an explicit [`Instrumentation`] state,
//! so instrumenting the same connection from several call sites (the pool's
//! post-create hook and the client-level entry points) never times a query twice.
//!
//! When a timed query meets the configured [`SlowQueryThreshold`], a
//! [`SlowQueryEvent`] is handed to a [`SlowQueryReporter`]. The default
//! [`TracingReporter`] emits it as a `WARN` event on
//! [`TRACING_TARGET_QUERY`](crate::TRACING_TARGET_QUERY).

mod instrumented;
mod reporter;
mod threshold;
mod timer;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use instrumented::{DriverTiming, Instrumentation, Instrumented, RowCount};
pub use reporter::{SlowQueryEvent, SlowQueryOutcome, SlowQueryReporter, TracingReporter};
pub use threshold::SlowQueryThreshold;
pub use timer::{QueryTimer, ScopeGuard, TimerScope};
use tokio::time::Instant;

use crate::sql::QueryDescriptor;

/// Times queries and reports the ones that meet the slow-query threshold.
///
/// Cheap to clone; clones share the same reporter.
#[derive(Clone)]
pub struct SlowQueryInstrumentor {
    threshold: SlowQueryThreshold,
    reporter: Arc<dyn SlowQueryReporter>,
}

impl SlowQueryInstrumentor {
    /// Creates an instrumentor reporting through [`TracingReporter`].
    pub fn new(threshold: SlowQueryThreshold) -> Self {
        Self {
            threshold,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Creates an instrumentor that never reports.
    pub fn disabled() -> Self {
        Self::new(SlowQueryThreshold::DISABLED)
    }

    /// Replaces the reporter that receives slow-query events.
    pub fn with_reporter(mut self, reporter: impl SlowQueryReporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Returns the configured threshold.
    #[inline]
    pub fn threshold(&self) -> SlowQueryThreshold {
        self.threshold
    }

    /// Returns whether queries are timed at all.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.threshold.is_enabled()
    }

    /// Awaits `query_future`, reporting it if it meets the threshold.
    ///
    /// The result, successful or not, is returned to the caller unchanged.
    /// The label is only derived for queries that are actually reported.
    pub async fn observe<T, E, Fut>(
        &self,
        query: &QueryDescriptor,
        query_future: Fut,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        T: RowCount,
        E: fmt::Display,
    {
        if !self.is_enabled() {
            return query_future.await;
        }

        let start = Instant::now();
        let result = query_future.await;

        self.record(query, start.elapsed(), || match &result {
            Ok(output) => SlowQueryOutcome::Completed {
                row_count: output.row_count(),
            },
            Err(error) => SlowQueryOutcome::Failed {
                error: error.to_string(),
            },
        });

        result
    }

    /// Reports a finished query when `elapsed` meets the threshold.
    ///
    /// `outcome` is only evaluated for queries that are reported.
    pub(crate) fn record<F>(&self, query: &QueryDescriptor, elapsed: Duration, outcome: F)
    where
        F: FnOnce() -> SlowQueryOutcome,
    {
        if !self.threshold.is_exceeded_by(elapsed) {
            return;
        }

        self.reporter.report(&SlowQueryEvent {
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            query: query.label(),
            outcome: outcome(),
        });
    }
}

impl fmt::Debug for SlowQueryInstrumentor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlowQueryInstrumentor")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl Default for SlowQueryInstrumentor {
    fn default() -> Self {
        Self::disabled()
    }
}
