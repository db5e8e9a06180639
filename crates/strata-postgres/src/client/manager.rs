use deadpool::managed::{Manager, Metrics, RecycleResult};
use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig, PoolError};

use super::custom_hooks;
use crate::instrument::Instrumented;

/// [`deadpool`] manager producing [`Instrumented`] Postgres connections.
///
/// Establishing and recycling connections is delegated to diesel's
/// [`AsyncDieselConnectionManager`]; this manager only adds the per-connection
/// instrumentation state, which starts out bare and is set by the pool's
/// post-create hook.
pub struct PgConnectionManager {
    inner: AsyncDieselConnectionManager<AsyncPgConnection>,
}

impl PgConnectionManager {
    /// Creates a manager for the given connection URL.
    pub fn new(database_url: impl Into<String>) -> Self {
        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup = Box::new(custom_hooks::setup_callback);

        Self {
            inner: AsyncDieselConnectionManager::new_with_config(database_url, manager_config),
        }
    }
}

impl Manager for PgConnectionManager {
    type Error = PoolError;
    type Type = Instrumented<AsyncPgConnection>;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.inner.create().await?;
        Ok(Instrumented::new(conn))
    }

    async fn recycle(&self, obj: &mut Self::Type, metrics: &Metrics) -> RecycleResult<Self::Error> {
        self.inner.recycle(obj.get_mut(), metrics).await
    }
}

impl std::fmt::Debug for PgConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnectionManager").finish_non_exhaustive()
    }
}
