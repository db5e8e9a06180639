//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── postgres: PgConfig   # Connection string, schema, slow-query threshold, pool
//! └── command: Command     # check | exec
//! ```
//!
//! All configuration can be provided via CLI arguments or environment variables.
//! Use `--help` to see all available options.
//!
//! # Example
//!
//! ```bash
//! strata --postgres-url "postgresql://..." --postgres-schema tenant_a check
//!
//! # Or via environment variables
//! POSTGRES_URL="postgresql://..." POSTGRES_SCHEMA=tenant_a strata check
//! ```

use std::process;

use clap::{Parser, Subcommand};
use strata_postgres::PgConfig;

use crate::{TRACING_TARGET_CONFIG, TRACING_TARGET_STARTUP};

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "strata")]
#[command(about = "Schema-scoped Postgres pool utility")]
#[command(version)]
pub struct Cli {
    /// Database connection, schema and pool configuration.
    #[clap(flatten)]
    pub postgres: PgConfig,

    /// Command to run once the pool is ready.
    #[command(subcommand)]
    pub command: Command,
}

/// Commands available after pool initialization.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Initialize the pool and report the active schema and pool status.
    Check,

    /// Execute a single SQL statement and print the number of affected rows.
    Exec {
        /// Label used for this statement in slow-query warnings.
        #[arg(long)]
        name: Option<String>,

        /// SQL statement to execute.
        sql: String,
    },
}

impl Cli {
    /// Loads environment variables from .env file (if enabled) and parses CLI arguments.
    ///
    /// The .env file is loaded before clap parses arguments so its values can
    /// act as defaults for the `env`-backed options.
    pub fn init() -> Self {
        Self::load_dotenv();
        Self::parse()
    }

    #[cfg(feature = "dotenv")]
    fn load_dotenv() {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
    }

    /// No-op when dotenv feature is disabled.
    #[cfg(not(feature = "dotenv"))]
    fn load_dotenv() {}

    /// Logs build information at debug level.
    fn log_build_info() {
        tracing::debug!(
            target: TRACING_TARGET_STARTUP,
            version = env!("CARGO_PKG_VERSION"),
            pid = process::id(),
            arch = std::env::consts::ARCH,
            os = std::env::consts::OS,
            features = ?Self::enabled_features(),
            "Build information"
        );
    }

    /// Logs configuration (no sensitive information).
    pub fn log(&self) {
        Self::log_build_info();

        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            postgres_url = %self.postgres.database_url_masked(),
            postgres_schema = %self.postgres.postgres_schema,
            postgres_slow_query = %self.postgres.slow_query_threshold(),
            postgres_max_connections = self.postgres.postgres_max_connections,
            postgres_connection_timeout_secs = ?self.postgres.postgres_connection_timeout_secs,
            postgres_idle_timeout_secs = ?self.postgres.postgres_idle_timeout_secs,
            "Database configuration"
        );
    }

    /// Returns a list of enabled compile-time features.
    fn enabled_features() -> Vec<&'static str> {
        [cfg!(feature = "dotenv").then_some("dotenv")]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use strata_postgres::SlowQueryThreshold;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_exec_with_flags() {
        let cli = Cli::try_parse_from([
            "strata",
            "--postgres-url",
            "postgresql://localhost/app",
            "--postgres-schema",
            "tenant_a",
            "--postgres-slow-query-ms",
            "250",
            "exec",
            "--name",
            "purgeSessions",
            "DELETE FROM sessions",
        ])
        .unwrap();

        assert_eq!(cli.postgres.postgres_schema, "tenant_a");
        assert_eq!(
            cli.postgres.slow_query_threshold(),
            SlowQueryThreshold::from_millis(250)
        );
        match cli.command {
            Command::Exec { name, sql } => {
                assert_eq!(name.as_deref(), Some("purgeSessions"));
                assert_eq!(sql, "DELETE FROM sessions");
            }
            Command::Check => panic!("expected exec command"),
        }
    }

    #[test]
    fn invalid_threshold_disables_instrumentation() {
        let cli = Cli::try_parse_from([
            "strata",
            "--postgres-url",
            "postgresql://localhost/app",
            "--postgres-slow-query-ms",
            "soon",
            "check",
        ])
        .unwrap();

        assert!(!cli.postgres.slow_query_threshold().is_enabled());
        assert_eq!(cli.postgres.postgres_schema, "public");
    }
}
