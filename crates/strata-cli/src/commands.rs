//! Command handlers run against an initialized client.

use anyhow::Context;
use diesel::QueryableByName;
use diesel::sql_types::Text;
use strata_postgres::{PgClient, QueryDescriptor};

use crate::TRACING_TARGET_COMMAND;
use crate::config::Command;

/// Row returned by the session check.
#[derive(Debug, QueryableByName)]
struct SessionRow {
    #[diesel(sql_type = Text)]
    current_schema: String,
    #[diesel(sql_type = Text)]
    search_path: String,
}

/// Runs `command` against `client`.
pub async fn dispatch(client: &PgClient, command: &Command) -> anyhow::Result<()> {
    match command {
        Command::Check => check(client).await,
        Command::Exec { name, sql } => exec(client, name.as_deref(), sql).await,
    }
}

/// Reports the schema the pool resolves into and its current status.
async fn check(client: &PgClient) -> anyhow::Result<()> {
    let query = QueryDescriptor::named("sessionCheck")
        .with_text("SELECT current_schema()::text AS current_schema, current_setting('search_path') AS search_path");

    let rows: Vec<SessionRow> = client
        .load_sql(query)
        .await
        .context("failed to read session settings")?;
    let row = rows
        .into_iter()
        .next()
        .context("session check returned no rows")?;

    let status = client.pool_status();
    tracing::info!(
        target: TRACING_TARGET_COMMAND,
        schema = %client.schema(),
        current_schema = %row.current_schema,
        search_path = %row.search_path,
        pool_size = status.size,
        pool_available = status.available,
        pool_max_size = status.max_size,
        session_failures = client.session_failures(),
        "Database check passed"
    );

    println!("schema: {}", row.current_schema);
    println!("search_path: {}", row.search_path);
    Ok(())
}

/// Executes a single statement and prints the affected row count.
async fn exec(client: &PgClient, name: Option<&str>, sql: &str) -> anyhow::Result<()> {
    let mut query = QueryDescriptor::new(sql);
    if let Some(name) = name {
        query = query.with_name(name);
    }

    tracing::debug!(
        target: TRACING_TARGET_COMMAND,
        query = %query.label(),
        "Executing statement"
    );

    let affected = client
        .execute_sql(query)
        .await
        .context("failed to execute statement")?;

    println!("{affected}");
    Ok(())
}
