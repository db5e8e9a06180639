//! Tests against a live PostgreSQL server.
//!
//! Run with `cargo test -p strata-postgres -- --ignored` and `POSTGRES_URL`
//! set in the environment or a `.env` file.

use std::sync::{Arc, Mutex};

use diesel::QueryableByName;
use diesel::sql_types::Text;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};
use strata_postgres::{
    PgClient, PgConfig, PgError, QueryDescriptor, SlowQueryEvent, SlowQueryOutcome,
    SlowQueryReporter, quote_identifier,
};

#[derive(Clone, Default)]
struct Collector(Arc<Mutex<Vec<SlowQueryEvent>>>);

impl Collector {
    fn events(&self) -> Vec<SlowQueryEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl SlowQueryReporter for Collector {
    fn report(&self, event: &SlowQueryEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

#[derive(QueryableByName)]
struct CurrentSchema {
    #[diesel(sql_type = Text)]
    schema: String,
}

fn database_url() -> String {
    let _ = dotenvy::dotenv();
    std::env::var("POSTGRES_URL").expect("POSTGRES_URL must be set for database tests")
}

fn unique_schema(prefix: &str) -> String {
    format!("{prefix}_{}", std::process::id())
}

async fn drop_schema(client: &PgClient, schema: &str) {
    let statement = format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_identifier(schema).unwrap());
    client.execute_sql(statement).await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn concurrent_initializers_share_schema() {
    let schema = unique_schema("strata_race");
    let config = PgConfig::new(database_url()).with_schema(&schema);

    let (first, second) = tokio::join!(config.clone().build(), config.clone().build());
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.schema().as_str(), schema);
    assert_eq!(second.schema().as_str(), schema);

    drop_schema(&first, &schema).await;
    first.close();
    second.close();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn connections_resolve_into_schema() {
    let schema = unique_schema("Strata Tenant");
    let client = PgConfig::new(database_url())
        .with_schema(&schema)
        .build()
        .await
        .unwrap();

    let rows: Vec<CurrentSchema> = client
        .load_sql("SELECT current_schema()::text AS schema")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].schema, schema);

    client
        .execute_sql("CREATE TABLE widgets (id integer PRIMARY KEY)")
        .await
        .unwrap();
    let inserted = client
        .execute_sql("INSERT INTO widgets (id) VALUES (1), (2)")
        .await
        .unwrap();
    assert_eq!(inserted, 2);
    assert_eq!(client.session_failures(), 0);

    drop_schema(&client, &schema).await;
    client.close();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn slow_queries_are_reported_once() {
    let collector = Collector::default();
    let config = PgConfig::new(database_url()).with_slow_query_ms(50);
    let client = PgClient::connect_with_reporter(config, collector.clone())
        .await
        .unwrap();

    client
        .execute_sql(QueryDescriptor::named("sleepBriefly").with_text("SELECT pg_sleep(0.1)"))
        .await
        .unwrap();
    client.execute_sql("SELECT 1").await.unwrap();

    let events = collector.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].query, "sleepBriefly");
    assert!(events[0].duration_ms >= 50);

    client.close();
    assert!(client.is_closed());
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn driver_statements_are_reported() {
    let collector = Collector::default();
    let config = PgConfig::new(database_url()).with_slow_query_ms(50);
    let client = PgClient::connect_with_reporter(config, collector.clone())
        .await
        .unwrap();
    let baseline = collector.events().len();

    let mut conn = client.get_connection().await.unwrap();
    assert!(conn.instrumentation().is_driver_timed());

    conn.get_mut().batch_execute("SELECT pg_sleep(0.1)").await.unwrap();
    diesel::sql_query("SELECT pg_sleep(0.1)")
        .execute(conn.get_mut())
        .await
        .unwrap();
    assert_eq!(collector.events().len(), baseline + 2);

    conn.transaction::<_, PgError, _>(|conn| {
        async move {
            diesel::sql_query("SELECT pg_sleep(0.1)").execute(conn).await?;
            Ok(())
        }
        .scope_boxed()
    })
    .await
    .unwrap();

    // Driver events carry the statement text but no row count.
    let sleeps: Vec<_> = collector.events()[baseline..]
        .iter()
        .filter(|event| event.query == "SELECT")
        .cloned()
        .collect();
    assert_eq!(sleeps.len(), 3);
    assert!(sleeps.iter().all(|event| {
        event.duration_ms >= 50 && event.outcome == SlowQueryOutcome::Completed { row_count: None }
    }));

    drop(conn);
    client.close();
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL server"]
async fn failed_slow_queries_are_reported_and_returned() {
    let collector = Collector::default();
    let config = PgConfig::new(database_url()).with_slow_query_ms(10);
    let client = PgClient::connect_with_reporter(config, collector.clone())
        .await
        .unwrap();

    let failing_block = QueryDescriptor::named("failingBlock").with_text(
        "DO $$ BEGIN PERFORM pg_sleep(0.05); RAISE EXCEPTION 'boom'; END $$",
    );
    let result = client.execute_sql(failing_block).await;

    assert!(result.is_err());
    let events = collector.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].query, "failingBlock");
    assert!(matches!(events[0].outcome, SlowQueryOutcome::Failed { .. }));

    client.close();
}
