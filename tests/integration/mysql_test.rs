//! End-to-end tests against a real MySQL server.
//!
//! Skipped unless DATABASE_URL is set. Each test uses its own sandbox prefix so
//! leftover databases can be detected.

use std::sync::Arc;
use std::time::Duration;

use sqlbox::config::{ExecutorConfig, MySqlConfig};
use sqlbox::db::{DatabaseClient, DatabaseSession, MySqlClient};
use sqlbox::query::{ExecutionState, QueryExecutor};
use tokio::time::Instant;
use uuid::Uuid;

/// Helper to get test database URL from environment.
fn get_test_database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

/// Helper to create a test client.
async fn get_test_client() -> Option<Arc<MySqlClient>> {
    let url = get_test_database_url()?;
    let config = MySqlConfig::from_connection_string(&url).ok()?;
    MySqlClient::connect(&config).await.ok().map(Arc::new)
}

fn unique_prefix() -> String {
    format!("it_{}_", &Uuid::new_v4().simple().to_string()[..8])
}

fn executor(client: &Arc<MySqlClient>, prefix: &str) -> QueryExecutor {
    let config = ExecutorConfig {
        db_prefix: prefix.to_string(),
        ..Default::default()
    };
    QueryExecutor::with_blocklist(client.clone(), config)
}

/// Counts databases whose name starts with `prefix`.
async fn count_databases(client: &MySqlClient, prefix: &str) -> usize {
    let mut session = client.open_session().await.unwrap();
    let pattern = format!("{}%", prefix.replace('_', "\\_"));
    let result = session
        .query(&format!("SHOW DATABASES LIKE '{pattern}'"))
        .await
        .unwrap();
    session.close().await;
    result.rows.len()
}

#[tokio::test]
async fn test_create_insert_select() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let prefix = unique_prefix();
    let executor = executor(&client, &prefix);

    let report = executor
        .execute(
            "CREATE TABLE users (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(20));\n\
             INSERT INTO users (name) VALUES ('Ann');\n\
             SELECT id, name FROM users;",
            None,
        )
        .await;

    assert_eq!(report.state, ExecutionState::Succeeded, "{:?}", report.response);
    assert_eq!(
        report.response.output,
        "Query OK, 0 row(s) affected\n\n\
Query OK, 1 row(s) affected (last insert ID: 1)\n\n\
+----+------+\n\
| id | name |\n\
+----+------+\n\
| 1  | Ann  |\n\
+----+------+\n\
1 row in set"
    );
    assert_eq!(count_databases(&client, &prefix).await, 0);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_null_and_empty_results() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let prefix = unique_prefix();
    let executor = executor(&client, &prefix);

    let report = executor
        .execute(
            "CREATE TABLE t (a INT, b VARCHAR(5)); SELECT a, b FROM t; SELECT NULL AS n",
            None,
        )
        .await;

    assert!(report.response.success, "{}", report.response.error);
    assert_eq!(
        report.response.output,
        "Query OK, 0 row(s) affected\n\nEmpty set\n\n\
+------+\n| n    |\n+------+\n| NULL |\n+------+\n1 row in set"
    );
    assert_eq!(count_databases(&client, &prefix).await, 0);
}

#[tokio::test]
async fn test_statement_error_and_cleanup() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let prefix = unique_prefix();
    let executor = executor(&client, &prefix);

    let report = executor
        .execute("SELECT 1; SELECT * FROM missing_table", None)
        .await;

    assert_eq!(report.state, ExecutionState::Failed);
    assert!(report
        .response
        .error
        .starts_with("Query execution failed: error in statement 2: ERROR 1146"));
    assert_eq!(count_databases(&client, &prefix).await, 0);
}

#[tokio::test]
async fn test_timeout_kills_query_and_cleans_up() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let prefix = unique_prefix();
    let executor = executor(&client, &prefix);

    let started = Instant::now();
    let report = executor
        .execute(
            "SELECT SLEEP(30)",
            Some(Instant::now() + Duration::from_millis(500)),
        )
        .await;

    assert_eq!(report.state, ExecutionState::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(count_databases(&client, &prefix).await, 0);
}

#[tokio::test]
async fn test_session_state_does_not_leak() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let executor = executor(&client, &unique_prefix());

    let first = executor
        .execute("SET @leak = 'secret'; SELECT @leak AS v", None)
        .await;
    assert!(first.response.output.contains("secret"));

    let second = executor.execute("SELECT @leak AS v", None).await;
    assert!(second.response.success);
    assert!(second.response.output.contains("NULL"));
}
