//! End-to-end pipeline tests against the mock database.
//!
//! Cover the full request path: validation, sandbox lifecycle, splitting,
//! execution and formatting.

use std::sync::Arc;
use std::time::Duration;

use sqlbox::config::ExecutorConfig;
use sqlbox::db::{ColumnInfo, Fault, MockDatabaseClient, QueryResult, Value};
use sqlbox::query::{ExecutionState, QueryExecutor};
use tokio::time::Instant;

fn executor(mock: &MockDatabaseClient) -> QueryExecutor {
    QueryExecutor::with_blocklist(Arc::new(mock.clone()), ExecutorConfig::default())
}

fn users_table() -> QueryResult {
    QueryResult::with_data(
        vec![ColumnInfo::new("id", "INT"), ColumnInfo::new("name", "VARCHAR")],
        vec![vec![Value::from("1"), Value::from("Ann")]],
    )
}

#[tokio::test]
async fn test_create_insert_select_round_trip() {
    let mock = MockDatabaseClient::new().with_result("SELECT id, name FROM users", users_table());
    let executor = executor(&mock);

    let report = executor
        .execute(
            "CREATE TABLE users (id INT, name VARCHAR(20));\n\
             INSERT INTO users VALUES (1, 'Ann');\n\
             SELECT id, name FROM users;",
            None,
        )
        .await;

    assert_eq!(report.state, ExecutionState::Succeeded);
    assert!(report.response.success);
    assert_eq!(
        report.response.output,
        "Query OK, 0 row(s) affected\n\n\
Query OK, 1 row(s) affected\n\n\
+----+------+\n\
| id | name |\n\
+----+------+\n\
| 1  | Ann  |\n\
+----+------+\n\
1 row in set"
    );

    // All three statements ran in the one sandbox, which is gone afterwards
    assert_eq!(mock.executed_statements().len(), 3);
    assert_eq!(mock.created_namespaces().len(), 1);
    assert!(mock.live_namespaces().is_empty());
    assert_eq!(mock.open_sessions(), 0);
}

#[tokio::test]
async fn test_sandbox_names_use_prefix() {
    let mock = MockDatabaseClient::new();
    let executor = executor(&mock);

    executor.execute("SELECT 1", None).await;
    executor.execute("SELECT 1", None).await;

    let created = mock.created_namespaces();
    assert_eq!(created.len(), 2);
    assert_ne!(created[0], created[1]);
    for name in &created {
        assert!(name.starts_with("student_db_"));
        assert_eq!(name.len(), "student_db_".len() + 32);
    }
}

#[tokio::test]
async fn test_semicolons_inside_literals() {
    let mock = MockDatabaseClient::new();
    let executor = executor(&mock);

    let report = executor
        .execute(
            "CREATE TABLE notes (body TEXT); INSERT INTO notes VALUES ('a; b; c')",
            None,
        )
        .await;

    assert!(report.response.success);
    assert_eq!(
        mock.executed_statements(),
        vec![
            "CREATE TABLE notes (body TEXT)",
            "INSERT INTO notes VALUES ('a; b; c')"
        ]
    );
}

#[tokio::test]
async fn test_failure_is_all_or_nothing() {
    let mock = MockDatabaseClient::new().with_statement_fault(
        "broken",
        Fault::Error("ERROR 1146 (42S02): Table 'broken' doesn't exist".to_string()),
    );
    let executor = executor(&mock);

    let report = executor
        .execute("CREATE TABLE t (x INT); SELECT * FROM broken; SELECT 1", None)
        .await;

    assert_eq!(report.state, ExecutionState::Failed);
    assert_eq!(report.response.output, "");
    assert_eq!(
        report.response.error,
        "Query execution failed: error in statement 2: \
         ERROR 1146 (42S02): Table 'broken' doesn't exist"
    );
    assert_eq!(mock.executed_statements().len(), 2);
    assert!(mock.live_namespaces().is_empty());
}

#[tokio::test]
async fn test_deadline_spans_all_statements() {
    let mock = MockDatabaseClient::new().with_statement_delay(Duration::from_millis(40));
    let executor = executor(&mock);

    let deadline = Instant::now() + Duration::from_millis(100);
    let report = executor
        .execute("SELECT 1; SELECT 2; SELECT 3; SELECT 4; SELECT 5", Some(deadline))
        .await;

    assert_eq!(report.state, ExecutionState::TimedOut);
    assert!(!report.response.success);
    assert!(report.response.error.starts_with("Query execution timeout exceeded"));
    assert!(mock.executed_statements().len() < 5);
    assert!(mock.live_namespaces().is_empty());
}

#[tokio::test]
async fn test_slow_cleanup_does_not_hold_response() {
    let mock = MockDatabaseClient::new().with_drop_fault(Fault::Hang);
    let config = ExecutorConfig {
        cleanup_wait_secs: 0,
        ..Default::default()
    };
    let executor = QueryExecutor::with_blocklist(Arc::new(mock.clone()), config);

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute("SELECT 1", None),
    )
    .await
    .expect("response was held back by cleanup");

    assert!(report.response.success);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(mock.drop_calls().len(), 1);
}

#[tokio::test]
async fn test_cleanup_failure_does_not_change_response() {
    let mock = MockDatabaseClient::new().with_drop_fault(Fault::Error("lost connection".into()));
    let executor = executor(&mock);

    let report = executor.execute("SELECT 1", None).await;

    assert_eq!(report.state, ExecutionState::Succeeded);
    assert!(report.response.success);
    assert_eq!(report.response.error, "");
}

#[tokio::test]
async fn test_abandoned_request_still_drops_sandbox() {
    let mock = MockDatabaseClient::new().with_statement_fault("sleep", Fault::Hang);
    let executor = executor(&mock);

    // The caller gives up before the coordinator's own deadline
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), executor.execute("SELECT SLEEP(60)", None))
            .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;

    let created = mock.created_namespaces();
    assert_eq!(created.len(), 1);
    assert_eq!(mock.drop_count(&created[0]), 1);
    assert!(mock.live_namespaces().is_empty());
}
