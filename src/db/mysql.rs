//! MySQL database client implementation.
//!
//! Provides `MySqlClient`, which implements `DatabaseClient` on top of a sqlx
//! connection pool, and `MySqlSession`, a dedicated pooled connection used for
//! one request's statements.
//!
//! Statements go through the text protocol (`sqlx::raw_sql`) so that anything a
//! user can type into the `mysql` CLI works, including statements MySQL refuses
//! to prepare.

use crate::config::MySqlConfig;
use crate::db::{
    quote_identifier, ColumnInfo, DatabaseClient, DatabaseSession, ExecSummary, QueryResult, Row,
    Value,
};
use crate::error::{Result, SqlboxError};
use async_trait::async_trait;
use sqlx::mysql::{
    MySql, MySqlColumn, MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions,
    MySqlRow,
};
use sqlx::pool::PoolConnection;
use sqlx::{Column as SqlxColumn, Connection, Executor, Row as SqlxRow, Statement, TypeInfo};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// MySQL database client backed by a shared pool.
#[derive(Debug)]
pub struct MySqlClient {
    pool: MySqlPool,
}

impl MySqlClient {
    /// Connects to the server, retrying transient failures with exponential backoff.
    pub async fn connect(config: &MySqlConfig) -> Result<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(config.host_or_default())
            .port(config.port)
            .username(config.user_or_default());
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = MySqlPoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .acquire_timeout(config.acquire_timeout())
                .max_lifetime(config.max_lifetime())
                .connect_with(options.clone())
                .await;

            match result {
                Ok(pool) => {
                    debug!("Successfully connected to {}", config.display_string());
                    return Ok(Self { pool });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2; // Exponential backoff
                    } else {
                        break;
                    }
                }
            }
        }

        Err(match last_error {
            Some(e) => map_connection_error(e, config),
            None => SqlboxError::connection("no connection attempt was made"),
        })
    }

    async fn run_on_pool(&self, sql: &str) -> std::result::Result<(), sqlx::Error> {
        sqlx::raw_sql(sql).execute(&self.pool).await.map(|_| ())
    }
}

#[async_trait]
impl DatabaseClient for MySqlClient {
    async fn create_namespace(&self, name: &str) -> Result<()> {
        let sql = format!("CREATE DATABASE {}", quote_identifier(name));
        self.run_on_pool(&sql).await.map_err(|e| {
            SqlboxError::query(format!(
                "failed to create database {name}: {}",
                format_query_error(e)
            ))
        })
    }

    async fn drop_namespace_if_exists(&self, name: &str) -> Result<()> {
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_identifier(name));
        self.run_on_pool(&sql).await.map_err(|e| {
            SqlboxError::query(format!(
                "failed to drop database {name}: {}",
                format_query_error(e)
            ))
        })
    }

    async fn open_session(&self) -> Result<Box<dyn DatabaseSession>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| SqlboxError::connection(format!("failed to acquire connection: {e}")))?;

        let connection_id: Option<u64> = match sqlx::query_scalar("SELECT CONNECTION_ID()")
            .fetch_one(&mut *conn)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Could not read connection id: {e}");
                None
            }
        };

        Ok(Box::new(MySqlSession {
            conn,
            connection_id,
        }))
    }

    async fn cancel_query(&self, connection_id: u64) -> Result<()> {
        self.run_on_pool(&format!("KILL QUERY {connection_id}"))
            .await
            .map_err(|e| SqlboxError::query(format_query_error(e)))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| SqlboxError::connection(e.to_string()))?;
        conn.ping()
            .await
            .map_err(|e| SqlboxError::connection(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// One pooled connection dedicated to a single request.
pub struct MySqlSession {
    conn: PoolConnection<MySql>,
    connection_id: Option<u64>,
}

impl MySqlSession {
    /// Column metadata for a statement that returned no rows.
    ///
    /// The text protocol only carries column definitions alongside rows, so this
    /// prepares the statement to read them. Best effort: statements MySQL cannot
    /// prepare report no columns.
    async fn describe_columns(&mut self, sql: &str) -> Vec<ColumnInfo> {
        match (&mut *self.conn).prepare(sql).await {
            Ok(statement) => statement.columns().iter().map(column_info).collect(),
            Err(e) => {
                debug!("Could not describe empty result set: {e}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl DatabaseSession for MySqlSession {
    fn connection_id(&self) -> Option<u64> {
        self.connection_id
    }

    async fn use_namespace(&mut self, name: &str) -> Result<()> {
        let sql = format!("USE {}", quote_identifier(name));
        (&mut *self.conn)
            .execute(sqlx::raw_sql(&sql))
            .await
            .map(|_| ())
            .map_err(|e| SqlboxError::query(format_query_error(e)))
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let rows: Vec<MySqlRow> = (&mut *self.conn)
            .fetch_all(sqlx::raw_sql(sql))
            .await
            .map_err(|e| SqlboxError::query(format_query_error(e)))?;

        let columns = match rows.first() {
            Some(first) => first.columns().iter().map(column_info).collect(),
            None => self.describe_columns(sql).await,
        };

        Ok(QueryResult::with_data(
            columns,
            rows.iter().map(convert_row).collect(),
        ))
    }

    async fn exec(&mut self, sql: &str) -> Result<ExecSummary> {
        let done = (&mut *self.conn)
            .execute(sqlx::raw_sql(sql))
            .await
            .map_err(|e| SqlboxError::query(format_query_error(e)))?;

        Ok(ExecSummary::new(done.rows_affected(), done.last_insert_id()))
    }

    async fn close(self: Box<Self>) {
        let session = *self;
        if let Err(e) = session.conn.close().await {
            debug!("Error closing session connection: {e}");
        }
    }
}

fn column_info(column: &MySqlColumn) -> ColumnInfo {
    ColumnInfo::new(column.name(), column.type_info().name())
}

/// Converts a sqlx MySqlRow to our Row type.
fn convert_row(row: &MySqlRow) -> Row {
    (0..row.len()).map(|i| convert_value(row, i)).collect()
}

/// Reads a column as raw text-protocol bytes, the way the `mysql` CLI prints it.
fn convert_value(row: &MySqlRow, index: usize) -> Value {
    match row.try_get_unchecked::<Option<Vec<u8>>, _>(index) {
        Ok(raw) => Value::from_raw(raw),
        Err(e) => {
            warn!("Failed to decode column {index}: {e}");
            Value::Null
        }
    }
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    if matches!(error, sqlx::Error::PoolTimedOut) {
        return true;
    }

    let error_str = error.to_string().to_lowercase();

    // Connection refused or timeout are often transient
    if error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
        || error_str.contains("too many connections")
    {
        return true;
    }

    // Authentication errors are not transient; neither is anything unknown
    false
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &MySqlConfig) -> SqlboxError {
    let host = config.host_or_default();
    let port = config.port;
    let user = config.user_or_default();

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("can't connect") {
        SqlboxError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("access denied") {
        SqlboxError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        SqlboxError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        SqlboxError::connection(error.to_string())
    }
}

/// Formats a database error the way the `mysql` CLI does:
/// `ERROR 1146 (42S02): Table 'x.t' doesn't exist`.
fn format_query_error(error: sqlx::Error) -> String {
    if let Some(db_error) = error.as_database_error() {
        if let Some(mysql_error) = db_error.try_downcast_ref::<MySqlDatabaseError>() {
            return match mysql_error.code() {
                Some(state) => format!(
                    "ERROR {} ({}): {}",
                    mysql_error.number(),
                    state,
                    mysql_error.message()
                ),
                None => format!("ERROR {}: {}", mysql_error.number(), mysql_error.message()),
            };
        }
        return db_error.message().to_string();
    }

    error.to_string()
}
