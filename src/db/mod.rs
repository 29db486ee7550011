//! Database abstraction layer for sqlbox.
//!
//! Provides a trait-based interface over the shared database server so the
//! sandbox and coordinator can run against MySQL or the in-memory mock.

mod mock;
mod mysql;
mod types;

pub use mock::{Fault, MockDatabaseClient};
pub use mysql::MySqlClient;
pub use types::{ColumnInfo, ExecSummary, QueryResult, Row, Value};

use std::sync::Arc;

use crate::config::MySqlConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Connects to the configured MySQL server.
///
/// This is the central factory function for database connections.
pub async fn connect(config: &MySqlConfig) -> Result<Arc<dyn DatabaseClient>> {
    let client = MySqlClient::connect(config).await?;
    Ok(Arc::new(client))
}

/// Server-level operations on the shared database.
///
/// Implementations must be safe to use from many requests at once.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Creates a database (namespace) with the given name.
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Drops a database if it exists. Succeeds when it is already gone.
    async fn drop_namespace_if_exists(&self, name: &str) -> Result<()>;

    /// Checks out a dedicated connection for sequential statement execution.
    async fn open_session(&self) -> Result<Box<dyn DatabaseSession>>;

    /// Aborts whatever statement the given server connection is running.
    async fn cancel_query(&self, connection_id: u64) -> Result<()>;

    /// Verifies the server is reachable.
    async fn ping(&self) -> Result<()>;

    /// Closes all connections.
    async fn close(&self) -> Result<()>;
}

/// A single connection bound to one request.
///
/// Statements run strictly in order and see each other's effects.
#[async_trait]
pub trait DatabaseSession: Send {
    /// Server-side connection id, used to cancel a running statement.
    fn connection_id(&self) -> Option<u64>;

    /// Makes `name` the default database for subsequent statements.
    async fn use_namespace(&mut self, name: &str) -> Result<()>;

    /// Runs a statement that produces a row set.
    async fn query(&mut self, sql: &str) -> Result<QueryResult>;

    /// Runs a statement that modifies data or schema.
    async fn exec(&mut self, sql: &str) -> Result<ExecSummary>;

    /// Closes the underlying connection instead of returning it to the pool.
    async fn close(self: Box<Self>);
}

/// Quotes a MySQL identifier with backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
