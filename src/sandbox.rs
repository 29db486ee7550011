//! Per-request sandbox databases.
//!
//! A [`Sandbox`] owns one uniquely named database on the shared server. Statements
//! run on a dedicated session bound to it, and the database is dropped when the
//! sandbox is cleaned up or, failing that, when it is dropped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{DatabaseClient, DatabaseSession};
use crate::error::{Result, SqlboxError};
use crate::query::formatter::{format_exec_summary, format_result_set};
use crate::query::splitter::{split_statements, StatementKind};

/// Upper bound for the best-effort `KILL QUERY` issued after a timeout.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for closing a session; a dead connection must not hold the response.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// The point in time a request must finish by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            budget,
        }
    }

    /// A deadline at a fixed instant. The budget is the time left from now,
    /// rounded up to whole milliseconds.
    pub fn at(at: Instant) -> Self {
        let remaining = at.saturating_duration_since(Instant::now());
        Self {
            at,
            budget: Duration::from_millis(remaining.as_nanos().div_ceil(1_000_000) as u64),
        }
    }

    /// Returns whichever deadline comes first.
    pub fn earliest(self, other: Self) -> Self {
        if other.at < self.at {
            other
        } else {
            self
        }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// The time that was allowed when the deadline was set.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// The error reported when this deadline elapses.
    pub fn exceeded(&self) -> SqlboxError {
        SqlboxError::Timeout(self.budget)
    }
}

/// Generates a sandbox database name: `prefix` followed by 32 hex characters.
pub fn generate_name(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}

/// An ephemeral database that exists for exactly one request.
///
/// Call [`Sandbox::cleanup`] when done. A sandbox dropped without cleanup
/// schedules `DROP DATABASE IF EXISTS` on the current runtime.
pub struct Sandbox {
    db: Arc<dyn DatabaseClient>,
    name: String,
    /// Whether a drop is still owed for this database.
    armed: bool,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("name", &self.name)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Sandbox {
    /// Creates a new sandbox database named `prefix` plus a random suffix.
    ///
    /// An explicit creation error means nothing was created, so no cleanup is owed.
    /// If the deadline interrupts creation the database may or may not exist, and
    /// the returned error leaves the drop guard to remove it.
    pub async fn create(
        db: Arc<dyn DatabaseClient>,
        prefix: &str,
        deadline: Deadline,
    ) -> Result<Self> {
        let mut sandbox = Self {
            db,
            name: generate_name(prefix),
            armed: true,
        };

        debug!(sandbox = %sandbox.name, "Creating sandbox database");
        match timeout_at(deadline.instant(), sandbox.db.create_namespace(&sandbox.name)).await {
            Ok(Ok(())) => Ok(sandbox),
            Ok(Err(e)) => {
                sandbox.armed = false;
                Err(SqlboxError::SandboxCreation(database_message(e)))
            }
            Err(_) => Err(deadline.exceeded()),
        }
    }

    /// Name of the sandbox database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs every statement of `query` inside the sandbox and returns the combined output.
    ///
    /// Output is all-or-nothing: the first failing statement fails the whole call.
    /// The session is closed afterwards rather than returned to the pool.
    pub async fn execute_query(&self, query: &str, deadline: Deadline) -> Result<String> {
        let mut session = match timeout_at(deadline.instant(), self.db.open_session()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                return Err(SqlboxError::execution(format!(
                    "failed to open session: {}",
                    database_message(e)
                )))
            }
            Err(_) => return Err(deadline.exceeded()),
        };
        let connection_id = session.connection_id();

        let run = timeout_at(deadline.instant(), self.run_statements(session.as_mut(), query));
        let outcome = AssertUnwindSafe(run).catch_unwind().await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                if let Some(id) = connection_id {
                    self.cancel(id).await;
                }
                Err(deadline.exceeded())
            }
            Err(panic) => {
                self.close_session(session).await;
                std::panic::resume_unwind(panic);
            }
        };

        self.close_session(session).await;
        result
    }

    async fn run_statements(
        &self,
        session: &mut dyn DatabaseSession,
        query: &str,
    ) -> Result<String> {
        session.use_namespace(&self.name).await.map_err(|e| {
            SqlboxError::execution(format!(
                "failed to switch to database {}: {}",
                self.name,
                database_message(e)
            ))
        })?;

        let statements = split_statements(query);
        if statements.is_empty() {
            return Err(SqlboxError::execution("no valid SQL statements found"));
        }

        let mut outputs = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            let output = match StatementKind::of(statement) {
                StatementKind::Read => session
                    .query(statement)
                    .await
                    .map(|result| format_result_set(&result)),
                StatementKind::Write => session
                    .exec(statement)
                    .await
                    .map(|summary| format_exec_summary(&summary)),
            };
            let output =
                output.map_err(|e| SqlboxError::statement(index + 1, database_message(e)))?;
            outputs.push(output);
        }

        Ok(outputs.join("\n\n"))
    }

    async fn cancel(&self, connection_id: u64) {
        let name = &self.name;
        match timeout(CANCEL_TIMEOUT, self.db.cancel_query(connection_id)).await {
            Ok(Ok(())) => debug!(sandbox = %name, connection_id, "Cancelled running statement"),
            Ok(Err(e)) => warn!(sandbox = %name, connection_id, "Failed to cancel statement: {e}"),
            Err(_) => warn!(sandbox = %name, connection_id, "Timed out cancelling statement"),
        }
    }

    async fn close_session(&self, session: Box<dyn DatabaseSession>) {
        if timeout(CLOSE_TIMEOUT, session.close()).await.is_err() {
            warn!(sandbox = %self.name, "Timed out closing session");
        }
    }

    /// Drops the sandbox database.
    ///
    /// Consumes the sandbox, so each database is dropped at most once. Dropping an
    /// already-missing database succeeds.
    pub async fn cleanup(mut self) -> Result<()> {
        debug!(sandbox = %self.name, "Dropping sandbox database");
        let result = self.db.drop_namespace_if_exists(&self.name).await;
        self.armed = false;

        result.map_err(|e| SqlboxError::Cleanup {
            name: self.name.clone(),
            message: database_message(e),
        })
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let db = Arc::clone(&self.db);
                handle.spawn(async move {
                    debug!(sandbox = %name, "Dropping abandoned sandbox database");
                    if let Err(e) = db.drop_namespace_if_exists(&name).await {
                        warn!(sandbox = %name, "Failed to drop abandoned sandbox: {e}");
                    }
                });
            }
            Err(_) => warn!(sandbox = %name, "No runtime available, sandbox database left behind"),
        }
    }
}

/// Extracts the server's message from a database error.
fn database_message(err: SqlboxError) -> String {
    match err {
        SqlboxError::Query(msg) | SqlboxError::Connection(msg) => msg,
        other => other.to_string(),
    }
}
