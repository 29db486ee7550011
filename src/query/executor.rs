//! Execution coordinator.
//!
//! Runs one request end to end: request checks, validation, sandbox creation,
//! statement execution under a deadline, and unconditional teardown. Every
//! outcome is folded into an [`ExecuteResponse`].

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ExecutorConfig;
use crate::db::DatabaseClient;
use crate::error::{Result, SqlboxError};
use crate::safety::{BlocklistValidator, QueryValidator, Verdict};
use crate::sandbox::{Deadline, Sandbox};

/// Longest query preview written to the request log, in characters.
const LOG_PREVIEW_CHARS: usize = 100;

/// Terminal state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Empty or oversized query; nothing was validated.
    Invalid,
    /// The validator refused the query.
    Rejected,
    /// The sandbox database could not be created.
    CreateFailed,
    /// Every statement ran.
    Succeeded,
    /// A statement or the session failed.
    Failed,
    /// The deadline elapsed.
    TimedOut,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Rejected => "rejected",
            Self::CreateFailed => "create_failed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The body returned for an executed request.
///
/// Absent values serialize as empty strings or zero, never null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub output: String,
    pub execution_time_ms: u64,
    pub error: String,
}

impl ExecuteResponse {
    /// A successful response carrying the rendered output.
    pub fn success(output: String, elapsed: Duration) -> Self {
        Self {
            success: true,
            output,
            execution_time_ms: elapsed.as_millis() as u64,
            error: String::new(),
        }
    }

    /// A failed response carrying only the error text.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            execution_time_ms: 0,
            error: error.into(),
        }
    }
}

/// What happened to a request and what to send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub state: ExecutionState,
    pub response: ExecuteResponse,
}

/// Coordinates validation, sandboxing and execution of submitted queries.
#[derive(Clone)]
pub struct QueryExecutor {
    db: Arc<dyn DatabaseClient>,
    validator: Arc<dyn QueryValidator>,
    config: ExecutorConfig,
}

impl QueryExecutor {
    /// Creates a coordinator with an explicit validator.
    pub fn new(
        db: Arc<dyn DatabaseClient>,
        validator: Arc<dyn QueryValidator>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            db,
            validator,
            config,
        }
    }

    /// Creates a coordinator using the built-in blocklist.
    pub fn with_blocklist(db: Arc<dyn DatabaseClient>, config: ExecutorConfig) -> Self {
        Self::new(db, Arc::new(BlocklistValidator::new()), config)
    }

    /// The database client sandboxes are created on.
    pub fn db(&self) -> &Arc<dyn DatabaseClient> {
        &self.db
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes a query in a fresh sandbox.
    ///
    /// The effective deadline is the earlier of `deadline` and the configured query
    /// timeout. The sandbox is torn down whatever the outcome.
    pub async fn execute(&self, query: &str, deadline: Option<Instant>) -> ExecutionReport {
        let start = Instant::now();
        let (state, result) = self.run(query, deadline).await;
        let elapsed = start.elapsed();

        let preview = log_preview(query);
        let response = match result {
            Ok(output) => {
                info!(
                    state = %state,
                    duration_ms = elapsed.as_millis() as u64,
                    query = %preview,
                    "Query executed"
                );
                ExecuteResponse::success(output, elapsed)
            }
            Err(e) => {
                info!(
                    state = %state,
                    category = e.category(),
                    duration_ms = elapsed.as_millis() as u64,
                    query = %preview,
                    "Query failed: {e}"
                );
                ExecuteResponse::failure(e.to_string())
            }
        };

        ExecutionReport { state, response }
    }

    async fn run(
        &self,
        query: &str,
        deadline: Option<Instant>,
    ) -> (ExecutionState, Result<String>) {
        if let Err(e) = self.check_request(query) {
            return (ExecutionState::Invalid, Err(e));
        }

        if let Verdict::Rejected { reason, rule } = self.validator.validate(query) {
            warn!(rule, "Rejected query: {reason}");
            return (ExecutionState::Rejected, Err(SqlboxError::Rejected(reason)));
        }

        let mut effective = Deadline::after(self.config.query_timeout());
        if let Some(at) = deadline {
            effective = effective.earliest(Deadline::at(at));
        }

        let created = AssertUnwindSafe(Sandbox::create(
            Arc::clone(&self.db),
            &self.config.db_prefix,
            effective,
        ))
        .catch_unwind()
        .await;
        let sandbox = match created {
            Ok(Ok(sandbox)) => sandbox,
            Ok(Err(e @ SqlboxError::Timeout(_))) => return (ExecutionState::TimedOut, Err(e)),
            Ok(Err(e)) => return (ExecutionState::CreateFailed, Err(e)),
            Err(panic) => {
                let e = SqlboxError::SandboxCreation(format!(
                    "internal error: {}",
                    panic_message(&*panic)
                ));
                return (ExecutionState::CreateFailed, Err(e));
            }
        };

        let result = match AssertUnwindSafe(sandbox.execute_query(query, effective))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                warn!(sandbox = %sandbox.name(), "Execution panicked");
                Err(SqlboxError::execution(format!(
                    "internal error: {}",
                    panic_message(&*panic)
                )))
            }
        };

        let state = match &result {
            Ok(_) => ExecutionState::Succeeded,
            Err(SqlboxError::Timeout(_)) => ExecutionState::TimedOut,
            Err(_) => ExecutionState::Failed,
        };

        self.cleanup(sandbox).await;
        (state, result)
    }

    fn check_request(&self, query: &str) -> Result<()> {
        if query.trim().is_empty() {
            return Err(SqlboxError::invalid_request("query cannot be empty"));
        }
        if query.len() > self.config.max_query_length {
            return Err(SqlboxError::invalid_request(
                "query exceeds maximum allowed length",
            ));
        }
        Ok(())
    }

    /// Drops the sandbox on a separate task and waits for it up to `cleanup_wait`.
    ///
    /// A slow drop keeps running after the wait gives up.
    async fn cleanup(&self, sandbox: Sandbox) {
        let name = sandbox.name().to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = sandbox.cleanup().await {
                warn!("{e}");
            }
        });

        match tokio::time::timeout(self.config.cleanup_wait(), task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(sandbox = %name, "Cleanup task failed: {e}"),
            Err(_) => warn!(sandbox = %name, "Cleanup still running, continuing in background"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "execution panicked".to_string()
    }
}

/// Flattens whitespace control characters and truncates for logging.
fn log_preview(query: &str) -> String {
    let mut preview: String = query
        .chars()
        .take(LOG_PREVIEW_CHARS)
        .map(|c| if matches!(c, '\n' | '\r' | '\t') { ' ' } else { c })
        .collect();
    if query.chars().nth(LOG_PREVIEW_CHARS).is_some() {
        preview.push_str("...");
    }
    preview
}
