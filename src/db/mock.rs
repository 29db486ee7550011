//! Mock database client for testing.
//!
//! Keeps namespaces in memory, records every call, and can inject failures,
//! hangs or panics into namespace management and statement execution.

use super::{ColumnInfo, DatabaseClient, DatabaseSession, ExecSummary, QueryResult, Value};
use crate::error::{Result, SqlboxError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A failure to inject into a mock operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Return a query error with this message.
    Error(String),
    /// Never complete; only a deadline can end the operation.
    Hang,
    /// Panic inside the operation.
    Panic,
}

impl Fault {
    async fn trigger(&self) -> Result<()> {
        match self {
            Fault::Error(msg) => Err(SqlboxError::query(msg.clone())),
            Fault::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Fault::Panic => panic!("injected panic"),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    namespaces: HashSet<String>,
    created: Vec<String>,
    drop_calls: Vec<String>,
    executed: Vec<String>,
    cancelled: Vec<u64>,
    results: Vec<(String, QueryResult)>,
    statement_faults: Vec<(String, Fault)>,
    create_fault: Option<Fault>,
    drop_fault: Option<Fault>,
    close_fault: Option<Fault>,
    statement_delay: Option<Duration>,
    next_connection_id: u64,
    open_sessions: usize,
}

impl MockState {
    fn statement_fault(&self, sql: &str) -> Option<Fault> {
        let sql = sql.to_lowercase();
        self.statement_faults
            .iter()
            .find(|(needle, _)| sql.contains(needle))
            .map(|(_, fault)| fault.clone())
    }

    fn scripted_result(&self, sql: &str) -> Option<QueryResult> {
        self.results
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(sql.trim()))
            .map(|(_, result)| result.clone())
    }
}

/// An in-memory database client that records calls and injects faults.
///
/// Clones share state, so a test can keep one handle for inspection while the
/// coordinator owns another.
#[derive(Debug, Clone, Default)]
pub struct MockDatabaseClient {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabaseClient {
    /// Creates a mock with no scripted results and no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `result` whenever a read statement equal to `sql` (ignoring case) runs.
    pub fn with_result(self, sql: &str, result: QueryResult) -> Self {
        self.state().results.push((sql.trim().to_string(), result));
        self
    }

    /// Injects `fault` into any statement containing `needle` (ignoring case).
    pub fn with_statement_fault(self, needle: &str, fault: Fault) -> Self {
        self.state()
            .statement_faults
            .push((needle.to_lowercase(), fault));
        self
    }

    /// Injects `fault` into namespace creation.
    pub fn with_create_fault(self, fault: Fault) -> Self {
        self.state().create_fault = Some(fault);
        self
    }

    /// Injects `fault` into namespace drops.
    pub fn with_drop_fault(self, fault: Fault) -> Self {
        self.state().drop_fault = Some(fault);
        self
    }

    /// Injects `fault` into session close. Errors are swallowed, as close has no
    /// way to report them.
    pub fn with_close_fault(self, fault: Fault) -> Self {
        self.state().close_fault = Some(fault);
        self
    }

    /// Makes every statement take at least `delay`.
    pub fn with_statement_delay(self, delay: Duration) -> Self {
        self.state().statement_delay = Some(delay);
        self
    }

    /// Namespaces that currently exist.
    pub fn live_namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().namespaces.iter().cloned().collect();
        names.sort();
        names
    }

    /// Every namespace creation attempt, in order.
    pub fn created_namespaces(&self) -> Vec<String> {
        self.state().created.clone()
    }

    /// Every drop call, in order, including ones that failed.
    pub fn drop_calls(&self) -> Vec<String> {
        self.state().drop_calls.clone()
    }

    /// Number of drop calls issued for `name`.
    pub fn drop_count(&self, name: &str) -> usize {
        self.state()
            .drop_calls
            .iter()
            .filter(|n| n.as_str() == name)
            .count()
    }

    /// Every statement that reached a session, in order.
    pub fn executed_statements(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Connection ids passed to `cancel_query`.
    pub fn cancelled_connections(&self) -> Vec<u64> {
        self.state().cancelled.clone()
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn create_namespace(&self, name: &str) -> Result<()> {
        let fault = {
            let mut state = self.state();
            state.created.push(name.to_string());
            state.create_fault.clone()
        };
        if let Some(fault) = fault {
            fault.trigger().await?;
        }

        let mut state = self.state();
        if !state.namespaces.insert(name.to_string()) {
            return Err(SqlboxError::query(format!(
                "ERROR 1007 (HY000): Can't create database '{name}'; database exists"
            )));
        }
        Ok(())
    }

    async fn drop_namespace_if_exists(&self, name: &str) -> Result<()> {
        let fault = {
            let mut state = self.state();
            state.drop_calls.push(name.to_string());
            state.drop_fault.clone()
        };
        if let Some(fault) = fault {
            fault.trigger().await?;
        }

        self.state().namespaces.remove(name);
        Ok(())
    }

    async fn open_session(&self) -> Result<Box<dyn DatabaseSession>> {
        let mut state = self.state();
        state.next_connection_id += 1;
        state.open_sessions += 1;

        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            connection_id: state.next_connection_id,
            namespace: None,
        }))
    }

    async fn cancel_query(&self, connection_id: u64) -> Result<()> {
        self.state().cancelled.push(connection_id);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    connection_id: u64,
    namespace: Option<String>,
}

impl MockSession {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the statement and applies delay and faults.
    async fn run(&mut self, sql: &str) -> Result<()> {
        let (delay, fault, namespace_live) = {
            let mut state = self.state();
            state.executed.push(sql.to_string());
            let live = self
                .namespace
                .as_ref()
                .is_some_and(|ns| state.namespaces.contains(ns));
            (state.statement_delay, state.statement_fault(sql), live)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fault) = fault {
            fault.trigger().await?;
        }
        if !namespace_live {
            return Err(SqlboxError::query("ERROR 1046 (3D000): No database selected"));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseSession for MockSession {
    fn connection_id(&self) -> Option<u64> {
        Some(self.connection_id)
    }

    async fn use_namespace(&mut self, name: &str) -> Result<()> {
        if !self.state().namespaces.contains(name) {
            return Err(SqlboxError::query(format!(
                "ERROR 1049 (42000): Unknown database '{name}'"
            )));
        }
        self.namespace = Some(name.to_string());
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.run(sql).await?;

        if let Some(result) = self.state().scripted_result(sql) {
            return Ok(result);
        }

        Ok(QueryResult::with_data(
            vec![ColumnInfo::new("result", "VARCHAR")],
            vec![vec![Value::String(format!("Mock result for: {}", sql))]],
        ))
    }

    async fn exec(&mut self, sql: &str) -> Result<ExecSummary> {
        self.run(sql).await?;

        let rows_affected = if sql.trim_start().to_uppercase().starts_with("INSERT") {
            1
        } else {
            0
        };
        Ok(ExecSummary::new(rows_affected, 0))
    }

    async fn close(self: Box<Self>) {
        let fault = self.state().close_fault.clone();
        if let Some(fault) = fault {
            let _ = fault.trigger().await;
        }

        let mut state = self.state();
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}
