//! The statement pipeline and its coordinator.
//!
//! Splitting, per-statement result rendering, and the coordinator that runs a
//! whole request inside a sandbox.

pub mod executor;
pub mod formatter;
pub mod splitter;

pub use executor::{ExecuteResponse, ExecutionReport, ExecutionState, QueryExecutor};
pub use formatter::{format_exec_summary, format_result_set, format_table};
pub use splitter::{split_statements, strip_comments, StatementKind};
