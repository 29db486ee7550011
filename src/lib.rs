//! sqlbox - sandboxed execution server for untrusted MySQL queries.
//!
//! Every request gets its own throwaway database on a shared MySQL server.
//! Queries are screened against a blocklist, run statement by statement on a
//! dedicated connection, rendered like the `mysql` client, and the database is
//! dropped afterwards whatever happened.

pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod query;
pub mod safety;
pub mod sandbox;
