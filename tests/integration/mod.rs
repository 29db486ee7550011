//! Integration tests for sqlbox.
//!
//! MySQL tests skip unless DATABASE_URL is set.

pub mod api_test;
pub mod mysql_test;
pub mod pipeline_test;
