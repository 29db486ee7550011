//! Query safety validation module.
//!
//! Screens raw SQL against a blocklist of administrative, file-system and
//! schema-destroying commands before anything is sent to the database server.

mod validator;

pub use validator::{normalize_query, BlocklistValidator};

use std::fmt;

/// Why a query was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// `DROP DATABASE` / `DROP SCHEMA`; reported apart from everything else.
    SchemaDestruction,
    /// Server control, file access, privilege management and similar commands.
    DangerousCommand,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaDestruction => write!(f, "DROP DATABASE command is not allowed"),
            Self::DangerousCommand => {
                write!(f, "query contains dangerous commands that are not allowed")
            }
        }
    }
}

/// Outcome of validating a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The query may be executed.
    Admissible,
    /// The query must not reach the database.
    Rejected {
        reason: RejectReason,
        /// Name of the blocklist rule that matched, for logging.
        rule: &'static str,
    },
}

impl Verdict {
    /// Returns true if the query may be executed.
    pub fn is_admissible(&self) -> bool {
        matches!(self, Self::Admissible)
    }

    /// Returns the rejection reason, if any.
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Admissible => None,
            Self::Rejected { reason, .. } => Some(*reason),
        }
    }
}

/// Decides whether a raw query may be executed.
///
/// Implementations must be pure: no I/O, same answer for the same text.
pub trait QueryValidator: Send + Sync {
    fn validate(&self, query: &str) -> Verdict;
}
