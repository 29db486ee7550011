//! Blocklist-based SQL validation.
//!
//! Matches word-bounded, case-insensitive patterns against a normalized copy of the
//! whole submission. This is deliberately not a parser: ordinary DDL and DML
//! (including `DROP TABLE`) pass, since they only touch the caller's own sandbox.

use regex::Regex;

use super::{QueryValidator, RejectReason, Verdict};
use crate::query::strip_comments;

/// Checked first; any match is reported as [`RejectReason::SchemaDestruction`].
const SCHEMA_DESTRUCTION_RULES: &[(&str, &str)] = &[
    ("drop database", r"\bdrop\s+database\b"),
    ("drop schema", r"\bdrop\s+schema\b"),
];

/// Checked in order after the schema rules.
const DANGEROUS_RULES: &[(&str, &str)] = &[
    // Server control
    ("shutdown", r"\bshutdown\b"),
    ("restart", r"\brestart\b"),
    // File access
    ("load_file", r"\bload_file\s*\("),
    ("into outfile", r"\binto\s+outfile\b"),
    ("into dumpfile", r"\binto\s+dumpfile\b"),
    ("load data infile", r"\bload\s+data\s+infile\b"),
    // Accounts and privileges
    ("create user", r"\bcreate\s+user\b"),
    ("drop user", r"\bdrop\s+user\b"),
    ("alter user", r"\balter\s+user\b"),
    ("rename user", r"\brename\s+user\b"),
    ("grant", r"\bgrant\b"),
    ("revoke", r"\brevoke\b"),
    ("set password", r"\bset\s+password\b"),
    // Server-wide variables
    ("set global", r"\bset\s+global\b"),
    ("set @@global", r"\bset\s+@@global\b"),
    // Other sessions
    ("kill", r"\bkill\b"),
    // Plugins
    ("install plugin", r"\binstall\s+plugin\b"),
    ("uninstall plugin", r"\buninstall\s+plugin\b"),
];

struct Rule {
    name: &'static str,
    reason: RejectReason,
    pattern: Regex,
}

/// Validator that rejects queries containing blocklisted commands.
pub struct BlocklistValidator {
    rules: Vec<Rule>,
}

impl Default for BlocklistValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl BlocklistValidator {
    /// Creates a validator with the built-in rule set.
    pub fn new() -> Self {
        let schema = SCHEMA_DESTRUCTION_RULES
            .iter()
            .map(|rule| (rule, RejectReason::SchemaDestruction));
        let dangerous = DANGEROUS_RULES
            .iter()
            .map(|rule| (rule, RejectReason::DangerousCommand));

        let rules = schema
            .chain(dangerous)
            .map(|(&(name, pattern), reason)| Rule {
                name,
                reason,
                pattern: Regex::new(&format!("(?i){pattern}"))
                    .expect("built-in blocklist patterns are valid"),
            })
            .collect();

        Self { rules }
    }

    /// Returns true if the query passes validation.
    pub fn is_safe(&self, query: &str) -> bool {
        self.validate(query).is_admissible()
    }
}

impl QueryValidator for BlocklistValidator {
    fn validate(&self, query: &str) -> Verdict {
        let normalized = normalize_query(query);

        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(&normalized))
            .map(|rule| Verdict::Rejected {
                reason: rule.reason,
                rule: rule.name,
            })
            .unwrap_or(Verdict::Admissible)
    }
}

/// Lower-cases the query, replaces comments with whitespace and collapses
/// whitespace runs into single spaces.
///
/// Only used for matching; the unmodified query is what gets executed.
pub fn normalize_query(query: &str) -> String {
    strip_comments(query)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
