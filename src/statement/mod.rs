//! Script Statements
//!
//! A script is a sequence of statements separated by `;` at end of line.
//! Each statement is classified before anything executes:
//!
//! | Kind | Matches (case-insensitive) |
//! |------|----------------------------|
//! | `Schema` | `create`/`drop` followed by `index`/`constraint` |
//! | `Periodic` | `using periodic` |
//! | `Data` | anything else |
//!
//! Schema wins when a statement matches both patterns.

mod splitter;

pub use splitter::{split_script, Statements};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static SCHEMA_OPERATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(create|drop)\s+(index|constraint)").expect("schema pattern is valid")
});

static PERIODIC_OPERATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)using\s+periodic").expect("periodic pattern is valid"));

/// Kind of a script statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    /// Index or constraint change
    Schema,
    /// Batch-hinted statement run in its own background transaction
    Periodic,
    /// Plain statement run in the ambient transaction
    Data,
}

impl StatementKind {
    pub fn classify(statement: &str) -> Self {
        if SCHEMA_OPERATION.is_match(statement) {
            StatementKind::Schema
        } else if PERIODIC_OPERATION.is_match(statement) {
            StatementKind::Periodic
        } else {
            StatementKind::Data
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::Schema => "schema",
            StatementKind::Periodic => "periodic",
            StatementKind::Data => "data",
        };
        f.write_str(name)
    }
}

/// Which statement kinds a batch accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    /// Only schema statements
    Schema,
    /// Data and periodic statements
    Data,
}

impl BatchMode {
    pub fn admits(self, kind: StatementKind) -> bool {
        match self {
            BatchMode::Schema => kind == StatementKind::Schema,
            BatchMode::Data => kind != StatementKind::Schema,
        }
    }

    /// Kind reported when a statement is rejected
    pub fn expected(self) -> StatementKind {
        match self {
            BatchMode::Schema => StatementKind::Schema,
            BatchMode::Data => StatementKind::Data,
        }
    }
}

/// A classified statement ready to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub text: String,
    pub kind: StatementKind,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let kind = StatementKind::classify(&text);
        Statement { text, kind }
    }
}
