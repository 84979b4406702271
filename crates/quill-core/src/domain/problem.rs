//! Checker diagnostics and the problem report handed back to the generator.

use serde::{Deserialize, Serialize};

/// A single problem reported by the external checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Source file path (relative to workspace root).
    pub file: String,

    /// Line number (1-indexed).
    pub line: u32,

    /// Column number (1-indexed).
    pub column: u32,

    /// Checker-specific code (e.g. "TS2304").
    pub code: String,

    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    pub fn new(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: 0,
            column: 0,
            code: String::new(),
            message: message.into(),
        }
    }

    /// Set line and column.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    /// Set diagnostic code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }
}

/// One entry of a [`ProblemReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub code: String,
    pub message: String,
}

impl From<Diagnostic> for Problem {
    fn from(d: Diagnostic) -> Self {
        Self {
            file: d.file,
            line: d.line,
            column: d.column,
            code: d.code,
            message: d.message,
        }
    }
}

/// Problems in checker order plus a one-line summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemReport {
    pub summary: String,
    pub problems: Vec<Problem>,
}

impl ProblemReport {
    /// Build a report, keeping checker order.
    pub fn from_diagnostics(diagnostics: impl IntoIterator<Item = Diagnostic>) -> Self {
        let problems: Vec<Problem> = diagnostics.into_iter().map(Problem::from).collect();
        let summary = match problems.len() {
            1 => "1 problem".to_string(),
            n => format!("{n} problems"),
        };
        Self { summary, problems }
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }
}
