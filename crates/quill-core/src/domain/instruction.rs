//! Typed instructions extracted from generated text.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::path::WorkspacePath;

/// Closed set of host commands a response may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Rebuild,
    Restart,
    Refresh,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rebuild => "rebuild",
            Self::Restart => "restart",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rebuild" => Ok(Self::Rebuild),
            "restart" => Ok(Self::Restart),
            "refresh" => Ok(Self::Refresh),
            other => Err(format!("unknown command type: {other}")),
        }
    }
}

/// One parsed mutation or side-effect request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Instruction {
    Write {
        path: WorkspacePath,
        content: String,
        description: Option<String>,
    },
    Delete {
        path: WorkspacePath,
    },
    Rename {
        from: WorkspacePath,
        to: WorkspacePath,
    },
    AddDependency {
        /// Ordered, duplicate-free package names.
        packages: Vec<String>,
        dev: bool,
    },
    ExecuteStatement {
        description: Option<String>,
        statement: String,
        target: Option<String>,
    },
    Command {
        kind: CommandKind,
    },
    SetSummary {
        text: String,
    },
}

/// Fixed application phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Dependencies,
    Deletes,
    Renames,
    Writes,
    /// Statements, then commands, then the summary label.
    Effects,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Dependencies,
        Phase::Deletes,
        Phase::Renames,
        Phase::Writes,
        Phase::Effects,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dependencies => "dependencies",
            Self::Deletes => "deletes",
            Self::Renames => "renames",
            Self::Writes => "writes",
            Self::Effects => "effects",
        }
    }
}

impl Instruction {
    /// Phase the instruction executes in.
    pub fn phase(&self) -> Phase {
        match self {
            Self::AddDependency { .. } => Phase::Dependencies,
            Self::Delete { .. } => Phase::Deletes,
            Self::Rename { .. } => Phase::Renames,
            Self::Write { .. } => Phase::Writes,
            Self::ExecuteStatement { .. } | Self::Command { .. } | Self::SetSummary { .. } => {
                Phase::Effects
            }
        }
    }

    /// Ordering key inside the effects phase.
    pub(crate) fn effect_rank(&self) -> u8 {
        match self {
            Self::ExecuteStatement { .. } => 0,
            Self::Command { .. } => 1,
            Self::SetSummary { .. } => 2,
            _ => 0,
        }
    }

    /// Short label, matching the tag name the instruction was parsed from.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Write { .. } => "write",
            Self::Delete { .. } => "delete",
            Self::Rename { .. } => "rename",
            Self::AddDependency { .. } => "add-dependency",
            Self::ExecuteStatement { .. } => "execute-statement",
            Self::Command { .. } => "command",
            Self::SetSummary { .. } => "chat-summary",
        }
    }

    /// Workspace paths this instruction touches.
    pub fn paths(&self) -> Vec<&WorkspacePath> {
        match self {
            Self::Write { path, .. } | Self::Delete { path } => vec![path],
            Self::Rename { from, to } => vec![from, to],
            _ => Vec::new(),
        }
    }
}
