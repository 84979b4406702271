//! Bounded auto-fix loop.
//!
//! After a cycle's changes are committed the checker runs. While it reports
//! problems, the loop asks the generator for a fix, applies the answer and
//! checks again, at most [`MAX_FIX_ATTEMPTS`] times.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::apply::{ApplyResult, ChangeApplier};
use crate::cancel::CancelFlag;
use crate::checker::Checker;
use crate::domain::ProblemReport;
use crate::extract::{Extractor, ParseWarning};
use crate::generate::{ChatMessage, Generator};
use crate::ingest::ingest_stream;
use crate::metrics::METRICS;
use crate::obs;
use crate::report::ProblemReporter;

/// Hard ceiling on generator invocations per session.
pub const MAX_FIX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Idle,
    Fixing,
    Resolved,
    Exhausted,
    Aborted,
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fixing => "fixing",
            Self::Resolved => "resolved",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Exhausted | Self::Aborted)
    }
}

/// State of one auto-fix session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoFixSession {
    pub attempts: u32,
    pub status: FixStatus,
}

impl Default for AutoFixSession {
    fn default() -> Self {
        Self {
            attempts: 0,
            status: FixStatus::Idle,
        }
    }
}

/// Everything a finished session produced.
#[derive(Debug, Clone)]
pub struct AutoFixOutcome {
    pub session: AutoFixSession,
    /// Problems left after the last check. Empty when resolved.
    pub report: ProblemReport,
    /// One entry per attempt whose response was applied.
    pub apply_results: Vec<ApplyResult>,
    pub warnings: Vec<ParseWarning>,
}

/// Run the checker, treating an unavailable checker as a clean result.
pub async fn check_workspace(checker: &dyn Checker, workspace: &Path) -> ProblemReport {
    match checker.check(workspace).await {
        Ok(diagnostics) => ProblemReport::from_diagnostics(diagnostics),
        Err(err) => {
            obs::emit_checker_unavailable(&err);
            ProblemReport::default()
        }
    }
}

/// Collaborators borrowed for the duration of one session.
pub struct AutoFixer<'a> {
    pub extractor: &'a Extractor,
    pub applier: &'a ChangeApplier,
    pub checker: &'a dyn Checker,
    pub generator: &'a dyn Generator,
    pub reporter: &'a ProblemReporter,
    pub workspace: &'a Path,
}

impl AutoFixer<'_> {
    /// Drive a session starting from `report`.
    ///
    /// `history` is the conversation so far; fix requests and responses are
    /// appended to it.
    pub async fn run(
        &self,
        report: ProblemReport,
        mut history: Vec<ChatMessage>,
        cancel: &CancelFlag,
    ) -> AutoFixOutcome {
        let mut session = AutoFixSession::default();
        let mut report = report;
        let mut apply_results = Vec::new();
        let mut warnings = Vec::new();

        if report.is_empty() {
            return AutoFixOutcome {
                session,
                report,
                apply_results,
                warnings,
            };
        }
        session.status = FixStatus::Fixing;

        while !session.status.is_terminal() {
            session.status = if report.is_empty() {
                FixStatus::Resolved
            } else if cancel.is_cancelled() {
                FixStatus::Aborted
            } else if session.attempts >= MAX_FIX_ATTEMPTS {
                FixStatus::Exhausted
            } else {
                FixStatus::Fixing
            };
            if session.status.is_terminal() {
                break;
            }

            session.attempts += 1;
            METRICS.inc_fix_attempts();
            obs::emit_fix_attempt(session.attempts, report.len());

            history.push(ChatMessage::user(self.reporter.fix_prompt(&report)));
            let stream = match self.generator.generate(&history).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(event = "autofix.generation_failed", error = %err);
                    continue;
                }
            };

            let ingested = ingest_stream(stream, cancel).await;
            if ingested.final_text.aborted {
                session.status = FixStatus::Aborted;
                break;
            }
            let text = ingested.final_text.text;

            let extraction = self.extractor.extract(&text);
            for warning in &extraction.warnings {
                obs::emit_parse_warning(warning);
            }
            METRICS.add_parse_warnings(extraction.warnings.len() as u64);
            warnings.extend(extraction.warnings);
            history.push(ChatMessage::assistant(text));

            let applied = self.applier.apply(&extraction.instructions, cancel).await;
            apply_results.push(applied);

            report = check_workspace(self.checker, self.workspace).await;
        }

        obs::emit_fix_finished(session.status.as_str(), session.attempts, report.len());
        AutoFixOutcome {
            session,
            report,
            apply_results,
            warnings,
        }
    }
}
