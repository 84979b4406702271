//! One response-processing cycle: ingest, extract, apply, check and, when
//! problems remain, the auto-fix loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::{error, warn, Instrument};
use uuid::Uuid;

use crate::apply::{ApplyResult, ChangeApplier};
use crate::autofix::{check_workspace, AutoFixSession, AutoFixer, FixStatus};
use crate::cancel::CancelFlag;
use crate::checker::Checker;
use crate::domain::{GenerationError, ProblemReport};
use crate::extract::{Extractor, ParseWarning};
use crate::generate::{ChatMessage, Generator};
use crate::ingest::ingest_stream;
use crate::lock::WorkspaceLease;
use crate::metrics::METRICS;
use crate::obs;
use crate::report::ProblemReporter;

/// Aggregate outcome of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleStatus {
    Applied,
    AppliedWithErrors,
    ResolvedAfterFix,
    Exhausted,
    Aborted,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::AppliedWithErrors => "applied-with-errors",
            Self::ResolvedAfterFix => "resolved-after-fix",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything surfaced to the caller once a cycle terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub status: CycleStatus,
    /// Initial batch first, then one entry per applied fix attempt.
    pub apply_results: Vec<ApplyResult>,
    pub warnings: Vec<ParseWarning>,
    /// Problems left after the last check (empty when clean).
    pub final_report: ProblemReport,
    pub fix_session: Option<AutoFixSession>,
    /// Set when the initial stream broke before completing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleReport {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Runs cycles against one workspace's collaborators.
#[derive(Clone)]
pub struct CycleRunner {
    extractor: Extractor,
    reporter: ProblemReporter,
    applier: ChangeApplier,
    checker: Arc<dyn Checker>,
    generator: Arc<dyn Generator>,
}

impl CycleRunner {
    pub fn new(
        extractor: Extractor,
        applier: ChangeApplier,
        checker: Arc<dyn Checker>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let reporter = ProblemReporter::new(extractor.prefix());
        Self {
            extractor,
            reporter,
            applier,
            checker,
            generator,
        }
    }

    pub fn extractor(&self) -> &Extractor {
        &self.extractor
    }

    /// Process an already-open response stream.
    pub async fn run<S>(&self, lease: &WorkspaceLease, stream: S, cancel: &CancelFlag) -> CycleReport
    where
        S: Stream<Item = Result<String, GenerationError>> + Send,
    {
        self.run_with_history(lease, Vec::new(), stream, cancel).await
    }

    /// Ask the generator for a response to `messages`, then process it.
    ///
    /// The conversation is carried into fix requests.
    pub async fn run_conversation(
        &self,
        lease: &WorkspaceLease,
        messages: Vec<ChatMessage>,
        cancel: &CancelFlag,
    ) -> Result<CycleReport, GenerationError> {
        let stream = self.generator.generate(&messages).await?;
        Ok(self.run_with_history(lease, messages, stream, cancel).await)
    }

    async fn run_with_history<S>(
        &self,
        lease: &WorkspaceLease,
        history: Vec<ChatMessage>,
        stream: S,
        cancel: &CancelFlag,
    ) -> CycleReport
    where
        S: Stream<Item = Result<String, GenerationError>> + Send,
    {
        let cycle_id = Uuid::new_v4();
        let span = obs::cycle_span(&cycle_id.to_string());
        let report = self
            .drive(cycle_id, lease, history, stream, cancel)
            .instrument(span.clone())
            .await;

        let _entered = span.entered();
        METRICS.inc_cycles();
        obs::emit_cycle_finished(
            &cycle_id.to_string(),
            report.status.as_str(),
            report.duration_ms(),
        );
        METRICS.flush();
        report
    }

    async fn drive<S>(
        &self,
        cycle_id: Uuid,
        lease: &WorkspaceLease,
        mut history: Vec<ChatMessage>,
        stream: S,
        cancel: &CancelFlag,
    ) -> CycleReport
    where
        S: Stream<Item = Result<String, GenerationError>> + Send,
    {
        let workspace = lease.root();
        let mut report = CycleReport {
            cycle_id,
            status: CycleStatus::Applied,
            apply_results: Vec::new(),
            warnings: Vec::new(),
            final_report: ProblemReport::default(),
            fix_session: None,
            interrupted: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        obs::emit_cycle_started(&cycle_id.to_string(), &workspace.display().to_string());

        if let Some(store_root) = self.applier.backing().workspace_root() {
            let store_root =
                std::fs::canonicalize(store_root).unwrap_or_else(|_| store_root.to_path_buf());
            if store_root != workspace {
                error!(
                    event = "cycle.lease_mismatch",
                    lease = %workspace.display(),
                    store = %store_root.display()
                );
                return finish(report, CycleStatus::Aborted);
            }
        }

        let ingested = ingest_stream(stream, cancel).await;
        if ingested.final_text.aborted {
            return finish(report, CycleStatus::Aborted);
        }
        if let Some(err) = &ingested.interrupted {
            warn!(event = "cycle.partial_response", error = %err);
            report.interrupted = Some(err.to_string());
        }
        let text = ingested.final_text.text;

        let extraction = self.extractor.extract(&text);
        obs::emit_extracted(
            extraction.instructions.len(),
            extraction.warnings.len(),
            extraction.unterminated.is_some(),
        );
        for warning in &extraction.warnings {
            obs::emit_parse_warning(warning);
        }
        METRICS.add_parse_warnings(extraction.warnings.len() as u64);
        report.warnings = extraction.warnings;
        history.push(ChatMessage::assistant(text));

        let applied = self.applier.apply(&extraction.instructions, cancel).await;
        let cancelled = applied.cancelled;
        let had_failures = applied.has_failures();
        report.apply_results.push(applied);
        if cancelled {
            return finish(report, CycleStatus::Aborted);
        }

        let problems = check_workspace(self.checker.as_ref(), workspace).await;
        if problems.is_empty() {
            let status = if had_failures {
                CycleStatus::AppliedWithErrors
            } else {
                CycleStatus::Applied
            };
            return finish(report, status);
        }

        let fixer = AutoFixer {
            extractor: &self.extractor,
            applier: &self.applier,
            checker: self.checker.as_ref(),
            generator: self.generator.as_ref(),
            reporter: &self.reporter,
            workspace,
        };
        let outcome = fixer.run(problems, history, cancel).await;
        report.apply_results.extend(outcome.apply_results);
        report.warnings.extend(outcome.warnings);
        report.final_report = outcome.report;
        let status = match outcome.session.status {
            FixStatus::Resolved => CycleStatus::ResolvedAfterFix,
            FixStatus::Exhausted => CycleStatus::Exhausted,
            FixStatus::Aborted => CycleStatus::Aborted,
            FixStatus::Idle | FixStatus::Fixing if had_failures => CycleStatus::AppliedWithErrors,
            FixStatus::Idle | FixStatus::Fixing => CycleStatus::Applied,
        };
        report.fix_session = Some(outcome.session);
        finish(report, status)
    }
}

fn finish(mut report: CycleReport, status: CycleStatus) -> CycleReport {
    report.status = status;
    report.finished_at = Utc::now();
    report
}
