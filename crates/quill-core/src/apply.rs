//! Change application.
//!
//! Instructions run in five fixed phases regardless of where they appear in
//! the response:
//!
//! 1. dependency declarations
//! 2. deletes
//! 3. renames
//! 4. writes
//! 5. statements, then commands, then the summary label
//!
//! Relative order is preserved inside a phase. Phases 2-4 are staged and
//! flushed to the backing store before phase 5 runs. One instruction failing
//! never stops its siblings or later phases.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelFlag;
use crate::domain::{CollaboratorError, CommandKind, Instruction, Phase, WorkspacePath};
use crate::metrics::METRICS;
use crate::obs;
use crate::staging::{BackingStore, FlushOp, FlushReport, StagingFs};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Package-manager collaborator.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, packages: &[String], dev: bool) -> Result<(), CollaboratorError>;
}

/// Rows returned or affected by a statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementOutput {
    pub rows: Option<u64>,
}

/// Statement-execution collaborator for an external data store.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(
        &self,
        statement: &str,
        target: Option<&str>,
    ) -> Result<StatementOutput, CollaboratorError>;
}

/// Host that acts on rebuild/restart/refresh requests.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, kind: CommandKind) -> Result<(), CollaboratorError>;
}

/// Optional side-effect collaborators.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub installer: Option<Arc<dyn PackageInstaller>>,
    pub executor: Option<Arc<dyn StatementExecutor>>,
    pub commands: Option<Arc<dyn CommandHandler>>,
}

impl Collaborators {
    pub fn with_installer(mut self, installer: Arc<dyn PackageInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn StatementExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_command_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.commands = Some(handler);
        self
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// What happened to one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Applied,
    Failed { reason: String },
    Skipped { reason: String },
}

/// Outcome for the instruction at `index` in the extracted list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionOutcome {
    pub index: usize,
    pub kind: String,
    pub phase: Phase,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    /// Extra context, e.g. `"already absent"` or affected row counts.
    pub detail: Option<String>,
}

impl InstructionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed { .. })
    }
}

/// Aggregate result of one [`ChangeApplier::apply`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    /// One outcome per instruction, in original order.
    pub outcomes: Vec<InstructionOutcome>,
    /// Last summary label set by the batch.
    pub summary: Option<String>,
    /// Commands requested by the batch, in execution order.
    pub commands: Vec<CommandKind>,
    pub flush: FlushReport,
    pub cancelled: bool,
}

impl ApplyResult {
    pub fn failures(&self) -> impl Iterator<Item = &InstructionOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Applied)
            .count()
    }

    /// Paths successfully committed to the backing store.
    pub fn changed_paths(&self) -> Vec<&WorkspacePath> {
        self.flush
            .outcomes
            .iter()
            .filter(|o| o.is_success())
            .map(|o| &o.path)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Applier
// ---------------------------------------------------------------------------

/// Applies instruction batches to a workspace through a fresh staging overlay.
#[derive(Clone)]
pub struct ChangeApplier {
    backing: Arc<dyn BackingStore>,
    collaborators: Collaborators,
}

/// Instruction indices grouped by phase, in execution order.
pub fn phase_plan(instructions: &[Instruction]) -> Vec<(Phase, Vec<usize>)> {
    Phase::ALL
        .iter()
        .map(|phase| {
            let mut indices: Vec<usize> = instructions
                .iter()
                .enumerate()
                .filter(|(_, i)| i.phase() == *phase)
                .map(|(idx, _)| idx)
                .collect();
            // Stable: keeps appearance order among equal ranks.
            indices.sort_by_key(|idx| instructions[*idx].effect_rank());
            (*phase, indices)
        })
        .collect()
}

impl ChangeApplier {
    pub fn new(backing: Arc<dyn BackingStore>, collaborators: Collaborators) -> Self {
        Self {
            backing,
            collaborators,
        }
    }

    pub fn backing(&self) -> &Arc<dyn BackingStore> {
        &self.backing
    }

    /// Apply `instructions`, checking `cancel` between phases.
    pub async fn apply(&self, instructions: &[Instruction], cancel: &CancelFlag) -> ApplyResult {
        let mut result = ApplyResult::default();
        let mut outcomes: Vec<Option<InstructionOutcome>> = vec![None; instructions.len()];
        let mut touched: BTreeMap<WorkspacePath, Vec<usize>> = BTreeMap::new();
        let mut staging = Some(StagingFs::new(self.backing.as_ref()));

        for (phase, indices) in phase_plan(instructions) {
            if cancel.is_cancelled() {
                obs::emit_apply_cancelled(phase.as_str());
                result.cancelled = true;
                break;
            }

            if phase == Phase::Effects {
                if let Some(staged) = staging.take() {
                    result.flush = staged.flush().await;
                    attribute_flush_failures(&result.flush, &touched, &mut outcomes);
                }
            }

            let mut failed = 0;
            for idx in &indices {
                let instruction = &instructions[*idx];
                for path in instruction.paths() {
                    touched.entry(path.clone()).or_default().push(*idx);
                }
                let (status, detail) = match staging.as_mut() {
                    Some(staged) if phase != Phase::Effects => {
                        self.stage_one(staged, instruction).await
                    }
                    _ => self.run_effect(instruction, &mut result).await,
                };
                if let OutcomeStatus::Failed { reason } = &status {
                    failed += 1;
                    obs::emit_instruction_failed(*idx, instruction.kind(), reason);
                }
                outcomes[*idx] = Some(InstructionOutcome {
                    index: *idx,
                    kind: instruction.kind().to_string(),
                    phase,
                    status,
                    detail,
                });
            }
            obs::emit_phase_finished(phase.as_str(), indices.len() - failed, failed);
        }

        if let Some(staged) = staging.take() {
            result.flush = staged.flush().await;
            attribute_flush_failures(&result.flush, &touched, &mut outcomes);
        }

        result.outcomes = outcomes
            .into_iter()
            .enumerate()
            .map(|(idx, outcome)| {
                outcome.unwrap_or_else(|| InstructionOutcome {
                    index: idx,
                    kind: instructions[idx].kind().to_string(),
                    phase: instructions[idx].phase(),
                    status: OutcomeStatus::Skipped {
                        reason: "cancelled".to_string(),
                    },
                    detail: None,
                })
            })
            .collect();

        METRICS.add_applied(result.applied_count() as u64);
        METRICS.add_failed(result.failures().count() as u64);
        result
    }

    async fn stage_one(
        &self,
        staging: &mut StagingFs<'_>,
        instruction: &Instruction,
    ) -> (OutcomeStatus, Option<String>) {
        match instruction {
            Instruction::AddDependency { packages, dev } => match &self.collaborators.installer {
                Some(installer) => match installer.install(packages, *dev).await {
                    Ok(()) => (OutcomeStatus::Applied, Some(packages.join(" "))),
                    Err(err) => failed(err.to_string()),
                },
                None => failed("no package installer configured"),
            },
            Instruction::Delete { path } => match staging.delete(path.clone()).await {
                Ok(true) => (OutcomeStatus::Applied, None),
                Ok(false) => (OutcomeStatus::Applied, Some("already absent".to_string())),
                Err(err) => failed(err.to_string()),
            },
            Instruction::Rename { from, to } => {
                match staging.rename(from.clone(), to.clone()).await {
                    Ok(()) => (OutcomeStatus::Applied, None),
                    Err(err) => failed(format!("rename {from} -> {to}: {err}")),
                }
            }
            Instruction::Write { path, content, .. } => {
                staging.write(path.clone(), content.as_bytes());
                (OutcomeStatus::Applied, None)
            }
            _ => failed(format!("{} is not a staged instruction", instruction.kind())),
        }
    }

    async fn run_effect(
        &self,
        instruction: &Instruction,
        result: &mut ApplyResult,
    ) -> (OutcomeStatus, Option<String>) {
        match instruction {
            Instruction::ExecuteStatement {
                statement, target, ..
            } => match &self.collaborators.executor {
                Some(executor) => match executor.execute(statement, target.as_deref()).await {
                    Ok(output) => (
                        OutcomeStatus::Applied,
                        output.rows.map(|rows| format!("{rows} rows")),
                    ),
                    Err(err) => failed(err.to_string()),
                },
                None => failed("no statement executor configured"),
            },
            Instruction::Command { kind } => {
                result.commands.push(*kind);
                match &self.collaborators.commands {
                    Some(handler) => match handler.handle(*kind).await {
                        Ok(()) => (OutcomeStatus::Applied, None),
                        Err(err) => failed(err.to_string()),
                    },
                    None => (
                        OutcomeStatus::Applied,
                        Some("recorded for the caller".to_string()),
                    ),
                }
            }
            Instruction::SetSummary { text } => {
                result.summary = Some(text.clone());
                (OutcomeStatus::Applied, None)
            }
            _ => failed(format!("{} cannot run after flush", instruction.kind())),
        }
    }
}

fn failed(reason: impl Into<String>) -> (OutcomeStatus, Option<String>) {
    (
        OutcomeStatus::Failed {
            reason: reason.into(),
        },
        None,
    )
}

/// Mark every instruction that touched a path whose flush failed.
fn attribute_flush_failures(
    report: &FlushReport,
    touched: &BTreeMap<WorkspacePath, Vec<usize>>,
    outcomes: &mut [Option<InstructionOutcome>],
) {
    for failure in report.failures() {
        let reason = failure.error.clone().unwrap_or_default();
        let mut paths = vec![&failure.path];
        if let FlushOp::Rename { from } = &failure.op {
            paths.push(from);
        }
        for path in paths {
            for idx in touched.get(path).into_iter().flatten() {
                if let Some(outcome) = outcomes[*idx].as_mut() {
                    if outcome.status == OutcomeStatus::Applied {
                        outcome.status = OutcomeStatus::Failed {
                            reason: format!("flush {path}: {reason}"),
                        };
                        obs::emit_instruction_failed(*idx, &outcome.kind, &reason);
                    }
                }
            }
        }
    }
}
