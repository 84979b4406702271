//! In-memory collaborator fakes (testing only)
//!
//! Scripted generator and checker plus recording installer, executor and
//! command handler. Pair with `staging::MemoryBackingStore` to run whole
//! cycles without touching disk or spawning processes.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::apply::{CommandHandler, PackageInstaller, StatementExecutor, StatementOutput};
use crate::cancel::CancelFlag;
use crate::checker::Checker;
use crate::domain::{CheckerError, CollaboratorError, CommandKind, Diagnostic, GenerationError};
use crate::generate::{fragments, ChatMessage, FragmentStream, Generator};

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

/// Replies with pre-recorded responses in order, then reports itself
/// unavailable.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: Mutex<Vec<Vec<String>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response delivered as one fragment.
    pub fn respond(self, text: impl Into<String>) -> Self {
        self.respond_in_fragments(vec![text.into()])
    }

    /// Queue a response delivered as the given fragments.
    pub fn respond_in_fragments(self, parts: Vec<String>) -> Self {
        self.responses.lock().unwrap().push(parts);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Conversations received, one per call.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<FragmentStream, GenerationError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(GenerationError::Unavailable("script exhausted".into()));
        }
        Ok(fragments(responses.remove(0)))
    }
}

// ---------------------------------------------------------------------------
// ScriptedChecker
// ---------------------------------------------------------------------------

/// Returns scripted diagnostics per call. The last round repeats once the
/// script runs out.
#[derive(Debug, Default)]
pub struct ScriptedChecker {
    rounds: Vec<Vec<Diagnostic>>,
    unavailable: bool,
    cancel_on: Option<(usize, CancelFlag)>,
    calls: Mutex<usize>,
}

impl ScriptedChecker {
    pub fn new(rounds: Vec<Vec<Diagnostic>>) -> Self {
        Self {
            rounds,
            ..Self::default()
        }
    }

    /// Always reports no problems.
    pub fn clean() -> Self {
        Self::new(Vec::new())
    }

    /// Always reports `diagnostics`.
    pub fn always(diagnostics: Vec<Diagnostic>) -> Self {
        Self::new(vec![diagnostics])
    }

    /// Always fails to run.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Trip `flag` during the zero-based `call`.
    pub fn cancelling_on_call(mut self, call: usize, flag: CancelFlag) -> Self {
        self.cancel_on = Some((call, flag));
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Checker for ScriptedChecker {
    async fn check(&self, _workspace: &Path) -> Result<Vec<Diagnostic>, CheckerError> {
        let mut calls = self.calls.lock().unwrap();
        let call = *calls;
        *calls += 1;
        if let Some((_, flag)) = self.cancel_on.as_ref().filter(|(at, _)| *at == call) {
            flag.cancel();
        }
        if self.unavailable {
            return Err(CheckerError::Unavailable("scripted".into()));
        }
        Ok(match self.rounds.len() {
            0 => Vec::new(),
            n => self.rounds[call.min(n - 1)].clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingInstaller {
    installs: Mutex<Vec<(Vec<String>, bool)>>,
    fail_with: Option<String>,
    cancel: Option<CancelFlag>,
}

impl RecordingInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every install fails with `message` (still recorded).
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    /// Every install succeeds and trips `flag`.
    pub fn cancelling(flag: CancelFlag) -> Self {
        Self {
            cancel: Some(flag),
            ..Self::default()
        }
    }

    pub fn installs(&self) -> Vec<(Vec<String>, bool)> {
        self.installs.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageInstaller for RecordingInstaller {
    async fn install(&self, packages: &[String], dev: bool) -> Result<(), CollaboratorError> {
        self.installs.lock().unwrap().push((packages.to_vec(), dev));
        if let Some(flag) = &self.cancel {
            flag.cancel();
        }
        match &self.fail_with {
            Some(message) => Err(CollaboratorError::new("installer", message.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<(String, Option<String>)>>,
    fail_on: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements containing `needle` fail.
    pub fn failing_on(needle: impl Into<String>) -> Self {
        Self {
            fail_on: Some(needle.into()),
            ..Self::default()
        }
    }

    pub fn statements(&self) -> Vec<(String, Option<String>)> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatementExecutor for RecordingExecutor {
    async fn execute(
        &self,
        statement: &str,
        target: Option<&str>,
    ) -> Result<StatementOutput, CollaboratorError> {
        self.statements
            .lock()
            .unwrap()
            .push((statement.to_string(), target.map(str::to_string)));
        match &self.fail_on {
            Some(needle) if statement.contains(needle.as_str()) => Err(CollaboratorError::new(
                "executor",
                format!("statement rejected: {needle}"),
            )),
            _ => Ok(StatementOutput { rows: Some(0) }),
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingCommandHandler {
    commands: Mutex<Vec<CommandKind>>,
}

impl RecordingCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<CommandKind> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandHandler for RecordingCommandHandler {
    async fn handle(&self, kind: CommandKind) -> Result<(), CollaboratorError> {
        self.commands.lock().unwrap().push(kind);
        Ok(())
    }
}
