//! quill core library
//!
//! Turns streamed generator output written in the quill tag protocol into
//! committed workspace changes, then checks the workspace and runs a bounded
//! auto-fix loop on the reported problems.

pub mod apply;
pub mod autofix;
pub mod cancel;
pub mod checker;
pub mod config;
pub mod cycle;
pub mod domain;
pub mod extract;
pub mod fakes;
pub mod generate;
pub mod ingest;
pub mod lock;
pub mod metrics;
pub mod obs;
pub mod report;
pub mod staging;
pub mod telemetry;

pub use apply::{
    phase_plan, ApplyResult, ChangeApplier, Collaborators, CommandHandler, InstructionOutcome,
    OutcomeStatus, PackageInstaller, StatementExecutor, StatementOutput,
};
pub use autofix::{AutoFixSession, FixStatus, MAX_FIX_ATTEMPTS};
pub use cancel::CancelFlag;
pub use checker::{parse_diagnostics, Checker, ProcessChecker};
pub use config::{LockPolicy, QuillConfig};
pub use cycle::{CycleReport, CycleRunner, CycleStatus};
pub use domain::{
    CheckerError, CollaboratorError, CommandKind, Diagnostic, GenerationError, Instruction,
    Phase, Problem, ProblemReport, ProtocolError, QuillError, Result, StagingError,
    WorkspacePath,
};
pub use extract::{extract, Extraction, Extractor, ParseWarning, DEFAULT_TAG_PREFIX};
pub use generate::{ChatMessage, FragmentStream, Generator, Role};
pub use ingest::{ingest_stream, FinalText, Ingested, StreamIngester};
pub use lock::{WorkspaceLease, WorkspaceLocks, LOCK_FILE};
pub use report::{build_fix_prompt, format_problem_report, parse_problem_report, ProblemReporter};
pub use staging::{BackingStore, FlushReport, FsBackingStore, MemoryBackingStore, StagingFs};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
