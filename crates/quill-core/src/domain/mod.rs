//! Domain models for quill.
//!
//! - `Instruction`: one typed mutation or side-effect request
//! - `WorkspacePath`: normalized workspace-relative path
//! - `ProblemReport`: checker diagnostics in protocol form

pub mod error;
pub mod instruction;
pub mod path;
pub mod problem;

pub use error::{
    CheckerError, CollaboratorError, GenerationError, ProtocolError, QuillError, Result,
    StagingError,
};
pub use instruction::{CommandKind, Instruction, Phase};
pub use path::{PathError, WorkspacePath};
pub use problem::{Diagnostic, Problem, ProblemReport};
