//! Error taxonomy for quill.

use crate::domain::path::PathError;

/// Errors raised by the staging overlay and backing stores.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("backing store error: {0}")]
    Backend(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while decoding protocol text that must be well formed
/// (problem reports). Instruction extraction never errors; it warns.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("missing {0} marker")]
    MissingMarker(String),

    #[error("malformed attributes in <{tag}>: {reason}")]
    MalformedAttributes { tag: String, reason: String },

    #[error("missing attribute {attribute} on <{tag}>")]
    MissingAttribute { tag: String, attribute: String },

    #[error("invalid number in {attribute}: {value}")]
    InvalidNumber { attribute: String, value: String },
}

/// A collaborator (installer, statement executor, command handler) failed.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{collaborator} failed: {message}")]
pub struct CollaboratorError {
    pub collaborator: String,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}

/// The checker could not produce a verdict.
#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    #[error("checker unavailable: {0}")]
    Unavailable(String),

    #[error("checker timed out after {0} seconds")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The generation collaborator failed to start or broke mid-stream.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),

    #[error("stream interrupted: {0}")]
    Interrupted(String),
}

/// Crate-wide errors.
#[derive(Debug, thiserror::Error)]
pub enum QuillError {
    #[error("workspace busy: a cycle is already running for {0}")]
    WorkspaceBusy(String),

    #[error("staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for quill operations.
pub type Result<T> = std::result::Result<T, QuillError>;
