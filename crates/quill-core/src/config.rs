//! Workspace configuration loaded from `quill.toml`.
//!
//! ```toml
//! tag_prefix = "quill-"
//! lock_policy = "reject"
//!
//! [checker]
//! command = ["npx", "tsc", "--noEmit"]
//! timeout_secs = 120
//!
//! [generator]
//! command = ["./generate.sh"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{QuillError, Result};
use crate::extract::DEFAULT_TAG_PREFIX;

pub const CONFIG_FILE: &str = "quill.toml";

/// What to do when a workspace already has a cycle in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockPolicy {
    /// Wait for the running cycle to finish.
    #[default]
    Queue,
    /// Fail immediately with `WorkspaceBusy`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    pub tag_prefix: String,
    pub lock_policy: LockPolicy,
    pub checker: CheckerConfig,
    pub generator: GeneratorConfig,
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
            lock_policy: LockPolicy::default(),
            checker: CheckerConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl QuillConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| QuillError::Config(e.to_string()))?;
        if config.tag_prefix.is_empty() {
            return Err(QuillError::Config("tag_prefix must not be empty".into()));
        }
        Ok(config)
    }

    /// Load `quill.toml` from `workspace`, or defaults when it is absent.
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = workspace.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text)
                .map_err(|e| QuillError::Config(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}
