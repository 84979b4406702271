//! Tag extraction: full response text → ordered instructions.
//!
//! Extraction is a pure function of the text. It is safe to run on partial
//! text while a response streams in; only the extraction over the final text
//! drives application. A trailing block whose closing marker has not arrived
//! is omitted; malformed, unknown or unclosed blocks earlier in the text are
//! skipped with a [`ParseWarning`].

pub mod markup;
pub mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::Instruction;

pub use registry::{TagBlock, TagParser, TagRegistry, TagSpec};

use markup::{next_block, parse_attributes, Scan};

/// Namespace prefix of every protocol tag unless configured otherwise.
pub const DEFAULT_TAG_PREFIX: &str = "quill-";

/// A skipped block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// Byte offset of the block's opening marker.
    pub offset: usize,
    /// Tag name without prefix.
    pub tag: String,
    pub reason: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> at byte {}: {}", self.tag, self.offset, self.reason)
    }
}

/// Result of one extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    /// Instructions in order of appearance.
    pub instructions: Vec<Instruction>,
    pub warnings: Vec<ParseWarning>,
    /// Offset of the first opener not followed by any complete block.
    pub unterminated: Option<usize>,
}

/// Configurable extractor.
#[derive(Debug, Clone)]
pub struct Extractor {
    prefix: String,
    registry: TagRegistry,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_PREFIX)
    }
}

impl Extractor {
    /// Extractor for the standard tag set under `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_registry(prefix, TagRegistry::standard())
    }

    pub fn with_registry(prefix: impl Into<String>, registry: TagRegistry) -> Self {
        Self {
            prefix: prefix.into(),
            registry,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    /// Extract every complete block from `text`.
    ///
    /// An opener with no closing marker is treated as still arriving only
    /// when no complete block follows it; otherwise it is skipped with an
    /// "unclosed block" warning.
    pub fn extract(&self, text: &str) -> Extraction {
        let mut out = Extraction::default();
        let mut unclosed: Vec<ParseWarning> = Vec::new();
        let mut cursor = 0;

        loop {
            let block = match next_block(text, &self.prefix, cursor) {
                Scan::Block(block) => block,
                Scan::Unclosed {
                    start,
                    name,
                    resume,
                } => {
                    unclosed.push(ParseWarning {
                        offset: start,
                        tag: name.to_string(),
                        reason: "unclosed block".to_string(),
                    });
                    cursor = resume;
                    continue;
                }
                Scan::Unterminated(offset) => {
                    out.unterminated = Some(unclosed.first().map_or(offset, |w| w.offset));
                    break;
                }
                Scan::Done => {
                    out.unterminated = unclosed.first().map(|w| w.offset);
                    break;
                }
            };
            out.warnings.append(&mut unclosed);

            let warn = |reason: String| ParseWarning {
                offset: block.start,
                tag: block.name.to_string(),
                reason,
            };

            let Some(spec) = self.registry.get(block.name) else {
                out.warnings.push(warn("unknown tag".to_string()));
                cursor = block.end;
                continue;
            };

            // A rejected opener may have borrowed a later block's closer.
            cursor = block.open_end;

            let attrs = match parse_attributes(block.attrs) {
                Ok(attrs) => attrs,
                Err(reason) => {
                    out.warnings.push(warn(reason));
                    continue;
                }
            };
            if let Some((key, _)) = attrs
                .iter()
                .find(|(key, _)| !spec.attributes.contains(&key.as_str()))
            {
                out.warnings.push(warn(format!("unrecognized attribute {key}")));
                continue;
            }

            let tag_block = TagBlock {
                attrs,
                body: block.body,
            };
            match (spec.parse)(&tag_block) {
                Ok(instruction) => {
                    out.instructions.push(instruction);
                    cursor = block.end;
                }
                Err(reason) => out.warnings.push(warn(reason)),
            }
        }

        out
    }
}

/// Extract with the default prefix and the standard tag set.
pub fn extract(text: &str) -> Extraction {
    Extractor::default().extract(text)
}
