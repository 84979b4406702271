//! Tag name → parser registry.
//!
//! Each registered tag declares the attributes it accepts and a parser that
//! turns one delimited block into an [`Instruction`]. Adding an instruction
//! kind means adding one [`TagSpec`] here.

use std::collections::BTreeMap;

use crate::domain::{CommandKind, Instruction, WorkspacePath};

use super::markup::strip_code_fence;

/// Parsed attributes and body of one block, handed to a [`TagParser`].
#[derive(Debug, Clone)]
pub struct TagBlock<'t> {
    pub attrs: Vec<(String, String)>,
    pub body: Option<&'t str>,
}

impl TagBlock<'_> {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str, String> {
        self.get(key)
            .ok_or_else(|| format!("missing required attribute {key}"))
    }

    fn path(&self, key: &str) -> Result<WorkspacePath, String> {
        WorkspacePath::parse(self.require(key)?).map_err(|e| format!("{key}: {e}"))
    }

    fn body(&self) -> &str {
        self.body.unwrap_or("")
    }
}

/// Parser for one tag kind. Errors become parse warnings.
pub type TagParser = fn(&TagBlock<'_>) -> Result<Instruction, String>;

/// Registry entry.
#[derive(Clone, Copy)]
pub struct TagSpec {
    pub name: &'static str,
    pub attributes: &'static [&'static str],
    pub parse: TagParser,
}

impl std::fmt::Debug for TagSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagSpec")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

/// Mapping from tag name to its spec.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    tags: BTreeMap<&'static str, TagSpec>,
}

impl TagRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the seven protocol tags.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for spec in [
            TagSpec {
                name: "write",
                attributes: &["path", "description"],
                parse: parse_write,
            },
            TagSpec {
                name: "delete",
                attributes: &["path"],
                parse: parse_delete,
            },
            TagSpec {
                name: "rename",
                attributes: &["from", "to"],
                parse: parse_rename,
            },
            TagSpec {
                name: "add-dependency",
                attributes: &["packages", "dev"],
                parse: parse_add_dependency,
            },
            TagSpec {
                name: "execute-statement",
                attributes: &["description", "target"],
                parse: parse_execute_statement,
            },
            TagSpec {
                name: "command",
                attributes: &["type"],
                parse: parse_command,
            },
            TagSpec {
                name: "chat-summary",
                attributes: &[],
                parse: parse_chat_summary,
            },
        ] {
            registry.register(spec);
        }
        registry
    }

    /// Register or replace a tag.
    pub fn register(&mut self, spec: TagSpec) {
        self.tags.insert(spec.name, spec);
    }

    pub fn get(&self, name: &str) -> Option<&TagSpec> {
        self.tags.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tags.keys().copied()
    }
}

fn parse_write(block: &TagBlock<'_>) -> Result<Instruction, String> {
    Ok(Instruction::Write {
        path: block.path("path")?,
        content: strip_code_fence(block.body()).to_string(),
        description: block.get("description").map(str::to_string),
    })
}

fn parse_delete(block: &TagBlock<'_>) -> Result<Instruction, String> {
    Ok(Instruction::Delete {
        path: block.path("path")?,
    })
}

fn parse_rename(block: &TagBlock<'_>) -> Result<Instruction, String> {
    let from = block.path("from")?;
    let to = block.path("to")?;
    if from == to {
        return Err(format!("rename source and destination are both {from}"));
    }
    Ok(Instruction::Rename { from, to })
}

fn parse_add_dependency(block: &TagBlock<'_>) -> Result<Instruction, String> {
    let mut packages: Vec<String> = Vec::new();
    for name in block.require("packages")?.split_whitespace() {
        if !packages.iter().any(|p| p == name) {
            packages.push(name.to_string());
        }
    }
    if packages.is_empty() {
        return Err("packages is empty".to_string());
    }
    let dev = match block.get("dev") {
        None | Some("false") => false,
        Some("true") => true,
        Some(other) => return Err(format!("dev must be true or false, got {other:?}")),
    };
    Ok(Instruction::AddDependency { packages, dev })
}

fn parse_execute_statement(block: &TagBlock<'_>) -> Result<Instruction, String> {
    let statement = strip_code_fence(block.body()).trim();
    if statement.is_empty() {
        return Err("statement is empty".to_string());
    }
    Ok(Instruction::ExecuteStatement {
        description: block.get("description").map(str::to_string),
        statement: statement.to_string(),
        target: block.get("target").map(str::to_string),
    })
}

fn parse_command(block: &TagBlock<'_>) -> Result<Instruction, String> {
    let kind: CommandKind = block.require("type")?.parse()?;
    Ok(Instruction::Command { kind })
}

fn parse_chat_summary(block: &TagBlock<'_>) -> Result<Instruction, String> {
    let text = block.body().trim();
    if text.is_empty() {
        return Err("summary is empty".to_string());
    }
    Ok(Instruction::SetSummary {
        text: text.to_string(),
    })
}
