//! Checker collaborator: produces diagnostics for a workspace.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{CheckerError, Diagnostic};

/// Type checker or linter run after changes are applied.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, workspace: &Path) -> Result<Vec<Diagnostic>, CheckerError>;
}

/// Runs an external command in the workspace and parses its output.
#[derive(Debug, Clone)]
pub struct ProcessChecker {
    command: Vec<String>,
    timeout_secs: u64,
}

impl ProcessChecker {
    /// `command[0]` is the executable. A zero timeout waits forever.
    pub fn new(command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command,
            timeout_secs,
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

#[async_trait]
impl Checker for ProcessChecker {
    async fn check(&self, workspace: &Path) -> Result<Vec<Diagnostic>, CheckerError> {
        let Some((exe, args)) = self.command.split_first() else {
            return Err(CheckerError::Unavailable("no checker command configured".into()));
        };

        let child = Command::new(exe)
            .args(args)
            .current_dir(workspace)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CheckerError::Unavailable(format!("{exe}: {e}")))?;

        let output = if self.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| CheckerError::Timeout(self.timeout_secs))??
        } else {
            child.wait_with_output().await?
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics = parse_diagnostics(&stdout);
        diagnostics.extend(parse_diagnostics(&stderr));
        debug!(
            event = "check.finished",
            exit_code = output.status.code().unwrap_or(-1),
            diagnostics = diagnostics.len(),
        );
        Ok(diagnostics)
    }
}

fn tsc_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<file>[^\s(][^(]*)\((?P<line>\d+),(?P<col>\d+)\):\s*error\s+(?P<code>[A-Za-z]+\d+):\s*(?P<msg>.*)$")
            .expect("tsc diagnostic pattern is valid")
    })
}

fn gnu_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<file>[^\s:][^:]*):(?P<line>\d+):(?P<col>\d+):\s*error(?:\[(?P<code>[^\]]+)\])?:\s*(?P<msg>.*)$")
            .expect("diagnostic pattern is valid")
    })
}

/// Parse `file(line,col): error CODE: message` and
/// `file:line:col: error[CODE]: message` lines. Other lines are ignored.
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_end();
            let caps = tsc_line()
                .captures(line)
                .or_else(|| gnu_line().captures(line))?;
            let number = |name: &str| {
                caps.name(name)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0)
            };
            let mut diagnostic = Diagnostic::new(caps["file"].trim(), caps["msg"].trim())
                .at(number("line"), number("col"));
            if let Some(code) = caps.name("code") {
                diagnostic = diagnostic.with_code(code.as_str());
            }
            Some(diagnostic)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tsc_output() {
        let out = "src/App.tsx(12,5): error TS2304: Cannot find name 'foo'.\n\
                   Found 1 error.\n";
        let diags = parse_diagnostics(out);
        assert_eq!(
            diags,
            vec![Diagnostic::new("src/App.tsx", "Cannot find name 'foo'.")
                .at(12, 5)
                .with_code("TS2304")]
        );
    }

    #[test]
    fn parses_gnu_style_output() {
        let out = "src/main.rs:3:9: error[E0425]: cannot find value `x`\n\
                   lib/util.c:10:2: error: expected ';'\n\
                   warning: unused import\n";
        let diags = parse_diagnostics(out);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].code, "E0425");
        assert_eq!((diags[0].line, diags[0].column), (3, 9));
        assert_eq!(diags[1].file, "lib/util.c");
        assert_eq!(diags[1].code, "");
        assert_eq!(diags[1].message, "expected ';'");
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert!(parse_diagnostics("all good\n\nDone in 1.2s").is_empty());
    }

    #[tokio::test]
    async fn empty_command_is_unavailable() {
        let checker = ProcessChecker::new(Vec::new(), 5);
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            checker.check(dir.path()).await,
            Err(CheckerError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn missing_executable_is_unavailable() {
        let checker = ProcessChecker::new(vec!["quill-no-such-checker".to_string()], 5);
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            checker.check(dir.path()).await,
            Err(CheckerError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_command_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let checker = ProcessChecker::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 'a.ts(1,2): error TS1005: expected'; exit 2".to_string(),
            ],
            30,
        );
        let diags = checker.check(dir.path()).await.unwrap();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file, "a.ts");
    }
}
