//! Problem reports in protocol form.
//!
//! ```text
//! <quill-problem-report summary="2 problems">
//! <problem file="src/a.ts" line="3" column="7" code="TS2304">Cannot find name &apos;x&apos;.</problem>
//! ...
//! </quill-problem-report>
//! ```
//!
//! [`ProblemReporter::parse`] is a left inverse of [`ProblemReporter::format`].

use crate::domain::{Problem, ProblemReport, ProtocolError};
use crate::extract::markup::{
    escape_attr, escape_text, find_marker_end, next_block, parse_attributes, unescape, Scan,
};
use crate::extract::DEFAULT_TAG_PREFIX;

const REPORT_TAG: &str = "problem-report";
const PROBLEM_OPEN: &str = "<problem";
const PROBLEM_CLOSE: &str = "</problem>";

/// Formats and parses problem reports under a tag prefix.
#[derive(Debug, Clone)]
pub struct ProblemReporter {
    prefix: String,
}

impl Default for ProblemReporter {
    fn default() -> Self {
        Self::new(DEFAULT_TAG_PREFIX)
    }
}

impl ProblemReporter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn format(&self, report: &ProblemReport) -> String {
        let mut out = format!(
            "<{}{} summary=\"{}\">\n",
            self.prefix,
            REPORT_TAG,
            escape_attr(&report.summary)
        );
        for problem in &report.problems {
            out.push_str(&format!(
                "<problem file=\"{}\" line=\"{}\" column=\"{}\" code=\"{}\">{}</problem>\n",
                escape_attr(&problem.file),
                problem.line,
                problem.column,
                escape_attr(&problem.code),
                escape_text(&problem.message),
            ));
        }
        out.push_str(&format!("</{}{}>", self.prefix, REPORT_TAG));
        out
    }

    /// Parse the first problem report found in `text`.
    pub fn parse(&self, text: &str) -> Result<ProblemReport, ProtocolError> {
        let tag = format!("{}{}", self.prefix, REPORT_TAG);
        let opener = format!("<{tag}");
        let mut from = 0;
        let block = loop {
            let Some(rel) = text[from..].find(&opener) else {
                return Err(ProtocolError::MissingMarker(tag));
            };
            let pos = from + rel;
            match next_block(text, &self.prefix, pos) {
                Scan::Block(block) if block.name == REPORT_TAG => break block,
                _ => from = pos + opener.len(),
            }
        };

        let attrs = parse_attributes(block.attrs).map_err(|reason| {
            ProtocolError::MalformedAttributes {
                tag: tag.clone(),
                reason,
            }
        })?;
        let summary = attr(&attrs, &tag, "summary")?.to_string();

        let mut problems = Vec::new();
        let body = block.body.unwrap_or("");
        let mut rest = body;
        while let Some(start) = find_problem_open(rest) {
            let attrs_start = start + PROBLEM_OPEN.len();
            let gt = find_marker_end(rest, attrs_start)
                .ok_or_else(|| ProtocolError::MissingMarker("problem".to_string()))?;
            let close = rest[gt + 1..]
                .find(PROBLEM_CLOSE)
                .map(|i| gt + 1 + i)
                .ok_or_else(|| ProtocolError::MissingMarker(PROBLEM_CLOSE.to_string()))?;

            let attrs = parse_attributes(&rest[attrs_start..gt]).map_err(|reason| {
                ProtocolError::MalformedAttributes {
                    tag: "problem".to_string(),
                    reason,
                }
            })?;
            problems.push(Problem {
                file: attr(&attrs, "problem", "file")?.to_string(),
                line: number(&attrs, "line")?,
                column: number(&attrs, "column")?,
                code: attr(&attrs, "problem", "code")?.to_string(),
                message: unescape(&rest[gt + 1..close]),
            });
            rest = &rest[close + PROBLEM_CLOSE.len()..];
        }

        Ok(ProblemReport { summary, problems })
    }

    /// Message asking the generator to fix the reported problems.
    pub fn fix_prompt(&self, report: &ProblemReport) -> String {
        let noun = if report.len() == 1 { "problem" } else { "problems" };
        let mut prompt = format!(
            "Fix the following {} {noun} reported by the checker.\n\n",
            report.len()
        );
        for (i, problem) in report.problems.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. {}:{}:{} - {}",
                i + 1,
                problem.file,
                problem.line,
                problem.column,
                problem.message
            ));
            if !problem.code.is_empty() {
                prompt.push_str(&format!(" ({})", problem.code));
            }
            prompt.push('\n');
        }
        prompt.push('\n');
        prompt.push_str(&self.format(report));
        prompt.push_str("\n\nPlease fix all problems in a concise way.");
        prompt
    }
}

fn find_problem_open(text: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = text[from..].find(PROBLEM_OPEN) {
        let start = from + rel;
        match text[start + PROBLEM_OPEN.len()..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' => return Some(start),
            _ => from = start + PROBLEM_OPEN.len(),
        }
    }
    None
}

fn attr<'a>(attrs: &'a [(String, String)], tag: &str, key: &str) -> Result<&'a str, ProtocolError> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| ProtocolError::MissingAttribute {
            tag: tag.to_string(),
            attribute: key.to_string(),
        })
}

fn number(attrs: &[(String, String)], key: &str) -> Result<u32, ProtocolError> {
    let raw = attr(attrs, "problem", key)?;
    raw.parse().map_err(|_| ProtocolError::InvalidNumber {
        attribute: key.to_string(),
        value: raw.to_string(),
    })
}

/// Format with the default prefix.
pub fn format_problem_report(report: &ProblemReport) -> String {
    ProblemReporter::default().format(report)
}

/// Parse with the default prefix.
pub fn parse_problem_report(text: &str) -> Result<ProblemReport, ProtocolError> {
    ProblemReporter::default().parse(text)
}

/// Fix prompt with the default prefix.
pub fn build_fix_prompt(report: &ProblemReport) -> String {
    ProblemReporter::default().fix_prompt(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Diagnostic;

    fn sample() -> ProblemReport {
        ProblemReport::from_diagnostics(vec![
            Diagnostic::new("src/App.tsx", "Cannot find name 'foo'.")
                .at(3, 7)
                .with_code("TS2304"),
            Diagnostic::new("src/a b/<weird> & \"quoted\".ts", "Type 'A<B>' is not\nassignable & so on")
                .at(10, 1)
                .with_code("TS2322"),
        ])
    }

    #[test]
    fn format_then_parse_roundtrip() {
        let report = sample();
        let text = format_problem_report(&report);
        assert_eq!(parse_problem_report(&text), Ok(report));
    }

    #[test]
    fn roundtrip_with_empty_fields() {
        let report = ProblemReport {
            summary: String::new(),
            problems: vec![Problem {
                file: String::new(),
                line: 0,
                column: 0,
                code: String::new(),
                message: "  padded  ".to_string(),
            }],
        };
        let text = format_problem_report(&report);
        assert_eq!(parse_problem_report(&text), Ok(report));
    }

    #[test]
    fn roundtrip_empty_report() {
        let report = ProblemReport::default();
        assert_eq!(
            parse_problem_report(&format_problem_report(&report)),
            Ok(report)
        );
    }

    #[test]
    fn parse_finds_report_inside_prose() {
        let text = format!(
            "Here are the problems:\n<quill-write path=\"x\">y</quill-write>\n{}\nthanks",
            format_problem_report(&sample())
        );
        assert_eq!(parse_problem_report(&text).unwrap().problems.len(), 2);
    }

    #[test]
    fn parse_rejects_missing_report_and_bad_numbers() {
        assert!(matches!(
            parse_problem_report("nothing here"),
            Err(ProtocolError::MissingMarker(_))
        ));
        let bad = "<quill-problem-report summary=\"1\">\n<problem file=\"a\" line=\"x\" column=\"1\" code=\"\">m</problem>\n</quill-problem-report>";
        assert!(matches!(
            parse_problem_report(bad),
            Err(ProtocolError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn fix_prompt_lists_problems_and_embeds_report() {
        let prompt = build_fix_prompt(&sample());
        assert!(prompt.starts_with("Fix the following 2 problems"));
        assert!(prompt.contains("1. src/App.tsx:3:7 - Cannot find name 'foo'. (TS2304)"));
        assert!(prompt.contains("<quill-problem-report summary=\"2 problems\">"));
    }
}
