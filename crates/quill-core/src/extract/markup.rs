//! Low-level scanning of `<tag attr="..">body</tag>` markup embedded in
//! free-form text.

/// A fully delimited tag block found in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock<'t> {
    /// Byte offset of the opening `<`.
    pub start: usize,
    /// Byte offset just past the closing marker.
    pub end: usize,
    /// Byte offset just past the opening marker's `>`.
    pub open_end: usize,
    /// Tag name without the namespace prefix.
    pub name: &'t str,
    /// Raw text between the tag name and the end of the opening marker.
    pub attrs: &'t str,
    /// `None` for self-closing blocks.
    pub body: Option<&'t str>,
}

/// Result of looking for the next block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan<'t> {
    Block(RawBlock<'t>),
    /// A complete opening marker with no matching closing marker anywhere
    /// after it. Scanning may continue from `resume`.
    Unclosed {
        start: usize,
        name: &'t str,
        resume: usize,
    },
    /// An opening marker starts at this offset but the marker itself is not
    /// yet terminated. Everything after it belongs to that block.
    Unterminated(usize),
    Done,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Find the next block whose name starts with `prefix`, searching from `from`.
pub fn next_block<'t>(text: &'t str, prefix: &str, from: usize) -> Scan<'t> {
    let opener = format!("<{prefix}");
    let mut cursor = from;

    while let Some(rel) = text[cursor..].find(&opener) {
        let start = cursor + rel;
        let name_start = start + opener.len();
        let name_len = text[name_start..]
            .char_indices()
            .find(|(_, c)| !is_name_char(*c))
            .map(|(i, _)| i);

        let Some(name_len) = name_len else {
            // Text ends inside the tag name.
            return Scan::Unterminated(start);
        };
        let name_end = name_start + name_len;
        let next = text[name_end..].chars().next();
        let delimited = matches!(next, Some(c) if c.is_whitespace() || c == '>' || c == '/');
        if name_len == 0 || !delimited {
            cursor = name_start;
            continue;
        }

        let Some(gt) = find_marker_end(text, name_end) else {
            return Scan::Unterminated(start);
        };
        let name = &text[name_start..name_end];
        let inner = &text[name_end..gt];

        if let Some(attrs) = inner.trim_end().strip_suffix('/') {
            return Scan::Block(RawBlock {
                start,
                end: gt + 1,
                open_end: gt + 1,
                name,
                attrs,
                body: None,
            });
        }

        let closer = format!("</{prefix}{name}>");
        let body_start = gt + 1;
        return match text[body_start..].find(&closer) {
            Some(rel_close) => {
                let close = body_start + rel_close;
                Scan::Block(RawBlock {
                    start,
                    end: close + closer.len(),
                    open_end: body_start,
                    name,
                    attrs: inner,
                    body: Some(&text[body_start..close]),
                })
            }
            None => Scan::Unclosed {
                start,
                name,
                resume: body_start,
            },
        };
    }

    Scan::Done
}

/// Index of the `>` ending an opening marker, skipping quoted values.
pub fn find_marker_end(text: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text[from..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Some(from + i),
            None => {}
        }
    }
    None
}

/// Parse `key="value"` pairs (single quotes also accepted) in order.
pub fn parse_attributes(raw: &str) -> Result<Vec<(String, String)>, String> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut rest = raw.trim_start();

    while !rest.is_empty() {
        let key_len = rest
            .char_indices()
            .find(|(_, c)| !is_name_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if key_len == 0 {
            return Err(format!("unexpected character in attributes: {rest:?}"));
        }
        let key = &rest[..key_len];
        rest = rest[key_len..].trim_start();

        let Some(after_eq) = rest.strip_prefix('=') else {
            return Err(format!("attribute {key} has no value"));
        };
        rest = after_eq.trim_start();

        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(format!("attribute {key} value must be quoted")),
        };
        let Some(close) = rest[1..].find(quote) else {
            return Err(format!("attribute {key} value is not terminated"));
        };
        let value = unescape(&rest[1..1 + close]);
        rest = rest[close + 2..].trim_start();

        if attrs.iter().any(|(k, _)| k == key) {
            return Err(format!("duplicate attribute {key}"));
        }
        attrs.push((key.to_string(), value));
    }

    Ok(attrs)
}

/// Escape a value for use inside a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Escape element text.
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

const ENTITIES: [(&str, char); 5] = [
    ("&amp;", '&'),
    ("&quot;", '"'),
    ("&apos;", '\''),
    ("&lt;", '<'),
    ("&gt;", '>'),
];

/// Decode the five XML entities; anything else is kept literally.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, decoded)) => {
                out.push(*decoded);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Strip a surrounding fenced code block, keeping the inner text verbatim.
///
/// Only the first and last lines are removed; fence-looking lines inside are
/// preserved. Bodies that are not fully fenced are returned unchanged.
pub fn strip_code_fence(body: &str) -> &str {
    let trimmed = body.trim();
    if !trimmed.starts_with("```") {
        return body;
    }
    let Some(first_newline) = trimmed.find('\n') else {
        return body;
    };
    let inner = &trimmed[first_newline + 1..];
    let Some(last_newline) = inner.rfind('\n') else {
        return if is_fence_line(inner) { "" } else { body };
    };
    if !is_fence_line(&inner[last_newline + 1..]) {
        return body;
    }
    &inner[..last_newline + 1]
}

fn is_fence_line(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3 && line.chars().all(|c| c == '`')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_bodied_block() {
        let text = r#"intro <q-write path="a.txt">hello</q-write> outro"#;
        match next_block(text, "q-", 0) {
            Scan::Block(b) => {
                assert_eq!(b.name, "write");
                assert_eq!(b.body, Some("hello"));
                assert_eq!(&text[b.start..b.end], r#"<q-write path="a.txt">hello</q-write>"#);
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn finds_self_closing_block() {
        let text = r#"<q-delete path="a.txt" />"#;
        match next_block(text, "q-", 0) {
            Scan::Block(b) => {
                assert_eq!(b.name, "delete");
                assert_eq!(b.body, None);
                assert_eq!(b.attrs.trim(), r#"path="a.txt""#);
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn gt_inside_quotes_does_not_end_marker() {
        let text = r#"<q-write path="a.txt" description="x > y">body</q-write>"#;
        match next_block(text, "q-", 0) {
            Scan::Block(b) => assert_eq!(b.body, Some("body")),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_blocks_are_reported() {
        assert_eq!(next_block("abc <q-wri", "q-", 0), Scan::Unterminated(4));
        assert_eq!(
            next_block(r#"<q-write path="a"#, "q-", 0),
            Scan::Unterminated(0)
        );
        assert_eq!(next_block("no tags here", "q-", 0), Scan::Done);
    }

    #[test]
    fn missing_closer_reports_resume_point() {
        let text = r#"<q-write path="a">partial body"#;
        assert_eq!(
            next_block(text, "q-", 0),
            Scan::Unclosed {
                start: 0,
                name: "write",
                resume: 18,
            }
        );
    }

    #[test]
    fn open_end_points_past_opening_marker() {
        let text = r#"<q-write path="a">body</q-write>"#;
        match next_block(text, "q-", 0) {
            Scan::Block(b) => assert_eq!(&text[b.open_end..b.end], "body</q-write>"),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn non_tag_prefix_matches_are_skipped() {
        let text = r#"<q-.oops <q-delete path="a"/>"#;
        assert!(matches!(next_block(text, "q-", 0), Scan::Block(b) if b.name == "delete"));
    }

    #[test]
    fn parses_attributes_in_any_order() {
        let attrs = parse_attributes(r#" to="b.txt"  from='a.txt' "#).unwrap();
        assert_eq!(
            attrs,
            vec![
                ("to".to_string(), "b.txt".to_string()),
                ("from".to_string(), "a.txt".to_string())
            ]
        );
    }

    #[test]
    fn rejects_malformed_attributes() {
        assert!(parse_attributes("path=a.txt").is_err());
        assert!(parse_attributes(r#"path="a.txt"#).is_err());
        assert!(parse_attributes(r#"path="a" path="b""#).is_err());
        assert!(parse_attributes("path").is_err());
    }

    #[test]
    fn escape_and_unescape_are_inverse() {
        let raw = r#"a & b < c > d "quoted" &amp; literal"#;
        assert_eq!(unescape(&escape_attr(raw)), raw);
        assert_eq!(unescape(&escape_text(raw)), raw);
        assert_eq!(unescape("fish &chips &apos;"), "fish &chips '");
    }

    #[test]
    fn strips_outer_fence_only() {
        let body = "\n```tsx\nconst a = 1;\n```js\nnested\n```\nconst b = 2;\n```\n";
        assert_eq!(
            strip_code_fence(body),
            "const a = 1;\n```js\nnested\n```\nconst b = 2;\n"
        );
    }

    #[test]
    fn unfenced_body_is_verbatim() {
        let body = "\n  indented\n";
        assert_eq!(strip_code_fence(body), body);
        let half = "```\nno closing fence";
        assert_eq!(strip_code_fence(half), half);
    }
}
