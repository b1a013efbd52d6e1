//! Declaration span extraction.
//!
//! Lightweight language heuristics stand in for a full parser:
//! indent-scoped bodies for Python, brace-balanced bodies for the
//! brace-delimited languages. AST integration is a pluggable capability;
//! when absent this extractor is authoritative.

use regex::Regex;
use std::sync::OnceLock;

use super::language::{Language, SpanStyle};

/// A declaration span found in a source file.
///
/// Lines are 1-based and inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    /// Declared name.
    pub name: String,
    /// Node kind: `function`, `class`, or `declaration`.
    pub node_type: &'static str,
    /// First line of the span.
    pub start_line: usize,
    /// Last line of the span.
    pub end_line: usize,
    /// The span text (lines joined with `\n`).
    pub text: String,
}

/// Extracts declaration spans from source content.
///
/// Returns an empty vector when the language has no span heuristic or
/// no declarations were found; callers fall back to fixed windows.
#[must_use]
pub fn extract_spans(content: &str, language: Language) -> Vec<Span> {
    match language.span_style() {
        Some(SpanStyle::Indent) => extract_indent_spans(content),
        Some(SpanStyle::Brace) => extract_brace_spans(content, language),
        Some(SpanStyle::Config) | None => Vec::new(),
    }
}

/// Splits content into fixed line windows for files with no recognized
/// declaration structure.
///
/// Returns `(start_line, end_line, text)` triples, 1-based inclusive.
#[must_use]
pub fn fixed_windows(content: &str, window_lines: usize) -> Vec<(usize, usize, String)> {
    let lines: Vec<&str> = content.lines().collect();
    let mut windows = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let end = (i + window_lines).min(lines.len());
        windows.push((i + 1, end, lines[i..end].join("\n")));
        i = end;
    }
    windows
}

fn indent_decl_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^(async\s+def|def|class)\s+(\w+)").unwrap()
    })
}

/// Indent-scoped extraction for Python.
///
/// A declaration's body ends at the first non-blank, non-comment line
/// whose indentation does not exceed the declaration's own.
fn extract_indent_spans(content: &str) -> Vec<Span> {
    let lines: Vec<&str> = content.lines().collect();
    let mut spans = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        let Some(caps) = indent_decl_regex().captures(trimmed) else {
            continue;
        };
        let keyword = &caps[1];
        let name = caps[2].to_string();
        let base_indent = line.len() - trimmed.len();

        // Only top-level declarations start spans; nested defs stay
        // inside their parent's span.
        if base_indent > 0 {
            continue;
        }

        let mut end = lines.len();
        for (j, candidate) in lines.iter().enumerate().skip(i + 1) {
            let t = candidate.trim_start();
            if t.is_empty() || t.starts_with('#') {
                continue;
            }
            let indent = candidate.len() - t.len();
            if indent <= base_indent {
                end = j;
                break;
            }
        }

        // Trim trailing blank lines out of the span
        let mut last = end;
        while last > i + 1 && lines[last - 1].trim().is_empty() {
            last -= 1;
        }

        spans.push(Span {
            name,
            node_type: if keyword == "class" {
                "class"
            } else {
                "function"
            },
            start_line: i + 1,
            end_line: last,
            text: lines[i..last].join("\n"),
        });
    }

    spans
}

fn brace_decl_regex(language: Language) -> &'static Regex {
    macro_rules! static_regex {
        ($name:ident, $pattern:expr) => {{
            static $name: OnceLock<Regex> = OnceLock::new();
            #[allow(clippy::unwrap_used)]
            $name.get_or_init(|| Regex::new($pattern).unwrap())
        }};
    }

    match language {
        Language::JavaScript | Language::TypeScript => static_regex!(
            JS_DECL,
            r"^(?:export\s+)?(?:abstract\s+)?(function|class|const|let|var)\s+(\w+)"
        ),
        Language::Java => static_regex!(
            JAVA_DECL,
            r"^(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?(?:abstract\s+)?(class|interface|enum)\s+(\w+)|^(?:public|private|protected)\s+(?:static\s+)?[\w<>\[\]]+\s+(\w+)\s*\("
        ),
        Language::Go => static_regex!(GO_DECL, r"^(func|type)\s+(?:\([^)]+\)\s*)?(\w+)"),
        Language::Rust => static_regex!(
            RUST_DECL,
            r"^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(fn|struct|enum|trait|impl|mod)\s+(\w+)"
        ),
        _ => static_regex!(
            C_DECL,
            r"^[\w\*]+[\w\s\*]*\s\*?(\w+)\s*\([^;]*$|^(?:typedef\s+)?(struct|class|enum|namespace)\s+(\w+)"
        ),
    }
}

/// Classifies a brace-language declaration keyword into a node type.
fn brace_node_type(keyword: &str) -> &'static str {
    match keyword {
        "class" | "interface" | "enum" | "struct" | "trait" | "namespace" => "class",
        "const" | "let" | "var" | "type" | "typedef" | "mod" | "impl" => "declaration",
        _ => "function",
    }
}

/// Brace-balanced extraction for C-family languages.
///
/// The span closes when brace depth returns to zero after the body
/// opened. Declarations that never open a brace (prototypes,
/// assignments) close at the first `;`-terminated line.
fn extract_brace_spans(content: &str, language: Language) -> Vec<Span> {
    let lines: Vec<&str> = content.lines().collect();
    let re = brace_decl_regex(language);
    let mut spans = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let trimmed = lines[i].trim_start();
        let Some(caps) = re.captures(trimmed) else {
            i += 1;
            continue;
        };
        let (keyword, name) = capture_keyword_and_name(&caps);

        let mut depth: i64 = 0;
        let mut opened = false;
        let mut end = i;
        for (j, candidate) in lines.iter().enumerate().skip(i) {
            depth += brace_delta(candidate);
            if depth > 0 {
                opened = true;
            }
            if opened && depth <= 0 {
                end = j;
                break;
            }
            if !opened && candidate.trim_end().ends_with(';') {
                end = j;
                break;
            }
            end = j;
        }

        spans.push(Span {
            name,
            node_type: brace_node_type(keyword),
            start_line: i + 1,
            end_line: end + 1,
            text: lines[i..=end].join("\n"),
        });
        i = end + 1;
    }

    spans
}

/// Pulls the declaration keyword and name out of a regex capture,
/// whichever alternative matched. Name groups come after keyword groups
/// in every pattern, so the last participating group is the name.
fn capture_keyword_and_name<'a>(caps: &'a regex::Captures<'a>) -> (&'a str, String) {
    let keyword = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map_or("function", |m| m.as_str());
    let name = (1..caps.len())
        .rev()
        .find_map(|i| caps.get(i))
        .map_or_else(String::new, |m| m.as_str().to_string());
    (keyword, name)
}

/// Net brace depth change for a line, ignoring braces in line comments.
fn brace_delta(line: &str) -> i64 {
    let code = line.split("//").next().unwrap_or(line);
    let opens = code.matches('{').count();
    let closes = code.matches('}').count();
    opens as i64 - closes as i64
}
