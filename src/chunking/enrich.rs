//! Best-effort chunk enrichment.
//!
//! Extracts call edges, constant assignments, config keys, and semantic
//! tags from chunk text. Enrichment never blocks chunking: anything that
//! fails to parse simply contributes nothing.

use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::OnceLock;

use super::language::Language;

/// Compliance lexicon matched against file content for semantic tags.
pub const TAG_LEXICON: &[&str] = &["kyc", "storage", "upi", "auth", "payment", "compliance"];

/// Keywords that look like calls but are control flow.
const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "match", "return", "catch", "new", "def", "fn", "func",
    "class", "elif", "except", "print", "assert", "raise", "yield", "await", "async", "with",
];

fn call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap()
    })
}

fn constant_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(
            r#"(?m)^\s*(?:(?:pub\s+)?(?:const|static|final|let|var)\s+)?([A-Z][A-Z0-9_]{2,})(?:\s*:\s*[\w<>\[\] ]+)?\s*=\s*([^;\n]+)"#,
        )
        .unwrap()
    })
}

fn threshold_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?i)(limit|max|min|threshold|retention|timeout|ttl)").unwrap()
    })
}

/// Extracts function-call edges within a span.
///
/// Returns deduplicated callee names in first-appearance order, with
/// control-flow keywords filtered out.
#[must_use]
pub fn call_links(text: &str) -> Vec<String> {
    let mut links = Vec::new();
    for caps in call_regex().captures_iter(text) {
        let name = &caps[1];
        if CALL_KEYWORDS.contains(&name) {
            continue;
        }
        if !links.iter().any(|l| l == name) {
            links.push(name.to_string());
        }
    }
    links
}

/// Extracts UPPER_SNAKE constant assignments from a span.
#[must_use]
pub fn constants(text: &str) -> Map<String, Value> {
    let mut vars = Map::new();
    for caps in constant_regex().captures_iter(text) {
        let name = caps[1].to_string();
        let raw = caps[2].trim().trim_end_matches(',');
        vars.insert(name, literal_value(raw));
    }
    vars
}

/// Selects the threshold-named subset of extracted constants.
#[must_use]
pub fn threshold_keys(vars: &Map<String, Value>) -> Map<String, Value> {
    vars.iter()
        .filter(|(k, _)| threshold_regex().is_match(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Semantic tags present in file content, in lexicon order.
#[must_use]
pub fn semantic_tags(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    TAG_LEXICON
        .iter()
        .filter(|tag| lower.contains(*tag))
        .map(|tag| (*tag).to_string())
        .collect()
}

/// Extracts flat config keys from JSON, YAML, or dotenv content.
///
/// Nested structures are flattened one level with dotted keys; anything
/// unparseable yields an empty map.
#[must_use]
pub fn config_file_keys(content: &str, language: Language) -> Map<String, Value> {
    match language {
        Language::Json => json_keys(content),
        Language::Yaml => yaml_keys(content),
        Language::Env => env_keys(content),
        _ => Map::new(),
    }
}

fn json_keys(content: &str) -> Map<String, Value> {
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(content) else {
        return Map::new();
    };
    let mut keys = Map::new();
    for (k, v) in obj {
        match v {
            Value::Object(nested) => {
                for (nk, nv) in nested {
                    if !nv.is_object() && !nv.is_array() {
                        keys.insert(format!("{k}.{nk}"), nv);
                    }
                }
            }
            Value::Array(_) => {}
            scalar => {
                keys.insert(k, scalar);
            }
        }
    }
    keys
}

/// Line-oriented YAML scalar extraction; good enough for flat config
/// maps without pulling in a YAML parser.
fn yaml_keys(content: &str) -> Map<String, Value> {
    let mut keys = Map::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') || trimmed.starts_with('-') {
            continue;
        }
        // Only top-level keys
        if line.starts_with(char::is_whitespace) {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once(':') {
            let value = value.trim();
            if !key.is_empty() && !value.is_empty() {
                keys.insert(key.trim().to_string(), literal_value(value));
            }
        }
    }
    keys
}

fn env_keys(content: &str) -> Map<String, Value> {
    let mut keys = Map::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            keys.insert(key.trim().to_string(), literal_value(value.trim()));
        }
    }
    keys
}

/// Interprets a literal token as a JSON value: number, boolean, or
/// quoted/bare string.
fn literal_value(raw: &str) -> Value {
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    if let Some(s) = unquoted {
        return Value::String(s.to_string());
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match raw {
        "true" | "True" => Value::Bool(true),
        "false" | "False" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
