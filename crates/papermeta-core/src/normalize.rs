//! Coercion of loosely-typed model output into record fields.
//!
//! Models do not reliably follow the requested schema: authors arrive as
//! objects, keywords as a single comma-separated string, years as numbers.
//! These helpers accept all of those shapes.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Placeholder the extraction prompt asks the model to use for missing fields.
const UNKNOWN: &str = "unknown";

fn is_placeholder(s: &str) -> bool {
    s.is_empty() || s.eq_ignore_ascii_case(UNKNOWN)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A single text field. Lists are joined with ", "; null and "unknown" become empty.
pub fn text(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let s = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_to_string)
            .filter(|s| !is_placeholder(s))
            .collect::<Vec<_>>()
            .join(", "),
        other => scalar_to_string(other).unwrap_or_default(),
    };
    if is_placeholder(&s) { String::new() } else { s }
}

/// Split "a, b; c" into ["a", "b", "c"]. A string without separators is one item.
pub fn split_list(s: &str) -> Vec<String> {
    static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*[,;]\s*").unwrap());
    SEPARATOR
        .split(s.trim())
        .map(str::trim)
        .filter(|part| !is_placeholder(part))
        .map(String::from)
        .collect()
}

fn author_name(value: &Value) -> Option<String> {
    match value {
        Value::Object(obj) => {
            let field = |key: &str| {
                obj.get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or("")
                    .to_string()
            };
            let name = field("name");
            if !name.is_empty() {
                return Some(name);
            }
            let joined = format!("{} {}", field("first_name"), field("last_name"))
                .trim()
                .to_string();
            if !joined.is_empty() {
                return Some(joined);
            }
            let full = field("full_name");
            (!full.is_empty()).then_some(full)
        }
        other => scalar_to_string(other),
    }
}

/// Author list from a list of strings, a list of name objects, or a delimited string.
pub fn authors(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(author_name)
            .filter(|name| !is_placeholder(name))
            .collect(),
        Some(Value::String(s)) => split_list(s),
        _ => Vec::new(),
    }
}

/// Keyword list from a list or a delimited string.
pub fn keywords(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(scalar_to_string)
            .filter(|k| !is_placeholder(k))
            .collect(),
        Some(Value::String(s)) => split_list(s),
        _ => Vec::new(),
    }
}

/// Strip `doi:` and resolver URL prefixes, leaving the bare `10.xxxx/...` form.
pub fn doi(raw: &str) -> String {
    static PREFIX: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^(?:doi:\s*|https?://(?:dx\.)?doi\.org/)").unwrap()
    });
    let trimmed = raw.trim();
    PREFIX
        .replace(trimmed, "")
        .trim_end_matches(['.', ',', ';'])
        .to_string()
}
