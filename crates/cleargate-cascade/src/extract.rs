//! Structured data extraction from free-text generation output.
//!
//! Paths use dots for object keys and `[n]` for array indices:
//! `data.items`, `sections[0].children`, `[2].name`. An empty path or `$`
//! addresses the document root.

use serde_json::Value;
use thiserror::Error;

/// Nesting below which `array_paths` stops looking.
const MAX_PATH_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("no JSON object or array found in response")]
    NoJson,
    #[error("invalid path syntax: {path}")]
    InvalidPath { path: String },
    #[error("path `{path}` not found in extracted data")]
    PathNotFound {
        path: String,
        available_paths: Vec<String>,
    },
    #[error("value at `{path}` is {found}, expected an array")]
    NotAnArray {
        path: String,
        found: &'static str,
        available_paths: Vec<String>,
    },
}

impl ExtractError {
    /// Whether this is a shape failure (as opposed to no data at all).
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::NoJson)
    }

    pub fn available_paths(&self) -> &[String] {
        match self {
            Self::PathNotFound {
                available_paths, ..
            }
            | Self::NotAnArray {
                available_paths, ..
            } => available_paths,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Pull the first JSON object or array out of `text`.
///
/// Tries, in order: the whole text, fenced code blocks, then the first
/// balanced `{…}` or `[…]` span that parses.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Ok(value);
        }
    }

    for block in fenced_blocks(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            if value.is_object() || value.is_array() {
                return Ok(value);
            }
        }
    }

    let bytes = trimmed.as_bytes();
    for (start, &b) in bytes.iter().enumerate() {
        if b != b'{' && b != b'[' {
            continue;
        }
        if let Some(end) = balanced_end(bytes, start) {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(ExtractError::NoJson)
}

/// Contents of ``` fenced blocks, language tag stripped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(after.len());
        let body = &after[body_start..];
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Index of the bracket closing the one at `start`, skipping string contents.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<Segment>, ExtractError> {
    let invalid = || ExtractError::InvalidPath {
        path: path.to_string(),
    };
    let path = path.trim();
    let path = path.strip_prefix('$').unwrap_or(path);
    let path = path.strip_prefix('.').unwrap_or(path);

    let mut segments = Vec::new();
    for part in path.split('.').filter(|p| !p.is_empty()) {
        let (key, mut rest) = match part.find('[') {
            Some(i) => (&part[..i], &part[i..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            segments.push(Segment::Key(key.to_string()));
        }
        while !rest.is_empty() {
            let close = rest.find(']').ok_or_else(invalid)?;
            let index = rest[1..close].trim().parse().map_err(|_| invalid())?;
            segments.push(Segment::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return Err(invalid());
            }
        }
    }
    Ok(segments)
}

/// Value at `path`, if present.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Result<Option<&'a Value>, ExtractError> {
    let mut current = value;
    for segment in parse_path(path)? {
        let next = match (&segment, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k),
            (Segment::Index(i), Value::Array(items)) => items.get(*i),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Every path in `value` that holds an array, in document order. The root is `$`.
pub fn array_paths(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_array_paths(value, String::new(), 0, &mut out);
    out
}

fn collect_array_paths(value: &Value, prefix: String, depth: usize, out: &mut Vec<String>) {
    if depth > MAX_PATH_DEPTH {
        return;
    }
    match value {
        Value::Array(items) => {
            out.push(if prefix.is_empty() {
                "$".to_string()
            } else {
                prefix.clone()
            });
            for (i, item) in items.iter().enumerate() {
                if item.is_object() || item.is_array() {
                    collect_array_paths(item, format!("{prefix}[{i}]"), depth + 1, out);
                }
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect_array_paths(child, path, depth + 1, out);
            }
        }
        _ => {}
    }
}

/// The array at `path` in `value`, or a diagnostic listing the array
/// paths that do exist.
pub fn resolve_array<'a>(value: &'a Value, path: &str) -> Result<&'a Value, ExtractError> {
    let display = if path.trim().is_empty() { "$" } else { path.trim() };
    match lookup_path(value, path)? {
        Some(found @ Value::Array(_)) => Ok(found),
        Some(other) => Err(ExtractError::NotAnArray {
            path: display.to_string(),
            found: type_name(other),
            available_paths: array_paths(value),
        }),
        None => Err(ExtractError::PathNotFound {
            path: display.to_string(),
            available_paths: array_paths(value),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_bare_json() {
        assert_eq!(extract_json(r#" [1, 2] "#).unwrap(), json!([1, 2]));
    }

    #[test]
    fn extracts_from_code_fence() {
        let text = "Here you go:\n```json\n{\"items\": [\"a\"]}\n```\nEnjoy.";
        assert_eq!(extract_json(text).unwrap(), json!({"items": ["a"]}));
    }

    #[test]
    fn extracts_first_balanced_span_ignoring_braces_in_strings() {
        let text = r#"Sure! {"title": "a } tricky {", "items": [1]} trailing"#;
        assert_eq!(
            extract_json(text).unwrap(),
            json!({"title": "a } tricky {", "items": [1]})
        );
    }

    #[test]
    fn skips_unparseable_spans() {
        let text = "note {not json} then [\"ok\"]";
        assert_eq!(extract_json(text).unwrap(), json!(["ok"]));
    }

    #[test]
    fn scalar_or_prose_is_no_json() {
        assert_eq!(extract_json("42").unwrap_err(), ExtractError::NoJson);
        assert_eq!(extract_json("just words").unwrap_err(), ExtractError::NoJson);
        assert_eq!(extract_json("{\"open\": ").unwrap_err(), ExtractError::NoJson);
    }

    #[test]
    fn lookup_dotted_and_indexed() {
        let v = json!({"data": {"sections": [{"children": ["x", "y"]}]}});
        assert_eq!(
            lookup_path(&v, "data.sections[0].children").unwrap(),
            Some(&json!(["x", "y"]))
        );
        assert_eq!(lookup_path(&v, "").unwrap(), Some(&v));
        assert_eq!(lookup_path(&v, "$").unwrap(), Some(&v));
        assert_eq!(lookup_path(&v, "data.missing").unwrap(), None);
        assert_eq!(lookup_path(&v, "data.sections[3]").unwrap(), None);
        assert!(lookup_path(&v, "data.sections[x]").is_err());
    }

    #[test]
    fn array_paths_lists_nested_arrays() {
        let v = json!({"a": [ {"b": [1]} ], "c": {"d": []}, "e": 1});
        assert_eq!(array_paths(&v), vec!["a", "a[0].b", "c.d"]);
        assert_eq!(array_paths(&json!([])), vec!["$"]);
    }

    #[test]
    fn resolve_array_reports_alternatives() {
        let v = json!({"data": {"items": [1, 2], "title": "t"}});
        assert_eq!(resolve_array(&v, "data.items").unwrap(), &json!([1, 2]));

        let err = resolve_array(&v, "data.title").unwrap_err();
        assert!(matches!(err, ExtractError::NotAnArray { found: "a string", .. }));
        assert_eq!(err.available_paths(), ["data.items".to_string()]);

        let err = resolve_array(&v, "").unwrap_err();
        assert!(matches!(err, ExtractError::NotAnArray { .. }));

        let err = resolve_array(&v, "items").unwrap_err();
        assert!(matches!(err, ExtractError::PathNotFound { .. }));
        assert!(err.is_validation());
    }
}
