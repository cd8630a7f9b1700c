//! Minimal JSONPath field projection in the dialect kubectl accepts for
//! `-o jsonpath=...`.
//!
//! Supported: `{...}` template braces, `.key` segments, `\.` escaped dots
//! inside keys, `[N]` array indices and `['key']` quoted keys. Filters,
//! wildcards and recursive descent are not.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JsonPathError {
    #[error("empty JSONPath")]
    Empty,

    #[error("invalid JSONPath {path:?}: {reason}")]
    Invalid { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

fn invalid(path: &str, reason: &str) -> JsonPathError {
    JsonPathError::Invalid {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bracket(path: &str, inner: &str) -> Result<Segment, JsonPathError> {
    let inner = inner.trim();
    for quote in ['\'', '"'] {
        if let Some(key) = inner.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return Ok(Segment::Key(key.to_string()));
        }
    }
    inner
        .parse::<usize>()
        .map(Segment::Index)
        .map_err(|_| invalid(path, "bracket must hold an index or a quoted key"))
}

impl FromStr for JsonPath {
    type Err = JsonPathError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(JsonPathError::Empty);
        }

        let body = match trimmed.strip_prefix('{') {
            Some(rest) => rest
                .strip_suffix('}')
                .ok_or_else(|| invalid(raw, "unbalanced braces"))?,
            None => trimmed,
        };
        let body = body
            .strip_prefix('.')
            .ok_or_else(|| invalid(raw, "path must start with '.'"))?;
        if body.is_empty() {
            return Err(JsonPathError::Empty);
        }

        let mut segments = Vec::new();
        let mut key = String::new();
        // True right after a `[...]` segment, where only `.` or `[` may follow.
        let mut after_bracket = false;
        let mut chars = body.chars();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if key.is_empty() && !after_bracket {
                        return Err(invalid(raw, "empty segment"));
                    }
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    after_bracket = false;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut key)));
                    }
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(ch) => inner.push(ch),
                            None => return Err(invalid(raw, "unclosed '['")),
                        }
                    }
                    segments.push(parse_bracket(raw, &inner)?);
                    after_bracket = true;
                }
                _ if after_bracket => {
                    return Err(invalid(raw, "expected '.' or '[' after ']'"));
                }
                '\\' => {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| invalid(raw, "dangling escape"))?;
                    key.push(escaped);
                }
                _ => key.push(c),
            }
        }

        if !key.is_empty() {
            segments.push(Segment::Key(key));
        } else if !after_bracket {
            return Err(invalid(raw, "trailing '.'"));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl JsonPath {
    /// Walk the path; `None` if any segment is missing.
    #[must_use]
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match segment {
                Segment::Key(key) => current.get(key.as_str()),
                Segment::Index(index) => current.get(*index),
            })
    }

    /// Resolve and render the field the way kubectl prints it: strings
    /// verbatim, other values as compact JSON. `null` counts as missing.
    #[must_use]
    pub fn render(&self, value: &Value) -> Option<String> {
        match self.resolve(value)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DEFAULT_CLASS: &str = r"{.metadata.annotations.storageclass\.kubernetes\.io/is-default-class}";

    fn storage_class(annotation: Option<&str>) -> Value {
        let mut sc = json!({
            "apiVersion": "storage.k8s.io/v1",
            "kind": "StorageClass",
            "metadata": { "name": "longhorn", "annotations": {} },
            "provisioner": "driver.longhorn.io",
            "parameters": { "numberOfReplicas": "3" },
        });
        if let Some(value) = annotation {
            sc["metadata"]["annotations"]["storageclass.kubernetes.io/is-default-class"] = json!(value);
        }
        sc
    }

    #[test]
    fn test_escaped_dots_resolve_annotation() {
        let path: JsonPath = DEFAULT_CLASS.parse().unwrap();
        assert_eq!(path.render(&storage_class(Some("true"))).as_deref(), Some("true"));
        assert_eq!(path.render(&storage_class(Some("false"))).as_deref(), Some("false"));
        assert_eq!(path.render(&storage_class(None)), None);
    }

    #[test]
    fn test_braces_are_optional() {
        let braced: JsonPath = "{.metadata.name}".parse().unwrap();
        let bare: JsonPath = ".metadata.name".parse().unwrap();
        let sc = storage_class(None);
        assert_eq!(braced.render(&sc), bare.render(&sc));
        assert_eq!(bare.render(&sc).as_deref(), Some("longhorn"));
    }

    #[test]
    fn test_indices_and_quoted_keys() {
        let pod = json!({
            "status": {
                "conditions": [
                    { "type": "Initialized", "status": "True" },
                    { "type": "Ready", "status": "False" }
                ]
            },
            "metadata": { "labels": { "app.kubernetes.io/name": "argocd-server" } }
        });

        let path: JsonPath = ".status.conditions[1].status".parse().unwrap();
        assert_eq!(path.render(&pod).as_deref(), Some("False"));

        let path: JsonPath = ".metadata.labels['app.kubernetes.io/name']".parse().unwrap();
        assert_eq!(path.render(&pod).as_deref(), Some("argocd-server"));

        let path: JsonPath = ".status.conditions[7].status".parse().unwrap();
        assert_eq!(path.render(&pod), None);
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let value = json!({ "spec": { "replicas": 3, "paused": false, "ports": [80, 443] } });
        let render = |p: &str| p.parse::<JsonPath>().unwrap().render(&value);

        assert_eq!(render(".spec.replicas").as_deref(), Some("3"));
        assert_eq!(render(".spec.paused").as_deref(), Some("false"));
        assert_eq!(render(".spec.ports").as_deref(), Some("[80,443]"));
    }

    #[test]
    fn test_null_is_missing() {
        let value = json!({ "metadata": { "deletionTimestamp": null } });
        let path: JsonPath = ".metadata.deletionTimestamp".parse().unwrap();
        assert_eq!(path.render(&value), None);
    }

    #[test]
    fn test_invalid_paths() {
        for raw in ["", "{}", ".", "metadata.name", ".a..b", ".a.", "{.a", ".a[x]", ".a[0", ".a[0]b", r".a\"] {
            assert!(raw.parse::<JsonPath>().is_err(), "expected {raw:?} to be rejected");
        }
    }

    #[test]
    fn test_display_keeps_original_text() {
        let path: JsonPath = DEFAULT_CLASS.parse().unwrap();
        assert_eq!(path.to_string(), DEFAULT_CLASS);
    }
}
